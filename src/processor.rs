/// Chain processor: the per-chain state machine that advances, rolls back,
/// and dispatches mining.
///
/// Concurrency discipline uses `tokio::sync::Semaphore` for everything: a
/// capacity-2 `wait` slot coalesces reentrant triggers, a capacity-1 `busy`
/// slot serializes the actual pass, and a capacity-1 `mine_lock` (owned
/// here, acquired by the miner) bounds concurrent mining per chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::chain_id::ChainId;
use crate::config::EngineConfig;
use crate::constants::{self, BLOCK_SYNC_TIME_MS};
use crate::crypto::Signer;
use crate::cross_chain_guard::{self, GuardOutcome};
use crate::errors::CoreError;
use crate::fork_choice;
use crate::messages::{BaseMsg, BlockInfo, Payload, ReqBlockInfo};
use crate::metrics;
use crate::network::Network;
use crate::reliability::{BlockKey, IdBlockItem};
use crate::store::{ChainStore, ReliabilityStore};

/// Per-chain synchronization primitives and progress tracking: an explicit
/// `ChainState` owning its wait/busy/mine synchronization primitives and a
/// `procTime` watermark.
pub struct ChainState {
    wait: Semaphore,
    busy: Semaphore,
    /// `Arc`-wrapped so the miner can hold an owned permit
    /// (`try_acquire_owned`) across a `spawn_blocking` boundary.
    pub mine_lock: Arc<Semaphore>,
    proc_time: AtomicU64,
}

impl ChainState {
    pub fn new() -> Self {
        ChainState {
            wait: Semaphore::new(2),
            busy: Semaphore::new(1),
            mine_lock: Arc::new(Semaphore::new(1)),
            proc_time: AtomicU64::new(constants::now_ms()),
        }
    }

    pub fn proc_time(&self) -> u64 {
        self.proc_time.load(Ordering::SeqCst)
    }

    pub fn set_proc_time(&self, value: u64) {
        self.proc_time.store(value, Ordering::SeqCst);
    }
}

impl Default for ChainState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ProcessorDeps<'a> {
    pub chain_store: &'a dyn ChainStore,
    pub rel_store: &'a dyn ReliabilityStore,
    pub network: &'a dyn Network,
    pub signer: &'a dyn Signer,
    pub config: &'a EngineConfig,
}

/// What a processing pass asks the engine to do next. Re-enqueues are
/// collected rather than spawned directly here so the engine retains full
/// control over its work queues.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessorResult {
    pub reenqueue: Vec<ChainId>,
    pub schedule_mining: bool,
    /// Set when a neighbour chain was just created and still needs its
    /// first block copied in from its parent before normal processing.
    pub bootstrap_child: Option<(ChainId, ChainId)>,
}

impl ProcessorResult {
    fn none() -> Self {
        Self::default()
    }

    fn requeue(chain: ChainId) -> Self {
        ProcessorResult { reenqueue: vec![chain], schedule_mining: false, bootstrap_child: None }
    }

    fn mine() -> Self {
        ProcessorResult { reenqueue: Vec::new(), schedule_mining: true, bootstrap_child: None }
    }

    fn wake(neighbour: ChainId) -> Self {
        ProcessorResult { reenqueue: vec![neighbour], schedule_mining: false, bootstrap_child: None }
    }
}

/// Coalesce via `wait`, serialize via `busy`, then run one pass. Returns
/// `None` if the event was dropped because the wait slot was full.
pub async fn trigger(chain: ChainId, state: &ChainState, deps: &ProcessorDeps<'_>) -> Option<ProcessorResult> {
    let _wait_permit = state.wait.try_acquire().ok()?;
    let _busy_permit = state.busy.acquire().await.expect("busy semaphore never closed");
    Some(process_once(chain, state, deps).await)
}

/// Central error-class dispatch: the `CoreError` predicate methods decide
/// what the processor does next. Call-site-specific bookkeeping (purging a
/// candidate, blacklisting a producer, bumping a metric) happens before this
/// is called; this only decides control flow.
fn dispatch_error(err: CoreError) -> ProcessorResult {
    if err.is_transient_wait() {
        debug!(error = %err, "transient wait");
        return match err {
            CoreError::WaitNeighbour { neighbour, .. } | CoreError::NeighbourAhead { neighbour, .. } => {
                ProcessorResult::wake(neighbour)
            }
            CoreError::RolledBack { chain, .. } => ProcessorResult::requeue(chain),
            _ => ProcessorResult::none(),
        };
    }
    if err.is_recoverable_local() {
        debug!(error = %err, "recoverable local error, candidate purged");
        return ProcessorResult::none();
    }
    if err.is_structural() {
        warn!(error = %err, "structural reset performed");
        return ProcessorResult::none();
    }
    warn!(error = %err, "collaborator error");
    ProcessorResult::none()
}

/// Runs one full processing pass, assuming the `busy` slot is already held.
async fn process_once(chain: ChainId, state: &ChainState, deps: &ProcessorDeps<'_>) -> ProcessorResult {
    let store = deps.chain_store;
    let rel_store = deps.rel_store;
    let now = constants::now_ms();

    match cross_chain_guard::check_other_chain(store, rel_store, chain) {
        Err(err) => {
            if err.is_structural() {
                metrics::increment_rollbacks(&chain.to_string(), "different_parent");
            }
            return dispatch_error(err);
        }
        Ok(GuardOutcome::BootstrapChild(child)) => {
            debug!(chain, child, "neighbour is a freshly-created chain, scheduling bootstrap copy");
            return ProcessorResult { reenqueue: Vec::new(), schedule_mining: false, bootstrap_child: Some((chain, child)) };
        }
        Ok(GuardOutcome::Proceed) => {}
    }

    let last_index = store.last_block_index(chain);
    let chain_label = chain.to_string();

    let best = fork_choice::best_block(store, rel_store, chain, last_index + 1);

    let best = match best {
        Some(b) => b,
        None => return handle_no_candidate(chain, state, deps, last_index, now),
    };

    // step 6: selectedCount bump, persisted before anything else is tried.
    let mut run_stat = rel_store.read_block_run_stat(chain, &best.key);
    run_stat.selected_count += 1;
    rel_store.save_block_run_stat(chain, &best.key, &run_stat);

    let tip_key = store.block_key_at(chain, 0);

    if best.previous != tip_key {
        if !best.previous.is_empty() && !store.is_exist_block(chain, &best.previous) {
            metrics::increment_fork_choice_purged(&chain_label, "not_previous");
            purge(store, rel_store, chain, last_index + 1, best.key);
            return dispatch_error(CoreError::NotPrevious { chain, height: last_index + 1, key: best.key });
        }

        // replacement required at height best.index - 1
        let tip_time = store.block_time(chain);
        let interval = store.block_interval(chain);
        if best.time < tip_time + interval / 2 {
            return dispatch_error(CoreError::BlockTimeTooEarly { chain });
        }
        if tip_time + interval * 3 / 2 > now {
            return dispatch_error(CoreError::TooNewToRollback { chain });
        }

        if let Err(err) = cross_chain_guard::check_and_rollback(store, chain, best.index - 1, &best.previous) {
            return dispatch_error(err);
        }

        metrics::increment_rollbacks(&chain_label, "better_fork");
        let hp = rel_store.read_block_reliability(chain, &best.previous).hash_power;
        let hp = if hp == 0 { crate::reliability::hash_power(&best.previous) } else { hp };
        rel_store.save_id_blocks(chain, best.index - 1, &[IdBlockItem { key: best.previous, hash_power: hp }]);
        return ProcessorResult::requeue(chain);
    }

    // step 8: apply.
    let mut run_stat = rel_store.read_block_run_stat(chain, &best.key);
    run_stat.run_times += 1;
    rel_store.save_block_run_stat(chain, &best.key, &run_stat);

    if let Err(e) = store.process_block_of_chain(chain, &best.key) {
        metrics::increment_blocks_applied(&chain_label, "failure");
        purge(store, rel_store, chain, best.index, best.key);
        if let Some(producer) = &best.producer {
            rel_store.save_black_item(chain, producer);
        }
        return dispatch_error(e);
    }

    // step 9: success bookkeeping.
    state.set_proc_time(now);
    run_stat.run_success_count += 1;
    rel_store.save_block_run_stat(chain, &best.key, &run_stat);
    finish_proc_block(store, rel_store, chain, &best);
    metrics::increment_blocks_applied(&chain_label, "success");
    metrics::set_chain_tip_height(&chain_label, best.index as i64);
    info!(chain, index = best.index, "block applied");

    // step 10/11.
    if best.time + BLOCK_SYNC_TIME_MS < now {
        return ProcessorResult::requeue(chain);
    }

    if deps.config.mining_allowed_on(chain)
        && crate::miner::auto_register_miner(store, deps.network, deps.signer, deps.config, chain)
    {
        debug!(chain, "node auto-registered as a miner");
    }

    deps.network.send_internal_msg(BaseMsg::broadcast(Payload::Block(BlockInfo {
        chain,
        index: best.index,
        key: best.key,
        hash_power: best.hash_power,
        pre_key: best.previous,
    })));
    ProcessorResult::requeue(chain)
}

/// No forward candidate was found at the current tip height.
fn handle_no_candidate(
    chain: ChainId,
    state: &ChainState,
    deps: &ProcessorDeps<'_>,
    last_index: u64,
    now: u64,
) -> ProcessorResult {
    let store = deps.chain_store;
    let rel_store = deps.rel_store;
    let chain_label = chain.to_string();

    // 5a: does a better block exist at the current tip height?
    if last_index > 0 {
        if let Some(challenger) = fork_choice::best_block(store, rel_store, chain, last_index) {
            let tip_key = store.block_key_at(chain, 0);
            if challenger.key != tip_key {
                return match cross_chain_guard::check_and_rollback(store, chain, last_index, &challenger.key) {
                    Ok(()) => {
                        metrics::increment_rollbacks(&chain_label, "challenger_at_tip");
                        ProcessorResult::requeue(chain)
                    }
                    Err(err) => dispatch_error(err),
                };
            }
        }
    }

    // 5b: tip still fresh — just mine.
    let tip_time = store.block_time(chain);
    let interval = store.block_interval(chain);
    if tip_time + interval >= now {
        return ProcessorResult::mine();
    }

    // 5c: long-stale — force a rollback to make progress.
    let proc_time = state.proc_time();
    if proc_time + BLOCK_SYNC_TIME_MS < now {
        state.set_proc_time(now - BLOCK_SYNC_TIME_MS + 60_000);
        metrics::increment_rollbacks(&chain_label, "stale_no_progress");
        let prev_height = last_index.saturating_sub(1);
        store.db_roll_back(chain, prev_height, &store.block_key_at(chain, prev_height));
        return dispatch_error(CoreError::RolledBack { chain, to_height: prev_height });
    }

    // 5d: ask the network for the missing block, with a lookahead if very stale.
    deps.network.send_internal_msg(BaseMsg::random_send(Payload::ReqBlock(ReqBlockInfo {
        chain,
        index: last_index + 1,
    })));
    if tip_time + 10 * 60 * 1000 < now {
        deps.network.send_internal_msg(BaseMsg::random_send(Payload::ReqBlock(ReqBlockInfo {
            chain,
            index: last_index + 10,
        })));
    }
    ProcessorResult::none()
}

fn purge(store: &dyn ChainStore, rel_store: &dyn ReliabilityStore, chain: ChainId, height: u64, key: BlockKey) {
    store.delete_block(chain, &key);
    rel_store.save_block_reliability(chain, &key, &crate::reliability::Reliability::default());
    rel_store.set_block_to_id_blocks(chain, height, key, 0, constants::MINER_NUM);
}

/// Seed `blockLockNum` on declared child-chain blocks as a confirmation
/// bonus, and recompute the final persisted `hashPower` if the adjustment
/// changed it.
fn finish_proc_block(
    store: &dyn ChainStore,
    rel_store: &dyn ReliabilityStore,
    chain: ChainId,
    best: &crate::reliability::Reliability,
) {
    let info = store.chain_info(chain);
    if !best.left_child.is_empty() {
        rel_store.set_block_lock_num(info.left_child_id, &best.left_child, 10);
    }
    if !best.right_child.is_empty() {
        rel_store.set_block_lock_num(info.right_child_id, &best.right_child, 10);
    }

    let mut rel = rel_store.read_block_reliability(chain, &best.key);
    if rel.is_empty() {
        rel = best.clone();
    }
    let recalculated = crate::reliability::hash_power(&best.key);
    if rel.hash_power != recalculated {
        rel.hash_power = recalculated;
        rel_store.save_block_reliability(chain, &best.key, &rel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::crypto::HashSigner;
    use crate::network::BroadcastNetwork;
    use crate::reliability::{BlockKey, ProducerId};
    use crate::store::{InMemoryChainStore, InMemoryReliabilityStore};

    fn key(byte0: u8) -> BlockKey {
        let mut b = [0u8; crate::reliability::KEY_LEN];
        b[0] = byte0;
        BlockKey(b)
    }

    fn genesis(chain: ChainId, store: &InMemoryChainStore, k: BlockKey, time: u64) {
        store.force_apply(
            chain,
            Block {
                chain,
                index: 1,
                key: k,
                previous: BlockKey::EMPTY,
                parent: BlockKey::EMPTY,
                left_child: BlockKey::EMPTY,
                right_child: BlockKey::EMPTY,
                producer: ProducerId(vec![0]),
                time,
                nonce: 0,
                sign: vec![],
                transactions: vec![],
                size: 0,
            },
        );
    }

    #[tokio::test]
    async fn test_clean_advance_applies_and_broadcasts() {
        let chain_store = InMemoryChainStore::new();
        let rel_store = InMemoryReliabilityStore::new();
        let network = BroadcastNetwork::new();
        let signer = HashSigner;
        let config = EngineConfig::default();

        let tip_key = key(1);
        genesis(1, &chain_store, tip_key, constants::now_ms() - 120_000);
        chain_store.set_block_interval(1, 1000);

        let next = Block {
            chain: 1,
            index: 2,
            key: key(2),
            previous: tip_key,
            parent: BlockKey::EMPTY,
            left_child: BlockKey::EMPTY,
            right_child: BlockKey::EMPTY,
            producer: ProducerId(vec![1]),
            time: constants::now_ms() - 1000,
            nonce: 0,
            sign: vec![],
            transactions: vec![],
            size: 5,
        };
        chain_store.insert_candidate(1, next.clone());
        let mut rel = next.reliability();
        rel.hash_power = 100;
        rel_store.save_block_reliability(1, &next.key, &rel);
        rel_store.set_block_to_id_blocks(1, 2, next.key, 100, constants::MINER_NUM);

        let state = ChainState::new();
        let deps = ProcessorDeps {
            chain_store: &chain_store,
            rel_store: &rel_store,
            network: &*network,
            signer: &signer,
            config: &config,
        };
        let mut rx = network.subscribe_outbound();

        let result = process_once(1, &state, &deps).await;

        assert_eq!(chain_store.last_block_index(1), 2);
        assert_eq!(result.reenqueue, vec![1]);
        let sent = rx.try_recv().expect("broadcast expected");
        match sent.payload {
            Payload::Block(b) => assert_eq!(b.key, key(2)),
            _ => panic!("expected block broadcast"),
        }
    }

    #[tokio::test]
    async fn test_apply_failure_blacklists_producer() {
        let chain_store = InMemoryChainStore::new();
        let rel_store = InMemoryReliabilityStore::new();
        let network = BroadcastNetwork::new();
        let signer = HashSigner;
        let config = EngineConfig::default();

        let tip_key = key(1);
        genesis(1, &chain_store, tip_key, constants::now_ms() - 120_000);
        chain_store.set_block_interval(1, 1000);

        // A candidate that is never installed into chain_store's `blocks`
        // map via `insert_candidate` after a tip match — force_apply stores
        // it into `applied`/`blocks` already; to simulate an apply failure
        // we instead omit writing it to the block map at all and rely on
        // `process_block_of_chain` erroring when the block can't be found.
        let missing = key(2);
        let rel = crate::reliability::Reliability {
            index: 2,
            key: missing,
            previous: tip_key,
            time: constants::now_ms(),
            hash_power: 100,
            producer: Some(ProducerId(vec![9])),
            ..Default::default()
        };
        rel_store.save_block_reliability(1, &missing, &rel);
        rel_store.set_block_to_id_blocks(1, 2, missing, 100, constants::MINER_NUM);

        let state = ChainState::new();
        let deps = ProcessorDeps {
            chain_store: &chain_store,
            rel_store: &rel_store,
            network: &*network,
            signer: &signer,
            config: &config,
        };

        let result = process_once(1, &state, &deps).await;

        assert_eq!(chain_store.last_block_index(1), 1);
        assert!(result.reenqueue.is_empty());
        let run_stat = rel_store.read_block_run_stat(1, &missing);
        assert_eq!(run_stat.run_times, 1);
        assert_eq!(run_stat.run_success_count, 0);
        assert!(rel_store.read_id_blocks(1, 2).is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_child_signaled_instead_of_generic_wake() {
        let chain_store = InMemoryChainStore::new();
        let rel_store = InMemoryReliabilityStore::new();
        let network = BroadcastNetwork::new();
        let signer = HashSigner;
        let config = EngineConfig::default();

        genesis(1, &chain_store, key(1), constants::now_ms());
        genesis(2, &chain_store, key(9), constants::now_ms());

        let state = ChainState::new();
        let deps = ProcessorDeps {
            chain_store: &chain_store,
            rel_store: &rel_store,
            network: &*network,
            signer: &signer,
            config: &config,
        };

        let result = process_once(1, &state, &deps).await;
        assert_eq!(result.bootstrap_child, Some((1, 2)));
        assert!(result.reenqueue.is_empty());
    }
}
