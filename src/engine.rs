/// The top-level engine: an explicit `ChainEngine` value carrying storage,
/// network, config, and a per-chain state map, rather than a process-wide
/// singleton. Also owns the timer-driven pre-order scheduler and the
/// fire-and-forget re-enqueue work queues.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::chain_id::{self, ChainId};
use crate::config::EngineConfig;
use crate::crypto::Signer;
use crate::fork_choice;
use crate::metrics;
use crate::miner::{self, MineOutcome};
use crate::network::Network;
use crate::processor::{self, ChainState, ProcessorDeps};
use crate::reliability::ProducerId;
use crate::store::{ChainStore, ReliabilityStore};

const SCHEDULER_INITIAL_DELAY_SECS: u64 = 5;
const SCHEDULER_INTERVAL_SECS: u64 = 20;

pub struct ChainEngine {
    chain_store: Arc<dyn ChainStore>,
    rel_store: Arc<dyn ReliabilityStore>,
    network: Arc<dyn Network>,
    signer: Arc<dyn Signer>,
    config: EngineConfig,
    producer: ProducerId,
    /// The shared state lock: guards the chain-id -> ChainState map.
    /// Critical sections here are map lookup plus optional insert only.
    states: Mutex<HashMap<ChainId, Arc<ChainState>>>,
    /// Highest chain id ever created by `write_first_block_to_chain`, used
    /// to bound the scheduler's tree walk. A `ChainStore` has no notion of
    /// "max allocated chain id", so the engine tracks it itself rather than
    /// walking the (conceptually unbounded) chain-id tree to its full u64
    /// range every pass.
    max_known_chain: AtomicU64,
}

impl ChainEngine {
    pub fn new(
        chain_store: Arc<dyn ChainStore>,
        rel_store: Arc<dyn ReliabilityStore>,
        network: Arc<dyn Network>,
        signer: Arc<dyn Signer>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let producer = ProducerId(config.wallet_addr.clone());
        Arc::new(ChainEngine {
            chain_store,
            rel_store,
            network,
            signer,
            config,
            producer,
            states: Mutex::new(HashMap::new()),
            max_known_chain: AtomicU64::new(chain_id::ROOT),
        })
    }

    fn state_for(&self, chain: ChainId) -> Arc<ChainState> {
        let mut states = self.states.lock().unwrap();
        states.entry(chain).or_insert_with(|| Arc::new(ChainState::new())).clone()
    }

    /// Post a processing trigger for `chain`. Dropped silently if the
    /// chain's `wait` slot is already full.
    pub async fn enqueue(self: &Arc<Self>, chain: ChainId) {
        let state = self.state_for(chain);
        let deps = ProcessorDeps {
            chain_store: &*self.chain_store,
            rel_store: &*self.rel_store,
            network: &*self.network,
            signer: &*self.signer,
            config: &self.config,
        };

        let result = match processor::trigger(chain, &state, &deps).await {
            Some(r) => r,
            None => {
                debug!(chain, "processing event dropped, wait slot full");
                return;
            }
        };

        metrics::set_chain_tip_height(&chain.to_string(), self.chain_store.last_block_index(chain) as i64);

        if let Some((parent, child)) = result.bootstrap_child {
            let engine = self.clone();
            tokio::spawn(async move {
                engine.write_first_block_to_chain(parent, child).await;
            });
        }

        for neighbour in result.reenqueue {
            let engine = self.clone();
            tokio::spawn(async move {
                engine.enqueue(neighbour).await;
            });
        }

        if result.schedule_mining {
            self.maybe_mine(chain).await;
        }
    }

    /// Dispatch mining under the chain's `mine_lock`. CPU-bound nonce search
    /// runs on a blocking thread so it doesn't stall the tokio runtime's
    /// async workers.
    async fn maybe_mine(self: &Arc<Self>, chain: ChainId) {
        if !self.config.mining_allowed_on(chain) {
            return;
        }
        let state = self.state_for(chain);
        let mine_lock = state.mine_lock.clone();
        let permit = match mine_lock.try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                debug!(chain, "mine_lock already held, skipping");
                return;
            }
        };

        let chain_store = self.chain_store.clone();
        let rel_store = self.rel_store.clone();
        let network = self.network.clone();
        let signer = self.signer.clone();
        let config = self.config.clone();

        metrics::increment_mining_attempts(&chain.to_string());
        let outcome = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            miner::try_mine(&*chain_store, &*rel_store, &*network, &*signer, &config, chain)
        })
        .await;

        match outcome {
            Ok(MineOutcome::Produced { key, hash_power }) => {
                metrics::increment_mining_broadcasts(&chain.to_string());
                debug!(chain, %key, hash_power, "mining produced a broadcast candidate");
            }
            Ok(MineOutcome::NoImprovement) => {
                debug!(chain, "mining attempt produced no improving candidate");
            }
            Err(e) => warn!(chain, error = %e, "mining task panicked"),
        }
    }

    /// Periodic timer, pre-order from chain 1, every chain with
    /// `lastIndex > 0`.
    pub async fn run_scheduler(self: Arc<Self>) {
        tokio::time::sleep(std::time::Duration::from_secs(SCHEDULER_INITIAL_DELAY_SECS)).await;
        loop {
            let highest = self.max_known_chain.load(Ordering::Relaxed);
            let mut chains = Vec::new();
            chain_id::walk_preorder(highest, |c| {
                if self.chain_store.last_block_index(c) > 0 {
                    chains.push(c);
                }
            });
            for chain in chains {
                self.clone().enqueue(chain).await;
            }
            tokio::time::sleep(std::time::Duration::from_secs(SCHEDULER_INTERVAL_SECS)).await;
        }
    }

    /// Bootstrap a freshly-created child chain: copy the first transaction
    /// and first block of `parent` into `child`, seed its ID-block list at
    /// height 1 with `hashPower=1000`, and trigger processing on it.
    pub async fn write_first_block_to_chain(self: &Arc<Self>, parent: ChainId, child: ChainId) {
        self.max_known_chain.fetch_max(child, Ordering::Relaxed);
        let first_key = self.chain_store.block_key_at(parent, 1);
        if first_key.is_empty() {
            return;
        }
        if let Some(block) = self.chain_store.read_block_data(parent, &first_key) {
            let mut seeded = block.clone();
            seeded.chain = child;
            self.chain_store.write_block(child, &seeded);
            self.rel_store.save_block_reliability(child, &seeded.key, &seeded.reliability());
            self.rel_store.set_block_to_id_blocks(child, 1, seeded.key, 1000, self.config.miner_num);
        }
        self.clone().enqueue(child).await;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn chain_store(&self) -> &Arc<dyn ChainStore> {
        &self.chain_store
    }

    pub fn producer(&self) -> &ProducerId {
        &self.producer
    }
}

/// Used by `/status`: a coarse liveness snapshot for a chain, combining the
/// applied tip with a fresh fork-choice read at `tip+1`.
pub struct ChainStatus {
    pub chain: ChainId,
    pub last_index: u64,
    pub has_forward_candidate: bool,
}

pub fn status_of(engine: &ChainEngine, chain: ChainId) -> ChainStatus {
    let last_index = engine.chain_store.last_block_index(chain);
    let has_forward_candidate = fork_choice::best_block(&*engine.chain_store, &*engine.rel_store, chain, last_index + 1).is_some();
    ChainStatus { chain, last_index, has_forward_candidate }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::crypto::HashSigner;
    use crate::network::BroadcastNetwork;
    use crate::reliability::BlockKey;
    use crate::store::{InMemoryChainStore, InMemoryReliabilityStore};

    #[tokio::test]
    async fn test_enqueue_on_empty_chain_requests_missing_block() {
        let chain_store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::new());
        let rel_store: Arc<dyn ReliabilityStore> = Arc::new(InMemoryReliabilityStore::new());
        let network = BroadcastNetwork::new();
        let signer: Arc<dyn Signer> = Arc::new(HashSigner);
        let config = EngineConfig::default();

        chain_store.write_block(
            1,
            &Block {
                chain: 1,
                index: 1,
                key: BlockKey([1u8; 32]),
                previous: BlockKey::EMPTY,
                parent: BlockKey::EMPTY,
                left_child: BlockKey::EMPTY,
                right_child: BlockKey::EMPTY,
                producer: ProducerId(vec![]),
                time: 0,
                nonce: 0,
                sign: vec![],
                transactions: vec![],
                size: 0,
            },
        );

        let engine = ChainEngine::new(chain_store, rel_store, network.clone() as Arc<dyn Network>, signer, config);
        let mut rx = network.subscribe_outbound();
        engine.enqueue(1).await;

        // No candidate exists yet, so the processor should have asked for one.
        let msg = rx.try_recv();
        assert!(msg.is_ok());
    }

    #[test]
    fn test_status_of_reports_last_index() {
        let chain_store: Arc<dyn ChainStore> = Arc::new(InMemoryChainStore::new());
        let rel_store: Arc<dyn ReliabilityStore> = Arc::new(InMemoryReliabilityStore::new());
        let network = BroadcastNetwork::new();
        let signer: Arc<dyn Signer> = Arc::new(HashSigner);
        let engine = ChainEngine::new(chain_store, rel_store, network as Arc<dyn Network>, signer, EngineConfig::default());

        let status = status_of(&*engine, 1);
        assert_eq!(status.last_index, 0);
        assert!(!status.has_forward_candidate);
    }
}
