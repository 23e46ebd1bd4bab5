/// Miner: transaction selection and the nonce-search loop that produces and
/// broadcasts improving block candidates.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info};

use crate::block::{Block, MinerInfo, Transaction, TxOp};
use crate::chain_id::ChainId;
use crate::config::EngineConfig;
use crate::constants::{self, MAX_TRANSACTION_SELECTIONS};
use crate::crypto::{self, Signer};
use crate::messages::{BaseMsg, BlockInfo, NewTransactionMsg, Payload};
use crate::network::Network;
use crate::reliability::{hash_power, BlockKey, Reliability};
use crate::store::{ChainStore, ReliabilityStore};

/// How far ahead of the current tip a registration targets: the cost table
/// is read at this lookahead height so the bond clears whatever slot the
/// registration will actually land in by the time it's mined.
const REGISTER_MINER_LOOKAHEAD: u64 = 50;

/// Walk the pending-transaction pool in stored order, discarding
/// expired/invalid/over-selected entries and accumulating up to the
/// block-size limit.
pub fn select_transactions(store: &dyn ChainStore, chain: ChainId, config: &EngineConfig) -> Vec<Transaction> {
    let now = constants::now_ms();
    let size_limit = store.block_size_limit(chain);
    let mut selected = Vec::new();
    let mut total_size: u64 = 0;
    let mut cursor = None;

    loop {
        let tx = match store.next_pending_transaction(chain, cursor) {
            Some(tx) => tx,
            None => break,
        };
        cursor = Some(tx.key);

        if tx.time > now || now.saturating_sub(tx.time) > config.trans_accept_time_ms {
            store.delete_transaction_info(chain, &tx.key);
            continue;
        }
        if store.check_transaction(chain, &tx.key).is_err() {
            store.delete_transaction_info(chain, &tx.key);
            continue;
        }

        let mut tx = tx;
        tx.selected += 1;
        if tx.selected > 1 && tx.is_heavy() {
            store.delete_transaction_info(chain, &tx.key);
            continue;
        }
        if tx.selected > MAX_TRANSACTION_SELECTIONS {
            store.delete_transaction_info(chain, &tx.key);
            continue;
        }
        store.save_transaction_info(chain, &tx);

        if total_size + tx.size > size_limit {
            break;
        }
        total_size += tx.size;
        selected.push(tx);
    }

    selected
}

/// Outcome of a mining attempt, returned for metrics/logging at the call
/// site; the miner has already persisted and broadcast the winning block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MineOutcome {
    /// No candidate cleared `hashpower_limit` before the deadline.
    NoImprovement,
    /// At least one improving candidate was persisted and broadcast.
    Produced { key: BlockKey, hash_power: u64 },
}

/// Caller is expected to hold the chain's `mine_lock` permit and to have
/// already checked `mining_allowed_on`. Returns immediately (without
/// searching) if the per-predecessor mine count exceeds 1, matching the
/// non-forced-mining throttle.
pub fn try_mine(
    chain_store: &dyn ChainStore,
    rel_store: &dyn ReliabilityStore,
    network: &dyn Network,
    signer: &dyn Signer,
    config: &EngineConfig,
    chain: ChainId,
) -> MineOutcome {
    let previous = chain_store.block_key_at(chain, 0);
    let mine_count = rel_store.get_mine_count(chain, &previous);
    if mine_count > 1 {
        debug!(chain, mine_count, "mine throttle: too many attempts against this predecessor");
        return MineOutcome::NoImprovement;
    }
    rel_store.set_mine_count(chain, &previous, mine_count + 1);

    let transactions = select_transactions(chain_store, chain, config);
    let mut block = chain_store.new_block(chain, &config.wallet_addr);
    block.transactions = transactions.iter().map(|t| t.key).collect();

    let mut rng = rand::thread_rng();
    block.nonce = rng.gen();

    let deadline = Instant::now() + Duration::from_secs(config.mine_timeout_secs);
    let mut best: Option<Reliability> = None;

    block.time = constants::now_ms();

    loop {
        let mut sign_data = config.sign_prefix.clone();
        sign_data.extend_from_slice(&block.sign_data());
        block.sign = signer.sign(&config.private_key, &sign_data);
        block.key = crypto::hash(&block.output());

        let hp = hash_power(&block.key);
        if hp <= config.hashpower_limit {
            block.nonce = block.nonce.wrapping_add(1);
            if still_within_deadline(deadline, block.time) {
                continue;
            } else {
                break;
            }
        }

        let mut rel = block.reliability();
        rel.hash_power = hp;

        let is_improvement = match &best {
            None => true,
            Some(current) => &rel > current,
        };

        if is_improvement {
            chain_store.write_block(chain, &block);
            rel_store.save_block_reliability(chain, &block.key, &rel);
            rel_store.set_block_to_id_blocks(chain, block.index, block.key, hp, config.miner_num);
            network.send_internal_msg(BaseMsg::broadcast(Payload::Block(BlockInfo {
                chain,
                index: block.index,
                key: block.key,
                hash_power: hp,
                pre_key: block.previous,
            })));
            info!(chain, index = block.index, hash_power = hp, "mined improving candidate");
            best = Some(rel);
        }

        block.nonce = block.nonce.wrapping_add(1);
        if !still_within_deadline(deadline, block.time) {
            break;
        }
    }

    match best {
        Some(rel) => MineOutcome::Produced { key: rel.key, hash_power: rel.hash_power },
        None => {
            let remaining = rel_store.get_mine_count(chain, &previous);
            rel_store.set_mine_count(chain, &previous, remaining.saturating_sub(1));
            MineOutcome::NoImprovement
        }
    }
}

/// True while the search should keep going: either the wall-clock budget
/// hasn't elapsed yet, or it has but the block's (fixed-at-entry) time is
/// still in the future relative to now, meaning the clock hasn't even
/// caught up to the block yet.
fn still_within_deadline(deadline: Instant, block_time_ms: u64) -> bool {
    if Instant::now() < deadline {
        return true;
    }
    block_time_ms > constants::now_ms()
}

/// Opportunistically register this node as a miner once it has
/// successfully produced a confirmed block, if the configured bond clears
/// the cost table for the slot `REGISTER_MINER_LOOKAHEAD` blocks ahead of
/// the current tip. On success, builds, signs, and sends the registration
/// transaction and returns `true`.
pub fn auto_register_miner(
    chain_store: &dyn ChainStore,
    network: &dyn Network,
    signer: &dyn Signer,
    config: &EngineConfig,
    chain: ChainId,
) -> bool {
    if !config.auto_register_enabled() {
        return false;
    }
    let target_index = chain_store.last_block_index(chain) + REGISTER_MINER_LOOKAHEAD;
    let info: MinerInfo = chain_store.miner_info(chain, target_index);
    let slot = (target_index as usize).min(info.cost.len() - 1);
    if config.cost_of_reg_miner < info.cost[slot] {
        return false;
    }

    let tx = build_registration_tx(signer, config, chain);
    let data = match bincode::serialize(&tx) {
        Ok(d) => d,
        Err(_) => return false,
    };
    network.send_internal_msg(BaseMsg::broadcast(Payload::NewTransaction(NewTransactionMsg {
        chain,
        key: tx.key,
        data,
    })));
    true
}

/// Build and sign the self-registration transaction.
fn build_registration_tx(signer: &dyn Signer, config: &EngineConfig, chain: ChainId) -> Transaction {
    let mut body = config.sign_prefix.clone();
    body.extend_from_slice(&config.wallet_addr);
    body.extend_from_slice(&constants::now_ms().to_le_bytes());
    let sign = signer.sign(&config.private_key, &body);

    let mut data = config.wallet_addr.clone();
    data.extend_from_slice(&sign);

    let key = crypto::hash(&data);
    Transaction { key, chain, time: constants::now_ms(), size: data.len() as u64, ops: TxOp::RegisterMiner, selected: 0, data }
}
