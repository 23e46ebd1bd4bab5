/// Fork choice: rank the candidates stored in the per-(chain, height)
/// ID-block list and return the best one, applying staleness, lineage, and
/// penalty rules along the way.

use crate::chain_id::ChainId;
use crate::constants::{self, BLOCK_SYNC_TIME_MS};
use crate::reliability::Reliability;
use crate::store::{ChainStore, ReliabilityStore};

/// `true` if `chain`'s tip is within `BLOCK_SYNC_TIME` of now.
pub fn is_live(store: &dyn ChainStore, chain: ChainId, now: u64) -> bool {
    let tip_time = store.block_time(chain);
    now.saturating_sub(tip_time) <= BLOCK_SYNC_TIME_MS
}

/// Returns the winning reliability record at `(chain, height)`, or `None` if
/// no candidate survives. Mutates the store as a side effect of purging
/// stale/invalid/zero-scored candidates, matching the Go source's in-line
/// cleanup.
pub fn best_block(
    chain_store: &dyn ChainStore,
    rel_store: &dyn ReliabilityStore,
    chain: ChainId,
    height: u64,
) -> Option<Reliability> {
    let now = constants::now_ms();
    let items = rel_store.read_id_blocks(chain, height);
    let chain_live = is_live(chain_store, chain, now);

    let mut best: Option<Reliability> = None;

    for item in items {
        let mut rel = rel_store.read_block_reliability(chain, &item.key);
        if rel.is_empty() {
            continue;
        }

        // Step 3: reject future-timestamped candidates (no purge; may
        // simply not have arrived in local time yet).
        if rel.time > now {
            continue;
        }

        // Step 4: purge index/height mismatches.
        if rel.index != height {
            purge_candidate(chain_store, rel_store, chain, height, &rel);
            continue;
        }

        // Step 5: on a live chain, require referenced siblings to already
        // be known on their respective chains.
        if chain_live && !lineage_consistent(chain_store, chain, &rel) {
            continue;
        }

        // Step 6: adjusted score.
        let run_stat = rel_store.read_block_run_stat(chain, &item.key);
        let mut hp = rel.hash_power as i64;
        if height > 1 && !chain_live {
            hp += rel_store.get_block_lock_num(chain, &item.key) as i64;
        }
        hp -= (run_stat.selected_count / 5) as i64;
        hp -= (run_stat.run_times / 10) as i64;
        hp -= (run_stat.run_times.saturating_sub(run_stat.run_success_count)) as i64;

        if hp <= 0 {
            purge_candidate(chain_store, rel_store, chain, height, &rel);
            continue;
        }

        rel.hash_power = hp as u64;

        best = match best {
            Some(current) if current >= rel => Some(current),
            _ => Some(rel),
        };
    }

    best
}

/// If `parent`, `leftChild`, or `rightChild` is non-empty, the referenced
/// block must already be on the corresponding sibling chain.
fn lineage_consistent(chain_store: &dyn ChainStore, chain: ChainId, rel: &Reliability) -> bool {
    let info = chain_store.chain_info(chain);
    if !rel.parent.is_empty() && info.parent_id != 0 && !chain_store.block_on_the_chain(info.parent_id, &rel.parent)
    {
        return false;
    }
    if !rel.left_child.is_empty() && !chain_store.block_on_the_chain(info.left_child_id, &rel.left_child) {
        return false;
    }
    if !rel.right_child.is_empty() && !chain_store.block_on_the_chain(info.right_child_id, &rel.right_child) {
        return false;
    }
    true
}

fn purge_candidate(
    chain_store: &dyn ChainStore,
    rel_store: &dyn ReliabilityStore,
    chain: ChainId,
    height: u64,
    rel: &Reliability,
) {
    chain_store.delete_block(chain, &rel.key);
    rel_store.save_block_reliability(chain, &rel.key, &Reliability::default());
    rel_store.set_block_to_id_blocks(chain, height, rel.key, 0, constants::MINER_NUM);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::reliability::{BlockKey, IdBlockItem, ProducerId};
    use crate::store::{InMemoryChainStore, InMemoryReliabilityStore};

    fn key(byte0: u8) -> BlockKey {
        let mut b = [0u8; crate::reliability::KEY_LEN];
        b[0] = byte0;
        BlockKey(b)
    }

    fn install_candidate(
        chain_store: &InMemoryChainStore,
        rel_store: &InMemoryReliabilityStore,
        chain: ChainId,
        height: u64,
        k: BlockKey,
        hash_power: u64,
        previous: BlockKey,
    ) {
        let block = Block {
            chain,
            index: height,
            key: k,
            previous,
            parent: BlockKey::EMPTY,
            left_child: BlockKey::EMPTY,
            right_child: BlockKey::EMPTY,
            producer: ProducerId(vec![1]),
            time: constants::now_ms() - 1000,
            nonce: 0,
            sign: Vec::new(),
            transactions: Vec::new(),
            size: 10,
        };
        chain_store.insert_candidate(chain, block.clone());
        let mut rel = block.reliability();
        rel.hash_power = hash_power;
        rel_store.save_block_reliability(chain, &k, &rel);
        rel_store.set_block_to_id_blocks(chain, height, k, hash_power, constants::MINER_NUM);
    }

    #[test]
    fn test_single_candidate_wins() {
        let chain_store = InMemoryChainStore::new();
        let rel_store = InMemoryReliabilityStore::new();
        install_candidate(&chain_store, &rel_store, 1, 6, key(1), 100, BlockKey::EMPTY);

        let best = best_block(&chain_store, &rel_store, 1, 6).unwrap();
        assert_eq!(best.key, key(1));
    }

    #[test]
    fn test_tie_break_prefers_smaller_key() {
        let chain_store = InMemoryChainStore::new();
        let rel_store = InMemoryReliabilityStore::new();
        // Equal hash power after persistence: install with equal stored
        // hashPower so the Cmp tie-break (key asc = smaller wins) decides.
        install_candidate(&chain_store, &rel_store, 1, 6, key(5), 100, BlockKey::EMPTY);
        install_candidate(&chain_store, &rel_store, 1, 6, key(2), 100, BlockKey::EMPTY);

        let best = best_block(&chain_store, &rel_store, 1, 6).unwrap();
        assert_eq!(best.key, key(2));
    }

    #[test]
    fn test_index_mismatch_is_purged() {
        let chain_store = InMemoryChainStore::new();
        let rel_store = InMemoryReliabilityStore::new();
        install_candidate(&chain_store, &rel_store, 1, 6, key(1), 100, BlockKey::EMPTY);
        // Requesting a different height than what's stored (index=6) purges it.
        let best = best_block(&chain_store, &rel_store, 1, 7);
        assert!(best.is_none());
        assert!(rel_store.read_id_blocks(1, 6).is_empty());
    }

    #[test]
    fn test_heavy_penalty_purges_candidate() {
        let chain_store = InMemoryChainStore::new();
        let rel_store = InMemoryReliabilityStore::new();
        install_candidate(&chain_store, &rel_store, 1, 6, key(1), 5, BlockKey::EMPTY);
        rel_store.save_block_run_stat(
            1,
            &key(1),
            &crate::reliability::RunStat { selected_count: 100, run_times: 100, run_success_count: 0, rollback_count: 0 },
        );
        let best = best_block(&chain_store, &rel_store, 1, 6);
        assert!(best.is_none());
    }

    #[test]
    fn test_empty_list_returns_none() {
        let chain_store = InMemoryChainStore::new();
        let rel_store = InMemoryReliabilityStore::new();
        assert!(best_block(&chain_store, &rel_store, 42, 1).is_none());
        let _ = IdBlockItem { key: key(1), hash_power: 1 };
    }
}
