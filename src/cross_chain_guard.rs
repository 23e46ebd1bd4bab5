/// Cross-chain guard: parent/child timing and lineage checks that decide
/// whether a chain may keep processing or must stall/reset against its
/// neighbours.

use crate::chain_id::{self, ChainId};
use crate::constants::{self, BLOCK_SYNC_TIME_MS, CHAIN_BOOTSTRAP_WINDOW};
use crate::errors::{CoreError, CoreResult};
use crate::reliability::BlockKey;
use crate::store::{ChainStore, ReliabilityStore};

/// What the caller should do after a clean guard check: proceed, or first
/// bootstrap a just-created child chain by copying its parent's genesis
/// block into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Proceed,
    BootstrapChild(ChainId),
}

/// Returns `Ok(GuardOutcome::Proceed)` if the chain may continue processing,
/// `Ok(GuardOutcome::BootstrapChild(child))` if a child chain needs its
/// first block copied in before anything else happens, or
/// `Err(CoreError::WaitNeighbour { .. })`/`Err(CoreError::DifferentParent {
/// .. })` if the chain must stall or was reset.
pub fn check_other_chain(
    store: &dyn ChainStore,
    rel_store: &dyn ReliabilityStore,
    chain: ChainId,
) -> CoreResult<GuardOutcome> {
    let last_index = store.last_block_index(chain);

    if chain > chain_id::ROOT && last_index > 0 && last_index < CHAIN_BOOTSTRAP_WINDOW {
        let parent_key = store.parent_block_of_chain(chain);
        let info = store.chain_info(chain);
        if !parent_key.is_empty() && !store.block_on_the_chain(info.parent_id, &parent_key) {
            full_reset(store, rel_store, chain, last_index);
            return Err(CoreError::DifferentParent { chain });
        }
    }

    let info = store.chain_info(chain);
    if info.left_child_id != 0 && store.last_block_index(info.left_child_id) == 1 {
        return Ok(GuardOutcome::BootstrapChild(info.left_child_id));
    }
    if info.right_child_id != 0 && store.last_block_index(info.right_child_id) == 1 {
        return Ok(GuardOutcome::BootstrapChild(info.right_child_id));
    }

    let now = constants::now_ms();
    let t_self = store.block_time(chain);
    for neighbour in neighbours_of(chain, &info) {
        let t_neigh = store.block_time(neighbour);
        if t_self > t_neigh.saturating_add(BLOCK_SYNC_TIME_MS) {
            return Err(CoreError::WaitNeighbour { chain, neighbour });
        }
    }

    let _ = now;
    Ok(GuardOutcome::Proceed)
}

/// Rolls `chain` back to `(index, key)`, unless a neighbour is too far ahead
/// to safely do so yet, in which case the caller should wake that neighbour
/// and retry later.
pub fn check_and_rollback(store: &dyn ChainStore, chain: ChainId, index: u64, key: &BlockKey) -> CoreResult<()> {
    let info = store.chain_info(chain);
    let t_self = store.block_time(chain);
    for neighbour in neighbours_of(chain, &info) {
        let t_neigh = store.block_time(neighbour);
        if t_neigh > t_self.saturating_add(BLOCK_SYNC_TIME_MS) {
            return Err(CoreError::NeighbourAhead { chain, neighbour });
        }
    }
    store.db_roll_back(chain, index, key);
    Ok(())
}

fn neighbours_of(chain: ChainId, info: &chain_id::ChainInfo) -> Vec<ChainId> {
    let mut out = Vec::with_capacity(3);
    if info.parent_id != 0 {
        out.push(info.parent_id);
    }
    if info.left_child_id != 0 {
        out.push(info.left_child_id);
    }
    if info.right_child_id != 0 {
        out.push(info.right_child_id);
    }
    let _ = chain;
    out
}

/// Full subtree reset on structural inconsistency: clear the ID-block
/// candidate lists from height 2 up to the current tip, then roll the chain
/// back to height 1.
fn full_reset(store: &dyn ChainStore, rel_store: &dyn ReliabilityStore, chain: ChainId, last_index: u64) {
    for height in 2..=last_index.max(1) {
        rel_store.save_id_blocks(chain, height, &[]);
    }
    store.db_roll_back(chain, 1, &store.block_key_at(chain, 1));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryChainStore, InMemoryReliabilityStore};

    #[test]
    fn test_stale_straggler_wakes_neighbour_behind() {
        let store = InMemoryChainStore::new();
        let rel_store = InMemoryReliabilityStore::new();
        // chain 1 is root; its only neighbours are children 2, 3. Make
        // chain 2 "behind" chain 1 by more than BLOCK_SYNC_TIME.
        store.force_apply(
            1,
            crate::block::Block {
                chain: 1,
                index: 1,
                key: crate::reliability::BlockKey([9u8; 32]),
                previous: BlockKey::EMPTY,
                parent: BlockKey::EMPTY,
                left_child: BlockKey::EMPTY,
                right_child: BlockKey::EMPTY,
                producer: crate::reliability::ProducerId(vec![]),
                time: constants::now_ms(),
                nonce: 0,
                sign: vec![],
                transactions: vec![],
                size: 0,
            },
        );
        store.force_apply(
            2,
            crate::block::Block {
                chain: 2,
                index: 1,
                key: crate::reliability::BlockKey([8u8; 32]),
                previous: BlockKey::EMPTY,
                parent: BlockKey::EMPTY,
                left_child: BlockKey::EMPTY,
                right_child: BlockKey::EMPTY,
                producer: crate::reliability::ProducerId(vec![]),
                time: constants::now_ms() - BLOCK_SYNC_TIME_MS - 1000,
                nonce: 0,
                sign: vec![],
                transactions: vec![],
                size: 0,
            },
        );

        let err = check_other_chain(&store, &rel_store, 1).unwrap_err();
        assert!(matches!(err, CoreError::WaitNeighbour { chain: 1, neighbour: 2 }));
    }

    #[test]
    fn test_no_neighbours_behind_proceeds() {
        let store = InMemoryChainStore::new();
        let rel_store = InMemoryReliabilityStore::new();
        let result = check_other_chain(&store, &rel_store, 1).unwrap();
        assert_eq!(result, GuardOutcome::Proceed);
    }

    #[test]
    fn test_bootstrap_child_detected_before_timing_checks() {
        let store = InMemoryChainStore::new();
        let rel_store = InMemoryReliabilityStore::new();
        store.force_apply(
            2,
            crate::block::Block {
                chain: 2,
                index: 1,
                key: crate::reliability::BlockKey([1u8; 32]),
                previous: BlockKey::EMPTY,
                parent: BlockKey::EMPTY,
                left_child: BlockKey::EMPTY,
                right_child: BlockKey::EMPTY,
                producer: crate::reliability::ProducerId(vec![]),
                time: constants::now_ms(),
                nonce: 0,
                sign: vec![],
                transactions: vec![],
                size: 0,
            },
        );

        let result = check_other_chain(&store, &rel_store, 1).unwrap();
        assert_eq!(result, GuardOutcome::BootstrapChild(2));
    }

    #[test]
    fn test_rollback_deferred_when_neighbour_ahead() {
        let store = InMemoryChainStore::new();
        store.force_apply(
            3,
            crate::block::Block {
                chain: 3,
                index: 1,
                key: crate::reliability::BlockKey([7u8; 32]),
                previous: BlockKey::EMPTY,
                parent: BlockKey::EMPTY,
                left_child: BlockKey::EMPTY,
                right_child: BlockKey::EMPTY,
                producer: crate::reliability::ProducerId(vec![]),
                time: constants::now_ms() + BLOCK_SYNC_TIME_MS + 1000,
                nonce: 0,
                sign: vec![],
                transactions: vec![],
                size: 0,
            },
        );
        let err = check_and_rollback(&store, 1, 5, &BlockKey::EMPTY).unwrap_err();
        assert!(matches!(err, CoreError::NeighbourAhead { chain: 1, neighbour: 3 }));
    }

    #[test]
    fn test_full_reset_clears_id_blocks_and_rolls_back() {
        let store = InMemoryChainStore::new();
        let rel_store = InMemoryReliabilityStore::new();
        store.force_apply(
            1,
            crate::block::Block {
                chain: 1,
                index: 1,
                key: crate::reliability::BlockKey([1u8; 32]),
                previous: BlockKey::EMPTY,
                parent: BlockKey::EMPTY,
                left_child: BlockKey::EMPTY,
                right_child: BlockKey::EMPTY,
                producer: crate::reliability::ProducerId(vec![]),
                time: constants::now_ms(),
                nonce: 0,
                sign: vec![],
                transactions: vec![],
                size: 0,
            },
        );
        for height in 2..=4u64 {
            rel_store.set_block_to_id_blocks(
                1,
                height,
                crate::reliability::BlockKey([height as u8; 32]),
                100,
                constants::MINER_NUM,
            );
        }

        full_reset(&store, &rel_store, 1, 4);

        for height in 2..=4u64 {
            assert!(rel_store.read_id_blocks(1, height).is_empty());
        }
        assert_eq!(store.last_block_index(1), 1);
    }
}
