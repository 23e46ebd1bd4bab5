/// Core scoring data model.
///
/// `BlockKey` is an opaque fixed-width hash, treated as an uninterpreted
/// byte string; `Reliability` is the per-(chain, key) scoring record used by
/// fork choice; `RunStat` is the per-(chain, key) apply-attempt bookkeeping.
/// `hash_power` and the ID-block merge rule are the pure functions the rest
/// of the engine builds on.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const KEY_LEN: usize = 32;

/// A fixed-width block hash. Lexicographic `Ord` (derived, element-wise over
/// the byte array) gives the `key asc` tie-break of `Cmp` directly.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockKey(pub [u8; KEY_LEN]);

impl BlockKey {
    pub const EMPTY: BlockKey = BlockKey([0u8; KEY_LEN]);

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; KEY_LEN]
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut out = [0u8; KEY_LEN];
        let n = bytes.len().min(KEY_LEN);
        out[..n].copy_from_slice(&bytes[..n]);
        BlockKey(out)
    }
}

impl Default for BlockKey {
    fn default() -> Self {
        BlockKey::EMPTY
    }
}

impl fmt::Debug for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Identifier of a block's miner (an address or public-key digest; the
/// wallet/address encoding itself is an out-of-scope collaborator).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProducerId(pub Vec<u8>);

impl fmt::Debug for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Compute `8 * leadingZeroBytes + leadingZeroBitsOfFirstNonzeroByte` of a
/// block key: the number of leading zero bits, used as the proof-of-work
/// score a mined or received block is ranked by.
pub fn hash_power(key: &BlockKey) -> u64 {
    let mut out: u64 = 0;
    for &byte in key.0.iter() {
        out += 8;
        if byte != 0 {
            let mut b = byte;
            while b > 0 {
                out -= 1;
                b >>= 1;
            }
            return out;
        }
    }
    out
}

/// The per-(chain, block-key) scoring record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reliability {
    pub index: u64,
    pub key: BlockKey,
    pub previous: BlockKey,
    pub parent: BlockKey,
    pub left_child: BlockKey,
    pub right_child: BlockKey,
    pub producer: Option<ProducerId>,
    pub time: u64,
    pub hash_power: u64,
}

impl Reliability {
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

/// Total ordering over reliability records: `hashPower` desc, `index` desc,
/// `key` asc. Greater is "better" per fork-choice.
impl PartialOrd for Reliability {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Reliability {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash_power
            .cmp(&other.hash_power)
            .then_with(|| self.index.cmp(&other.index))
            .then_with(|| other.key.cmp(&self.key))
    }
}

/// Per-(chain, block-key) apply-attempt bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStat {
    pub selected_count: u64,
    pub run_times: u64,
    pub run_success_count: u64,
    pub rollback_count: u64,
}

/// One entry of the per-(chain, height) ID-block candidate list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdBlockItem {
    pub key: BlockKey,
    pub hash_power: u64,
}

/// Apply the `setBlockToIDBlocks` merge rule to an existing sorted
/// candidate list, returning the new sorted, deduplicated, length-capped
/// list. A pure function so it can be unit-tested without a store.
///
/// - `hp == 0` means delete: the key is removed if present, and never
///   inserted.
/// - If `key` is already present, its `hash_power` becomes `max(old, hp)`;
///   if that maximum is zero the entry is dropped.
/// - Otherwise `key` is inserted immediately before the first existing item
///   with strictly smaller `hash_power`, preserving the descending sort.
/// - The result is truncated to `miner_num`.
pub fn merge_into_id_blocks(
    existing: &[IdBlockItem],
    key: BlockKey,
    hp: u64,
    miner_num: usize,
) -> Vec<IdBlockItem> {
    if key.is_empty() {
        return existing.to_vec();
    }

    let mut out = Vec::with_capacity(existing.len() + 1);
    let mut remaining_hp = hp;
    for item in existing {
        if item.key == key {
            let merged = remaining_hp.max(item.hash_power);
            if merged > 0 {
                out.push(IdBlockItem { key: item.key, hash_power: merged });
            }
            remaining_hp = 0;
            continue;
        }
        if remaining_hp > item.hash_power {
            out.push(IdBlockItem { key, hash_power: remaining_hp });
            out.push(*item);
            remaining_hp = 0;
        } else {
            out.push(*item);
        }
    }
    if remaining_hp > 0 {
        out.push(IdBlockItem { key, hash_power: remaining_hp });
    }
    out.truncate(miner_num);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte0: u8) -> BlockKey {
        let mut b = [0u8; KEY_LEN];
        b[0] = byte0;
        BlockKey(b)
    }

    #[test]
    fn test_hash_power_all_zero() {
        assert_eq!(hash_power(&BlockKey::EMPTY), 8 * KEY_LEN as u64);
    }

    #[test]
    fn test_hash_power_0x80() {
        assert_eq!(hash_power(&key(0x80)), 0);
    }

    #[test]
    fn test_hash_power_0x01() {
        assert_eq!(hash_power(&key(0x01)), 7);
    }

    #[test]
    fn test_cmp_hashpower_dominates() {
        let a = Reliability { hash_power: 10, index: 1, key: key(1), ..Default::default() };
        let b = Reliability { hash_power: 20, index: 1, key: key(2), ..Default::default() };
        assert!(b > a);
    }

    #[test]
    fn test_cmp_index_tiebreak() {
        let a = Reliability { hash_power: 10, index: 5, key: key(1), ..Default::default() };
        let b = Reliability { hash_power: 10, index: 6, key: key(2), ..Default::default() };
        assert!(b > a);
    }

    #[test]
    fn test_cmp_key_tiebreak_prefers_smaller_key() {
        let a = Reliability { hash_power: 10, index: 5, key: key(1), ..Default::default() };
        let b = Reliability { hash_power: 10, index: 5, key: key(2), ..Default::default() };
        assert!(a > b);
    }

    #[test]
    fn test_merge_insert_new_key() {
        let existing = vec![IdBlockItem { key: key(1), hash_power: 100 }];
        let out = merge_into_id_blocks(&existing, key(2), 200, 16);
        assert_eq!(out[0].key, key(2));
        assert_eq!(out[1].key, key(1));
    }

    #[test]
    fn test_merge_update_existing_takes_max() {
        let existing = vec![IdBlockItem { key: key(1), hash_power: 100 }];
        let out = merge_into_id_blocks(&existing, key(1), 50, 16);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].hash_power, 100);
    }

    #[test]
    fn test_merge_delete_is_idempotent() {
        let existing = vec![IdBlockItem { key: key(1), hash_power: 100 }];
        let out = merge_into_id_blocks(&existing, key(2), 0, 16);
        assert_eq!(out, existing);
    }

    #[test]
    fn test_merge_zero_hp_removes_existing() {
        let existing = vec![IdBlockItem { key: key(1), hash_power: 100 }];
        let out = merge_into_id_blocks(&existing, key(1), 0, 16);
        assert!(out.is_empty());
    }

    #[test]
    fn test_merge_truncates_to_miner_num() {
        let existing: Vec<IdBlockItem> =
            (1..=3u8).map(|i| IdBlockItem { key: key(i), hash_power: 300 - i as u64 }).collect();
        let out = merge_into_id_blocks(&existing, key(10), 1000, 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].key, key(10));
    }

    #[test]
    fn test_merge_empty_key_is_noop() {
        let existing = vec![IdBlockItem { key: key(1), hash_power: 100 }];
        let out = merge_into_id_blocks(&existing, BlockKey::EMPTY, 500, 16);
        assert_eq!(out, existing);
    }
}
