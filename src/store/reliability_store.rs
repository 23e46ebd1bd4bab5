/// `ReliabilityStore`: the in-scope persistence layer for fork-choice
/// scoring metadata. Unlike `ChainStore` this is a component this crate
/// owns end to end, so it gets both an in-memory fake and a real
/// RocksDB-backed implementation, one column family per concern.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rocksdb::{ColumnFamilyDescriptor, Options, DB};

use crate::chain_id::ChainId;
use crate::reliability::{merge_into_id_blocks, BlockKey, IdBlockItem, ProducerId, Reliability, RunStat};

pub trait ReliabilityStore: Send + Sync {
    fn read_id_blocks(&self, chain: ChainId, height: u64) -> Vec<IdBlockItem>;
    fn save_id_blocks(&self, chain: ChainId, height: u64, items: &[IdBlockItem]);

    fn read_block_reliability(&self, chain: ChainId, key: &BlockKey) -> Reliability;
    fn save_block_reliability(&self, chain: ChainId, key: &BlockKey, rel: &Reliability);

    fn read_block_run_stat(&self, chain: ChainId, key: &BlockKey) -> RunStat;
    fn save_block_run_stat(&self, chain: ChainId, key: &BlockKey, stat: &RunStat);

    fn get_block_lock_num(&self, chain: ChainId, key: &BlockKey) -> u64;
    fn set_block_lock_num(&self, chain: ChainId, key: &BlockKey, n: u64);

    fn get_mine_count(&self, chain: ChainId, previous: &BlockKey) -> u64;
    fn set_mine_count(&self, chain: ChainId, previous: &BlockKey, n: u64);

    fn save_black_item(&self, chain: ChainId, producer: &ProducerId);
    fn is_blacklisted(&self, chain: ChainId, producer: &ProducerId) -> bool;

    /// Apply the ID-block merge rule to the stored candidate list at
    /// `(chain, height)`. Implemented once in terms of the read/save
    /// primitives above so both backends share the exact merge semantics.
    fn set_block_to_id_blocks(&self, chain: ChainId, height: u64, key: BlockKey, hp: u64, miner_num: usize) {
        if key.is_empty() {
            return;
        }
        let existing = self.read_id_blocks(chain, height);
        let merged = merge_into_id_blocks(&existing, key, hp, miner_num);
        self.save_id_blocks(chain, height, &merged);
    }
}

/// In-memory reference implementation, used by unit tests.
#[derive(Default)]
pub struct InMemoryReliabilityStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    id_blocks: HashMap<(ChainId, u64), Vec<IdBlockItem>>,
    reliability: HashMap<(ChainId, BlockKey), Reliability>,
    run_stats: HashMap<(ChainId, BlockKey), RunStat>,
    block_lock: HashMap<(ChainId, BlockKey), u64>,
    mine_count: HashMap<(ChainId, BlockKey), u64>,
    blacklist: HashMap<ChainId, Vec<ProducerId>>,
}

impl InMemoryReliabilityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReliabilityStore for InMemoryReliabilityStore {
    fn read_id_blocks(&self, chain: ChainId, height: u64) -> Vec<IdBlockItem> {
        self.inner.lock().unwrap().id_blocks.get(&(chain, height)).cloned().unwrap_or_default()
    }

    fn save_id_blocks(&self, chain: ChainId, height: u64, items: &[IdBlockItem]) {
        self.inner.lock().unwrap().id_blocks.insert((chain, height), items.to_vec());
    }

    fn read_block_reliability(&self, chain: ChainId, key: &BlockKey) -> Reliability {
        self.inner.lock().unwrap().reliability.get(&(chain, *key)).cloned().unwrap_or_default()
    }

    fn save_block_reliability(&self, chain: ChainId, key: &BlockKey, rel: &Reliability) {
        self.inner.lock().unwrap().reliability.insert((chain, *key), rel.clone());
    }

    fn read_block_run_stat(&self, chain: ChainId, key: &BlockKey) -> RunStat {
        self.inner.lock().unwrap().run_stats.get(&(chain, *key)).copied().unwrap_or_default()
    }

    fn save_block_run_stat(&self, chain: ChainId, key: &BlockKey, stat: &RunStat) {
        self.inner.lock().unwrap().run_stats.insert((chain, *key), *stat);
    }

    fn get_block_lock_num(&self, chain: ChainId, key: &BlockKey) -> u64 {
        self.inner.lock().unwrap().block_lock.get(&(chain, *key)).copied().unwrap_or(0)
    }

    fn set_block_lock_num(&self, chain: ChainId, key: &BlockKey, n: u64) {
        self.inner.lock().unwrap().block_lock.insert((chain, *key), n);
    }

    fn get_mine_count(&self, chain: ChainId, previous: &BlockKey) -> u64 {
        self.inner.lock().unwrap().mine_count.get(&(chain, *previous)).copied().unwrap_or(0)
    }

    fn set_mine_count(&self, chain: ChainId, previous: &BlockKey, n: u64) {
        self.inner.lock().unwrap().mine_count.insert((chain, *previous), n);
    }

    fn save_black_item(&self, chain: ChainId, producer: &ProducerId) {
        let mut inner = self.inner.lock().unwrap();
        let list = inner.blacklist.entry(chain).or_default();
        if !list.contains(producer) {
            list.push(producer.clone());
        }
    }

    fn is_blacklisted(&self, chain: ChainId, producer: &ProducerId) -> bool {
        self.inner.lock().unwrap().blacklist.get(&chain).map(|l| l.contains(producer)).unwrap_or(false)
    }
}

const CF_ID_BLOCKS: &str = "id_blocks";
const CF_RELIABILITY: &str = "reliability";
const CF_RUN_STATS: &str = "run_stats";
const CF_BLOCK_LOCK: &str = "block_lock";
const CF_MINE_COUNT: &str = "mine_count";
const CF_BLACKLIST: &str = "blacklist";

pub const COLUMN_FAMILIES: [&str; 6] =
    [CF_ID_BLOCKS, CF_RELIABILITY, CF_RUN_STATS, CF_BLOCK_LOCK, CF_MINE_COUNT, CF_BLACKLIST];

/// RocksDB-backed implementation, the production `ReliabilityStore`.
/// `Arc<DB>` + `cf_handle`/`get_cf`/`put_cf`, with `bincode` for the struct
/// payloads.
pub struct RocksDbReliabilityStore {
    db: Arc<DB>,
}

impl RocksDbReliabilityStore {
    pub fn open(path: &str) -> Result<Self, rocksdb::Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let cfs: Vec<ColumnFamilyDescriptor> =
            COLUMN_FAMILIES.iter().map(|name| ColumnFamilyDescriptor::new(*name, Options::default())).collect();
        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> &rocksdb::ColumnFamily {
        self.db.cf_handle(name).unwrap_or_else(|| panic!("missing column family: {name}"))
    }

    fn id_blocks_key(chain: ChainId, height: u64) -> Vec<u8> {
        let mut k = chain.to_le_bytes().to_vec();
        k.extend_from_slice(&height.to_le_bytes());
        k
    }

    fn block_key(chain: ChainId, key: &BlockKey) -> Vec<u8> {
        let mut k = chain.to_le_bytes().to_vec();
        k.extend_from_slice(&key.0);
        k
    }

    fn blacklist_key(chain: ChainId, producer: &ProducerId) -> Vec<u8> {
        let mut k = chain.to_le_bytes().to_vec();
        k.extend_from_slice(&producer.0);
        k
    }
}

impl ReliabilityStore for RocksDbReliabilityStore {
    fn read_id_blocks(&self, chain: ChainId, height: u64) -> Vec<IdBlockItem> {
        let key = Self::id_blocks_key(chain, height);
        match self.db.get_cf(self.cf(CF_ID_BLOCKS), &key) {
            Ok(Some(bytes)) => bincode::deserialize(&bytes).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn save_id_blocks(&self, chain: ChainId, height: u64, items: &[IdBlockItem]) {
        let key = Self::id_blocks_key(chain, height);
        if let Ok(bytes) = bincode::serialize(&items.to_vec()) {
            let _ = self.db.put_cf(self.cf(CF_ID_BLOCKS), &key, &bytes);
        }
    }

    fn read_block_reliability(&self, chain: ChainId, key: &BlockKey) -> Reliability {
        let k = Self::block_key(chain, key);
        match self.db.get_cf(self.cf(CF_RELIABILITY), &k) {
            Ok(Some(bytes)) => bincode::deserialize(&bytes).unwrap_or_default(),
            _ => Reliability::default(),
        }
    }

    fn save_block_reliability(&self, chain: ChainId, key: &BlockKey, rel: &Reliability) {
        let k = Self::block_key(chain, key);
        if let Ok(bytes) = bincode::serialize(rel) {
            let _ = self.db.put_cf(self.cf(CF_RELIABILITY), &k, &bytes);
        }
    }

    fn read_block_run_stat(&self, chain: ChainId, key: &BlockKey) -> RunStat {
        let k = Self::block_key(chain, key);
        match self.db.get_cf(self.cf(CF_RUN_STATS), &k) {
            Ok(Some(bytes)) => bincode::deserialize(&bytes).unwrap_or_default(),
            _ => RunStat::default(),
        }
    }

    fn save_block_run_stat(&self, chain: ChainId, key: &BlockKey, stat: &RunStat) {
        let k = Self::block_key(chain, key);
        if let Ok(bytes) = bincode::serialize(stat) {
            let _ = self.db.put_cf(self.cf(CF_RUN_STATS), &k, &bytes);
        }
    }

    fn get_block_lock_num(&self, chain: ChainId, key: &BlockKey) -> u64 {
        let k = Self::block_key(chain, key);
        match self.db.get_cf(self.cf(CF_BLOCK_LOCK), &k) {
            Ok(Some(bytes)) if bytes.len() == 8 => u64::from_le_bytes(bytes.as_slice().try_into().unwrap()),
            _ => 0,
        }
    }

    fn set_block_lock_num(&self, chain: ChainId, key: &BlockKey, n: u64) {
        let k = Self::block_key(chain, key);
        let _ = self.db.put_cf(self.cf(CF_BLOCK_LOCK), &k, n.to_le_bytes());
    }

    fn get_mine_count(&self, chain: ChainId, previous: &BlockKey) -> u64 {
        let k = Self::block_key(chain, previous);
        match self.db.get_cf(self.cf(CF_MINE_COUNT), &k) {
            Ok(Some(bytes)) if bytes.len() == 8 => u64::from_le_bytes(bytes.as_slice().try_into().unwrap()),
            _ => 0,
        }
    }

    fn set_mine_count(&self, chain: ChainId, previous: &BlockKey, n: u64) {
        let k = Self::block_key(chain, previous);
        let _ = self.db.put_cf(self.cf(CF_MINE_COUNT), &k, n.to_le_bytes());
    }

    fn save_black_item(&self, chain: ChainId, producer: &ProducerId) {
        let k = Self::blacklist_key(chain, producer);
        let _ = self.db.put_cf(self.cf(CF_BLACKLIST), &k, [1u8]);
    }

    fn is_blacklisted(&self, chain: ChainId, producer: &ProducerId) -> bool {
        let k = Self::blacklist_key(chain, producer);
        matches!(self.db.get_cf(self.cf(CF_BLACKLIST), &k), Ok(Some(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte0: u8) -> BlockKey {
        let mut b = [0u8; crate::reliability::KEY_LEN];
        b[0] = byte0;
        BlockKey(b)
    }

    #[test]
    fn test_in_memory_set_block_to_id_blocks_roundtrip() {
        let store = InMemoryReliabilityStore::new();
        store.set_block_to_id_blocks(1, 5, key(1), 100, 16);
        store.set_block_to_id_blocks(1, 5, key(2), 200, 16);
        let items = store.read_id_blocks(1, 5);
        assert_eq!(items[0].key, key(2));
        assert_eq!(items[1].key, key(1));
    }

    #[test]
    fn test_in_memory_set_block_to_id_blocks_delete_noop() {
        let store = InMemoryReliabilityStore::new();
        store.set_block_to_id_blocks(1, 5, key(9), 0, 16);
        assert!(store.read_id_blocks(1, 5).is_empty());
    }

    #[test]
    fn test_rocksdb_store_roundtrips_reliability() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksDbReliabilityStore::open(dir.path().to_str().unwrap()).unwrap();
        let rel = Reliability { index: 3, key: key(7), hash_power: 42, ..Default::default() };
        store.save_block_reliability(1, &key(7), &rel);
        let got = store.read_block_reliability(1, &key(7));
        assert_eq!(got, rel);
    }

    #[test]
    fn test_rocksdb_store_id_blocks_merge() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksDbReliabilityStore::open(dir.path().to_str().unwrap()).unwrap();
        store.set_block_to_id_blocks(2, 10, key(1), 50, 16);
        store.set_block_to_id_blocks(2, 10, key(1), 10, 16);
        let items = store.read_id_blocks(2, 10);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].hash_power, 50);
    }

    #[test]
    fn test_rocksdb_store_blacklist() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksDbReliabilityStore::open(dir.path().to_str().unwrap()).unwrap();
        let producer = ProducerId(vec![1, 2, 3]);
        assert!(!store.is_blacklisted(1, &producer));
        store.save_black_item(1, &producer);
        assert!(store.is_blacklisted(1, &producer));
    }
}
