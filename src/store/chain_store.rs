/// `ChainStore`: the out-of-scope block/transaction/state storage
/// collaborator.
///
/// The real storage engine is assumed to provide its own internal
/// concurrency control, so this trait is `Send + Sync` and implementors
/// are handed out as `Arc<dyn ChainStore>` — a trait-object seam around
/// whatever backs it (e.g. `Arc<rocksdb::DB>`) so tests can run against an
/// in-memory fake instead of a real database.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::block::{Block, MinerInfo, Transaction};
use crate::chain_id::{self, ChainId, ChainInfo};
use crate::errors::{CoreError, CoreResult};
use crate::reliability::BlockKey;

pub trait ChainStore: Send + Sync {
    /// Highest applied height on `chain`, or 0 if the chain has no blocks.
    fn last_block_index(&self, chain: ChainId) -> u64;

    /// The block key at `height`. By storage convention, height `0` means
    /// "the current tip" rather than a literal height.
    fn block_key_at(&self, chain: ChainId, height: u64) -> BlockKey;

    /// Timestamp (ms) of the chain's current tip.
    fn block_time(&self, chain: ChainId) -> u64;

    /// Target interval (ms) between blocks on `chain`.
    fn block_interval(&self, chain: ChainId) -> u64;

    /// Maximum serialized block size (bytes) on `chain`.
    fn block_size_limit(&self, chain: ChainId) -> u64;

    fn chain_info(&self, chain: ChainId) -> ChainInfo;

    /// The parent-chain block this chain was declared to fork from.
    fn parent_block_of_chain(&self, chain: ChainId) -> BlockKey;

    fn block_on_the_chain(&self, chain: ChainId, key: &BlockKey) -> bool;

    fn is_exist_block(&self, chain: ChainId, key: &BlockKey) -> bool;

    fn read_block_data(&self, chain: ChainId, key: &BlockKey) -> Option<Block>;

    fn write_block(&self, chain: ChainId, block: &Block);

    fn delete_block(&self, chain: ChainId, key: &BlockKey);

    fn read_transaction_data(&self, chain: ChainId, key: &BlockKey) -> Option<Vec<u8>>;

    fn write_transaction(&self, chain: ChainId, data: &[u8]);

    fn check_transaction(&self, chain: ChainId, key: &BlockKey) -> CoreResult<()>;

    /// Apply the block at `key` to `chain`'s state. Errors propagate to the
    /// processor's apply-failure handling.
    fn process_block_of_chain(&self, chain: ChainId, key: &BlockKey) -> CoreResult<()>;

    /// Undo applied blocks above `height`, restoring the tip to `height`
    /// with the given key.
    fn db_roll_back(&self, chain: ChainId, height: u64, key: &BlockKey);

    /// Assemble a fresh, unsigned candidate block extending `chain`'s tip.
    fn new_block(&self, chain: ChainId, producer_data: &[u8]) -> Block;

    /// Walk the pending-transaction pool in stored order, starting after
    /// `after` (or from the beginning if `None`). Returns `None` once the
    /// pool is exhausted.
    fn next_pending_transaction(&self, chain: ChainId, after: Option<BlockKey>) -> Option<Transaction>;

    fn save_transaction_info(&self, chain: ChainId, tx: &Transaction);

    fn delete_transaction_info(&self, chain: ChainId, key: &BlockKey);

    fn user_coin(&self, chain: ChainId, addr: &[u8]) -> u64;

    fn miner_info(&self, chain: ChainId, index: u64) -> MinerInfo;
}

/// A reference in-memory implementation used by tests and local
/// development. Not persistent; mirrors just enough of the real storage
/// engine's behavior to drive the processor/miner/fork-choice test
/// scenarios.
#[derive(Default)]
pub struct InMemoryChainStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Applied blocks, height-indexed, per chain.
    applied: HashMap<ChainId, Vec<BlockKey>>,
    /// All known blocks (applied or candidate), by (chain, key).
    blocks: HashMap<(ChainId, BlockKey), Block>,
    block_interval: HashMap<ChainId, u64>,
    block_size_limit: HashMap<ChainId, u64>,
    parent_block_of_chain: HashMap<ChainId, BlockKey>,
    pending_transactions: HashMap<ChainId, Vec<Transaction>>,
    user_coin: HashMap<(ChainId, Vec<u8>), u64>,
}

impl InMemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_block_interval(&self, chain: ChainId, interval_ms: u64) {
        self.inner.lock().unwrap().block_interval.insert(chain, interval_ms);
    }

    pub fn set_block_size_limit(&self, chain: ChainId, limit: u64) {
        self.inner.lock().unwrap().block_size_limit.insert(chain, limit);
    }

    pub fn set_parent_block_of_chain(&self, chain: ChainId, key: BlockKey) {
        self.inner.lock().unwrap().parent_block_of_chain.insert(chain, key);
    }

    pub fn set_user_coin(&self, chain: ChainId, addr: &[u8], coin: u64) {
        self.inner.lock().unwrap().user_coin.insert((chain, addr.to_vec()), coin);
    }

    /// Install a block into the known-block set without applying it (as if
    /// it arrived from a peer and was persisted with an initial reliability
    /// record).
    pub fn insert_candidate(&self, chain: ChainId, block: Block) {
        let mut inner = self.inner.lock().unwrap();
        inner.blocks.insert((chain, block.key), block);
    }

    /// Force-apply a block at the next height, as genesis/bootstrap setup
    /// would. Panics if the block's `previous` does not match the current
    /// tip; callers are test/bootstrap code, not the processor.
    pub fn force_apply(&self, chain: ChainId, block: Block) {
        let mut inner = self.inner.lock().unwrap();
        let key = block.key;
        inner.blocks.insert((chain, key), block);
        inner.applied.entry(chain).or_default().push(key);
    }

    pub fn push_pending_transaction(&self, chain: ChainId, tx: Transaction) {
        self.inner.lock().unwrap().pending_transactions.entry(chain).or_default().push(tx);
    }
}

impl ChainStore for InMemoryChainStore {
    fn last_block_index(&self, chain: ChainId) -> u64 {
        self.inner.lock().unwrap().applied.get(&chain).map(|v| v.len() as u64).unwrap_or(0)
    }

    fn block_key_at(&self, chain: ChainId, height: u64) -> BlockKey {
        let inner = self.inner.lock().unwrap();
        let applied = match inner.applied.get(&chain) {
            Some(v) => v,
            None => return BlockKey::EMPTY,
        };
        let idx = if height == 0 { applied.len() } else { height as usize };
        if idx == 0 || idx > applied.len() {
            BlockKey::EMPTY
        } else {
            applied[idx - 1]
        }
    }

    fn block_time(&self, chain: ChainId) -> u64 {
        let tip = self.block_key_at(chain, 0);
        if tip.is_empty() {
            return 0;
        }
        self.read_block_data(chain, &tip).map(|b| b.time).unwrap_or(0)
    }

    fn block_interval(&self, chain: ChainId) -> u64 {
        self.inner.lock().unwrap().block_interval.get(&chain).copied().unwrap_or(60_000)
    }

    fn block_size_limit(&self, chain: ChainId) -> u64 {
        self.inner.lock().unwrap().block_size_limit.get(&chain).copied().unwrap_or(1_000_000)
    }

    fn chain_info(&self, chain: ChainId) -> ChainInfo {
        ChainInfo::for_chain(chain)
    }

    fn parent_block_of_chain(&self, chain: ChainId) -> BlockKey {
        self.inner.lock().unwrap().parent_block_of_chain.get(&chain).copied().unwrap_or(BlockKey::EMPTY)
    }

    fn block_on_the_chain(&self, chain: ChainId, key: &BlockKey) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.applied.get(&chain).map(|v| v.contains(key)).unwrap_or(false)
    }

    fn is_exist_block(&self, chain: ChainId, key: &BlockKey) -> bool {
        self.inner.lock().unwrap().blocks.contains_key(&(chain, *key))
    }

    fn read_block_data(&self, chain: ChainId, key: &BlockKey) -> Option<Block> {
        self.inner.lock().unwrap().blocks.get(&(chain, *key)).cloned()
    }

    fn write_block(&self, chain: ChainId, block: &Block) {
        self.inner.lock().unwrap().blocks.insert((chain, block.key), block.clone());
    }

    fn delete_block(&self, chain: ChainId, key: &BlockKey) {
        self.inner.lock().unwrap().blocks.remove(&(chain, *key));
    }

    fn read_transaction_data(&self, _chain: ChainId, _key: &BlockKey) -> Option<Vec<u8>> {
        None
    }

    fn write_transaction(&self, _chain: ChainId, _data: &[u8]) {}

    fn check_transaction(&self, _chain: ChainId, _key: &BlockKey) -> CoreResult<()> {
        Ok(())
    }

    fn process_block_of_chain(&self, chain: ChainId, key: &BlockKey) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let block = inner
            .blocks
            .get(&(chain, *key))
            .cloned()
            .ok_or_else(|| CoreError::Storage(format!("block {key} not found on chain {chain}")))?;
        inner.applied.entry(chain).or_default().push(*key);
        let _ = block;
        Ok(())
    }

    fn db_roll_back(&self, chain: ChainId, height: u64, _key: &BlockKey) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(applied) = inner.applied.get_mut(&chain) {
            applied.truncate(height as usize);
        }
    }

    fn new_block(&self, chain: ChainId, producer_data: &[u8]) -> Block {
        let previous = self.block_key_at(chain, 0);
        let index = self.last_block_index(chain) + 1;
        Block {
            chain,
            index,
            key: BlockKey::EMPTY,
            previous,
            parent: BlockKey::EMPTY,
            left_child: BlockKey::EMPTY,
            right_child: BlockKey::EMPTY,
            producer: crate::reliability::ProducerId(producer_data.to_vec()),
            time: 0,
            nonce: 0,
            sign: Vec::new(),
            transactions: Vec::new(),
            size: 0,
        }
    }

    fn next_pending_transaction(&self, chain: ChainId, after: Option<BlockKey>) -> Option<Transaction> {
        let inner = self.inner.lock().unwrap();
        let pool = inner.pending_transactions.get(&chain)?;
        match after {
            None => pool.first().cloned(),
            Some(k) => {
                let pos = pool.iter().position(|t| t.key == k)?;
                pool.get(pos + 1).cloned()
            }
        }
    }

    fn save_transaction_info(&self, chain: ChainId, tx: &Transaction) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pool) = inner.pending_transactions.get_mut(&chain) {
            if let Some(slot) = pool.iter_mut().find(|t| t.key == tx.key) {
                *slot = tx.clone();
            }
        }
    }

    fn delete_transaction_info(&self, chain: ChainId, key: &BlockKey) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pool) = inner.pending_transactions.get_mut(&chain) {
            pool.retain(|t| t.key != *key);
        }
    }

    fn user_coin(&self, chain: ChainId, addr: &[u8]) -> u64 {
        self.inner.lock().unwrap().user_coin.get(&(chain, addr.to_vec())).copied().unwrap_or(0)
    }

    fn miner_info(&self, _chain: ChainId, _index: u64) -> MinerInfo {
        MinerInfo::default()
    }
}

/// Resolve the full `ChainInfo` using whichever chains are actually known to
/// exist, bounding the tree walk at the highest chain with applied blocks.
pub fn highest_known_chain(store: &dyn ChainStore, upper_bound: ChainId) -> ChainId {
    let mut highest = chain_id::ROOT;
    chain_id::walk_preorder(upper_bound, |c| {
        if store.last_block_index(c) > 0 {
            highest = highest.max(c);
        }
    });
    highest
}
