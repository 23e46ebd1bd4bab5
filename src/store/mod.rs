pub mod chain_store;
pub mod reliability_store;

pub use chain_store::{ChainStore, InMemoryChainStore};
pub use reliability_store::{InMemoryReliabilityStore, ReliabilityStore, RocksDbReliabilityStore};
