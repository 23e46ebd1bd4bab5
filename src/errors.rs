/// Core error hierarchy.
///
/// A small set of error classes the processing pass distinguishes between:
/// recoverable-local errors purge a candidate and move on, transient waits
/// re-enqueue without state change, structural-reset errors trigger a
/// subtree reset, and collaborator errors are passed through from
/// storage/network.

use std::fmt;

use crate::chain_id::ChainId;
use crate::reliability::BlockKey;

#[derive(Debug, Clone)]
pub enum CoreError {
    /// The candidate's `previous` block is not on storage.
    NotPrevious { chain: ChainId, height: u64, key: BlockKey },
    /// A replacement block arrived too early relative to the current tip.
    BlockTimeTooEarly { chain: ChainId },
    /// The current tip is not old enough to be safely rolled back yet.
    TooNewToRollback { chain: ChainId },
    /// A rollback was performed and the chain should be re-evaluated.
    RolledBack { chain: ChainId, to_height: u64 },
    /// A neighbour chain is behind; the caller should wait.
    WaitNeighbour { chain: ChainId, neighbour: ChainId },
    /// A neighbour chain is ahead; the local chain must wait for it.
    NeighbourAhead { chain: ChainId, neighbour: ChainId },
    /// The declared parent block vanished from the parent chain: the chain's
    /// id-block state must be fully reset.
    DifferentParent { chain: ChainId },
    /// Passthrough from the storage collaborator.
    Storage(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::NotPrevious { chain, height, key } => {
                write!(f, "chain {chain}: previous block of candidate {key} at height {height} not found")
            }
            CoreError::BlockTimeTooEarly { chain } => {
                write!(f, "chain {chain}: replacement block time too early")
            }
            CoreError::TooNewToRollback { chain } => {
                write!(f, "chain {chain}: current tip too new to roll back")
            }
            CoreError::RolledBack { chain, to_height } => {
                write!(f, "chain {chain}: rolled back to height {to_height}")
            }
            CoreError::WaitNeighbour { chain, neighbour } => {
                write!(f, "chain {chain}: waiting on neighbour chain {neighbour}")
            }
            CoreError::NeighbourAhead { chain, neighbour } => {
                write!(f, "chain {chain}: neighbour chain {neighbour} is ahead, deferring rollback")
            }
            CoreError::DifferentParent { chain } => {
                write!(f, "chain {chain}: parent block no longer present on parent chain")
            }
            CoreError::Storage(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl CoreError {
    /// True for the "transient wait" class: the pass should return
    /// quietly without mutating chain state beyond what's already done.
    pub fn is_transient_wait(&self) -> bool {
        matches!(
            self,
            CoreError::WaitNeighbour { .. }
                | CoreError::NeighbourAhead { .. }
                | CoreError::TooNewToRollback { .. }
                | CoreError::BlockTimeTooEarly { .. }
                | CoreError::RolledBack { .. }
        )
    }

    /// True for the "recoverable local" class: the offending candidate
    /// has already been purged by the caller.
    pub fn is_recoverable_local(&self) -> bool {
        matches!(self, CoreError::NotPrevious { .. })
    }

    /// True for the "structural inconsistency" class.
    pub fn is_structural(&self) -> bool {
        matches!(self, CoreError::DifferentParent { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
