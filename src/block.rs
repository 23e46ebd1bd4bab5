/// The opaque block/transaction objects exchanged with the storage layer.
///
/// The wire format of a block is owned by the storage/network collaborator,
/// not this crate; this module only names the fields the processor and
/// miner actually read or write.

use serde::{Deserialize, Serialize};

use crate::chain_id::ChainId;
use crate::reliability::{BlockKey, ProducerId, Reliability};

/// Transaction operation weight classes referenced by the mining
/// transaction-selection rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOp {
    Transfer,
    OpsRunApp,
    OpsNewChain,
    RegisterMiner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub key: BlockKey,
    pub chain: ChainId,
    pub time: u64,
    pub size: u64,
    pub ops: TxOp,
    pub selected: u32,
    pub data: Vec<u8>,
}

impl Transaction {
    pub fn is_heavy(&self) -> bool {
        matches!(self.ops, TxOp::OpsRunApp | TxOp::OpsNewChain)
    }
}

/// A candidate or applied block. `key` and `sign` are populated once the
/// block has been hashed/signed; an in-progress mining candidate carries an
/// empty `key` until `hash_power` clears the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub chain: ChainId,
    pub index: u64,
    pub key: BlockKey,
    pub previous: BlockKey,
    pub parent: BlockKey,
    pub left_child: BlockKey,
    pub right_child: BlockKey,
    pub producer: ProducerId,
    pub time: u64,
    pub nonce: u64,
    pub sign: Vec<u8>,
    pub transactions: Vec<BlockKey>,
    pub size: u64,
}

impl Block {
    /// The canonical bytes signed by the miner's private key: everything
    /// except the signature itself.
    pub fn sign_data(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.chain.to_le_bytes());
        out.extend_from_slice(&self.index.to_le_bytes());
        out.extend_from_slice(&self.previous.0);
        out.extend_from_slice(&self.parent.0);
        out.extend_from_slice(&self.left_child.0);
        out.extend_from_slice(&self.right_child.0);
        out.extend_from_slice(&self.producer.0);
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        for tx in &self.transactions {
            out.extend_from_slice(&tx.0);
        }
        out
    }

    /// Full bytes serialized on the wire, including the signature: what
    /// `WriteBlock`/broadcast actually persist and send.
    pub fn output(&self) -> Vec<u8> {
        let mut out = self.sign_data();
        out.extend_from_slice(&self.sign);
        out
    }

    /// Build the block's reliability record for fork-choice / persistence.
    pub fn reliability(&self) -> Reliability {
        Reliability {
            index: self.index,
            key: self.key,
            previous: self.previous,
            parent: self.parent,
            left_child: self.left_child,
            right_child: self.right_child,
            producer: Some(self.producer.clone()),
            time: self.time,
            hash_power: crate::reliability::hash_power(&self.key),
        }
    }
}

/// Snapshot of a prospective miner's registration cost table, indexed the
/// same way `GetMinerInfo` is.
#[derive(Debug, Clone, Default)]
pub struct MinerInfo {
    /// `Cost[5]` in the reference: minimum bond required to register at the
    /// slot being targeted.
    pub cost: [u64; 6],
}
