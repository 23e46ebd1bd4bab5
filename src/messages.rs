/// Wire message shapes exchanged with the network collaborator.
///
/// These are the payloads the processor and miner hand off for gossip:
/// new/better blocks, requests for a missing block, and new transactions.

use serde::{Deserialize, Serialize};

use crate::chain_id::ChainId;
use crate::reliability::BlockKey;

/// Announces a newly-applied or newly-mined block so peers can re-run
/// fork-choice against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub chain: ChainId,
    pub index: u64,
    pub key: BlockKey,
    pub hash_power: u64,
    pub pre_key: BlockKey,
}

/// Requests a missing block at `index` on `chain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReqBlockInfo {
    pub chain: ChainId,
    pub index: u64,
}

/// A new transaction to relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransactionMsg {
    pub chain: ChainId,
    pub key: BlockKey,
    pub data: Vec<u8>,
}

/// How a message should be delivered to the peer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendKind {
    /// Gossip to every connected peer.
    Broadcast,
    /// Send to a random subset of peers.
    RandomSend,
}

/// The payload carried by a `SendKind`-tagged envelope. Kept as a small
/// closed set rather than a trait object: the network layer only ever needs
/// to serialize one of these three shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Payload {
    Block(BlockInfo),
    ReqBlock(ReqBlockInfo),
    NewTransaction(NewTransactionMsg),
}

/// The envelope handed to `Network::send_internal_msg`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseMsg {
    pub kind: SendKind,
    pub payload: Payload,
}

impl BaseMsg {
    pub fn broadcast(payload: Payload) -> Self {
        BaseMsg { kind: SendKind::Broadcast, payload }
    }

    pub fn random_send(payload: Payload) -> Self {
        BaseMsg { kind: SendKind::RandomSend, payload }
    }
}

/// Inbound notifications delivered by the network collaborator's event
/// stream: new blocks and transactions arriving from peers, which the
/// engine turns into processing triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Block { chain: ChainId, key: BlockKey },
    Transaction { chain: ChainId, key: BlockKey },
}
