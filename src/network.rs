/// Network/gossip collaborator: out of scope as a real peer-to-peer
/// transport. The broadcast/random-send/inbound-event shape it exposes to
/// the engine is a `tokio::sync::broadcast` channel per concern, one for
/// outbound messages and one for inbound peer events.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::messages::{BaseMsg, InboundEvent};

const CHANNEL_CAPACITY: usize = 1000;

pub trait Network: Send + Sync {
    /// Hand a message to the peer set per its `SendKind`. Fire-and-forget:
    /// no delivery acknowledgement, best-effort only.
    fn send_internal_msg(&self, msg: BaseMsg);

    /// Subscribe to inbound events (new blocks/transactions from peers).
    fn subscribe(&self) -> broadcast::Receiver<InboundEvent>;
}

/// The production `Network`: an in-process broadcast hub. A real deployment
/// wires `outbound` to a peer-connection fan-out and `inbound` to whatever
/// decodes wire bytes into `InboundEvent`; this type only owns the channel
/// plumbing, the same division of labor as `EventBroadcaster`.
pub struct BroadcastNetwork {
    outbound_tx: broadcast::Sender<BaseMsg>,
    inbound_tx: broadcast::Sender<InboundEvent>,
}

impl BroadcastNetwork {
    pub fn new() -> Arc<Self> {
        let (outbound_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (inbound_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Arc::new(Self { outbound_tx, inbound_tx })
    }

    /// Subscribe to the raw outbound stream, e.g. for a peer-connection
    /// writer task to drain and serialize onto the wire.
    pub fn subscribe_outbound(&self) -> broadcast::Receiver<BaseMsg> {
        self.outbound_tx.subscribe()
    }

    /// Feed a decoded peer message in, as a wire-protocol reader task would.
    pub fn inject_inbound(&self, event: InboundEvent) {
        let _ = self.inbound_tx.send(event);
    }
}

impl Network for BroadcastNetwork {
    fn send_internal_msg(&self, msg: BaseMsg) {
        let _ = self.outbound_tx.send(msg);
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.inbound_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_id::ChainId;
    use crate::messages::{Payload, ReqBlockInfo};
    use crate::reliability::BlockKey;

    #[tokio::test]
    async fn test_outbound_message_reaches_subscriber() {
        let net = BroadcastNetwork::new();
        let mut rx = net.subscribe_outbound();
        let msg = BaseMsg::broadcast(Payload::ReqBlock(ReqBlockInfo { chain: 1 as ChainId, index: 5 }));
        net.send_internal_msg(msg.clone());
        let got = rx.recv().await.unwrap();
        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn test_inbound_event_reaches_subscriber() {
        let net = BroadcastNetwork::new();
        let mut rx = net.subscribe();
        net.inject_inbound(InboundEvent::Block { chain: 1, key: BlockKey::EMPTY });
        let got = rx.recv().await.unwrap();
        assert_eq!(got, InboundEvent::Block { chain: 1, key: BlockKey::EMPTY });
    }
}
