//! Peer synchronization protocol
//!
//! Every frame on a peer connection is a JSON [`Message`] envelope: a kind
//! tag and an opaque payload, itself the encoded block, chain, transaction or
//! peer address, carried as hex. [`handle_message`] applies one inbound frame
//! to the local ledger and queues any reply on the sender's outbound queue.
//!
//! Data received from peers is trusted: blocks, chains and transactions are
//! adopted without re-checking proof-of-work or signatures.

use crate::blockchain::Block;
use crate::codec;
use crate::error::{ChainError, Result};
use crate::network::NetworkNode;
use crate::transaction::Transaction;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    NewestBlock,
    AllBlocksRequest,
    AllBlocksResponse,
    NewBlockNotify,
    NewTxNotify,
    NewPeerNotify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
}

/// Where a peer accepts connections: its address and open port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress {
    pub address: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn key(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl Message {
    pub fn new<T: Serialize>(kind: MessageKind, payload: &T) -> Result<Self> {
        Ok(Message {
            kind,
            payload: codec::to_bytes(payload)?,
        })
    }

    pub fn newest_block(block: &Block) -> Result<Self> {
        Self::new(MessageKind::NewestBlock, block)
    }

    pub fn all_blocks_request() -> Result<Self> {
        Self::new(MessageKind::AllBlocksRequest, &())
    }

    pub fn all_blocks_response(blocks: &[Block]) -> Result<Self> {
        Self::new(MessageKind::AllBlocksResponse, &blocks)
    }

    pub fn new_block_notify(block: &Block) -> Result<Self> {
        Self::new(MessageKind::NewBlockNotify, block)
    }

    pub fn new_tx_notify(tx: &Transaction) -> Result<Self> {
        Self::new(MessageKind::NewTxNotify, tx)
    }

    pub fn new_peer_notify(peer: &PeerAddress) -> Result<Self> {
        Self::new(MessageKind::NewPeerNotify, peer)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        codec::from_bytes(&self.payload)
    }

    /// Text frame sent on the wire.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

fn reply(outbound: &UnboundedSender<Message>, message: Message) -> Result<()> {
    outbound
        .send(message)
        .map_err(|_| ChainError::NetworkError("Outbound queue closed".to_string()))
}

/// Applies one inbound message from a peer. Replies go to `outbound`, the
/// queue of the peer that sent it.
pub fn handle_message(
    node: &Arc<NetworkNode>,
    outbound: &UnboundedSender<Message>,
    message: Message,
) -> Result<()> {
    let blockchain = node.blockchain();
    debug!(kind = ?message.kind, bytes = message.payload.len(), "peer.message");

    match message.kind {
        MessageKind::NewestBlock => {
            let remote: Block = message.decode()?;
            let local = blockchain.newest_block()?;
            if remote.height >= local.height {
                info!(
                    remote_height = remote.height,
                    local_height = local.height,
                    "Requesting all blocks from peer"
                );
                reply(outbound, Message::all_blocks_request()?)
            } else {
                reply(outbound, Message::newest_block(&local)?)
            }
        }
        MessageKind::AllBlocksRequest => {
            let blocks = blockchain.blocks()?;
            reply(outbound, Message::all_blocks_response(&blocks)?)
        }
        MessageKind::AllBlocksResponse => {
            let chain: Vec<Block> = message.decode()?;
            blockchain.replace(chain)
        }
        MessageKind::NewBlockNotify => {
            let block: Block = message.decode()?;
            blockchain.add_peer_block(block)
        }
        MessageKind::NewTxNotify => {
            let tx: Transaction = message.decode()?;
            blockchain.mempool().add_peer_tx(tx);
            Ok(())
        }
        MessageKind::NewPeerNotify => {
            let peer: PeerAddress = message.decode()?;
            info!(peer = %peer.key(), "Dialing announced peer");
            let node = Arc::clone(node);
            tokio::spawn(async move {
                if let Err(e) = node.connect_peer(&peer.address, peer.port, false).await {
                    warn!(peer = %peer.key(), error = %e, "Failed to dial announced peer");
                }
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Blockchain;
    use crate::mempool::Mempool;
    use crate::persistence::InMemoryPersistence;
    use crate::transaction::make_coinbase_tx;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn node(miner: &str) -> Arc<NetworkNode> {
        let chain = Blockchain::initialize(
            Arc::new(InMemoryPersistence::new()),
            Arc::new(Mempool::new()),
            miner,
        )
        .unwrap();
        Arc::new(NetworkNode::new(Arc::new(chain), 4000))
    }

    fn queue() -> (UnboundedSender<Message>, UnboundedReceiver<Message>) {
        unbounded_channel()
    }

    #[test]
    fn test_envelope_wire_shape() {
        let message = Message::new(MessageKind::NewPeerNotify, &"x").unwrap();
        let text = message.to_text().unwrap();
        assert_eq!(text, r#"{"type":"NewPeerNotify","payload":"227822"}"#);
        assert_eq!(Message::from_text(&text).unwrap(), message);
    }

    #[test]
    fn test_garbage_frame_is_rejected() {
        assert!(Message::from_text("not json").is_err());
        let bad_payload = Message {
            kind: MessageKind::NewBlockNotify,
            payload: b"{".to_vec(),
        };
        assert!(bad_payload.decode::<Block>().is_err());
    }

    #[tokio::test]
    async fn test_taller_remote_triggers_full_request() {
        let local = node("a");
        let (tx, mut rx) = queue();

        let mut remote = local.blockchain().newest_block().unwrap();
        remote.height += 3;
        handle_message(&local, &tx, Message::newest_block(&remote).unwrap()).unwrap();

        assert_eq!(rx.try_recv().unwrap().kind, MessageKind::AllBlocksRequest);
    }

    #[tokio::test]
    async fn test_shorter_remote_gets_our_newest_block() {
        let local = node("a");
        local.blockchain().add_block().unwrap();
        let (tx, mut rx) = queue();

        let mut remote = local.blockchain().newest_block().unwrap();
        remote.height = 1;
        handle_message(&local, &tx, Message::newest_block(&remote).unwrap()).unwrap();

        let answer = rx.try_recv().unwrap();
        assert_eq!(answer.kind, MessageKind::NewestBlock);
        assert_eq!(answer.decode::<Block>().unwrap().height, 2);
    }

    #[tokio::test]
    async fn test_full_exchange_converges() {
        let a = node("a");
        let b = node("b");
        a.blockchain().add_block().unwrap();
        let (tx, mut rx) = queue();

        handle_message(&a, &tx, Message::all_blocks_request().unwrap()).unwrap();
        let response = rx.try_recv().unwrap();
        assert_eq!(response.kind, MessageKind::AllBlocksResponse);

        handle_message(&b, &tx, response).unwrap();
        assert_eq!(b.blockchain().head(), a.blockchain().head());
        assert_eq!(b.blockchain().blocks().unwrap(), a.blockchain().blocks().unwrap());
    }

    #[tokio::test]
    async fn test_new_tx_notify_lands_in_mempool() {
        let local = node("a");
        let (tx, _rx) = queue();
        let pending = make_coinbase_tx("elsewhere");

        handle_message(&local, &tx, Message::new_tx_notify(&pending).unwrap()).unwrap();
        assert_eq!(
            local.blockchain().mempool().get_transaction(&pending.id),
            Some(pending)
        );
    }
}
