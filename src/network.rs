//! Peer registry and websocket connections
//!
//! Each connected peer gets one unbounded outbound queue and two tasks: a
//! reader that feeds inbound frames to [`crate::sync::handle_message`] and a
//! writer that drains the queue onto the socket. Whichever task fails first
//! tears the peer down, which aborts the other task and drops the socket.
//! There is no retry; the remote side has to reconnect.

use crate::blockchain::{Block, Blockchain};
use crate::error::{ChainError, Result};
use crate::sync::{handle_message, Message, PeerAddress};
use crate::transaction::Transaction;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tracing::{error, info, warn};

struct Peer {
    address: PeerAddress,
    conn_id: u64,
    outbound: UnboundedSender<Message>,
    reader: AbortHandle,
    writer: AbortHandle,
}

impl Peer {
    fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

pub struct NetworkNode {
    blockchain: Arc<Blockchain>,
    peers: Mutex<HashMap<String, Peer>>,
    open_port: u16,
    next_conn_id: AtomicU64,
}

impl NetworkNode {
    /// `open_port` is the port this node accepts peer upgrades on; it is
    /// announced to every peer we dial.
    pub fn new(blockchain: Arc<Blockchain>, open_port: u16) -> Self {
        NetworkNode {
            blockchain,
            peers: Mutex::new(HashMap::new()),
            open_port,
            next_conn_id: AtomicU64::new(0),
        }
    }

    pub fn blockchain(&self) -> &Arc<Blockchain> {
        &self.blockchain
    }

    pub fn open_port(&self) -> u16 {
        self.open_port
    }

    /// Dials `address:port`, registers the connection and sends our newest
    /// block. With `broadcast` set, every other peer is told about the new one.
    pub async fn connect_peer(
        self: &Arc<Self>,
        address: &str,
        port: u16,
        broadcast: bool,
    ) -> Result<()> {
        let url = format!("ws://{}:{}/ws?openPort={}", address, port, self.open_port);
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ChainError::NetworkError(format!("Failed to dial {}: {}", url, e)))?;

        let (sink, stream) = socket.split();
        let sink = sink.with(|text: String| {
            future::ready(Ok::<_, tokio_tungstenite::tungstenite::Error>(
                TungsteniteMessage::Text(text),
            ))
        });
        let frames = stream.filter_map(|frame| {
            future::ready(match frame {
                Ok(TungsteniteMessage::Text(text)) => Some(Ok(text)),
                Ok(TungsteniteMessage::Close(_)) => Some(Err(closed())),
                Ok(_) => None,
                Err(e) => Some(Err(ChainError::NetworkError(e.to_string()))),
            })
        });

        let peer = PeerAddress {
            address: address.to_string(),
            port,
        };
        let outbound = self.register(peer.clone(), frames, sink);

        let newest = self.blockchain.newest_block()?;
        send(&outbound, Message::newest_block(&newest)?)?;

        if broadcast {
            self.broadcast_new_peer(&peer)?;
        }
        Ok(())
    }

    /// Registers a connection that arrived through the upgrade endpoint.
    /// `address` is the remote ip and `open_port` the port it listens on.
    pub fn accept_peer(self: &Arc<Self>, socket: WebSocket, address: String, open_port: u16) {
        let (sink, stream) = socket.split();
        let sink = sink.with(|text: String| future::ready(Ok::<_, axum::Error>(WsMessage::Text(text))));
        let frames = stream.filter_map(|frame| {
            future::ready(match frame {
                Ok(WsMessage::Text(text)) => Some(Ok(text)),
                Ok(WsMessage::Close(_)) => Some(Err(closed())),
                Ok(_) => None,
                Err(e) => Some(Err(ChainError::NetworkError(e.to_string()))),
            })
        });

        self.register(
            PeerAddress {
                address,
                port: open_port,
            },
            frames,
            sink,
        );
    }

    /// Spawns the reader and writer for a connection and inserts the peer.
    /// Both happen under the registry lock so a task that fails immediately
    /// still finds its own entry to tear down. A previous connection under
    /// the same key is dropped.
    fn register<R, W>(self: &Arc<Self>, address: PeerAddress, frames: R, sink: W) -> UnboundedSender<Message>
    where
        R: Stream<Item = Result<String>> + Send + 'static,
        W: Sink<String> + Send + 'static,
        W::Error: Display,
    {
        let key = address.key();
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, queue) = unbounded_channel();

        let mut peers = self.peers.lock();
        let reader = tokio::spawn(read_loop(
            Arc::clone(self),
            key.clone(),
            conn_id,
            outbound.clone(),
            frames,
        ));
        let writer = tokio::spawn(write_loop(Arc::clone(self), key.clone(), conn_id, queue, sink));

        let peer = Peer {
            address,
            conn_id,
            outbound: outbound.clone(),
            reader: reader.abort_handle(),
            writer: writer.abort_handle(),
        };
        if let Some(previous) = peers.insert(key.clone(), peer) {
            previous.abort();
        }
        drop(peers);

        info!(peer = %key, conn_id, "peer.connected");
        outbound
    }

    /// Removes the peer and stops both of its tasks. Stale calls from an
    /// older connection under the same key are ignored.
    pub fn teardown(&self, key: &str, conn_id: u64) {
        let mut peers = self.peers.lock();
        if peers.get(key).map(|peer| peer.conn_id) != Some(conn_id) {
            return;
        }
        if let Some(peer) = peers.remove(key) {
            peer.abort();
            info!(peer = %key, conn_id, "peer.disconnected");
        }
    }

    pub fn broadcast_new_block(&self, block: &Block) -> Result<()> {
        self.send_to_all(Message::new_block_notify(block)?, None);
        Ok(())
    }

    pub fn broadcast_new_tx(&self, tx: &Transaction) -> Result<()> {
        self.send_to_all(Message::new_tx_notify(tx)?, None);
        Ok(())
    }

    /// Announces `peer` to every other registered peer.
    pub fn broadcast_new_peer(&self, peer: &PeerAddress) -> Result<()> {
        let key = peer.key();
        self.send_to_all(Message::new_peer_notify(peer)?, Some(&key));
        Ok(())
    }

    fn send_to_all(&self, message: Message, skip: Option<&str>) {
        let peers = self.peers.lock();
        for (key, peer) in peers.iter() {
            if skip == Some(key.as_str()) {
                continue;
            }
            if peer.outbound.send(message.clone()).is_err() {
                warn!(peer = %key, kind = ?message.kind, "Outbound queue closed, skipping peer");
            }
        }
    }

    /// Registered peers, sorted by address then port.
    pub fn list_peers(&self) -> Vec<PeerAddress> {
        let mut peers: Vec<PeerAddress> = self
            .peers
            .lock()
            .values()
            .map(|peer| peer.address.clone())
            .collect();
        peers.sort();
        peers
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

fn closed() -> ChainError {
    ChainError::NetworkError("Connection closed by peer".to_string())
}

fn send(outbound: &UnboundedSender<Message>, message: Message) -> Result<()> {
    outbound
        .send(message)
        .map_err(|_| ChainError::NetworkError("Outbound queue closed".to_string()))
}

async fn read_loop<R>(
    node: Arc<NetworkNode>,
    key: String,
    conn_id: u64,
    outbound: UnboundedSender<Message>,
    frames: R,
) where
    R: Stream<Item = Result<String>> + Send + 'static,
{
    futures::pin_mut!(frames);
    while let Some(frame) = frames.next().await {
        let outcome = frame
            .and_then(|text| Message::from_text(&text))
            .and_then(|message| handle_message(&node, &outbound, message));
        if let Err(e) = outcome {
            if e.is_fatal() {
                error!(peer = %key, error = %e, "Fatal error while handling peer message");
            } else {
                warn!(peer = %key, error = %e, "peer.read_failed");
            }
            break;
        }
    }
    node.teardown(&key, conn_id);
}

async fn write_loop<W>(
    node: Arc<NetworkNode>,
    key: String,
    conn_id: u64,
    mut queue: UnboundedReceiver<Message>,
    sink: W,
) where
    W: Sink<String> + Send + 'static,
    W::Error: Display,
{
    futures::pin_mut!(sink);
    while let Some(message) = queue.recv().await {
        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(peer = %key, error = %e, "Failed to encode outbound message");
                break;
            }
        };
        if let Err(e) = sink.send(text).await {
            warn!(peer = %key, error = %e, "peer.write_failed");
            break;
        }
    }
    node.teardown(&key, conn_id);
}
