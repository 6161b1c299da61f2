//! Peer synchronization between two nodes, first through the message
//! handler directly and then over real websocket connections.

use nomadcoin::api::{serve_api, ApiNode};
use nomadcoin::blockchain::{Block, Blockchain};
use nomadcoin::error::ChainError;
use nomadcoin::mempool::Mempool;
use nomadcoin::network::NetworkNode;
use nomadcoin::persistence::InMemoryPersistence;
use nomadcoin::sync::{handle_message, Message, PeerAddress};
use nomadcoin::transaction::{
    make_coinbase_tx, Transaction, TxIn, TxOut, COINBASE_INDEX, COINBASE_SENTINEL,
};
use nomadcoin::wallet::Wallet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::unbounded_channel;

fn network_node(miner: &str, open_port: u16) -> Arc<NetworkNode> {
    let chain = Blockchain::initialize(
        Arc::new(InMemoryPersistence::new()),
        Arc::new(Mempool::new()),
        miner,
    )
    .expect("Failed to create blockchain");
    Arc::new(NetworkNode::new(Arc::new(chain), open_port))
}

#[tokio::test]
async fn test_competing_blocks_both_advance() {
    let a = network_node("miner-a", 4001);
    let b = network_node("miner-b", 4002);
    b.blockchain().replace(a.blockchain().blocks().unwrap()).unwrap();
    assert_eq!(a.blockchain().head(), b.blockchain().head());

    let (outbound, _queue) = unbounded_channel();
    let tx_a = make_coinbase_tx("alice");
    let tx_b = make_coinbase_tx("bob");
    a.blockchain().mempool().add_peer_tx(tx_a.clone());
    b.blockchain().mempool().add_peer_tx(tx_b.clone());

    let block_a = a.blockchain().add_block().unwrap();
    let block_b = b.blockchain().add_block().unwrap();
    assert_eq!(block_a.previous_hash, block_b.previous_hash);

    // Each transaction reaches the other node only after it has mined.
    handle_message(&a, &outbound, Message::new_tx_notify(&tx_b).unwrap()).unwrap();
    handle_message(&b, &outbound, Message::new_tx_notify(&tx_a).unwrap()).unwrap();
    assert_eq!(a.blockchain().mempool().len(), 1);
    assert_eq!(b.blockchain().mempool().len(), 1);

    let height_a = a.blockchain().height();
    let height_b = b.blockchain().height();
    handle_message(&a, &outbound, Message::new_block_notify(&block_b).unwrap()).unwrap();
    handle_message(&b, &outbound, Message::new_block_notify(&block_a).unwrap()).unwrap();

    assert_eq!(a.blockchain().height(), height_a + 1);
    assert_eq!(b.blockchain().height(), height_b + 1);
    assert!(a.blockchain().mempool().is_empty());
    assert!(b.blockchain().mempool().is_empty());

    // Last writer wins: each node now points at the other's block.
    assert_eq!(a.blockchain().head().newest_hash, block_b.hash);
    assert_eq!(b.blockchain().head().newest_hash, block_a.hash);
}

#[tokio::test]
async fn test_overflowing_peer_amounts_are_contained() {
    let node = network_node("miner", 4003);
    let owner = Wallet::generate().unwrap();
    let (outbound, _queue) = unbounded_channel();

    let minted = Transaction::new(
        1,
        vec![TxIn {
            tx_id: "mint".to_string(),
            index: COINBASE_INDEX,
            signature: COINBASE_SENTINEL.to_string(),
        }],
        vec![
            TxOut {
                address: owner.address.clone(),
                amount: u64::MAX,
            },
            TxOut {
                address: owner.address.clone(),
                amount: 1,
            },
        ],
    );
    let head = node.blockchain().head();
    let mut block = Block::new(head.height + 1, head.newest_hash, 1, vec![minted.clone()]);
    block.hash = block.calculate_hash();
    handle_message(&node, &outbound, Message::new_block_notify(&block).unwrap()).unwrap();

    let chain = node.blockchain();
    assert_eq!(chain.balance_by_address(&owner.address).unwrap(), u64::MAX);
    assert_eq!(chain.utxouts_by_address(&owner.address).unwrap().len(), 2);
    assert_eq!(chain.tx_history(&owner.address).unwrap(), vec![minted.clone()]);
    assert!(matches!(
        minted.total_output(),
        Err(ChainError::InvalidTransaction(_))
    ));

    // Spending from the overflowing outputs is refused and the pool stays empty.
    assert!(matches!(
        chain.add_tx(&owner, "elsewhere", 5),
        Err(ChainError::InvalidTransaction(_))
    ));
    assert!(chain.mempool().is_empty());
    assert_eq!(chain.blocks().unwrap().len(), 2);
}

/// A node with its REST surface served on an ephemeral local port.
async fn spawn_node() -> Arc<NetworkNode> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let wallet = Arc::new(Wallet::generate().unwrap());
    let network = network_node(&wallet.address, port);
    let api = Arc::new(ApiNode::new(Arc::clone(&network), wallet, None));
    tokio::spawn(async move {
        let _ = serve_api(listener, api).await;
    });
    network
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_live_nodes_converge() {
    let a = spawn_node().await;
    let b = spawn_node().await;
    b.blockchain().add_block().unwrap();

    b.connect_peer("127.0.0.1", a.open_port(), false).await.unwrap();

    // b is taller, so a requests and adopts b's whole chain.
    wait_until(|| a.blockchain().head() == b.blockchain().head()).await;
    assert_eq!(a.blockchain().blocks().unwrap(), b.blockchain().blocks().unwrap());

    assert_eq!(
        b.list_peers(),
        vec![PeerAddress {
            address: "127.0.0.1".to_string(),
            port: a.open_port(),
        }]
    );
    wait_until(|| a.peer_count() == 1).await;
    assert_eq!(a.list_peers()[0].port, b.open_port());

    // New blocks and transactions fan out to connected peers.
    let block = a.blockchain().add_block().unwrap();
    a.broadcast_new_block(&block).unwrap();
    wait_until(|| b.blockchain().head().newest_hash == block.hash).await;

    let tx = make_coinbase_tx("carol");
    b.broadcast_new_tx(&tx).unwrap();
    wait_until(|| a.blockchain().mempool().get_transaction(&tx.id).is_some()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_announced_peer_is_dialed() {
    let hub = spawn_node().await;
    let first = spawn_node().await;
    let newcomer = spawn_node().await;

    first.connect_peer("127.0.0.1", hub.open_port(), false).await.unwrap();
    wait_until(|| hub.peer_count() == 1).await;

    // The hub dials the newcomer and tells `first` about it.
    hub.connect_peer("127.0.0.1", newcomer.open_port(), true)
        .await
        .unwrap();

    wait_until(|| {
        first
            .list_peers()
            .iter()
            .any(|peer| peer.port == newcomer.open_port())
    })
    .await;
    wait_until(|| newcomer.peer_count() == 2).await;
}
