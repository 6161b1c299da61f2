use crate::blockchain::Blockchain;
use crate::config::{parse_peer, Config};
use crate::mempool::Mempool;
use crate::network::NetworkNode;
use crate::persistence::{Database, Persistence};
use crate::wallet::Wallet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    Booting,
    Syncing,
    Ready,
}

pub struct Node {
    pub config: Config,
    pub wallet: Arc<Wallet>,
    pub blockchain: Arc<Blockchain>,
    pub network: Arc<NetworkNode>,
    pub state: Arc<RwLock<NodeState>>,
}

impl Node {
    /// Builds every component in a fixed order: identity, store, ledger,
    /// then peer sync. Any failure here is fatal.
    pub fn init(config: Config) -> Result<Self, BoxError> {
        config.validate()?;
        fs::create_dir_all(&config.database.path)
            .map_err(|e| format!("Failed to create data dir {}: {}", config.database.path, e))?;

        // 1) Identity
        let wallet = Arc::new(Wallet::load_or_create(config.wallet_path())?);
        info!(address = %wallet.address, "Node identity ready");

        // 2) Store
        let db_path = config.db_path();
        let store: Arc<dyn Persistence> = Arc::new(Database::open(&db_path.to_string_lossy())?);
        info!(path = %db_path.display(), "Opened block store");

        // 3) Ledger
        let mempool = Arc::new(Mempool::new());
        let blockchain = Arc::new(Blockchain::initialize(
            store,
            mempool,
            wallet.address.clone(),
        )?);

        // 4) Peer sync
        let network = Arc::new(NetworkNode::new(
            Arc::clone(&blockchain),
            config.network.rest_port,
        ));

        Ok(Self {
            config,
            wallet,
            blockchain,
            network,
            state: Arc::new(RwLock::new(NodeState::Booting)),
        })
    }

    /// Starts the configured servers, dials bootstrap peers and runs until a
    /// server stops.
    pub async fn start(self: Arc<Self>) -> Result<(), BoxError> {
        let servers = self.clone().start_servers()?;
        // give the listeners a moment to bind before peers call back
        tokio::time::sleep(Duration::from_millis(200)).await;

        *self.state.write().await = NodeState::Syncing;
        for peer in &self.config.network.bootstrap_peers {
            let (host, port) = match parse_peer(peer) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Skipping bootstrap peer");
                    continue;
                }
            };
            if let Err(e) = self.network.connect_peer(&host, port, false).await {
                warn!(peer = %peer, error = %e, "Failed to reach bootstrap peer");
            }
        }
        *self.state.write().await = NodeState::Ready;

        let heartbeat = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                let head = heartbeat.blockchain.head();
                info!(
                    height = head.height,
                    difficulty = head.current_difficulty,
                    mempool = heartbeat.blockchain.mempool().len(),
                    peers = heartbeat.network.peer_count(),
                    "Node running"
                );
            }
        });

        for server in servers {
            server.await??;
        }
        Ok(())
    }

    #[cfg(feature = "api")]
    fn start_servers(
        self: Arc<Self>,
    ) -> Result<Vec<tokio::task::JoinHandle<Result<(), BoxError>>>, BoxError> {
        let api_node = Arc::new(crate::api::ApiNode::new(
            Arc::clone(&self.network),
            Arc::clone(&self.wallet),
            Some(Arc::clone(&self.state)),
        ));
        let network = &self.config.network;
        let mut servers = Vec::new();

        if network.mode.serves_rest() {
            let node = Arc::clone(&api_node);
            let port = network.rest_port;
            servers.push(tokio::spawn(async move {
                let result = crate::api::run_api_server(node, port).await;
                if let Err(e) = &result {
                    error!("REST API server failed: {}", e);
                }
                result
            }));
        }
        if network.mode.serves_html() {
            let node = Arc::clone(&api_node);
            let port = network.html_port;
            servers.push(tokio::spawn(async move {
                let result = crate::explorer::run_explorer(node, port).await;
                if let Err(e) = &result {
                    error!("Explorer failed: {}", e);
                }
                result
            }));
        }
        Ok(servers)
    }

    #[cfg(not(feature = "api"))]
    fn start_servers(
        self: Arc<Self>,
    ) -> Result<Vec<tokio::task::JoinHandle<Result<(), BoxError>>>, BoxError> {
        Err("API feature not enabled in this build".into())
    }
}
