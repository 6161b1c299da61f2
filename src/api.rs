//! REST API server for nomadcoin
//!
//! JSON endpoints under `/api` for blocks, balances, the mempool, the node
//! wallet and peers, plus the `/ws` upgrade that turns an HTTP request into a
//! peer sync connection.

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Path, Query, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::blockchain::{Block, ChainHead};
use crate::error::ChainError;
use crate::network::NetworkNode;
use crate::node::NodeState;
use crate::sync::PeerAddress;
use crate::transaction::{Transaction, UTxOut};
use crate::wallet::Wallet;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct ApiNode {
    pub network: Arc<NetworkNode>,
    pub wallet: Arc<Wallet>,
    // Orchestrator state for health checks, when running under `node::Node`
    pub state: Option<Arc<RwLock<NodeState>>>,
    api_stats: Arc<RwLock<ApiStats>>,
}

struct ApiStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    blocks_mined: u64,
    transactions_submitted: u64,
    start_time: Instant,
}

impl ApiStats {
    fn new() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            blocks_mined: 0,
            transactions_submitted: 0,
            start_time: Instant::now(),
        }
    }

    fn record_request(&mut self, success: bool) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
    }
}

impl ApiNode {
    pub fn new(
        network: Arc<NetworkNode>,
        wallet: Arc<Wallet>,
        state: Option<Arc<RwLock<NodeState>>>,
    ) -> Self {
        Self {
            network,
            wallet,
            state,
            api_stats: Arc::new(RwLock::new(ApiStats::new())),
        }
    }

    /// Mines the mempool into a block off the async workers and announces it.
    pub async fn mine_and_broadcast(&self) -> Result<Block, ApiError> {
        let chain = Arc::clone(self.network.blockchain());
        let block = tokio::task::spawn_blocking(move || chain.add_block())
            .await
            .map_err(|e| ApiError::InternalError(format!("Mining task failed: {}", e)))??;

        self.network.broadcast_new_block(&block)?;
        self.api_stats.write().await.blocks_mined += 1;
        Ok(block)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BlockchainError(ChainError),
    InvalidInput(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BlockchainError(e) => {
                let status = match &e {
                    ChainError::NotFound(_) => StatusCode::NOT_FOUND,
                    ChainError::InsufficientFunds { .. }
                    | ChainError::InvalidSignature(_)
                    | ChainError::InvalidTransaction(_)
                    | ChainError::InvalidBlock(_) => StatusCode::BAD_REQUEST,
                    ChainError::NetworkError(_) => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if e.is_fatal() {
                    tracing::error!(error = %e, "api.fatal_error");
                }
                (status, e.to_string())
            }
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse { error_message: message })).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::BlockchainError(err)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error_message: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
struct UrlDescription {
    url: String,
    method: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'static str>,
}

#[derive(Serialize, Deserialize)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: u64,
}

#[derive(Deserialize)]
struct BalanceQuery {
    #[serde(default)]
    total: bool,
}

#[derive(Deserialize)]
pub struct AddTxRequest {
    pub to: String,
    pub amount: u64,
}

#[derive(Serialize, Deserialize)]
pub struct WalletResponse {
    pub address: String,
}

#[derive(Serialize)]
pub struct ApiStatsResponse {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub blocks_mined: u64,
    pub transactions_submitted: u64,
    pub uptime_seconds: u64,
}

#[derive(Deserialize)]
struct UpgradeQuery {
    #[serde(rename = "openPort")]
    open_port: u16,
}

// ============================================================================
// Middleware
// ============================================================================

async fn stats_middleware(State(node): State<Arc<ApiNode>>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;

    let success = response.status().is_success();
    node.api_stats.write().await.record_request(success);

    response
}

/// Logs method, path, status and duration of every API request.
async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

/// Build the API router with all endpoints
pub fn build_api_router(node: Arc<ApiNode>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE])
        .allow_credentials(true);

    let api_routes = Router::new()
        .route("/", get(documentation))
        .route("/status", get(get_status))
        // Blocks
        .route("/blocks", get(get_blocks).post(mine_block))
        .route("/blocks/:hash", get(get_block))
        // Accounts and transactions
        .route("/balance/:address", get(get_balance))
        .route("/history/:address", get(get_history))
        .route("/mempool", get(get_mempool))
        .route("/wallet", get(get_wallet))
        .route("/transactions", post(submit_transaction))
        // Network
        .route("/peers", get(get_peers).post(add_peer))
        // System
        .route("/health", get(health_check))
        .route("/stats", get(get_api_stats))
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn_with_state(node.clone(), stats_middleware))
        .with_state(node.clone());

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(upgrade_peer))
        .with_state(node)
        .layer(cors)
}

/// Serves the API on an already bound listener. The peer upgrade needs the
/// remote address, so connection info is attached to every request.
pub async fn serve_api(
    listener: TcpListener,
    node: Arc<ApiNode>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_api_router(node);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

pub async fn run_api_server(
    node: Arc<ApiNode>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("REST API listening on http://{}", addr);
    tracing::info!("API documentation at http://{}/api", addr);

    serve_api(listener, node).await
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn documentation(State(node): State<Arc<ApiNode>>) -> impl IntoResponse {
    let base = format!("http://localhost:{}/api", node.network.open_port());
    let url = |path: &str| format!("{}{}", base, path);
    Json(vec![
        UrlDescription {
            url: url(""),
            method: "GET",
            description: "See documentation",
            payload: None,
        },
        UrlDescription {
            url: url("/status"),
            method: "GET",
            description: "See the status of the blockchain",
            payload: None,
        },
        UrlDescription {
            url: url("/blocks"),
            method: "GET",
            description: "See all blocks",
            payload: None,
        },
        UrlDescription {
            url: url("/blocks"),
            method: "POST",
            description: "Mine a block from the mempool",
            payload: None,
        },
        UrlDescription {
            url: url("/blocks/{hash}"),
            method: "GET",
            description: "See a block",
            payload: None,
        },
        UrlDescription {
            url: url("/balance/{address}"),
            method: "GET",
            description: "Get unspent outputs for an address, or the total with ?total=true",
            payload: None,
        },
        UrlDescription {
            url: url("/history/{address}"),
            method: "GET",
            description: "Get confirmed transactions for an address",
            payload: None,
        },
        UrlDescription {
            url: url("/mempool"),
            method: "GET",
            description: "See pending transactions",
            payload: None,
        },
        UrlDescription {
            url: url("/wallet"),
            method: "GET",
            description: "See the address of this node's wallet",
            payload: None,
        },
        UrlDescription {
            url: url("/transactions"),
            method: "POST",
            description: "Send coins from this node's wallet",
            payload: Some("to:string, amount:int"),
        },
        UrlDescription {
            url: url("/peers"),
            method: "GET",
            description: "See connected peers",
            payload: None,
        },
        UrlDescription {
            url: url("/peers"),
            method: "POST",
            description: "Connect to a peer and announce it",
            payload: Some("address:string, port:int"),
        },
        UrlDescription {
            url: format!("ws://localhost:{}/ws?openPort={{port}}", node.network.open_port()),
            method: "GET",
            description: "Upgrade to a peer connection",
            payload: None,
        },
    ])
}

async fn get_status(State(node): State<Arc<ApiNode>>) -> Json<ChainHead> {
    Json(node.network.blockchain().head())
}

async fn get_blocks(State(node): State<Arc<ApiNode>>) -> Result<Json<Vec<Block>>, ApiError> {
    Ok(Json(node.network.blockchain().blocks()?))
}

async fn mine_block(State(node): State<Arc<ApiNode>>) -> Result<impl IntoResponse, ApiError> {
    let block = node.mine_and_broadcast().await?;
    Ok((StatusCode::CREATED, Json(block)))
}

async fn get_block(
    State(node): State<Arc<ApiNode>>,
    Path(hash): Path<String>,
) -> Result<Json<Block>, ApiError> {
    Ok(Json(node.network.blockchain().find_block(&hash)?))
}

async fn get_balance(
    State(node): State<Arc<ApiNode>>,
    Path(address): Path<String>,
    Query(query): Query<BalanceQuery>,
) -> Result<Response, ApiError> {
    let chain = node.network.blockchain();
    if query.total {
        let balance = chain.balance_by_address(&address)?;
        Ok(Json(BalanceResponse { address, balance }).into_response())
    } else {
        let outputs: Vec<UTxOut> = chain.utxouts_by_address(&address)?;
        Ok(Json(outputs).into_response())
    }
}

async fn get_history(
    State(node): State<Arc<ApiNode>>,
    Path(address): Path<String>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    Ok(Json(node.network.blockchain().tx_history(&address)?))
}

async fn get_mempool(State(node): State<Arc<ApiNode>>) -> Json<Vec<Transaction>> {
    Json(node.network.blockchain().mempool().get_all_transactions())
}

async fn get_wallet(State(node): State<Arc<ApiNode>>) -> Json<WalletResponse> {
    Json(WalletResponse {
        address: node.wallet.address.clone(),
    })
}

async fn submit_transaction(
    State(node): State<Arc<ApiNode>>,
    Json(request): Json<AddTxRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.to.is_empty() {
        return Err(ApiError::InvalidInput("Recipient must not be empty".to_string()));
    }

    let chain = node.network.blockchain();
    let tx = match chain.add_tx(&node.wallet, &request.to, request.amount) {
        Ok(tx) => tx,
        Err(e) => {
            tracing::warn!(to = %request.to, amount = request.amount, error = %e, "tx.rejected");
            return Err(e.into());
        }
    };

    node.network.broadcast_new_tx(&tx)?;
    node.api_stats.write().await.transactions_submitted += 1;
    Ok((StatusCode::CREATED, Json(tx)))
}

async fn get_peers(State(node): State<Arc<ApiNode>>) -> Json<Vec<PeerAddress>> {
    Json(node.network.list_peers())
}

async fn add_peer(
    State(node): State<Arc<ApiNode>>,
    Json(peer): Json<PeerAddress>,
) -> Result<StatusCode, ApiError> {
    if peer.address.is_empty() {
        return Err(ApiError::InvalidInput("Peer address must not be empty".to_string()));
    }
    node.network
        .connect_peer(&peer.address, peer.port, true)
        .await?;
    Ok(StatusCode::OK)
}

async fn upgrade_peer(
    State(node): State<Arc<ApiNode>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(query): Query<UpgradeQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let address = remote.ip().to_string();
    let network = Arc::clone(&node.network);
    ws.on_upgrade(move |socket| async move {
        network.accept_peer(socket, address, query.open_port);
    })
}

async fn health_check(State(node): State<Arc<ApiNode>>) -> impl IntoResponse {
    let chain = node.network.blockchain();
    let state = match &node.state {
        Some(s) => s.read().await.clone(),
        None => NodeState::Ready,
    };
    let status = if state == NodeState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if status == StatusCode::OK { "healthy" } else { "unhealthy" },
            "node_state": format!("{:?}", state),
            "height": chain.height(),
            "peers": node.network.peer_count(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

async fn get_api_stats(State(node): State<Arc<ApiNode>>) -> Json<ApiStatsResponse> {
    let stats = node.api_stats.read().await;
    Json(ApiStatsResponse {
        total_requests: stats.total_requests,
        successful_requests: stats.successful_requests,
        failed_requests: stats.failed_requests,
        blocks_mined: stats.blocks_mined,
        transactions_submitted: stats.transactions_submitted,
        uptime_seconds: stats.start_time.elapsed().as_secs(),
    })
}
