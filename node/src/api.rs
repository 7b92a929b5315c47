//! # REST API
//!
//! The axum router in front of [`FungibleTokenService`]. Handlers share
//! state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                                   | Description                 |
//! |--------|----------------------------------------|-----------------------------|
//! | GET    | `/health`                              | Liveness probe              |
//! | GET    | `/status`                              | Network, issuer, funding    |
//! | GET    | `/metrics`                             | Prometheus text format      |
//! | POST   | `/api/ft/genesis`                      | Create a token type         |
//! | POST   | `/api/ft/issue`                        | Mint tokens                 |
//! | POST   | `/api/ft/transfer`                     | Move tokens                 |
//! | GET    | `/api/ft/:genesis_id/balance/:address` | Unreserved token balance    |
//!
//! Every `/api` answer is an envelope: `{"code": 0, "data": ...}` on
//! success, `{"code": <http status>, "error": <kind>, "message": ...}` on
//! failure. The error kind is [`FtError::kind_name`].

use axum::{
    extract::{FromRef, Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sft_protocol::ft::Receiver;
use sft_protocol::ledger::TxId;
use sft_protocol::{FtError, FtResult, FungibleTokenService};

use crate::metrics::{metrics_handler, SharedMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub service: Arc<FungibleTokenService>,
    pub metrics: SharedMetrics,
}

impl FromRef<AppState> for SharedMetrics {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

impl AppState {
    fn record<T>(&self, operation: &str, started: Instant, result: &FtResult<T>) {
        self.metrics.observe(operation, started.elapsed(), result);
        let pool = self.service.funding_pool();
        self.metrics.set_funding(pool.available_len(), pool.available_value());
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/ft/genesis", post(genesis_handler))
        .route("/api/ft/issue", post(issue_handler))
        .route("/api/ft/transfer", post(transfer_handler))
        .route("/api/ft/:genesis_id/balance/:address", get(balance_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisRequest {
    pub token_name: String,
    pub token_symbol: String,
    pub decimal_num: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    pub genesis_id: String,
    pub token_amount: u64,
    pub receiver_address: String,
    #[serde(default)]
    pub allow_issue_in_addition: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub genesis_id: String,
    pub sender_wif: String,
    pub receivers: Vec<Receiver>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub network: String,
    pub issuer_address: String,
    pub funding_utxos: usize,
    pub funding_value: u64,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub genesis_id: String,
    pub address: String,
    pub balance: u64,
}

#[derive(Debug, Serialize)]
struct Success<T: Serialize> {
    code: u16,
    data: T,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub error: String,
    pub message: String,
}

/// HTTP status for a failed operation.
fn status_for(err: &FtError) -> StatusCode {
    match err {
        FtError::UnknownGenesis(_) => StatusCode::NOT_FOUND,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        FtError::InsufficientFunds { .. } => StatusCode::SERVICE_UNAVAILABLE,
        FtError::OracleUnreachable { .. }
        | FtError::OracleRejected { .. }
        | FtError::BroadcastRejected(_)
        | FtError::Ledger(_)
        | FtError::TransferIncomplete { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(result: FtResult<T>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(Success { code: 0, data })).into_response(),
        Err(err) => {
            let status = status_for(&err);
            if status.is_server_error() {
                tracing::warn!(error = %err, kind = err.kind_name(), "request failed");
            }
            let body = ErrorResponse {
                code: status.as_u16(),
                error: err.kind_name().to_string(),
                message: err.to_string(),
            };
            (status, Json(body)).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pool = state.service.funding_pool();
    Json(StatusResponse {
        version: state.version.clone(),
        network: state.service.network().to_string(),
        issuer_address: state.service.address().to_string(),
        funding_utxos: pool.available_len(),
        funding_value: pool.available_value(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `POST /api/ft/genesis`
async fn genesis_handler(State(state): State<AppState>, Json(req): Json<GenesisRequest>) -> Response {
    let started = Instant::now();
    let result = state.service.genesis(&req.token_name, &req.token_symbol, req.decimal_num).await;
    state.record("genesis", started, &result);
    respond(result)
}

/// `POST /api/ft/issue`
async fn issue_handler(State(state): State<AppState>, Json(req): Json<IssueRequest>) -> Response {
    let started = Instant::now();
    let result = match TxId::from_hex(&req.genesis_id) {
        Ok(genesis_id) => {
            state
                .service
                .issue(&genesis_id, req.token_amount, &req.receiver_address, req.allow_issue_in_addition)
                .await
        }
        Err(e) => Err(e),
    };
    state.record("issue", started, &result);
    respond(result)
}

/// `POST /api/ft/transfer`
async fn transfer_handler(State(state): State<AppState>, Json(req): Json<TransferRequest>) -> Response {
    let started = Instant::now();
    let result = match TxId::from_hex(&req.genesis_id) {
        Ok(genesis_id) => state.service.transfer(&genesis_id, &req.sender_wif, &req.receivers).await,
        Err(e) => Err(e),
    };
    state.record("transfer", started, &result);
    respond(result)
}

/// `GET /api/ft/:genesis_id/balance/:address`
async fn balance_handler(
    Path((genesis_id, address)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    let result = TxId::from_hex(&genesis_id).and_then(|id| {
        state.service.issuer_record(&id)?;
        let balance = state.service.token_balance(&id, &address)?;
        Ok(BalanceResponse { genesis_id: id.to_string(), address: address.clone(), balance })
    });
    respond(result)
}
