//! Gateway API Dispatcher
//!
//! Thin axum layer over the session coordinator, oracle manager, and audit
//! facade, plus the inbound counterparty protocol endpoints served to peer
//! gateways. All responses use the unified `{code, msg, data}` wrapper.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditResponse, StatusFacade, StatusResponse};
use crate::counterparty::{
    CommitmentRequest, CounterpartyClient, EvidenceRequest, EvidenceResponse, LocalCounterparty,
    ProposalDecision, TransferProposal,
};
use crate::error::GatewayError;
use crate::leaf::TransactionReceipt;
use crate::ontology::TokenType;
use crate::oracle::{OracleManager, OracleTask, OracleTaskRequest};
use crate::registry::GatewayIdentity;
use crate::session::coordinator::SessionCoordinator;
use crate::session::types::{SessionId, TransferRequest};

// ============================================================================
// Unified response wrapper
// ============================================================================

/// All API responses follow this structure:
/// - code: 0 = success, non-zero HTTP-ish error code
/// - msg: short message
/// - data: payload (success only)
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub msg: String,
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self {
            status: StatusCode::from_u16(e.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code: e.code(),
            msg: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "code": self.status.as_u16(),
            "error_code": self.code,
            "msg": self.msg,
        });
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

// ============================================================================
// State & router
// ============================================================================

pub struct AppState {
    pub coordinator: Arc<SessionCoordinator>,
    pub oracle: Arc<OracleManager>,
    pub facade: StatusFacade,
    /// Server side of the counterparty protocol, driven by peer gateways.
    pub counterparty_service: Arc<LocalCounterparty>,
    pub identity: GatewayIdentity,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/transact", post(transact))
        .route("/api/v1/status/{session_id}", get(session_status))
        .route("/api/v1/audit", get(audit))
        .route("/api/v1/approve-address", get(approve_address))
        .route("/api/v1/oracle/register", post(oracle_register))
        .route("/api/v1/oracle/execute", post(oracle_execute))
        .route("/api/v1/oracle/status/{task_id}", get(oracle_status))
        .route("/api/v1/oracle/unregister/{task_id}", post(oracle_unregister))
        .route("/api/v1/counterparty/identity", post(counterparty_identity))
        .route("/api/v1/counterparty/proposal", post(counterparty_proposal))
        .route("/api/v1/counterparty/evidence", post(counterparty_evidence))
        .route(
            "/api/v1/counterparty/commitment",
            post(counterparty_commitment),
        )
        .with_state(state)
}

// ============================================================================
// Transfer handlers
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TransactResponse {
    pub session_id: SessionId,
    pub status: StatusResponse,
}

/// Create a transfer session and drive it to completion.
///
/// POST /api/v1/transact
async fn transact(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TransferRequest>,
) -> ApiResult<TransactResponse> {
    let session_id = state.coordinator.create(request).await?;
    state.coordinator.execute(session_id).await?;
    let status = state.facade.get_status(session_id).await?;
    ok(TransactResponse { session_id, status })
}

/// GET /api/v1/status/{session_id}
async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusResponse> {
    let session_id: SessionId = session_id
        .parse()
        .map_err(|_| ApiError::from(GatewayError::InvalidRequest("bad session id".to_string())))?;
    ok(state.facade.get_status(session_id).await?)
}

#[derive(Debug, Deserialize)]
struct AuditParams {
    #[serde(default)]
    from: Option<i64>,
    #[serde(default)]
    to: Option<i64>,
}

/// GET /api/v1/audit?from={ms}&to={ms}
async fn audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> ApiResult<AuditResponse> {
    let from = params.from.unwrap_or(0);
    let to = params
        .to
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
    ok(state.facade.perform_audit(from, to).await?)
}

#[derive(Debug, Deserialize)]
struct ApproveAddressParams {
    network_id: String,
    token_type: TokenType,
}

#[derive(Debug, Serialize)]
pub struct ApproveAddressResponse {
    pub approve_address: String,
}

/// GET /api/v1/approve-address?network_id={id}&token_type={fungible|nonfungible}
async fn approve_address(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ApproveAddressParams>,
) -> ApiResult<ApproveAddressResponse> {
    let leaf = state.coordinator.leaves().leaf(&params.network_id)?;
    let address = leaf
        .approve_address(params.token_type)
        .await
        .map_err(GatewayError::from)?
        .ok_or_else(|| {
            GatewayError::Configuration(format!(
                "no approve address configured on {}",
                params.network_id
            ))
        })?;
    ok(ApproveAddressResponse {
        approve_address: address,
    })
}

// ============================================================================
// Oracle handlers
// ============================================================================

/// POST /api/v1/oracle/register
async fn oracle_register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OracleTaskRequest>,
) -> ApiResult<OracleTask> {
    ok(state.oracle.register_task(request).await?)
}

/// POST /api/v1/oracle/execute
async fn oracle_execute(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OracleTaskRequest>,
) -> ApiResult<OracleTask> {
    ok(state.oracle.execute_task(request).await?)
}

/// GET /api/v1/oracle/status/{task_id}
async fn oracle_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<OracleTask> {
    ok(state.oracle.get_task(&task_id).await?)
}

/// POST /api/v1/oracle/unregister/{task_id}
async fn oracle_unregister(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<OracleTask> {
    ok(state.oracle.unregister_task(&task_id).await?)
}

// ============================================================================
// Inbound counterparty protocol
// ============================================================================

/// POST /api/v1/counterparty/identity
async fn counterparty_identity(
    State(state): State<Arc<AppState>>,
    Json(_presented): Json<GatewayIdentity>,
) -> Result<Json<GatewayIdentity>, ApiError> {
    Ok(Json(state.identity.clone()))
}

/// POST /api/v1/counterparty/proposal
async fn counterparty_proposal(
    State(state): State<Arc<AppState>>,
    Json(proposal): Json<TransferProposal>,
) -> Result<Json<ProposalDecision>, ApiError> {
    Ok(Json(
        state
            .counterparty_service
            .propose_transfer(&proposal)
            .await?,
    ))
}

/// POST /api/v1/counterparty/evidence
async fn counterparty_evidence(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EvidenceRequest>,
) -> Result<Json<EvidenceResponse>, ApiError> {
    let verified = state
        .counterparty_service
        .verify_lock_evidence(&request.session_id, &request.proof)
        .await?;
    Ok(Json(EvidenceResponse { verified }))
}

/// POST /api/v1/counterparty/commitment
async fn counterparty_commitment(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommitmentRequest>,
) -> Result<Json<TransactionReceipt>, ApiError> {
    Ok(Json(
        state
            .counterparty_service
            .request_commitment(&request.session_id)
            .await?,
    ))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
