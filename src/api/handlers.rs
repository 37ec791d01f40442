//! REST API handlers for deploy and interact requests

use crate::error::{ErrorKind, PipelineError};
use crate::pipeline::{InteractOutcome, Orchestrator};
use axum::{extract::State, http::StatusCode, Json};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    /// Cancelled when the server shuts down
    pub shutdown: CancellationToken,
}

impl ApiState {
    pub fn new(orchestrator: Orchestrator, shutdown: CancellationToken) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            shutdown,
        }
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub app_id: u64,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum InteractResponse {
    Message { message: String },
    #[serde(rename_all = "camelCase")]
    Stored { stored_value: Option<String> },
}

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub kind: ErrorKind,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
pub struct DeployRequest {
    #[serde(default)]
    pub code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractRequest {
    #[serde(default)]
    pub app_id: u64,
    #[serde(default)]
    pub action: String,
    pub value: Option<String>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

/// HTTP status for a pipeline failure
pub fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::ConfirmationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        other => match other.kind() {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::CompilationFailure => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::SigningFailure => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::NetworkFailure => StatusCode::BAD_GATEWAY,
        },
    }
}

fn error_response(err: PipelineError) -> (StatusCode, Json<ApiError>) {
    let status = status_for(&err);
    warn!("Request failed ({}): {}", status, err);
    (
        status,
        Json(ApiError {
            error: err.public_message(),
            kind: err.kind(),
        }),
    )
}

/// Token cancelled on shutdown, or when the guard is dropped with the request
fn request_token(state: &ApiState) -> (CancellationToken, tokio_util::sync::DropGuard) {
    let token = state.shutdown.child_token();
    let guard = token.clone().drop_guard();
    (token, guard)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /api/smart-contract/deploy
pub async fn deploy_contract(
    State(state): State<ApiState>,
    Json(req): Json<DeployRequest>,
) -> ApiResult<DeployResponse> {
    let (cancel, _guard) = request_token(&state);
    let outcome = state
        .orchestrator
        .deploy(&req.code, &cancel)
        .await
        .map_err(error_response)?;
    info!("Deploy request finished: app {}", outcome.application_id);

    Ok(Json(DeployResponse {
        app_id: outcome.application_id,
    }))
}

/// POST /api/smart-contract/interact
pub async fn interact_contract(
    State(state): State<ApiState>,
    Json(req): Json<InteractRequest>,
) -> ApiResult<InteractResponse> {
    let (cancel, _guard) = request_token(&state);
    let outcome = state
        .orchestrator
        .interact(req.app_id, &req.action, req.value.as_deref(), &cancel)
        .await
        .map_err(error_response)?;

    Ok(Json(match outcome {
        InteractOutcome::Stored { .. } => InteractResponse::Message {
            message: "Value stored successfully".to_string(),
        },
        InteractOutcome::Value(stored_value) => InteractResponse::Stored { stored_value },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::GatewayError;
    use crate::testing::{ScriptedGateway, SpySigner};

    #[test]
    fn test_status_mapping() {
        let cases = [
            (PipelineError::InvalidInput("x".into()), 400),
            (PipelineError::ApplicationNotFound(1), 400),
            (PipelineError::Compilation("x".into()), 422),
            (PipelineError::CompilationIncomplete("x".into()), 422),
            (
                PipelineError::Signing(crate::transaction::SigningError::MissingCredential),
                500,
            ),
            (PipelineError::Network("x".into()), 502),
            (PipelineError::TransactionRejected("x".into()), 502),
            (
                PipelineError::ConfirmationTimeout {
                    tx_id: "t".into(),
                    rounds: 4,
                },
                504,
            ),
            (PipelineError::Cancelled, 503),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err).as_u16(), status, "{:?}", err);
        }
    }

    #[test]
    fn test_interact_response_shapes() {
        let stored = serde_json::to_value(InteractResponse::Stored {
            stored_value: Some("hello".into()),
        })
        .unwrap();
        assert_eq!(stored, serde_json::json!({ "storedValue": "hello" }));

        let message = serde_json::to_value(InteractResponse::Message {
            message: "ok".into(),
        })
        .unwrap();
        assert_eq!(message, serde_json::json!({ "message": "ok" }));
    }

    async fn deploy_against(gateway: ScriptedGateway) -> (StatusCode, serde_json::Value) {
        let state = ApiState::new(
            Orchestrator::new(
                Arc::new(gateway),
                Arc::new(SpySigner::new()),
                crate::contract::SandboxedCompiler::new(),
                crate::config::PipelineConfig::default(),
            ),
            CancellationToken::new(),
        );
        let request = DeployRequest {
            code: "approval = Approve()\nclear = Approve()".to_string(),
        };
        match deploy_contract(State(state), Json(request)).await {
            Ok(_) => panic!("deploy should fail"),
            Err((status, Json(body))) => (status, serde_json::to_value(body).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_node_text_stays_out_of_error_body() {
        let node_text = "algod db at /var/lib/algod/ledger.sqlite locked";
        let (status, body) = deploy_against(ScriptedGateway::confirming_on(1).failing_broadcast(
            GatewayError::Status {
                status: 500,
                message: node_text.to_string(),
            },
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            body,
            serde_json::json!({ "error": "ledger node request failed", "kind": "network_failure" })
        );
        assert!(!body.to_string().contains("sqlite"));

        let node_text = "TransactionPool.Remember: overspend account XYZ balance 12";
        let (status, body) = deploy_against(
            ScriptedGateway::confirming_on(1)
                .failing_broadcast(GatewayError::Rejected(node_text.to_string())),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "transaction rejected by the network");
        assert!(!body.to_string().contains("overspend"));
    }

    #[test]
    fn test_request_token_follows_shutdown() {
        let shutdown = CancellationToken::new();
        let state = ApiState {
            orchestrator: Arc::new(Orchestrator::new(
                Arc::new(crate::ledger::MemoryLedger::default()),
                Arc::new(crate::transaction::LocalSigner::unconfigured()),
                crate::contract::SandboxedCompiler::new(),
                crate::config::PipelineConfig::default(),
            )),
            shutdown: shutdown.clone(),
        };

        let (token, guard) = request_token(&state);
        drop(guard);
        assert!(token.is_cancelled());
        assert!(!shutdown.is_cancelled());

        let (token, _guard) = request_token(&state);
        shutdown.cancel();
        assert!(token.is_cancelled());
    }
}
