//! REST client for a ledger node
//!
//! Speaks the node's v2 JSON API. Binary fields (programs, state keys and
//! byte values) travel base64-encoded.

use super::gateway::{
    GatewayError, GlobalStateEntry, LedgerGateway, NetworkParameters, PendingStatus, StateValue,
};
use crate::transaction::SignedTransaction;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use log::{debug, warn};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Rounds a transaction stays valid after the current round
pub const VALIDITY_WINDOW: u64 = 1000;

/// Longest node error text carried in a [`GatewayError`]
const MAX_ERROR_TEXT: usize = 200;

/// Connection settings for [`HttpGateway`]
#[derive(Clone)]
pub struct HttpGatewayConfig {
    pub node_url: String,
    pub api_token: Option<String>,
    pub token_header: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for HttpGatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGatewayConfig")
            .field("node_url", &self.node_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("token_header", &self.token_header)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Ledger gateway over HTTP
pub struct HttpGateway {
    http: Client,
    base_url: String,
    api_token: Option<String>,
    token_header: String,
    timeout_secs: u64,
}

// Node response bodies

#[derive(Deserialize)]
struct ParamsResponse {
    fee: u64,
    #[serde(rename = "min-fee")]
    min_fee: u64,
    #[serde(rename = "last-round")]
    last_round: u64,
    #[serde(rename = "genesis-id")]
    genesis_id: String,
    #[serde(rename = "genesis-hash")]
    genesis_hash: String,
}

#[derive(Deserialize)]
struct CompileResponse {
    result: String,
}

#[derive(Deserialize)]
struct BroadcastResponse {
    #[serde(rename = "txId")]
    tx_id: String,
}

#[derive(Deserialize)]
struct PendingResponse {
    #[serde(rename = "confirmed-round", default)]
    confirmed_round: Option<u64>,
    #[serde(rename = "pool-error", default)]
    pool_error: String,
    #[serde(rename = "application-index", default)]
    application_index: Option<u64>,
}

#[derive(Deserialize)]
struct ApplicationResponse {
    params: ApplicationParams,
}

#[derive(Deserialize)]
struct ApplicationParams {
    #[serde(rename = "global-state", default)]
    global_state: Vec<TealKeyValue>,
}

#[derive(Deserialize)]
struct TealKeyValue {
    key: String,
    value: TealValue,
}

#[derive(Deserialize)]
struct TealValue {
    /// 1 = bytes, 2 = uint
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    bytes: String,
    #[serde(default)]
    uint: u64,
}

#[derive(Deserialize)]
struct ErrorResponse {
    message: String,
}

impl HttpGateway {
    pub fn new(config: &HttpGatewayConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.node_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            token_header: config.token_header.clone(),
            timeout_secs: config.request_timeout.as_secs(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.header(self.token_header.as_str(), token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, GatewayError> {
        self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(self.timeout_secs)
            } else {
                GatewayError::Transport(e.without_url().to_string())
            }
        })
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, GatewayError> {
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.without_url().to_string()))
    }
}

/// Turn a non-success response into a [`GatewayError::Status`]
async fn status_error(response: Response) -> GatewayError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.message)
        .unwrap_or(body);
    GatewayError::Status {
        status,
        message: truncate(&message),
    }
}

fn truncate(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(MAX_ERROR_TEXT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn decode_b64(field: &str, text: &str) -> Result<Vec<u8>, GatewayError> {
    STANDARD
        .decode(text)
        .map_err(|e| GatewayError::Decode(format!("{} is not base64: {}", field, e)))
}

#[async_trait]
impl LedgerGateway for HttpGateway {
    async fn suggested_params(&self) -> Result<NetworkParameters, GatewayError> {
        let response = self
            .send(self.http.get(self.url("/v2/transactions/params")))
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let params: ParamsResponse = Self::json(response).await?;
        debug!("Suggested params at round {}", params.last_round);
        let last_valid = params
            .last_round
            .checked_add(VALIDITY_WINDOW)
            .ok_or_else(|| GatewayError::Decode(format!("last-round {} out of range", params.last_round)))?;

        Ok(NetworkParameters {
            fee: params.fee,
            min_fee: params.min_fee,
            first_valid: params.last_round,
            last_valid,
            genesis_id: params.genesis_id,
            genesis_hash: params.genesis_hash,
            fetched_at: Utc::now(),
        })
    }

    async fn compile_bytecode(&self, source: &str) -> Result<Vec<u8>, GatewayError> {
        let request = self
            .http
            .post(self.url("/v2/teal/compile"))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(source.to_string());
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let compiled: CompileResponse = Self::json(response).await?;
        decode_b64("result", &compiled.result)
    }

    async fn broadcast(&self, signed: &SignedTransaction) -> Result<String, GatewayError> {
        let request = self.http.post(self.url("/v2/transactions")).json(signed);
        let response = self.send(request).await?;
        match response.status() {
            s if s.is_success() => {
                let accepted: BroadcastResponse = Self::json(response).await?;
                Ok(accepted.tx_id)
            }
            StatusCode::BAD_REQUEST => match status_error(response).await {
                GatewayError::Status { message, .. } => {
                    warn!("Node refused transaction {}: {}", signed.id(), message);
                    Err(GatewayError::Rejected(message))
                }
                other => Err(other),
            },
            _ => Err(status_error(response).await),
        }
    }

    async fn pending_transaction_info(&self, tx_id: &str) -> Result<PendingStatus, GatewayError> {
        let path = format!("/v2/transactions/pending/{}", tx_id);
        let response = self.send(self.http.get(self.url(&path))).await?;
        match response.status() {
            s if s.is_success() => {
                let pending: PendingResponse = Self::json(response).await?;
                Ok(pending_status(pending))
            }
            StatusCode::NOT_FOUND => Err(GatewayError::TransactionNotFound(tx_id.to_string())),
            _ => Err(status_error(response).await),
        }
    }

    async fn application_global_state(
        &self,
        app_id: u64,
    ) -> Result<Vec<GlobalStateEntry>, GatewayError> {
        let path = format!("/v2/applications/{}", app_id);
        let response = self.send(self.http.get(self.url(&path))).await?;
        match response.status() {
            s if s.is_success() => {
                let app: ApplicationResponse = Self::json(response).await?;
                global_state(app.params.global_state)
            }
            StatusCode::NOT_FOUND => Err(GatewayError::ApplicationNotFound(app_id)),
            _ => Err(status_error(response).await),
        }
    }
}

fn pending_status(pending: PendingResponse) -> PendingStatus {
    match pending.confirmed_round {
        Some(round) if round > 0 => PendingStatus::Confirmed {
            round,
            application_id: pending.application_index,
        },
        _ if !pending.pool_error.is_empty() => {
            PendingStatus::Rejected(truncate(&pending.pool_error))
        }
        _ => PendingStatus::Pending,
    }
}

fn global_state(entries: Vec<TealKeyValue>) -> Result<Vec<GlobalStateEntry>, GatewayError> {
    entries
        .into_iter()
        .map(|entry| {
            let key = decode_b64("key", &entry.key)?;
            let value = match entry.value.kind {
                1 => StateValue::Bytes(decode_b64("bytes", &entry.value.bytes)?),
                2 => StateValue::Uint(entry.value.uint),
                other => {
                    return Err(GatewayError::Decode(format!(
                        "unknown state value type {}",
                        other
                    )))
                }
            };
            Ok(GlobalStateEntry { key, value })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn gateway(url: String) -> HttpGateway {
        HttpGateway::new(&HttpGatewayConfig {
            node_url: url,
            api_token: Some("secret".to_string()),
            token_header: "X-Node-Token".to_string(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_params_and_state() {
        let router = Router::new()
            .route(
                "/v2/transactions/params",
                get(|headers: axum::http::HeaderMap| async move {
                    if headers.get("X-Node-Token").map(|v| v.as_bytes()) != Some(b"secret") {
                        return (AxumStatus::UNAUTHORIZED, Json(json!({"message": "no token"})));
                    }
                    (
                        AxumStatus::OK,
                        Json(json!({
                            "fee": 0, "min-fee": 1000, "last-round": 500,
                            "genesis-id": "testnet-v1", "genesis-hash": "aGFzaA=="
                        })),
                    )
                }),
            )
            .route(
                "/v2/applications/{id}",
                get(|Path(id): Path<u64>| async move {
                    if id != 42 {
                        return (AxumStatus::NOT_FOUND, Json(json!({"message": "application does not exist"})));
                    }
                    (
                        AxumStatus::OK,
                        Json(json!({"id": 42, "params": {"global-state": [
                            {"key": "dmFsdWU=", "value": {"type": 1, "bytes": "aGVsbG8=", "uint": 0}},
                            {"key": "Y291bnQ=", "value": {"type": 2, "bytes": "", "uint": 7}}
                        ]}})),
                    )
                }),
            );
        let gateway = gateway(serve(router).await);

        let params = gateway.suggested_params().await.unwrap();
        assert_eq!(params.min_fee, 1000);
        assert_eq!((params.first_valid, params.last_valid), (500, 1500));

        let state = gateway.application_global_state(42).await.unwrap();
        assert_eq!(state[0].key, b"value");
        assert_eq!(state[0].value, StateValue::Bytes(b"hello".to_vec()));
        assert_eq!(state[1].value, StateValue::Uint(7));

        assert_eq!(
            gateway.application_global_state(7).await.unwrap_err(),
            GatewayError::ApplicationNotFound(7)
        );
    }

    #[tokio::test]
    async fn test_params_last_round_at_limit_is_decode_error() {
        let router = Router::new().route(
            "/v2/transactions/params",
            get(|| async {
                Json(json!({
                    "fee": 0, "min-fee": 1000, "last-round": u64::MAX,
                    "genesis-id": "testnet-v1", "genesis-hash": "aGFzaA=="
                }))
            }),
        );
        let gateway = gateway(serve(router).await);

        match gateway.suggested_params().await {
            Err(GatewayError::Decode(message)) => assert!(message.contains("last-round")),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_refusal_is_rejection() {
        let router = Router::new().route(
            "/v2/transactions",
            post(|Json(_): Json<Value>| async {
                (
                    AxumStatus::BAD_REQUEST,
                    Json(json!({"message": "logic eval error: assert failed"})),
                )
            }),
        );
        let gateway = gateway(serve(router).await);

        let signed = crate::testing::signed_call(1);
        let err = gateway.broadcast(&signed).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Rejected("logic eval error: assert failed".to_string())
        );
    }

    #[tokio::test]
    async fn test_unreachable_node() {
        let gateway = gateway("http://127.0.0.1:1".to_string());
        assert!(matches!(
            gateway.suggested_params().await,
            Err(GatewayError::Transport(_))
        ));
    }

    #[test]
    fn test_pending_status() {
        let parse = |v: Value| pending_status(serde_json::from_value(v).unwrap());
        assert_eq!(parse(json!({"pool-error": ""})), PendingStatus::Pending);
        assert_eq!(parse(json!({"confirmed-round": 0, "pool-error": ""})), PendingStatus::Pending);
        assert_eq!(
            parse(json!({"confirmed-round": 12, "application-index": 42})),
            PendingStatus::Confirmed {
                round: 12,
                application_id: Some(42)
            }
        );
        assert_eq!(
            parse(json!({"pool-error": "overspend"})),
            PendingStatus::Rejected("overspend".to_string())
        );
    }

    #[test]
    fn test_truncate_error_text() {
        let long = "x".repeat(500);
        assert_eq!(truncate(&long).len(), MAX_ERROR_TEXT + 3);
        assert_eq!(truncate("  short "), "short");
    }
}
