//! The ledger node interface consumed by the pipeline

use crate::transaction::SignedTransaction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a ledger gateway
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Ledger node unreachable: {0}")]
    Transport(String),
    #[error("Ledger node returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Unexpected response from ledger node: {0}")]
    Decode(String),
    #[error("Ledger node did not answer within {0}s")]
    Timeout(u64),
    #[error("Transaction refused by the ledger: {0}")]
    Rejected(String),
    #[error("Application {0} does not exist")]
    ApplicationNotFound(u64),
    #[error("Transaction {0} is unknown to the ledger node")]
    TransactionNotFound(String),
}

/// Values needed to build a transaction the network will accept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParameters {
    /// Suggested fee
    pub fee: u64,
    /// Minimum fee the network accepts
    pub min_fee: u64,
    pub first_valid: u64,
    pub last_valid: u64,
    pub genesis_id: String,
    pub genesis_hash: String,
    /// When these parameters were fetched
    pub fetched_at: DateTime<Utc>,
}

/// Status of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingStatus {
    /// Still in the pool
    Pending,
    /// Included in a block
    Confirmed {
        round: u64,
        /// Set when the transaction created an application
        application_id: Option<u64>,
    },
    /// Definitely not going to be included
    Rejected(String),
}

/// A global state value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateValue {
    Bytes(Vec<u8>),
    Uint(u64),
}

impl StateValue {
    /// Bytes as UTF-8 text (lossy), integers in decimal
    pub fn to_text(&self) -> String {
        match self {
            StateValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            StateValue::Uint(n) => n.to_string(),
        }
    }
}

/// One key of an application's global state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStateEntry {
    pub key: Vec<u8>,
    pub value: StateValue,
}

/// Client of a ledger node.
///
/// Implementations must bound every call; callers still wrap calls in their
/// own timeouts.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Current suggested transaction parameters
    async fn suggested_params(&self) -> Result<NetworkParameters, GatewayError>;

    /// Assemble a program listing on the node
    async fn compile_bytecode(&self, source: &str) -> Result<Vec<u8>, GatewayError>;

    /// Submit a signed transaction, returning its id
    async fn broadcast(&self, signed: &SignedTransaction) -> Result<String, GatewayError>;

    /// Status of a previously submitted transaction
    async fn pending_transaction_info(&self, tx_id: &str) -> Result<PendingStatus, GatewayError>;

    /// Global state of an application
    async fn application_global_state(
        &self,
        app_id: u64,
    ) -> Result<Vec<GlobalStateEntry>, GatewayError>;
}
