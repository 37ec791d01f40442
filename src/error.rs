//! Pipeline error taxonomy
//!
//! Component errors convert into [`PipelineError`], whose [`ErrorKind`]
//! is the small fixed classification shown to callers.

use crate::contract::SandboxError;
use crate::ledger::GatewayError;
use crate::transaction::{BuildError, SigningError};
use serde::Serialize;
use thiserror::Error;

/// Caller-facing error class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    CompilationFailure,
    SigningFailure,
    NetworkFailure,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Compilation failed: {0}")]
    Compilation(String),
    #[error("Compilation incomplete: program does not define {0}")]
    CompilationIncomplete(String),
    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Transaction {tx_id} not confirmed after {rounds} rounds; outcome unknown")]
    ConfirmationTimeout { tx_id: String, rounds: u32 },
    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),
    #[error("Application {0} does not exist")]
    ApplicationNotFound(u64),
    #[error("Request cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidInput(_) | PipelineError::ApplicationNotFound(_) => {
                ErrorKind::BadRequest
            }
            PipelineError::Compilation(_) | PipelineError::CompilationIncomplete(_) => {
                ErrorKind::CompilationFailure
            }
            PipelineError::Signing(_) => ErrorKind::SigningFailure,
            PipelineError::Network(_)
            | PipelineError::ConfirmationTimeout { .. }
            | PipelineError::TransactionRejected(_)
            | PipelineError::Cancelled => ErrorKind::NetworkFailure,
        }
    }

    /// Whether the caller may reasonably retry the same request
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Network(_))
    }

    /// Message safe to return to API callers.
    ///
    /// Variants carrying ledger node text get a fixed message; the node
    /// text stays in the server log.
    pub fn public_message(&self) -> String {
        match self {
            PipelineError::Network(_) => "ledger node request failed".to_string(),
            PipelineError::TransactionRejected(_) => "transaction rejected by the network".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<SandboxError> for PipelineError {
    fn from(e: SandboxError) -> Self {
        match e {
            SandboxError::EmptySource => PipelineError::InvalidInput("No code provided".to_string()),
            SandboxError::Incomplete(missing) => PipelineError::CompilationIncomplete(missing),
            other => PipelineError::Compilation(other.to_string()),
        }
    }
}

impl From<GatewayError> for PipelineError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::ApplicationNotFound(id) => PipelineError::ApplicationNotFound(id),
            GatewayError::Rejected(reason) => PipelineError::TransactionRejected(reason),
            other => PipelineError::Network(other.to_string()),
        }
    }
}

impl From<BuildError> for PipelineError {
    fn from(e: BuildError) -> Self {
        match e {
            BuildError::StaleParameters { .. } | BuildError::InvalidValidityWindow { .. } => {
                PipelineError::Network(e.to_string())
            }
            other => PipelineError::InvalidInput(other.to_string()),
        }
    }
}
