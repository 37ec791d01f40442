//! App Deployer: compile, sign, submit and confirm ledger applications
//!
//! This crate provides:
//! - A sandboxed contract compiler over a fixed primitive table
//! - An assembler, disassembler and stack VM for versioned bytecode
//! - Application creation and call transactions signed with secp256k1
//! - Ledger gateways for a REST node and an in-process ledger
//! - A confirmation poller with per-call timeouts and cancellation
//! - A deploy/interact orchestrator behind a REST API and CLI
//!
//! # Example
//!
//! ```rust,no_run
//! use app_deployer::config::PipelineConfig;
//! use app_deployer::contract::SandboxedCompiler;
//! use app_deployer::ledger::MemoryLedger;
//! use app_deployer::pipeline::Orchestrator;
//! use app_deployer::transaction::{Credential, LocalSigner};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), app_deployer::error::PipelineError> {
//! let orchestrator = Orchestrator::new(
//!     Arc::new(MemoryLedger::default()),
//!     Arc::new(LocalSigner::new(Credential::generate())),
//!     SandboxedCompiler::new(),
//!     PipelineConfig::default(),
//! );
//!
//! let source = "approval = Approve()\nclear = Approve()";
//! let deployed = orchestrator.deploy(source, &CancellationToken::new()).await?;
//! println!("Deployed application {}", deployed.application_id);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod contract;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use config::{LedgerArgs, PipelineConfig};
pub use contract::{CompiledArtifact, SandboxedCompiler, VM};
pub use crypto::KeyPair;
pub use error::{ErrorKind, PipelineError};
pub use ledger::{HttpGateway, LedgerGateway, MemoryLedger};
pub use pipeline::{ConfirmationPoller, Orchestrator, TransactionReceipt};
pub use transaction::{Credential, LocalSigner, TransactionBuilder, TransactionSigner};
