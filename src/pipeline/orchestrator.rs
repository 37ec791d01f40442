//! Deploy and interact lifecycles
//!
//! The orchestrator owns one request end to end: it compiles, fetches
//! fresh network parameters, builds, signs and confirms. Every collaborator
//! is injected at construction.

use super::poller::{bounded, ConfirmationPoller, TransactionReceipt};
use crate::config::PipelineConfig;
use crate::contract::{CompiledArtifact, ProgramListing, SandboxedCompiler};
use crate::error::PipelineError;
use crate::ledger::{GatewayError, GlobalStateEntry, LedgerGateway, NetworkParameters};
use crate::transaction::{TransactionBuilder, TransactionSigner};
use log::{info, warn};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Interaction with a deployed application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Store a value through an application call
    Store,
    /// Read global state without submitting anything
    Read,
}

impl FromStr for Action {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "store" => Ok(Action::Store),
            "read" => Ok(Action::Read),
            _ => Err(PipelineError::InvalidInput("Invalid action".to_string())),
        }
    }
}

/// Result of a successful deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployOutcome {
    pub application_id: u64,
    pub tx_id: String,
    pub confirmed_round: u64,
}

/// Result of a successful interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractOutcome {
    Stored { tx_id: String, confirmed_round: u64 },
    /// `None` when the application holds no global state
    Value(Option<String>),
}

pub struct Orchestrator {
    gateway: Arc<dyn LedgerGateway>,
    signer: Arc<dyn TransactionSigner>,
    compiler: SandboxedCompiler,
    builder: TransactionBuilder,
    poller: ConfirmationPoller,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        signer: Arc<dyn TransactionSigner>,
        compiler: SandboxedCompiler,
        config: PipelineConfig,
    ) -> Self {
        let max_age = chrono::Duration::from_std(config.params_max_age)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let poller = ConfirmationPoller::new(
            gateway.clone(),
            config.round_interval,
            config.request_timeout,
        );
        Self {
            gateway,
            signer,
            compiler,
            builder: TransactionBuilder::new(max_age),
            poller,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Compile `source`, install it as a new application and wait for it
    pub async fn deploy(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<DeployOutcome, PipelineError> {
        if source.trim().is_empty() {
            return Err(PipelineError::InvalidInput("No code provided".to_string()));
        }

        let artifact = if self.config.assemble_on_node {
            let listing = self.compile_listing(source).await?;
            self.assemble_on_node(&listing, cancel).await?
        } else {
            self.compile(source).await?
        };
        info!(
            "Compiled programs: approval {} bytes, clear {} bytes",
            artifact.approval().len(),
            artifact.clear().len()
        );

        let sender = self.signer.address()?;
        let params = self.fresh_params(cancel).await?;
        let unsigned = self.builder.build_create(&artifact, &sender, &params)?;
        let signed = self.signer.sign(unsigned)?;

        let receipt = self
            .poller
            .submit_and_confirm(&signed, self.config.max_rounds, cancel)
            .await?;
        match receipt {
            TransactionReceipt::Created {
                tx_id,
                application_id,
                confirmed_round,
            } => {
                info!(
                    "Deployed application {} in round {} ({})",
                    application_id, confirmed_round, tx_id
                );
                Ok(DeployOutcome {
                    application_id,
                    tx_id,
                    confirmed_round,
                })
            }
            TransactionReceipt::Called { tx_id, .. } => Err(PipelineError::Network(format!(
                "creation {} confirmed as a call",
                tx_id
            ))),
        }
    }

    /// Store a value in, or read a value from, application `app_id`
    pub async fn interact(
        &self,
        app_id: u64,
        action: &str,
        value: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<InteractOutcome, PipelineError> {
        if app_id == 0 || action.is_empty() {
            return Err(PipelineError::InvalidInput(
                "App ID or action missing".to_string(),
            ));
        }

        match action.parse::<Action>()? {
            Action::Store => {
                let value = value
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| PipelineError::InvalidInput("Value to store is missing".to_string()))?;
                self.store(app_id, value, cancel).await
            }
            Action::Read => self.read(app_id, cancel).await.map(InteractOutcome::Value),
        }
    }

    async fn store(
        &self,
        app_id: u64,
        value: &str,
        cancel: &CancellationToken,
    ) -> Result<InteractOutcome, PipelineError> {
        let sender = self.signer.address()?;
        let params = self.fresh_params(cancel).await?;
        let unsigned =
            self.builder
                .build_call(app_id, &sender, vec![value.as_bytes().to_vec()], &params)?;
        let signed = self.signer.sign(unsigned)?;

        let receipt = self
            .poller
            .submit_and_confirm(&signed, self.config.max_rounds, cancel)
            .await?;
        info!(
            "Stored value in application {} in round {}",
            app_id,
            receipt.confirmed_round()
        );
        Ok(InteractOutcome::Stored {
            tx_id: receipt.tx_id().to_string(),
            confirmed_round: receipt.confirmed_round(),
        })
    }

    async fn read(
        &self,
        app_id: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, PipelineError> {
        let entries = bounded(
            "global state lookup",
            self.config.request_timeout,
            cancel,
            self.gateway.application_global_state(app_id),
        )
        .await?;
        Ok(select_value(&entries, &self.config.state_key))
    }

    async fn fresh_params(
        &self,
        cancel: &CancellationToken,
    ) -> Result<NetworkParameters, PipelineError> {
        bounded(
            "parameter fetch",
            self.config.request_timeout,
            cancel,
            self.gateway.suggested_params(),
        )
        .await
    }

    /// Compile to bytecode on a blocking thread under the compile timeout
    async fn compile(&self, source: &str) -> Result<CompiledArtifact, PipelineError> {
        let compiler = self.compiler.clone();
        let source = source.to_string();
        run_compiler(self.config.compile_timeout, move || compiler.compile(&source)).await
    }

    async fn compile_listing(&self, source: &str) -> Result<ProgramListing, PipelineError> {
        let compiler = self.compiler.clone();
        let source = source.to_string();
        run_compiler(self.config.compile_timeout, move || {
            compiler.compile_listing(&source)
        })
        .await
    }

    /// Assemble both listings on the ledger node concurrently
    async fn assemble_on_node(
        &self,
        listing: &ProgramListing,
        cancel: &CancellationToken,
    ) -> Result<CompiledArtifact, PipelineError> {
        let (approval, clear) = futures::try_join!(
            self.node_assemble("approval assembly", &listing.approval, cancel),
            self.node_assemble("clear assembly", &listing.clear, cancel),
        )?;
        CompiledArtifact::new(approval, clear).ok_or_else(|| {
            PipelineError::CompilationIncomplete("a non-empty program".to_string())
        })
    }

    async fn node_assemble(
        &self,
        what: &str,
        listing: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, PipelineError> {
        let call = async {
            match self.gateway.compile_bytecode(listing).await {
                Ok(bytecode) => Ok(Ok(bytecode)),
                Err(GatewayError::Status { status: 400, message }) => Ok(Err(message)),
                Err(e) => Err(e),
            }
        };
        match bounded(what, self.config.request_timeout, cancel, call).await? {
            Ok(bytecode) => Ok(bytecode),
            Err(message) => {
                warn!("Node refused program listing: {}", message);
                Err(PipelineError::Compilation(
                    "ledger node refused the program".to_string(),
                ))
            }
        }
    }
}

/// Run a compiler closure off the async runtime.
///
/// A panic or timeout becomes a [`PipelineError::Compilation`] without the
/// panic payload. All evaluation state lives inside the closure and is
/// dropped with it.
async fn run_compiler<T, F>(limit: Duration, job: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, crate::contract::SandboxError> + Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(job)).await {
        Ok(Ok(result)) => result.map_err(PipelineError::from),
        Ok(Err(join_error)) => {
            warn!("Compiler task failed (panicked: {})", join_error.is_panic());
            Err(PipelineError::Compilation(
                "internal compiler failure".to_string(),
            ))
        }
        Err(_) => {
            warn!("Compilation exceeded {:?}", limit);
            Err(PipelineError::Compilation(format!(
                "compilation did not finish within {}ms",
                limit.as_millis()
            )))
        }
    }
}

/// The configured key's value, else the first entry by key order
fn select_value(entries: &[GlobalStateEntry], key: &str) -> Option<String> {
    entries
        .iter()
        .find(|e| e.key == key.as_bytes())
        .or_else(|| entries.iter().min_by(|a, b| a.key.cmp(&b.key)))
        .map(|e| e.value.to_text())
}
