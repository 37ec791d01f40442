//! Deployment pipeline
//!
//! Source text goes in, a confirmed application comes out:
//! compile, build, sign, submit and wait for confirmation.

pub mod orchestrator;
pub mod poller;

pub use orchestrator::{Action, DeployOutcome, InteractOutcome, Orchestrator};
pub use poller::{ConfirmationPoller, TransactionReceipt};
