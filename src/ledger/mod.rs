//! Ledger node access
//!
//! [`LedgerGateway`] is the only way the pipeline reaches the network.
//! [`HttpGateway`] talks to a real node; [`MemoryLedger`] runs a ledger
//! in-process.

pub mod gateway;
pub mod http;
pub mod memory;

pub use gateway::{
    GatewayError, GlobalStateEntry, LedgerGateway, NetworkParameters, PendingStatus, StateValue,
};
pub use http::{HttpGateway, HttpGatewayConfig, VALIDITY_WINDOW};
pub use memory::{Application, MemoryLedger, MemoryLedgerConfig, GENESIS_ID, MIN_FEE};
