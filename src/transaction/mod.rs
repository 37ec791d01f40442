//! Application transactions
//!
//! This module contains:
//! - Transaction envelopes for application creation and calls
//! - A pure builder that turns network parameters into envelopes
//! - Signing with an injected secp256k1 credential

pub mod builder;
pub mod signer;
pub mod transaction;

pub use builder::{BuildError, TransactionBuilder, MAX_APP_ARGS, MAX_APP_ARGS_BYTES};
pub use signer::{Credential, LocalSigner, SigningError, TransactionSigner};
pub use transaction::{
    OnComplete, SignedTransaction, StateSchema, TransactionKind, UnsignedTransaction,
    GLOBAL_SCHEMA, LOCAL_SCHEMA,
};
