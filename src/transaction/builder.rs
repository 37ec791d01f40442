//! Transaction construction
//!
//! The builder never talks to the network. It is handed freshly fetched
//! [`NetworkParameters`] and refuses them once they are older than the
//! configured maximum age.

use super::transaction::{
    OnComplete, TransactionKind, UnsignedTransaction, GLOBAL_SCHEMA, LOCAL_SCHEMA,
};
use crate::contract::CompiledArtifact;
use crate::crypto::{validate_address, KeyError};
use crate::ledger::NetworkParameters;
use chrono::{Duration, Utc};
use thiserror::Error;

/// Maximum number of application call arguments
pub const MAX_APP_ARGS: usize = 16;

/// Maximum combined size of application call arguments
pub const MAX_APP_ARGS_BYTES: usize = 2048;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("Invalid sender address: {0}")]
    InvalidSender(#[from] KeyError),
    #[error("Network parameters are stale: fetched {age_secs}s ago, limit {max_secs}s")]
    StaleParameters { age_secs: i64, max_secs: i64 },
    #[error("Network parameters have an empty validity window ({first}..{last})")]
    InvalidValidityWindow { first: u64, last: u64 },
    #[error("Application id 0 is reserved for creation")]
    InvalidApplicationId,
    #[error("Too many call arguments: {count} (max {max})", max = MAX_APP_ARGS)]
    TooManyArguments { count: usize },
    #[error("Call arguments total {size} bytes (max {max})", max = MAX_APP_ARGS_BYTES)]
    ArgumentsTooLarge { size: usize },
}

/// Builder for application transactions
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    max_params_age: Duration,
}

impl TransactionBuilder {
    pub fn new(max_params_age: Duration) -> Self {
        Self { max_params_age }
    }

    /// Build a creation transaction installing `artifact`
    pub fn build_create(
        &self,
        artifact: &CompiledArtifact,
        sender: &str,
        params: &NetworkParameters,
    ) -> Result<UnsignedTransaction, BuildError> {
        self.envelope(
            sender,
            params,
            TransactionKind::ApplicationCreate {
                approval_program: artifact.approval().to_vec(),
                clear_program: artifact.clear().to_vec(),
                global_schema: GLOBAL_SCHEMA,
                local_schema: LOCAL_SCHEMA,
                on_complete: OnComplete::NoOp,
            },
        )
    }

    /// Build a no-op call into application `app_id` carrying `args`
    pub fn build_call(
        &self,
        app_id: u64,
        sender: &str,
        args: Vec<Vec<u8>>,
        params: &NetworkParameters,
    ) -> Result<UnsignedTransaction, BuildError> {
        if app_id == 0 {
            return Err(BuildError::InvalidApplicationId);
        }
        if args.len() > MAX_APP_ARGS {
            return Err(BuildError::TooManyArguments { count: args.len() });
        }
        let size: usize = args.iter().map(Vec::len).sum();
        if size > MAX_APP_ARGS_BYTES {
            return Err(BuildError::ArgumentsTooLarge { size });
        }

        self.envelope(
            sender,
            params,
            TransactionKind::ApplicationCall {
                application_id: app_id,
                args,
                on_complete: OnComplete::NoOp,
            },
        )
    }

    fn envelope(
        &self,
        sender: &str,
        params: &NetworkParameters,
        kind: TransactionKind,
    ) -> Result<UnsignedTransaction, BuildError> {
        validate_address(sender)?;

        let age = Utc::now() - params.fetched_at;
        if age > self.max_params_age {
            return Err(BuildError::StaleParameters {
                age_secs: age.num_seconds(),
                max_secs: self.max_params_age.num_seconds(),
            });
        }
        if params.last_valid < params.first_valid {
            return Err(BuildError::InvalidValidityWindow {
                first: params.first_valid,
                last: params.last_valid,
            });
        }

        Ok(UnsignedTransaction {
            sender: sender.to_string(),
            fee: params.fee.max(params.min_fee),
            first_valid: params.first_valid,
            last_valid: params.last_valid,
            genesis_id: params.genesis_id.clone(),
            genesis_hash: params.genesis_hash.clone(),
            kind,
        })
    }
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new(Duration::seconds(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn params() -> NetworkParameters {
        NetworkParameters {
            fee: 0,
            min_fee: 1000,
            first_valid: 100,
            last_valid: 1100,
            genesis_id: "testnet-v1".to_string(),
            genesis_hash: "ab".repeat(32),
            fetched_at: Utc::now(),
        }
    }

    fn artifact() -> CompiledArtifact {
        CompiledArtifact::new(vec![1, 0x00], vec![1, 0x01]).unwrap()
    }

    #[test]
    fn test_build_create() {
        let sender = KeyPair::generate().address();
        let tx = TransactionBuilder::default()
            .build_create(&artifact(), &sender, &params())
            .unwrap();

        assert_eq!(tx.sender, sender);
        assert_eq!(tx.fee, 1000);
        assert_eq!((tx.first_valid, tx.last_valid), (100, 1100));
        let TransactionKind::ApplicationCreate {
            global_schema,
            local_schema,
            ..
        } = tx.kind
        else {
            panic!("expected a creation transaction");
        };
        assert_eq!(global_schema, GLOBAL_SCHEMA);
        assert_eq!(local_schema, LOCAL_SCHEMA);
    }

    #[test]
    fn test_suggested_fee_above_minimum_is_kept() {
        let mut p = params();
        p.fee = 2500;
        let sender = KeyPair::generate().address();
        let tx = TransactionBuilder::default()
            .build_call(7, &sender, vec![b"x".to_vec()], &p)
            .unwrap();
        assert_eq!(tx.fee, 2500);
    }

    #[test]
    fn test_rejects_invalid_sender() {
        let builder = TransactionBuilder::default();
        for sender in ["", "not-an-address", "1111111111111111111111111"] {
            assert!(matches!(
                builder.build_create(&artifact(), sender, &params()),
                Err(BuildError::InvalidSender(_))
            ));
        }
    }

    #[test]
    fn test_rejects_stale_parameters() {
        let mut p = params();
        p.fetched_at = Utc::now() - Duration::seconds(120);
        let sender = KeyPair::generate().address();
        let err = TransactionBuilder::default()
            .build_create(&artifact(), &sender, &p)
            .unwrap_err();
        assert!(matches!(err, BuildError::StaleParameters { max_secs: 30, .. }));
    }

    #[test]
    fn test_call_argument_limits() {
        let builder = TransactionBuilder::default();
        let sender = KeyPair::generate().address();

        assert_eq!(
            builder.build_call(0, &sender, vec![], &params()).unwrap_err(),
            BuildError::InvalidApplicationId
        );
        assert!(matches!(
            builder.build_call(1, &sender, vec![vec![0]; MAX_APP_ARGS + 1], &params()),
            Err(BuildError::TooManyArguments { .. })
        ));
        assert!(matches!(
            builder.build_call(1, &sender, vec![vec![0; MAX_APP_ARGS_BYTES + 1]], &params()),
            Err(BuildError::ArgumentsTooLarge { .. })
        ));
    }
}
