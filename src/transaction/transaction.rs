//! Application transaction envelopes
//!
//! Only the two application transaction kinds this pipeline needs are
//! modelled: creation of an application and a call into an existing one.

use crate::crypto::{public_key_from_hex, public_key_to_address, sha256, sha256_hex, verify_signature};
use crate::crypto::KeyError;
use serde::{Deserialize, Serialize};

/// Domain tag prefixed to the canonical signing bytes
const SIGNING_TAG: &[u8] = b"TX";

// =============================================================================
// On-completion actions
// =============================================================================

/// Action performed after an application call's program approves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnComplete {
    NoOp,
    OptIn,
    CloseOut,
    ClearState,
    UpdateApplication,
    DeleteApplication,
}

impl OnComplete {
    /// Numeric code as seen by programs through `Txn.on_completion()`
    pub fn code(self) -> u64 {
        match self {
            OnComplete::NoOp => 0,
            OnComplete::OptIn => 1,
            OnComplete::CloseOut => 2,
            OnComplete::ClearState => 3,
            OnComplete::UpdateApplication => 4,
            OnComplete::DeleteApplication => 5,
        }
    }
}

// =============================================================================
// State schema
// =============================================================================

/// Number of state slots an application may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSchema {
    pub num_uint: u64,
    pub num_byte_slice: u64,
}

/// Global schema for deployed applications: one integer, one byte slice
pub const GLOBAL_SCHEMA: StateSchema = StateSchema {
    num_uint: 1,
    num_byte_slice: 1,
};

/// Deployed applications keep no per-account state
pub const LOCAL_SCHEMA: StateSchema = StateSchema {
    num_uint: 0,
    num_byte_slice: 0,
};

// =============================================================================
// Transaction
// =============================================================================

/// What the transaction does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionKind {
    ApplicationCreate {
        #[serde(with = "base64_bytes")]
        approval_program: Vec<u8>,
        #[serde(with = "base64_bytes")]
        clear_program: Vec<u8>,
        global_schema: StateSchema,
        local_schema: StateSchema,
        on_complete: OnComplete,
    },
    ApplicationCall {
        application_id: u64,
        #[serde(with = "base64_list")]
        args: Vec<Vec<u8>>,
        on_complete: OnComplete,
    },
}

/// A transaction ready to be signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub sender: String,
    pub fee: u64,
    pub first_valid: u64,
    pub last_valid: u64,
    pub genesis_id: String,
    pub genesis_hash: String,
    pub kind: TransactionKind,
}

impl UnsignedTransaction {
    /// Canonical bytes covered by the signature.
    ///
    /// Every field is written in a fixed order, variable-length fields with
    /// a big-endian `u32` length prefix.
    pub fn signing_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(SIGNING_TAG);
        put_bytes(&mut out, self.sender.as_bytes());
        out.extend_from_slice(&self.fee.to_be_bytes());
        out.extend_from_slice(&self.first_valid.to_be_bytes());
        out.extend_from_slice(&self.last_valid.to_be_bytes());
        put_bytes(&mut out, self.genesis_id.as_bytes());
        put_bytes(&mut out, self.genesis_hash.as_bytes());

        match &self.kind {
            TransactionKind::ApplicationCreate {
                approval_program,
                clear_program,
                global_schema,
                local_schema,
                on_complete,
            } => {
                out.push(0);
                put_bytes(&mut out, approval_program);
                put_bytes(&mut out, clear_program);
                for schema in [global_schema, local_schema] {
                    out.extend_from_slice(&schema.num_uint.to_be_bytes());
                    out.extend_from_slice(&schema.num_byte_slice.to_be_bytes());
                }
                out.extend_from_slice(&on_complete.code().to_be_bytes());
            }
            TransactionKind::ApplicationCall {
                application_id,
                args,
                on_complete,
            } => {
                out.push(1);
                out.extend_from_slice(&application_id.to_be_bytes());
                out.extend_from_slice(&(args.len() as u32).to_be_bytes());
                for arg in args {
                    put_bytes(&mut out, arg);
                }
                out.extend_from_slice(&on_complete.code().to_be_bytes());
            }
        }
        out
    }

    /// Transaction id: hex SHA-256 of the signing bytes
    pub fn id(&self) -> String {
        sha256_hex(&self.signing_data())
    }

    pub fn is_create(&self) -> bool {
        matches!(self.kind, TransactionKind::ApplicationCreate { .. })
    }
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// A signed transaction. Carries the public key and signature only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: UnsignedTransaction,
    /// Compact secp256k1 signature over the SHA-256 of the signing bytes
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    /// Hex-encoded compressed public key of the signer
    pub public_key: String,
}

impl SignedTransaction {
    pub fn id(&self) -> String {
        self.transaction.id()
    }

    /// Check that the signature is valid and the key owns the sender address
    pub fn verify(&self) -> Result<bool, KeyError> {
        let public_key = public_key_from_hex(&self.public_key)?;
        if public_key_to_address(&public_key) != self.transaction.sender {
            return Ok(false);
        }
        let digest = sha256(&self.transaction.signing_data());
        verify_signature(&public_key, &digest, &self.signature)
    }
}

// =============================================================================
// Serde helpers
// =============================================================================

/// Base64 (standard alphabet) encoding for byte fields
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Base64 encoding for lists of byte fields
pub mod base64_list {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = items.iter().map(|b| STANDARD.encode(b)).collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let items = Vec::<String>::deserialize(deserializer)?;
        items
            .into_iter()
            .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn call(sender: &str, arg: &[u8]) -> UnsignedTransaction {
        UnsignedTransaction {
            sender: sender.to_string(),
            fee: 1000,
            first_valid: 10,
            last_valid: 1010,
            genesis_id: "testnet-v1".to_string(),
            genesis_hash: "aa".repeat(32),
            kind: TransactionKind::ApplicationCall {
                application_id: 42,
                args: vec![arg.to_vec()],
                on_complete: OnComplete::NoOp,
            },
        }
    }

    #[test]
    fn test_id_depends_on_contents() {
        let a = call("sender", b"one");
        let b = call("sender", b"two");
        assert_eq!(a.id(), a.clone().id());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().len(), 64);
    }

    #[test]
    fn test_signing_data_separates_fields() {
        // Moving bytes between adjacent fields must change the encoding
        let mut a = call("ab", b"c");
        let mut b = call("a", b"bc");
        a.genesis_id = String::new();
        b.genesis_id = String::new();
        assert_ne!(a.signing_data(), b.signing_data());
    }

    #[test]
    fn test_signed_transaction_verify() {
        let key = KeyPair::generate();
        let unsigned = call(&key.address(), b"hello");
        let signature = key.sign(&sha256(&unsigned.signing_data())).unwrap();
        let signed = SignedTransaction {
            transaction: unsigned,
            signature,
            public_key: key.public_key_hex(),
        };
        assert!(signed.verify().unwrap());

        let mut tampered = signed.clone();
        tampered.transaction.fee = 1;
        assert!(!tampered.verify().unwrap());

        let mut wrong_sender = signed;
        wrong_sender.transaction.sender = KeyPair::generate().address();
        assert!(!wrong_sender.verify().unwrap());
    }

    #[test]
    fn test_json_uses_base64_for_programs() {
        let tx = UnsignedTransaction {
            kind: TransactionKind::ApplicationCreate {
                approval_program: vec![1, 2, 3],
                clear_program: vec![1],
                global_schema: GLOBAL_SCHEMA,
                local_schema: LOCAL_SCHEMA,
                on_complete: OnComplete::NoOp,
            },
            ..call("sender", b"")
        };
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["kind"]["type"], "application_create");
        assert_eq!(json["kind"]["approval_program"], "AQID");

        let back: UnsignedTransaction = serde_json::from_value(json).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn test_on_complete_codes() {
        assert_eq!(OnComplete::NoOp.code(), 0);
        assert_eq!(OnComplete::DeleteApplication.code(), 5);
    }
}
