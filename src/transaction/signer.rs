//! Transaction signing
//!
//! The signing credential is loaded once from configuration and never
//! leaves this module: signed transactions carry only the public key and
//! the signature.

use super::transaction::{SignedTransaction, UnsignedTransaction};
use crate::crypto::{sha256, KeyError, KeyPair};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SigningError {
    #[error("No signing credential is configured")]
    MissingCredential,
    #[error("Signing credential is malformed")]
    MalformedCredential,
    #[error("Credential for {signer} cannot sign for sender {sender}")]
    SenderMismatch { sender: String, signer: String },
    #[error("Signing failed: {0}")]
    Key(#[from] KeyError),
}

/// A secp256k1 secret key used to sign transactions
#[derive(Clone)]
pub struct Credential {
    key_pair: KeyPair,
}

impl Credential {
    /// Parse a hex-encoded secret key
    pub fn from_hex(secret_hex: &str) -> Result<Self, SigningError> {
        let key_pair =
            KeyPair::from_private_key_hex(secret_hex).map_err(|_| SigningError::MalformedCredential)?;
        Ok(Self { key_pair })
    }

    /// Create a fresh random credential
    pub fn generate() -> Self {
        Self {
            key_pair: KeyPair::generate(),
        }
    }

    /// Account address this credential signs for
    pub fn address(&self) -> String {
        self.key_pair.address()
    }

    /// Hex-encoded secret key, for `keygen` output only
    pub fn secret_hex(&self) -> String {
        self.key_pair.private_key_hex()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("address", &self.address())
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Produces signed transactions
pub trait TransactionSigner: Send + Sync {
    /// Address transactions must be sent from
    fn address(&self) -> Result<String, SigningError>;

    /// Sign `unsigned`, consuming it
    fn sign(&self, unsigned: UnsignedTransaction) -> Result<SignedTransaction, SigningError>;
}

/// Signer backed by an in-process credential
#[derive(Debug, Clone)]
pub struct LocalSigner {
    /// The credential, or the reason none is usable
    credential: Result<Credential, SigningError>,
}

impl LocalSigner {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential: Ok(credential),
        }
    }

    /// Signer with no credential; every signing attempt fails
    pub fn unconfigured() -> Self {
        Self {
            credential: Err(SigningError::MissingCredential),
        }
    }

    /// Build from optional configuration text.
    ///
    /// A malformed key is reported at signing time rather than here, so a
    /// read-only deployment can still start.
    pub fn from_config(secret_hex: Option<&str>) -> (Self, Option<SigningError>) {
        match secret_hex.map(str::trim).filter(|s| !s.is_empty()) {
            None => (Self::unconfigured(), None),
            Some(hex) => match Credential::from_hex(hex) {
                Ok(credential) => (Self::new(credential), None),
                Err(e) => (
                    Self {
                        credential: Err(e.clone()),
                    },
                    Some(e),
                ),
            },
        }
    }

    fn credential(&self) -> Result<&Credential, SigningError> {
        self.credential.as_ref().map_err(|e| e.clone())
    }
}

impl Default for LocalSigner {
    fn default() -> Self {
        Self::unconfigured()
    }
}

impl TransactionSigner for LocalSigner {
    fn address(&self) -> Result<String, SigningError> {
        Ok(self.credential()?.address())
    }

    fn sign(&self, unsigned: UnsignedTransaction) -> Result<SignedTransaction, SigningError> {
        let credential = self.credential()?;
        let signer = credential.address();
        if unsigned.sender != signer {
            return Err(SigningError::SenderMismatch {
                sender: unsigned.sender,
                signer,
            });
        }

        let digest = sha256(&unsigned.signing_data());
        let signature = credential.key_pair.sign(&digest)?;
        Ok(SignedTransaction {
            transaction: unsigned,
            signature,
            public_key: credential.key_pair.public_key_hex(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{OnComplete, TransactionKind};

    fn unsigned(sender: &str) -> UnsignedTransaction {
        UnsignedTransaction {
            sender: sender.to_string(),
            fee: 1000,
            first_valid: 1,
            last_valid: 1001,
            genesis_id: "testnet-v1".to_string(),
            genesis_hash: "cd".repeat(32),
            kind: TransactionKind::ApplicationCall {
                application_id: 9,
                args: vec![b"v".to_vec()],
                on_complete: OnComplete::NoOp,
            },
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let credential = Credential::generate();
        let signer = LocalSigner::new(credential.clone());
        let signed = signer.sign(unsigned(&credential.address())).unwrap();

        assert!(signed.verify().unwrap());
        assert_eq!(signed.public_key.len(), 66);
        let json = serde_json::to_string(&signed).unwrap();
        assert!(!json.contains(&credential.secret_hex()));
    }

    #[test]
    fn test_missing_credential() {
        let signer = LocalSigner::unconfigured();
        assert_eq!(signer.address().unwrap_err(), SigningError::MissingCredential);
        assert_eq!(
            signer.sign(unsigned("anyone")).unwrap_err(),
            SigningError::MissingCredential
        );
    }

    #[test]
    fn test_malformed_credential() {
        assert_eq!(
            Credential::from_hex("zz").unwrap_err(),
            SigningError::MalformedCredential
        );
        let (signer, err) = LocalSigner::from_config(Some("1234"));
        assert_eq!(err, Some(SigningError::MalformedCredential));
        // The load failure is what signing reports, not a missing key
        assert_eq!(signer.address().unwrap_err(), SigningError::MalformedCredential);
        assert_eq!(
            signer.sign(unsigned("anyone")).unwrap_err(),
            SigningError::MalformedCredential
        );

        let (signer, err) = LocalSigner::from_config(Some("   "));
        assert_eq!(err, None);
        assert_eq!(signer.address().unwrap_err(), SigningError::MissingCredential);
    }

    #[test]
    fn test_sender_must_match_credential() {
        let signer = LocalSigner::new(Credential::generate());
        let other = Credential::generate().address();
        assert!(matches!(
            signer.sign(unsigned(&other)),
            Err(SigningError::SenderMismatch { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credential = Credential::generate();
        let debug = format!("{:?}", LocalSigner::new(credential.clone()));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&credential.secret_hex()));
    }
}
