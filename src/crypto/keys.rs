//! ECDSA key management
//!
//! Provides key pair generation, signing, and verification using
//! the secp256k1 elliptic curve, plus Base58Check account addresses.

use rand::rngs::OsRng;
use ripemd::Ripemd160;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::hash::{double_sha256, sha256};

/// Address version byte
pub const ADDRESS_VERSION: u8 = 0x00;

/// Decoded address length: version + RIPEMD160 digest + checksum
const ADDRESS_BYTES: usize = 1 + 20 + 4;

/// Errors that can occur during key operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid address: {0}")]
    InvalidAddress(&'static str),
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Get the public key as a hex string (compressed format)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Account address derived from the public key
    pub fn address(&self) -> String {
        public_key_to_address(&self.public_key)
    }

    /// Sign a message hash with the private key
    pub fn sign(&self, message_hash: &[u8]) -> Result<Vec<u8>, KeyError> {
        sign_message(&self.secret_key, message_hash)
    }

    /// Verify a signature against this key pair's public key
    pub fn verify(&self, message_hash: &[u8], signature: &[u8]) -> Result<bool, KeyError> {
        verify_signature(&self.public_key, message_hash, signature)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Convert a public key to an account address
/// Base58Check(version || RIPEMD160(SHA256(pubkey)))
pub fn public_key_to_address(public_key: &PublicKey) -> String {
    let sha256_hash = sha256(&public_key.serialize());

    let mut ripemd = Ripemd160::new();
    ripemd.update(&sha256_hash);
    let ripemd_hash = ripemd.finalize();

    let mut address_bytes = vec![ADDRESS_VERSION];
    address_bytes.extend_from_slice(&ripemd_hash);

    let checksum = {
        let mut hasher = Sha256::new();
        hasher.update(&address_bytes);
        let first_hash = hasher.finalize();
        let mut hasher = Sha256::new();
        hasher.update(first_hash);
        hasher.finalize()
    };
    address_bytes.extend_from_slice(&checksum[..4]);

    bs58::encode(address_bytes).into_string()
}

/// Check that `address` is a syntactically valid account address.
///
/// Verifies the Base58 alphabet, decoded length, version byte and checksum.
/// Says nothing about whether the account exists on the ledger.
pub fn validate_address(address: &str) -> Result<(), KeyError> {
    if address.is_empty() {
        return Err(KeyError::InvalidAddress("empty"));
    }
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|_| KeyError::InvalidAddress("not base58"))?;
    if bytes.len() != ADDRESS_BYTES {
        return Err(KeyError::InvalidAddress("wrong length"));
    }
    if bytes[0] != ADDRESS_VERSION {
        return Err(KeyError::InvalidAddress("unknown version"));
    }
    let (payload, checksum) = bytes.split_at(ADDRESS_BYTES - 4);
    if double_sha256(payload)[..4] != *checksum {
        return Err(KeyError::InvalidAddress("checksum mismatch"));
    }
    Ok(())
}

/// Parse a public key from hex string
pub fn public_key_from_hex(hex_key: &str) -> Result<PublicKey, KeyError> {
    let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey)?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

/// Sign a message hash with a secret key
pub fn sign_message(secret_key: &SecretKey, message_hash: &[u8]) -> Result<Vec<u8>, KeyError> {
    let secp = Secp256k1::new();

    // Ensure message hash is 32 bytes
    let hash = if message_hash.len() == 32 {
        message_hash.to_vec()
    } else {
        sha256(message_hash)
    };

    let message = Message::from_digest_slice(&hash)?;
    let signature = secp.sign_ecdsa(&message, secret_key);
    Ok(signature.serialize_compact().to_vec())
}

/// Verify a signature against a public key
pub fn verify_signature(
    public_key: &PublicKey,
    message_hash: &[u8],
    signature: &[u8],
) -> Result<bool, KeyError> {
    let secp = Secp256k1::new();

    let hash = if message_hash.len() == 32 {
        message_hash.to_vec()
    } else {
        sha256(message_hash)
    };

    let message = Message::from_digest_slice(&hash)?;
    let sig = secp256k1::ecdsa::Signature::from_compact(signature)
        .map_err(|_| KeyError::InvalidSignature)?;

    Ok(secp.verify_ecdsa(&message, &sig, public_key).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let message_hash = sha256(b"Hello, ledger!");

        let signature = kp.sign(&message_hash).unwrap();
        assert!(kp.verify(&message_hash, &signature).unwrap());

        let other = KeyPair::generate();
        assert!(!other.verify(&message_hash, &signature).unwrap());
    }

    #[test]
    fn test_key_pair_from_hex() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::from_private_key_hex(&kp1.private_key_hex()).unwrap();
        assert_eq!(kp1.public_key_hex(), kp2.public_key_hex());
        assert_eq!(kp1.address(), kp2.address());
    }

    #[test]
    fn test_malformed_private_key() {
        assert!(matches!(
            KeyPair::from_private_key_hex("not-hex"),
            Err(KeyError::InvalidPrivateKey)
        ));
        assert!(matches!(
            KeyPair::from_private_key_hex("abcd"),
            Err(KeyError::InvalidPrivateKey)
        ));
    }

    #[test]
    fn test_generated_address_validates() {
        let kp = KeyPair::generate();
        let address = kp.address();
        assert!(address.starts_with('1'));
        assert!(validate_address(&address).is_ok());
    }

    #[test]
    fn test_validate_address_rejects_garbage() {
        assert!(validate_address("").is_err());
        assert!(validate_address("0OIl").is_err());
        assert!(validate_address("1abc").is_err());

        // Flip one character: the checksum must catch it
        let address = KeyPair::generate().address();
        let mut chars: Vec<char> = address.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '2' { '3' } else { '2' };
        let tampered: String = chars.into_iter().collect();
        assert!(validate_address(&tampered).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let kp = KeyPair::generate();
        let rendered = format!("{:?}", kp);
        assert!(!rendered.contains(&kp.private_key_hex()));
    }
}
