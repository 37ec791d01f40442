//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 hashing
//! - ECDSA key management (secp256k1)
//! - Base58Check account addresses

pub mod hash;
pub mod keys;

pub use hash::{double_sha256, sha256, sha256_hex};
pub use keys::{
    public_key_from_hex, public_key_to_address, sign_message, validate_address,
    verify_signature, KeyError, KeyPair,
};
