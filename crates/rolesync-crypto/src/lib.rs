//! # rolesync-crypto
//!
//! Cryptographic primitives shared by ownership proofs and wallet linking.
//!
//! ## Modules
//!
//! - [`eip191`]: personal-message signing and signer recovery over secp256k1
//! - [`nonce`]: single-use challenge tokens
//! - [`challenge`]: challenge texts that embed a nonce

pub mod challenge;
pub mod eip191;
pub mod nonce;

pub use eip191::{verify, PersonalSigner};

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Signature is not `0x` + 130 hex digits.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// Recovery byte is not 27/28 (or 0/1).
    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u8),

    /// No public key could be recovered from the signature.
    #[error("signer recovery failed: {0}")]
    Recovery(String),

    /// Invalid key material.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
