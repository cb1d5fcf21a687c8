//! Personal-message signatures (EIP-191, version `0x45`).
//!
//! A wallet signs `keccak256("\x19Ethereum Signed Message:\n" || len(message) || message)`
//! with secp256k1 and returns the 65-byte `r || s || v` signature. Verification
//! recovers the public key from the signature, derives its address
//! (`keccak256(uncompressed_pubkey[1..])[12..]`) and compares it to the claimed
//! address.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rolesync_types::Address;
use sha3::{Digest, Keccak256};

use crate::{CryptoError, Result};

/// Length of an `r || s || v` signature in bytes.
pub const SIGNATURE_LEN: usize = 65;

/// Hash a message the way wallets do for `personal_sign`.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(message);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Derive the account address of a public key.
pub fn address_of(key: &VerifyingKey) -> Address {
    let encoded = key.to_encoded_point(false);
    // Uncompressed SEC1: 0x04 || x || y.
    let digest = Keccak256::digest(&encoded.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    Address::from_bytes(out)
}

/// Decode a `0x`-prefixed 65-byte signature.
pub fn decode_signature(signature: &str) -> Result<[u8; SIGNATURE_LEN]> {
    let digits = signature
        .trim()
        .strip_prefix("0x")
        .ok_or_else(|| CryptoError::MalformedSignature("missing 0x prefix".to_string()))?;
    let mut out = [0u8; SIGNATURE_LEN];
    hex::decode_to_slice(digits, &mut out)
        .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    Ok(out)
}

fn recovery_id(v: u8) -> Result<RecoveryId> {
    let id = match v {
        27 | 28 => v - 27,
        0 | 1 => v,
        other => return Err(CryptoError::InvalidRecoveryId(other)),
    };
    RecoveryId::try_from(id).map_err(|_| CryptoError::InvalidRecoveryId(v))
}

/// Recover the address that produced `signature` over `message`.
pub fn recover(message: &[u8], signature: &[u8; SIGNATURE_LEN]) -> Result<Address> {
    let sig = Signature::try_from(&signature[..64])
        .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    let recid = recovery_id(signature[64])?;
    let prehash = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&prehash, &sig, recid)
        .map_err(|e| CryptoError::Recovery(e.to_string()))?;
    Ok(address_of(&key))
}

/// Check that `signature` is `claimed` signing exactly `message`.
///
/// Never fails: malformed addresses, malformed signatures and recovery
/// failures all yield `false`. Address comparison is case-insensitive.
pub fn verify(claimed: &str, message: &str, signature: &str) -> bool {
    let Ok(claimed) = Address::parse(claimed) else {
        return false;
    };
    verify_bytes(&claimed, message.as_bytes(), signature)
}

/// [`verify`] over raw message bytes and an already-parsed address.
pub fn verify_bytes(claimed: &Address, message: &[u8], signature: &str) -> bool {
    let recovered = decode_signature(signature).and_then(|sig| recover(message, &sig));
    match recovered {
        Ok(address) => address == *claimed,
        Err(e) => {
            tracing::debug!(error = %e, "signature rejected");
            false
        }
    }
}

/// A secp256k1 key that produces personal-message signatures.
pub struct PersonalSigner {
    key: SigningKey,
}

impl PersonalSigner {
    /// Generate a new random key.
    pub fn random() -> Self {
        Self {
            key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Create a signer from a 32-byte secret.
    pub fn from_bytes(secret: &[u8; 32]) -> Result<Self> {
        let key =
            SigningKey::from_slice(secret).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn address(&self) -> Address {
        address_of(self.key.verifying_key())
    }

    /// Sign `message`, returning the `0x`-prefixed `r || s || v` hex string with `v` in {27, 28}.
    pub fn sign(&self, message: &[u8]) -> Result<String> {
        let prehash = personal_message_hash(message);
        let (sig, recid) = self
            .key
            .sign_prehash_recoverable(&prehash)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte() + 27);
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

impl std::fmt::Debug for PersonalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonalSigner")
            .field("address", &self.address())
            .finish()
    }
}
