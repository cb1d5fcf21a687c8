//! Single-use challenge tokens.

use rand::RngCore;

/// Random bytes per nonce.
pub const NONCE_BYTES: usize = 16;

/// Generate a fresh nonce: [`NONCE_BYTES`] bytes from the OS CSPRNG, hex-encoded.
pub fn generate() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
