//! Content digests for staged objects

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of an in-memory blob
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
