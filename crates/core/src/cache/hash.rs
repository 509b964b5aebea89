//! Content digests for cached bodies.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of a response body as lowercase hex.
pub fn content_hash(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}
