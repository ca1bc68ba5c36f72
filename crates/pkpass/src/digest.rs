//! Content digests for bundle files.
//!
//! The wallet's manifest check compares SHA-1 digests, so [`sha1_hex`] is the
//! only digest that ever lands in `manifest.json`. [`sha256_hex`] exists for
//! callers that keep their own integrity records next to the bundle.

use sha1::{Digest, Sha1};
use sha2::Sha256;

/// Lowercase hex SHA-1 of `data`, as written into `manifest.json`.
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
