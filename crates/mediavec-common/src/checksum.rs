//! Content identifiers and checksums
//!
//! Record identifiers must be reproducible from the same input so that a
//! re-run upserts the rows it wrote before instead of duplicating them.

use sha2::{Digest, Sha256};

use crate::types::RecordId;

/// Lowercase hex MD5 of `data`
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Derive a record identifier from a row's description text.
///
/// The text is hashed exactly as read (no trimming or case folding).
pub fn content_id(description: &str) -> RecordId {
    RecordId::from_hash(md5_hex(description.as_bytes()))
}
