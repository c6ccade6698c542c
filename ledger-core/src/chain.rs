//! Hash chaining for ledger entries
//!
//! A pure function from `(payload, previous_hash)` to a SHA-256 hex digest.
//! When a previous hash is present it is prepended to the canonical payload
//! string before hashing, which links each entry to its predecessor.

use crate::canonical::canonical_string;
use crate::types::Payload;
use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

/// Compute the chained digest for a payload.
///
/// Deterministic: identical inputs yield identical output in any process.
/// No side effects, no I/O.
pub fn digest(payload: &Payload, previous_hash: Option<&str>) -> String {
    let canonical = canonical_string(payload);

    let mut hasher = Sha256::new();
    if let Some(prev) = previous_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(canonical.as_bytes());

    hex::encode(hasher.finalize())
}
