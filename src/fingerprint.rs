use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of the compact JSON encoding. Callers keep maps ordered
/// (BTreeMap) so the encoding is canonical.
pub fn json_fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(sha256_hex(&bytes))
}

pub fn short(fingerprint: &str) -> &str {
    let end = fingerprint.len().min(12);
    &fingerprint[..end]
}
