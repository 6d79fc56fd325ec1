/// Payload integrity and document compression
///
/// Computes a checksum over the canonical serialized form of a payload at
/// enqueue time and verifies it on every subsequent read. Also provides the
/// zstd codec used for the persisted queue document.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Convert a caller-supplied payload into its stored JSON form.
///
/// A non-serializable payload (e.g. a non-finite float) is rejected here,
/// synchronously, and never reaches the store.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::Validation(format!("payload is not serializable: {}", e)))
}

/// Compute the hex SHA-256 digest of a payload's canonical serialization.
///
/// serde_json orders map keys, so semantically equal payloads hash equally
/// regardless of how the caller built them.
pub fn checksum(payload: &Value) -> Result<String> {
    let canonical = serde_json::to_vec(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Recompute and compare a payload's checksum against the stored digest.
pub fn verify(payload: &Value, expected: &str) -> Result<bool> {
    Ok(checksum(payload)? == expected)
}

/// Compress a serialized document for storage.
pub fn compress(data: &[u8], level: i32) -> Result<Vec<u8>> {
    zstd::encode_all(data, level).map_err(|e| Error::Compression(e.to_string()))
}

/// Decompress a stored document.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data).map_err(|e| Error::Compression(e.to_string()))
}
