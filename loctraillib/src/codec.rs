//! Gzip JSON encoding of cache entries.
//!
//! Decoding is bounded: the decompressed stream is read through a `take`
//! limited to one byte past the ceiling, so an oversized payload is rejected
//! as soon as that byte appears rather than after it was fully inflated.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{LoctrailError, ValidationError};
use crate::stats::SharedCacheEntry;
use crate::Result;

/// Serialize and gzip an entry.
pub fn encode_entry(entry: &SharedCacheEntry) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(entry)?;
    gzip(&json)
}

/// Gzip raw bytes.
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inflate a gzip payload, failing once more than `max_bytes` come out.
pub fn decode_gzip_limited(compressed: &[u8], max_bytes: u64) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(compressed)
        .take(max_bytes.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| ValidationError::new("body", format!("not a valid gzip stream: {}", e)))?;

    if out.len() as u64 > max_bytes {
        return Err(LoctrailError::PayloadTooLarge { limit: max_bytes });
    }
    Ok(out)
}

/// Inflate and parse a payload as untyped JSON, ready for validation.
pub fn decode_json_limited(compressed: &[u8], max_bytes: u64) -> Result<serde_json::Value> {
    let raw = decode_gzip_limited(compressed, max_bytes)?;
    serde_json::from_slice(&raw)
        .map_err(|e| ValidationError::new("body", format!("not valid JSON: {}", e)).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_within_limit() {
        let payload = br#"{"version":1}"#;
        let compressed = gzip(payload).unwrap();
        assert_eq!(decode_gzip_limited(&compressed, 1024).unwrap(), payload);
        let value = decode_json_limited(&compressed, 1024).unwrap();
        assert_eq!(value["version"], 1);
    }

    #[test]
    fn test_decode_limit_is_inclusive() {
        let compressed = gzip(&[b'a'; 100]).unwrap();
        assert_eq!(decode_gzip_limited(&compressed, 100).unwrap().len(), 100);
        assert!(matches!(
            decode_gzip_limited(&compressed, 99),
            Err(LoctrailError::PayloadTooLarge { limit: 99 })
        ));
    }

    #[test]
    fn test_bomb_stops_early() {
        // 64 MiB of zeros compresses to roughly 64 KiB
        let compressed = gzip(&vec![0u8; 64 * 1024 * 1024]).unwrap();
        assert!(compressed.len() < 1024 * 1024);
        let result = decode_gzip_limited(&compressed, 1024);
        assert!(matches!(result, Err(LoctrailError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_corrupt_input_is_a_validation_error() {
        let result = decode_gzip_limited(b"definitely not gzip", 1024);
        assert!(matches!(result, Err(LoctrailError::Validation(_))));

        let not_json = gzip(b"{nope").unwrap();
        let err = decode_json_limited(&not_json, 1024).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }
}
