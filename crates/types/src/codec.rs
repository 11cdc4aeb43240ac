// Path: crates/types/src/codec.rs

//! Defines the canonical, deterministic binary codec for all consensus-critical state.
//!
//! Thin wrappers around `parity-scale-codec` (SCALE). Centralizing the codec
//! here ensures every component uses the exact same serialization for log
//! entries, votes and snapshots, preventing divergent state hashes from
//! different binary representations of the same data.

use parity_scale_codec::{Decode, DecodeAll, Encode};

/// Encodes a value into its canonical byte representation.
///
/// Use this for all data that is written to the log store or included in a
/// hash for signing.
pub fn to_bytes_canonical<T: Encode>(v: &T) -> Vec<u8> {
    v.encode()
}

/// Decodes a value from a canonical byte representation.
///
/// Fails fast on trailing bytes or any decoding error; malformed data must
/// never be half-processed in a consensus context.
pub fn from_bytes_canonical<T: Decode>(b: &[u8]) -> Result<T, String> {
    T::decode_all(&mut &*b).map_err(|e| format!("canonical decode failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Encode, Decode, Debug, PartialEq, Eq)]
    struct TestRecord {
        id: u32,
        name: String,
        tags: Vec<u8>,
    }

    #[test]
    fn roundtrip() {
        let original = TestRecord {
            id: 42,
            name: "test-data".to_string(),
            tags: vec![1, 2, 3],
        };
        let encoded = to_bytes_canonical(&original);
        assert!(!encoded.is_empty());
        let decoded = from_bytes_canonical::<TestRecord>(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn truncated_input_fails() {
        let original = TestRecord {
            id: 99,
            name: "another-test".to_string(),
            tags: vec![10, 20, 30],
        };
        let mut encoded = to_bytes_canonical(&original);
        encoded.pop();
        let err = from_bytes_canonical::<TestRecord>(&encoded).unwrap_err();
        assert!(err.contains("canonical decode failed"));
    }

    #[test]
    fn trailing_bytes_fail() {
        let mut encoded = to_bytes_canonical(&7u32);
        encoded.push(0xFF);
        assert!(from_bytes_canonical::<u32>(&encoded).is_err());
    }
}
