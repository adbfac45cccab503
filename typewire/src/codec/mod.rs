//! Payload serialization and the type-identity table.
//!
//! This module owns everything between a typed message and the bytes that
//! cross the wire:
//!
//! - [`MessageCodec`]: pluggable payload serialization with a [`JsonCodec`]
//!   default. JSON is self-describing and the frame header supplies the
//!   length prefix, so any codec satisfying the trait contract interoperates
//!   with the framing layer.
//! - [`Shape`] / [`fingerprint`]: the structural description of a message
//!   type's members and the deterministic fold over it.
//! - [`TypeTable`]: the per-process `type ⇄ u16 id` table built by sorting
//!   the registered message set by fingerprint.

mod shape;
mod table;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use shape::{FieldShape, Member, Shape, Structural, fingerprint};
pub use table::{
    DecodeError, EncodeError, Message, TypeSetError, TypeTable, TypeTableBuilder,
};

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a message to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failed to decode bytes to a message.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Pluggable payload serialization format.
///
/// Implementations must be cheap to clone: the type table clones the codec
/// into one encode and one decode closure per registered message type.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a serializable message to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a deserializable message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
///
/// The default codec: human-readable on the wire, which makes protocol
/// captures debuggable at some cost in payload size.
#[derive(Clone, Copy, Default, Debug)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Sample {
        id: u32,
        label: String,
    }

    #[test]
    fn test_json_roundtrip() {
        let codec = JsonCodec;
        let msg = Sample {
            id: 7,
            label: "seven".to_string(),
        };

        let bytes = codec.encode(&msg).expect("encode");
        let decoded: Sample = codec.decode(&bytes).expect("decode");
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_json_decode_error() {
        let codec = JsonCodec;
        let result: Result<Sample, CodecError> = codec.decode(b"not json {");
        let err = result.expect_err("garbage must not decode");
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(err.to_string().contains("decode error"));
    }

    #[test]
    fn test_json_type_mismatch() {
        let codec = JsonCodec;
        let bytes = codec.encode(&vec![1, 2, 3]).expect("encode");
        let result: Result<Sample, CodecError> = codec.decode(&bytes);
        assert!(result.is_err());
    }
}
