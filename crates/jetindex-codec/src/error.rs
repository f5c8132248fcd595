//! Error types for the frame decoder.

use thiserror::Error;

/// Errors that can occur while decoding a binary frame.
///
/// Decode errors are terminal for the frame that produced them: the
/// pipeline counts and drops the frame, it never retries a decode.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("unsupported item (major type {major}, info {info}) at offset {offset}")]
    UnsupportedType { major: u8, info: u8, offset: usize },

    #[error("indefinite-length item at offset {offset}")]
    IndefiniteLength { offset: usize },

    #[error("declared length {declared} exceeds remaining input ({remaining} bytes) at offset {offset}")]
    LengthOverflow {
        declared: u64,
        remaining: usize,
        offset: usize,
    },

    #[error("nesting depth exceeds limit of {max}")]
    DepthLimitExceeded { max: usize },

    #[error("invalid UTF-8 in text string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("map key is not a text string at offset {offset}")]
    InvalidMapKey { offset: usize },

    #[error("link (tag 42) payload is not a byte string at offset {offset}")]
    InvalidLink { offset: usize },

    #[error("{remaining} trailing bytes after frame")]
    TrailingBytes { remaining: usize },

    #[error("frame is missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("frame field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}
