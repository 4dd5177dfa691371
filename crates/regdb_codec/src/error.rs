//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode stored bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// A subkey or value name exceeds the fixed name width.
    #[error("name of {len} bytes exceeds the maximum of {max}")]
    NameTooLong {
        /// Length of the rejected name in bytes.
        len: usize,
        /// Maximum allowed length in bytes.
        max: usize,
    },

    /// A count or size does not fit the 32-bit record fields.
    #[error("{what} of {value} does not fit in a 32-bit field")]
    FieldOverflow {
        /// Which field overflowed.
        what: &'static str,
        /// The offending value.
        value: usize,
    },

    /// The output buffer could not be allocated.
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory {
        /// Number of bytes requested.
        requested: usize,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}
