//! Error types for regdb core.

use regdb_codec::CodecError;
use std::io;
use thiserror::Error;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur in registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A required argument is empty or malformed.
    #[error("invalid parameter: {message}")]
    InvalidParam {
        /// Description of the problem.
        message: String,
    },

    /// A key, value or descriptor does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// A configuration share does not exist.
    #[error("no such service: {name}")]
    NoSuchService {
        /// Share name.
        name: String,
    },

    /// An object to be created exists already.
    #[error("already exists: {what}")]
    AlreadyExists {
        /// What was being created.
        what: String,
    },

    /// An allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] regdb_storage::StorageError),

    /// Record encoding error.
    #[error("codec error: {0}")]
    Codec(CodecError),

    /// Stored bytes could not be interpreted.
    #[error("corrupt data: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// A transaction was cancelled and nothing was applied.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Invalid database format or version.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },
}

impl RegistryError {
    /// Creates an invalid parameter error.
    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::InvalidParam {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates a no such service error.
    pub fn no_such_service(name: impl Into<String>) -> Self {
        Self::NoSuchService { name: name.into() }
    }

    /// Creates an already exists error.
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }

    /// Creates a corrupt data error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Returns true for [`RegistryError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<CodecError> for RegistryError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::OutOfMemory { .. } => Self::OutOfMemory,
            other => Self::Codec(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_oom_maps_to_out_of_memory() {
        let err: RegistryError = CodecError::OutOfMemory { requested: 8 }.into();
        assert!(matches!(err, RegistryError::OutOfMemory));

        let err: RegistryError = CodecError::NameTooLong { len: 300, max: 255 }.into();
        assert!(matches!(err, RegistryError::Codec(_)));
    }

    #[test]
    fn display_includes_context() {
        let err = RegistryError::no_such_service("homes");
        assert_eq!(err.to_string(), "no such service: homes");
        assert!(RegistryError::not_found("x").is_not_found());
    }
}
