//! Error types for idreg.
//!
//! Provides structured errors with:
//! - Unique error codes for callers that need to branch on a class
//! - Source error chaining
//! - Client vs internal categorization

use thiserror::Error;

/// Result type for idreg core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes.
///
/// Codes are structured as:
/// - 1xxx: Validation errors (client)
/// - 3xxx: State conflicts (client)
/// - 6xxx: Internal errors (server)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // Validation errors (1xxx)
    InvalidHash = 1001,
    InvalidKey = 1002,
    InvalidSignature = 1003,
    InvalidLabel = 1004,
    NotAFundingTransaction = 1005,
    InvalidFormat = 1006,

    // Conflict errors (3xxx)
    IllegalTransition = 3001,

    // Internal errors (6xxx)
    Serialization = 6001,
    Internal = 6003,
}

impl ErrorCode {
    /// Get the numeric code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Check if this is a client error.
    pub fn is_client_error(self) -> bool {
        (1000..5000).contains(&self.code())
    }

    /// Check if this is a server error.
    pub fn is_server_error(self) -> bool {
        self.code() >= 5000
    }

    /// Check if this error is retryable.
    ///
    /// Nothing raised by the core types is; retryable failures only come
    /// from collaborators.
    pub fn is_retryable(self) -> bool {
        false
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{:04}", self.code())
    }
}

/// Errors raised by the core types.
#[derive(Debug, Error)]
pub enum Error {
    // ========================================================================
    // Validation Errors (client errors)
    // ========================================================================
    /// Invalid hash format or value.
    #[error("[{code}] invalid hash: {message}")]
    InvalidHash {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid cryptographic key.
    #[error("[{code}] invalid key: {message}")]
    InvalidKey { code: ErrorCode, message: String },

    /// Signature verification failed.
    #[error("[{code}] signature verification failed")]
    InvalidSignature { code: ErrorCode },

    /// A requested username label failed normalization rules.
    #[error("[{code}] invalid label {label:?}: {reason}")]
    InvalidLabel {
        code: ErrorCode,
        label: String,
        reason: String,
    },

    /// The observed transaction does not lock any credit.
    #[error("[{code}] not a funding transaction: {message}")]
    NotAFundingTransaction { code: ErrorCode, message: String },

    /// Malformed encoded value (base58 id, outpoint, ...).
    #[error("[{code}] invalid format: {message}")]
    InvalidFormat { code: ErrorCode, message: String },

    // ========================================================================
    // Conflict Errors (client errors)
    // ========================================================================
    /// A state machine was asked to move somewhere it cannot go.
    #[error("[{code}] illegal transition from {from} to {to}")]
    IllegalTransition {
        code: ErrorCode,
        from: String,
        to: String,
    },

    // ========================================================================
    // Internal Errors (server errors)
    // ========================================================================
    /// Serialization/deserialization failed.
    #[error("[{code}] serialization error: {message}")]
    Serialization {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error.
    #[error("[{code}] internal error: {message}")]
    Internal { code: ErrorCode, message: String },
}

impl Error {
    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidHash { code, .. } => *code,
            Error::InvalidKey { code, .. } => *code,
            Error::InvalidSignature { code } => *code,
            Error::InvalidLabel { code, .. } => *code,
            Error::NotAFundingTransaction { code, .. } => *code,
            Error::InvalidFormat { code, .. } => *code,
            Error::IllegalTransition { code, .. } => *code,
            Error::Serialization { code, .. } => *code,
            Error::Internal { code, .. } => *code,
        }
    }

    /// Check if this is a client error.
    pub fn is_client_error(&self) -> bool {
        self.code().is_client_error()
    }

    /// Check if this is a server error.
    pub fn is_server_error(&self) -> bool {
        self.code().is_server_error()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

// ============================================================================
// Convenience constructors
// ============================================================================

impl Error {
    /// Create an InvalidHash error.
    pub fn invalid_hash(message: impl Into<String>) -> Self {
        Error::InvalidHash {
            code: ErrorCode::InvalidHash,
            message: message.into(),
            source: None,
        }
    }

    /// Create an InvalidKey error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Error::InvalidKey {
            code: ErrorCode::InvalidKey,
            message: message.into(),
        }
    }

    /// Create an InvalidSignature error.
    pub fn invalid_signature() -> Self {
        Error::InvalidSignature {
            code: ErrorCode::InvalidSignature,
        }
    }

    /// Create an InvalidLabel error.
    pub fn invalid_label(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidLabel {
            code: ErrorCode::InvalidLabel,
            label: label.into(),
            reason: reason.into(),
        }
    }

    /// Create a NotAFundingTransaction error.
    pub fn not_a_funding_transaction(message: impl Into<String>) -> Self {
        Error::NotAFundingTransaction {
            code: ErrorCode::NotAFundingTransaction,
            message: message.into(),
        }
    }

    /// Create an InvalidFormat error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Error::InvalidFormat {
            code: ErrorCode::InvalidFormat,
            message: message.into(),
        }
    }

    /// Create an IllegalTransition error.
    pub fn illegal_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Error::IllegalTransition {
            code: ErrorCode::IllegalTransition,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            code: ErrorCode::Internal,
            message: message.into(),
        }
    }
}

/// Clones drop the boxed `source`; code and message are kept.
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::InvalidHash { code, message, .. } => Error::InvalidHash {
                code: *code,
                message: message.clone(),
                source: None,
            },
            Error::InvalidKey { code, message } => Error::InvalidKey {
                code: *code,
                message: message.clone(),
            },
            Error::InvalidSignature { code } => Error::InvalidSignature { code: *code },
            Error::InvalidLabel {
                code,
                label,
                reason,
            } => Error::InvalidLabel {
                code: *code,
                label: label.clone(),
                reason: reason.clone(),
            },
            Error::NotAFundingTransaction { code, message } => Error::NotAFundingTransaction {
                code: *code,
                message: message.clone(),
            },
            Error::InvalidFormat { code, message } => Error::InvalidFormat {
                code: *code,
                message: message.clone(),
            },
            Error::IllegalTransition { code, from, to } => Error::IllegalTransition {
                code: *code,
                from: from.clone(),
                to: to.clone(),
            },
            Error::Serialization { code, message, .. } => Error::Serialization {
                code: *code,
                message: message.clone(),
                source: None,
            },
            Error::Internal { code, message } => Error::Internal {
                code: *code,
                message: message.clone(),
            },
        }
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization {
            code: ErrorCode::Serialization,
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization {
            code: ErrorCode::Serialization,
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::InvalidHash {
            code: ErrorCode::InvalidHash,
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

impl From<bs58::decode::Error> for Error {
    fn from(e: bs58::decode::Error) -> Self {
        Error::invalid_format(e.to_string())
    }
}
