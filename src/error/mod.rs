//! Error handling for the object engine
//!
//! One error type covers every layer. Network-facing callers mostly care about
//! three questions: is the input malformed, should the object just be dropped,
//! and is the failure worth retrying. The helper predicates answer those.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, BitmessageError>;

/// Error types for address, crypto, wire format and pipeline operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitmessageError {
    /// Malformed address, WIF key, Base58 text or varint
    #[error("Format error: {0}")]
    Format(String),
    /// Base58Check checksum did not match the decoded data
    #[error("Invalid checksum")]
    InvalidChecksum,
    /// ECIES structure could not be parsed
    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),
    /// MAC or padding check failed. Carries no detail.
    #[error("Authentication failed")]
    AuthenticationFailed,
    /// Signature did not verify against the embedded signing key
    #[error("Signature invalid")]
    SignatureInvalid,
    /// Input ended before a field boundary
    #[error("Truncated object: needed {needed} bytes, {available} available")]
    TruncatedObject { needed: usize, available: usize },
    /// Object type/version combination this engine does not handle
    #[error("Unsupported object: type {object_type}, version {version}")]
    UnsupportedObjectVersion { object_type: u32, version: u64 },
    /// POW nonce does not satisfy the target
    #[error("Proof of work invalid")]
    PowInvalid,
    /// POW parameters produce a target of zero
    #[error("Proof of work target is zero")]
    DegenerateTarget,
    /// POW search aborted by the caller
    #[error("Proof of work cancelled")]
    PowCancelled,
    /// Key material does not belong to the expected address
    #[error("Key mismatch: {0}")]
    KeyMismatch(String),
    /// Internal cryptographic failure
    #[error("Cryptographic error: {0}")]
    Crypto(String),
    /// Storage collaborator errors
    #[error("Database error: {0}")]
    Database(String),
    /// Record serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
    /// Transport collaborator errors
    #[error("Transport error: {0}")]
    Transport(String),
}

impl BitmessageError {
    /// True for rejected-input errors on addresses, keys and encodings.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            BitmessageError::Format(_) | BitmessageError::InvalidChecksum
        )
    }

    /// True when an object received from the network should be logged and
    /// dropped without affecting the rest of a batch.
    pub fn is_discardable(&self) -> bool {
        matches!(
            self,
            BitmessageError::Format(_)
                | BitmessageError::InvalidChecksum
                | BitmessageError::MalformedCiphertext(_)
                | BitmessageError::AuthenticationFailed
                | BitmessageError::SignatureInvalid
                | BitmessageError::TruncatedObject { .. }
                | BitmessageError::UnsupportedObjectVersion { .. }
                | BitmessageError::PowInvalid
                | BitmessageError::KeyMismatch(_)
        )
    }

    /// Only transport failures are transient. Crypto and POW failures point
    /// at bad data or a bug and are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BitmessageError::Transport(_))
    }

    pub(crate) fn truncated(needed: usize, available: usize) -> Self {
        BitmessageError::TruncatedObject { needed, available }
    }
}

impl From<std::io::Error> for BitmessageError {
    fn from(err: std::io::Error) -> Self {
        BitmessageError::Io(err.to_string())
    }
}

impl From<sled::Error> for BitmessageError {
    fn from(err: sled::Error) -> Self {
        BitmessageError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BitmessageError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BitmessageError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BitmessageError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BitmessageError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BitmessageError {
    fn from(err: toml::de::Error) -> Self {
        BitmessageError::Config(err.to_string())
    }
}
