//! Error types for keystream and IV operations

use thiserror::Error;

/// Errors that can occur while resolving IVs or building keystreams
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid IV size
    #[error("Invalid IV size: expected {expected}, got {actual}")]
    InvalidIvSize {
        /// Expected IV size in bytes
        expected: usize,
        /// Actual IV size in bytes
        actual: usize,
    },

    /// Invalid key size
    #[error("Invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize {
        /// Expected key size in bytes
        expected: usize,
        /// Actual key size in bytes
        actual: usize,
    },

    /// Invalid key or IV text
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// No IV is registered for the requested encryption scheme
    #[error("No IV registered for encryption scheme: {0}")]
    UnknownVersion(String),
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;
