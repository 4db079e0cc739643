//! WZ archive error types

use thiserror::Error;
use wzkit_crypto::CryptoError;

/// WZ-specific error type
#[derive(Debug, Error)]
pub enum WzError {
    /// Archive preamble could not be read
    #[error("malformed archive header: {0}")]
    Format(String),

    /// No candidate game version reproduced the stored marker
    #[error("unable to detect game version for marker {marker}")]
    VersionDetection {
        /// Marker as stored in the archive
        marker: u16,
    },

    /// Corrupt directory or image entry
    #[error("structural decode error at offset {offset}: {reason}")]
    StructuralDecode {
        /// Stream offset of the failing entry
        offset: u64,
        /// What was wrong with it
        reason: String,
    },

    /// Corrupt property tag, payload or shape
    #[error("property decode error at offset {offset}: {reason}")]
    PropertyDecode {
        /// Stream offset of the failing property
        offset: u64,
        /// What was wrong with it
        reason: String,
    },

    /// The archive was released before this access
    #[error("archive has been released")]
    UseAfterDispose,

    /// Regex query pattern failed to compile
    #[error("invalid query pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Bitmap pixel format this crate cannot convert
    #[error("unsupported pixel format: {0}")]
    UnsupportedPixelFormat(u32),

    /// Archive description handed to the builder is not representable
    #[error("invalid archive description: {0}")]
    InvalidBuild(String),

    /// IV lookup failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WzError {
    pub(crate) fn structural(offset: u64, reason: impl Into<String>) -> Self {
        Self::StructuralDecode {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn property(offset: u64, reason: impl Into<String>) -> Self {
        Self::PropertyDecode {
            offset,
            reason: reason.into(),
        }
    }
}

/// Result type for WZ operations
pub type WzResult<T> = Result<T, WzError>;

/// Attach decode context to low-level read failures
pub(crate) trait DecodeContext<T> {
    /// Treat the failure as a corrupt directory entry at `offset`
    fn structural(self, offset: u64) -> WzResult<T>;

    /// Treat the failure as a corrupt property at `offset`
    fn property(self, offset: u64) -> WzResult<T>;
}

impl<T> DecodeContext<T> for binrw::BinResult<T> {
    fn structural(self, offset: u64) -> WzResult<T> {
        self.map_err(|e| WzError::structural(offset, e.to_string()))
    }

    fn property(self, offset: u64) -> WzResult<T> {
        self.map_err(|e| WzError::property(offset, e.to_string()))
    }
}
