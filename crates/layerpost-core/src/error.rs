//! Error handling for layerpost
//!
//! Provides the error types shared by every layer of the post-processor:
//! - Stream errors (structural problems with the layer stream)
//! - Profile errors (missing or malformed printer configuration)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Layer stream error type
///
/// Represents structural problems with a layer stream that make a pass
/// impossible. Lookup misses are not errors; they are tallied and reported.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// The stream has fewer blocks than header + start + footer
    #[error("Layer stream too short: {blocks} blocks, need at least {required}")]
    TooShort {
        /// Number of blocks present.
        blocks: usize,
        /// Minimum number of blocks required.
        required: usize,
    },

    /// A block index outside the stream was addressed
    #[error("Block index {index} out of range (stream has {len} blocks)")]
    BlockOutOfRange {
        /// The requested block index.
        index: usize,
        /// Number of blocks in the stream.
        len: usize,
    },

    /// A line index outside the block was addressed
    #[error("Line {line} out of range in block {block} ({len} lines)")]
    LineOutOfRange {
        /// The block that was addressed.
        block: usize,
        /// The requested line index.
        line: usize,
        /// Number of lines in the block.
        len: usize,
    },

    /// The block has no layer sentinel to anchor an insertion after
    #[error("Block {block} has no layer sentinel")]
    MissingSentinel {
        /// The block that was addressed.
        block: usize,
    },
}

/// Printer profile error type
///
/// Raised by a [`crate::PropertySource`] when the host cannot supply a value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfileError {
    /// The host has no value for this key
    #[error("Missing profile key '{key}'")]
    MissingKey {
        /// The key that was looked up.
        key: String,
    },

    /// The host value could not be interpreted
    #[error("Invalid value for profile key '{key}': {reason}")]
    InvalidValue {
        /// The key that was looked up.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Main error type for layerpost
///
/// A unified error type that can represent any error from the core layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Stream error
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Profile error
    #[error(transparent)]
    Profile(#[from] ProfileError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a stream error
    pub fn is_stream_error(&self) -> bool {
        matches!(self, Error::Stream(_))
    }

    /// Check if this is a profile error
    pub fn is_profile_error(&self) -> bool {
        matches!(self, Error::Profile(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_display() {
        let err = StreamError::TooShort {
            blocks: 2,
            required: 3,
        };
        assert_eq!(
            err.to_string(),
            "Layer stream too short: 2 blocks, need at least 3"
        );
    }

    #[test]
    fn test_profile_error_display() {
        let err = ProfileError::MissingKey {
            key: "machine_height".to_string(),
        };
        assert_eq!(err.to_string(), "Missing profile key 'machine_height'");
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = StreamError::MissingSentinel { block: 4 }.into();
        assert!(err.is_stream_error());
        assert!(!err.is_profile_error());
        assert_eq!(err.to_string(), "Block 4 has no layer sentinel");
    }

    #[test]
    fn test_other() {
        let err = Error::other("boom");
        assert_eq!(err.to_string(), "boom");
    }
}
