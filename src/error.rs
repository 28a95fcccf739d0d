//! Error types for LoRA key conversion

use thiserror::Error;

/// Main error type for conversion operations
#[derive(Error, Debug)]
pub enum Error {
    /// A tensor could not be split into two equal chunks along its first axis
    #[error("cannot split tensor into two equal chunks: first axis has odd length {rows}")]
    UnevenSplit {
        /// Length of the first axis of the offending tensor
        rows: usize,
    },

    /// An unrecognized convention name was given
    #[error("unknown convention: {0}")]
    UnknownConvention(String),

    /// Tensor operation error
    #[error("tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),
}

/// Result type alias for conversion operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an uneven-split error for a first axis of the given length
    pub fn uneven_split(rows: usize) -> Self {
        Self::UnevenSplit { rows }
    }

    /// Create an unknown-convention error
    pub fn unknown_convention(name: impl Into<String>) -> Self {
        Self::UnknownConvention(name.into())
    }
}
