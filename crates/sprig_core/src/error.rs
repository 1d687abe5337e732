//! Error types for sprig_core

use thiserror::Error;

/// Errors raised while building interpolators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpolationError {
    /// Output templates disagree on how many numbers they contain
    #[error("string shapes do not match: \"{first}\" has {expected} numbers, \"{other}\" has {found}")]
    ShapeMismatch {
        first: String,
        other: String,
        expected: usize,
        found: usize,
    },

    /// Range and output cannot be paired up
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// A numeric output slot held something that is not a number
    #[error("not a number: {0}")]
    NotANumber(String),
}

/// Result type for sprig_core operations
pub type Result<T> = std::result::Result<T, InterpolationError>;
