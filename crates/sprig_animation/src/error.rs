//! Error types for sprig_animation

use sprig_core::InterpolationError;
use thiserror::Error;

/// Errors that can occur while animating
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnimationError {
    /// A goal has no animated representation
    #[error("value not animatable: {0}")]
    Unanimatable(String),

    /// A string goal could not be interpolated from its current value
    #[error("interpolation failed: {0}")]
    Interpolation(#[from] InterpolationError),

    /// An async script was superseded or its controller stopped
    #[error("async animation cancelled")]
    Cancelled,

    /// The controller was destroyed
    #[error("controller destroyed")]
    Destroyed,

    /// The scheduler backing a controller has been dropped
    #[error("animation scheduler no longer exists")]
    SchedulerGone,
}

impl AnimationError {
    /// Cancellation is a control-flow signal, not a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AnimationError::Cancelled)
    }
}

/// Result type for sprig_animation operations
pub type Result<T> = std::result::Result<T, AnimationError>;
