//! Flow-control error types

use crate::queues::Direction;
use thiserror::Error;

/// Flow-control errors
#[derive(Debug, Error)]
pub enum FlowControlError {
    /// Frame is shorter than the headers needed to classify it
    #[error("Frame too short to classify: {len} bytes (need {need})")]
    FrameTooShort { len: usize, need: usize },

    /// Drain thread did not reach the stopped phase within the shutdown poll
    #[error("{direction} drain thread did not stop in time")]
    ShutdownTimeout { direction: Direction },

    /// Drain thread exited by panic instead of running to completion
    #[error("{direction} drain thread panicked")]
    ThreadPanicked { direction: Direction },
}

/// Type alias for flow-control results
pub type Result<T> = std::result::Result<T, FlowControlError>;
