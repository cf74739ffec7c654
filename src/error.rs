//! Error types for the alarm engine.

use crate::actions::error::ActionError;
use crate::store::StoreError;

/// Top-level error type for the alarm service.
#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Event store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Trigger action discovery or execution error.
    #[error("action error: {0}")]
    Action(#[from] ActionError),

    /// Scheduler error (control surface, dispatch loop).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Calendar collaborator error (feed unreachable, malformed payload).
    #[error("calendar error: {0}")]
    Calendar(String),

    /// A time spec or timezone could not be interpreted.
    #[error("invalid time: {0}")]
    InvalidTime(String),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AlarmError>;
