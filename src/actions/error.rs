//! Error types for trigger actions.

/// Errors raised while discovering, configuring or running an action.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// `plugin.toml` is missing or malformed.
    #[error("invalid manifest in {dir}: {reason}")]
    Manifest {
        /// Plugin directory that was scanned.
        dir: String,
        /// What was wrong with it.
        reason: String,
    },

    /// No constructor is registered for the manifest's `kind`.
    #[error("unknown action kind: {kind}")]
    UnknownKind {
        /// The kind named in the manifest.
        kind: String,
    },

    /// The `[config]` table does not fit the action kind.
    #[error("invalid config for action {action}: {reason}")]
    InvalidConfig { action: String, reason: String },

    /// `initialize` refused to bring the action up.
    #[error("action {action} failed to initialize: {reason}")]
    Init { action: String, reason: String },

    /// `execute` failed.
    #[error("action {action} failed: {reason}")]
    Execute { action: String, reason: String },

    /// `execute` exceeded its time budget and was abandoned.
    #[error("action {action} timed out after {timeout_secs}s")]
    Timeout {
        action: String,
        /// The budget in seconds.
        timeout_secs: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
