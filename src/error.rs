//! Error types for flags, terrains, hooks and persistence.

use thiserror::Error;

/// User input could not be turned into a flag value.
///
/// The message is meant to be shown to the actor who typed the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FlagTransformError {
    pub message: String,
}

impl FlagTransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors raised while defining or registering flags.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlagError {
    /// Flag ids are restricted to `[a-z0-9_]`.
    #[error("invalid flag id: {0:?}")]
    InvalidId(String),

    /// Another flag already uses this id.
    #[error("flag already registered: {0}")]
    Duplicate(String),

    #[error("unknown flag: {0}")]
    Unknown(String),

    #[error(transparent)]
    Transform(#[from] FlagTransformError),
}

/// Rejected terrain mutations.
#[derive(Debug, Error)]
pub enum TerrainError {
    /// Whole-world terrains keep their name, owner and bounds.
    #[error("cannot {operation} a world-wide terrain")]
    WorldWideImmutable { operation: &'static str },

    /// The value handed to a flag cannot be serialized.
    #[error("value for flag {flag} is not serializable: {reason}")]
    Unserializable { flag: String, reason: String },

    /// A hook vetoed the flag change.
    #[error("change to flag {flag} was cancelled")]
    Cancelled { flag: String },

    #[error(transparent)]
    Transform(#[from] FlagTransformError),
}

/// Reported by a hook that failed to run; never cancels the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("hook failed: {message}")]
pub struct HookError {
    pub message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors reading or writing terrain records.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed terrain record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid terrain record: {reason}")]
    Invalid { reason: String },
}
