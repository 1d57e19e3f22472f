/// Error types for the command path
///
/// `ConnError` belongs to the transport; `CommandError` is what callers of
/// `CommandClient` and `ServoRig` see.

use thiserror::Error;

/// Transport-layer failures raised by `Connection`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnError {
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("timed out waiting for the controller")]
    Timeout,
    #[error("not connected")]
    NotConnected,
    #[error("connection broken: {0}")]
    Broken(String),
}

/// Protocol and semantic failures raised by `CommandClient`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("angle {0} outside 0..=180")]
    InvalidAngle(i32),
    #[error("logical channel {channel} outside 0..{count}")]
    InvalidChannel { channel: usize, count: usize },
    #[error("expected {expected} angles, got {got}")]
    AngleCount { expected: usize, got: usize },
    #[error("unknown preset '{0}'")]
    UnknownPreset(String),
    #[error("unknown expression '{0}'")]
    UnknownExpression(String),
    #[error("unknown display mode '{0}'")]
    UnknownMode(String),
    #[error(transparent)]
    Transport(#[from] ConnError),
    #[error("controller rejected command (reply: {0:?})")]
    Rejected(String),
    #[error("command worker has stopped")]
    Stopped,
}
