//! Error taxonomy for catalog operations.

use mongodb::error::ErrorKind;

/// Errors raised while running catalog operations.
///
/// Zero-match results (an update or delete touching nothing, a find returning
/// no documents) are never represented here; they are valid outcomes.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The deployment could not be reached or refused the credentials.
    #[error("connection error during {operation}: {message}")]
    Connection {
        operation: &'static str,
        message: String,
    },

    /// The operation did not complete within the configured bound.
    #[error("{operation} timed out after {secs} seconds")]
    Timeout { operation: &'static str, secs: u64 },

    /// The server rejected the command (malformed filter, bad pipeline, ...).
    #[error("{operation} failed: {message}")]
    Command {
        operation: &'static str,
        message: String,
    },

    /// A caller-supplied argument was rejected before reaching the server.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown report '{name}'. Available: {available}")]
    UnknownReport { name: String, available: String },

    #[error("failed to write report output: {0}")]
    Output(#[from] std::io::Error),
}

impl RunnerError {
    /// Classify a driver error raised by `operation`.
    pub fn from_driver(operation: &'static str, err: mongodb::error::Error) -> Self {
        let message = err.to_string();
        match err.kind.as_ref() {
            ErrorKind::Authentication { .. }
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. } => Self::Connection { operation, message },
            _ => Self::Command { operation, message },
        }
    }

    /// Connection-level failures; everything else is a command-level failure.
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Label used when a run is aborted.
    pub const fn kind_label(&self) -> &'static str {
        if self.is_connection() {
            "connection"
        } else {
            "command"
        }
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
