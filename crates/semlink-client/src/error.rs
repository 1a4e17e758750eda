use std::time::Duration;

use semlink_frame::FrameError;

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connecting to the instrument failed.
    #[error("transport error: {0}")]
    Transport(#[from] semlink_transport::TransportError),

    /// The socket closed or reset; the client is now disconnected.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A deadline elapsed. The connection stays usable.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// The instrument answered with an explicit error or negative result code.
    #[error("{command} failed with code {code}")]
    CommandFailure { command: String, code: i32 },

    /// A response was shorter than expected or a frame was malformed.
    #[error("decode error: {0}")]
    Decode(String),

    /// The instrument's protocol version lacks the requested feature.
    #[error("{operation} is not supported: {reason}")]
    UnsupportedOperation { operation: String, reason: String },

    /// The command name or body cannot be put on the wire.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// An acquisition request failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The operation was cancelled; the client is now disconnected.
    #[error("operation cancelled")]
    Cancelled,

    /// Another acquisition is already running on this client.
    #[error("an acquisition is already in progress")]
    AcquisitionInProgress,
}

impl ClientError {
    /// Errors after which the connection can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::ConnectionLost(_) | ClientError::Cancelled)
    }

    /// Map a frame-layer failure that happened during `operation`.
    pub(crate) fn from_frame(err: FrameError, operation: &str, timeout: Duration) -> Self {
        if err.is_timeout() {
            return ClientError::Timeout {
                operation: operation.to_string(),
                timeout,
            };
        }
        match err {
            FrameError::Io(io) => ClientError::ConnectionLost(format!("{operation}: {io}")),
            FrameError::ConnectionClosed => {
                ClientError::ConnectionLost(format!("{operation}: connection closed"))
            }
            FrameError::NameTooLong { .. } | FrameError::InvalidName(_) => {
                ClientError::Decode(format!("{operation}: {err}"))
            }
            other => ClientError::Decode(format!("{operation}: {other}")),
        }
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(io) => ClientError::ConnectionLost(io.to_string()),
            FrameError::ConnectionClosed => {
                ClientError::ConnectionLost("connection closed".to_string())
            }
            FrameError::NameTooLong { .. } | FrameError::InvalidString(_) => {
                ClientError::InvalidCommand(err.to_string())
            }
            other => ClientError::Decode(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
