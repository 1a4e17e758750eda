use std::fmt;
use std::io;

use semlink_client::ClientError;
use semlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
/// The instrument rejected the command or lacks the feature.
pub const COMMAND_FAILED: i32 = 2;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;
/// Interrupted by Ctrl-C.
pub const INTERRUPTED: i32 = 130;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => FAILURE,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    if err.is_timeout() {
        return CliError::new(TIMEOUT, format!("{context}: {err}"));
    }
    CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
}

pub fn client_error(context: &str, err: ClientError) -> CliError {
    let err = match err {
        ClientError::Transport(inner) => return transport_error(context, inner),
        other => other,
    };
    let code = match &err {
        ClientError::Transport(_) | ClientError::ConnectionLost(_) => TRANSPORT_ERROR,
        ClientError::Timeout { .. } => TIMEOUT,
        ClientError::CommandFailure { .. } | ClientError::UnsupportedOperation { .. } => {
            COMMAND_FAILED
        }
        ClientError::Decode(_) => DATA_INVALID,
        ClientError::InvalidCommand(_) | ClientError::InvalidRequest(_) => USAGE,
        ClientError::Cancelled => INTERRUPTED,
        ClientError::AcquisitionInProgress => FAILURE,
    };
    CliError::new(code, format!("{context}: {err}"))
}
