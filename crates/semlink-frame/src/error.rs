/// Errors that can occur during frame and primitive encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The command name is empty or contains non-ASCII / NUL bytes.
    #[error("invalid command name {0:?}")]
    InvalidName(String),

    /// The command name does not fit the fixed-width name field.
    #[error("command name {name:?} is {len} bytes (max {max})")]
    NameTooLong { name: String, len: usize, max: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Fewer bytes remain than the primitive being decoded requires.
    #[error("truncated value: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A string could not be encoded or decoded.
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// True when the error came from a socket read/write deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err) if matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
