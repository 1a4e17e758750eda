use std::io::{ErrorKind, Read};
use std::time::Instant;

use bytes::BytesMut;
use semlink_transport::SemStream;
use tracing::trace;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 64 * 1024;
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// Bytes of a partially received frame survive a read timeout, so a later
/// call resumes where the previous one stopped.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached and
    /// `Err(FrameError::Io(_))` with `WouldBlock`/`TimedOut` when the read
    /// deadline elapses.
    pub fn read_frame(&mut self) -> Result<Frame> {
        self.read_frame_until(None)
    }

    /// Read the next frame, giving up once `deadline` has passed.
    ///
    /// The deadline is checked between socket reads, so a peer trickling
    /// bytes cannot stretch the call past it by more than one read timeout.
    /// Expiry is reported as `Io(TimedOut)` and partial bytes stay buffered.
    pub fn read_frame_until(&mut self, deadline: Option<Instant>) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                trace!(name = %frame.name, len = frame.payload.len(), "frame received");
                return Ok(frame);
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(FrameError::Io(std::io::Error::from(ErrorKind::TimedOut)));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Number of buffered bytes belonging to frames not yet returned.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl FrameReader<SemStream> {
    /// Create a frame reader for `SemStream` and apply read timeout from config.
    pub fn with_config_stream(inner: SemStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: semlink_transport::TransportError) -> FrameError {
    match err {
        semlink_transport::TransportError::Io(io) => FrameError::Io(io),
        semlink_transport::TransportError::Resolve { source, .. }
        | semlink_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
