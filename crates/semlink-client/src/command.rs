use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use bytes::Bytes;
use semlink_frame::{CommandName, FrameConfig, FrameError, FrameReader, FrameWriter, FLAG_RESPONSE};
use semlink_transport::SemStream;
use tracing::{debug, trace};

use crate::error::{ClientError, Result};

/// One request/response connection to the instrument.
///
/// The wire carries no correlation id, so responses are matched by send
/// order. When a request times out its response is still owed; the name is
/// remembered and the late frame is skipped when it finally arrives.
pub struct CommandChannel<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    timeout: Duration,
    owed: VecDeque<CommandName>,
}

impl<R: Read, W: Write> CommandChannel<R, W> {
    /// Wrap an already configured reader/writer pair.
    ///
    /// `timeout` bounds the wait for each whole response; the stream's own
    /// read timeout bounds each socket read within it.
    pub fn new(reader: FrameReader<R>, writer: FrameWriter<W>, timeout: Duration) -> Self {
        Self {
            reader,
            writer,
            timeout,
            owed: VecDeque::new(),
        }
    }

    /// Base command timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Responses still expected from requests that timed out.
    pub fn owed_responses(&self) -> usize {
        self.owed.len()
    }

    /// Send a command and return the response body.
    ///
    /// An empty body is a valid void response.
    pub fn send(&mut self, name: &str, body: &[u8]) -> Result<Bytes> {
        let name = command_name(name)?;
        debug!(command = %name, body_len = body.len(), "sending command");
        self.write(&name, FLAG_RESPONSE, body)?;

        match self.read_response(&name) {
            Err(err @ ClientError::Timeout { .. }) => {
                self.owed.push_back(name);
                Err(err)
            }
            other => other,
        }
    }

    /// Send a command with the response flag cleared. Nothing is read back.
    pub fn send_no_response(&mut self, name: &str, body: &[u8]) -> Result<()> {
        let name = command_name(name)?;
        debug!(command = %name, body_len = body.len(), "sending command without response");
        self.write(&name, 0, body)
    }

    fn write(&mut self, name: &CommandName, flags: u32, body: &[u8]) -> Result<()> {
        self.writer.send(name, flags, body).map_err(|err| match err {
            FrameError::PayloadTooLarge { size, max } => ClientError::InvalidCommand(format!(
                "{name}: body of {size} bytes exceeds {max}"
            )),
            // A frame cut off mid-write leaves the stream unusable.
            err if err.is_timeout() => {
                ClientError::ConnectionLost(format!("{name}: write timed out"))
            }
            other => ClientError::from_frame(other, name.as_str(), self.timeout),
        })
    }

    fn read_response(&mut self, name: &CommandName) -> Result<Bytes> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let frame = self
                .reader
                .read_frame_until(Some(deadline))
                .map_err(|err| match err {
                    // The bad header stays buffered; nothing after it can be framed.
                    err @ (FrameError::InvalidName(_) | FrameError::PayloadTooLarge { .. }) => {
                        ClientError::ConnectionLost(format!(
                            "{name}: response stream out of sync: {err}"
                        ))
                    }
                    other => ClientError::from_frame(other, name.as_str(), self.timeout),
                })?;

            // Responses arrive in send order, so anything owed before a
            // matching late response will never come.
            if let Some(pos) = self.owed.iter().position(|owed| *owed == frame.name) {
                let skipped = self.owed.drain(..=pos).count() - 1;
                debug!(command = %frame.name, skipped, "discarded late response");
                continue;
            }

            if frame.name != *name {
                return Err(ClientError::Decode(format!(
                    "received response for {} while waiting for {name}",
                    frame.name
                )));
            }

            trace!(command = %name, len = frame.payload.len(), "response received");
            return Ok(frame.payload);
        }
    }
}

impl CommandChannel<SemStream, SemStream> {
    /// Build a channel over a connected command socket.
    pub fn open(stream: SemStream, timeout: Duration, max_payload_size: usize) -> Result<Self> {
        let reader_stream = stream.try_clone()?;
        let frame_config = FrameConfig {
            max_payload_size,
            read_timeout: Some(timeout),
            write_timeout: Some(timeout),
        };

        let reader = FrameReader::with_config_stream(reader_stream, frame_config.clone())
            .map_err(|err| ClientError::from_frame(err, "configure command socket", timeout))?;
        let writer = FrameWriter::with_config_stream(stream, frame_config)
            .map_err(|err| ClientError::from_frame(err, "configure command socket", timeout))?;

        Ok(Self::new(reader, writer, timeout))
    }
}

fn command_name(name: &str) -> Result<CommandName> {
    CommandName::new(name).map_err(|err| ClientError::InvalidCommand(err.to_string()))
}
