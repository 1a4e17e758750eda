use std::time::Duration;

use semlink_frame::{Frame, FrameConfig, FrameReader};
use semlink_transport::{Endpoint, SemStream};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{ClientError, Result};

/// A source of framed data-channel messages.
pub trait MessageSource {
    /// Next message, or `Ok(None)` once the read deadline passes with
    /// nothing to deliver ("no more data for now").
    fn next_message(&mut self) -> Result<Option<Frame>>;
}

/// The streaming connection, opened on first use.
///
/// Bodies are not interpreted here; the channel only frames them.
pub struct DataChannel {
    endpoint: Endpoint,
    read_timeout: Duration,
    max_payload_size: usize,
    cancel: CancelToken,
    reader: Option<FrameReader<SemStream>>,
}

impl DataChannel {
    /// Create a closed channel. Nothing is connected until first use.
    pub fn new(
        endpoint: Endpoint,
        read_timeout: Duration,
        max_payload_size: usize,
        cancel: CancelToken,
    ) -> Self {
        Self {
            endpoint,
            read_timeout,
            max_payload_size,
            cancel,
            reader: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Open the connection if needed.
    ///
    /// Returns the local port when a new connection was made so the caller
    /// can register it with the instrument; `None` when already open.
    pub fn ensure_open(&mut self) -> Result<Option<u16>> {
        if self.reader.is_some() {
            return Ok(None);
        }
        self.cancel.check()?;

        let stream = self.endpoint.connect_data()?;
        self.cancel.register(&stream)?;
        let local_port = stream.local_addr()?.port();

        let config = FrameConfig {
            max_payload_size: self.max_payload_size,
            read_timeout: Some(self.read_timeout),
            write_timeout: None,
        };
        let reader = FrameReader::with_config_stream(stream, config)
            .map_err(|err| ClientError::from_frame(err, "configure data socket", self.read_timeout))?;
        self.reader = Some(reader);

        info!(local_port, "data channel open");
        Ok(Some(local_port))
    }

    /// Drop the connection. A later read reconnects.
    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            let _ = reader.get_ref().shutdown();
            debug!("data channel closed");
        }
    }

    /// Lazy sequence of messages, ending at the first quiet read deadline.
    ///
    /// Calling this again after the sequence ends restarts it.
    pub fn messages(&mut self) -> Messages<'_, Self> {
        Messages::new(self)
    }
}

impl MessageSource for DataChannel {
    fn next_message(&mut self) -> Result<Option<Frame>> {
        self.ensure_open()?;
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        match reader.read_frame() {
            Ok(frame) => Ok(Some(frame)),
            Err(err) if err.is_timeout() => Ok(None),
            Err(err) => {
                self.close();
                if self.cancel.is_cancelled() {
                    return Err(ClientError::Cancelled);
                }
                Err(ClientError::from_frame(err, "data channel read", self.read_timeout))
            }
        }
    }
}

/// Iterator over a [`MessageSource`].
///
/// Yields `Ok(frame)` per message and stops at the first read deadline; an
/// error is yielded once and ends the sequence.
pub struct Messages<'a, S: MessageSource + ?Sized> {
    source: &'a mut S,
    done: bool,
}

impl<'a, S: MessageSource + ?Sized> Messages<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        Self {
            source,
            done: false,
        }
    }
}

impl<S: MessageSource + ?Sized> Iterator for Messages<'_, S> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.source.next_message() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
