use std::collections::BTreeMap;
use std::time::Duration;

use semlink_frame::{Frame, ImageChunk};
use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::data::MessageSource;
use crate::error::Result;

/// The only pixel depth reassembled.
pub const BITS_PER_PIXEL: i32 = 8;

/// What happened to one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Bytes were copied. `restarted` is set when the chunk rewound the
    /// channel to an earlier offset.
    Copied {
        offset: usize,
        len: usize,
        restarted: bool,
    },
    /// The chunk starts past the received count and was dropped.
    Gap { offset: usize, received: usize },
    /// Background traffic for a channel that was not requested.
    UnrequestedChannel(i32),
    /// Pixel depth other than 8 bits.
    UnsupportedDepth(i32),
}

/// Fixed-size buffer for one channel plus its received count.
///
/// `received <= len()` always holds and the buffer never grows.
#[derive(Debug, Clone)]
pub struct ChannelAccumulator {
    buf: Vec<u8>,
    received: usize,
    written: usize,
}

impl ChannelAccumulator {
    pub fn new(len: usize) -> Self {
        Self {
            buf: vec![0; len],
            received: 0,
            written: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Contiguous bytes received from offset 0.
    pub fn received(&self) -> usize {
        self.received
    }

    /// Total bytes ever copied in, counting rewritten ranges again.
    pub fn bytes_written(&self) -> usize {
        self.written
    }

    pub fn is_complete(&self) -> bool {
        self.received >= self.buf.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Apply one chunk at `offset`.
    pub fn apply(&mut self, offset: usize, payload: &[u8]) -> ChunkOutcome {
        let restarted = offset < self.received;
        if restarted {
            self.received = offset;
        }
        if offset > self.received {
            return ChunkOutcome::Gap {
                offset,
                received: self.received,
            };
        }

        let len = payload.len().min(self.buf.len() - offset);
        self.buf[offset..offset + len].copy_from_slice(&payload[..len]);
        self.received = offset + len;
        self.written += len;

        ChunkOutcome::Copied {
            offset,
            len,
            restarted,
        }
    }
}

/// How a collection run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    Complete,
    TimedOut,
}

/// Rebuilds one image buffer per requested channel from data messages.
#[derive(Debug)]
pub struct Reassembler {
    expected: usize,
    channels: BTreeMap<i32, ChannelAccumulator>,
}

impl Reassembler {
    /// One accumulator of `expected` bytes per channel id.
    pub fn new(channels: &[i32], expected: usize) -> Self {
        Self {
            expected,
            channels: channels
                .iter()
                .map(|&id| (id, ChannelAccumulator::new(expected)))
                .collect(),
        }
    }

    /// Expected byte count per channel.
    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn channel(&self, id: i32) -> Option<&ChannelAccumulator> {
        self.channels.get(&id)
    }

    /// Every requested channel reached its expected byte count.
    pub fn is_complete(&self) -> bool {
        self.channels.values().all(ChannelAccumulator::is_complete)
    }

    pub fn feed(&mut self, chunk: &ImageChunk) -> ChunkOutcome {
        let Some(acc) = self.channels.get_mut(&chunk.channel) else {
            trace!(channel = chunk.channel, "chunk for unrequested channel dropped");
            return ChunkOutcome::UnrequestedChannel(chunk.channel);
        };
        if chunk.bits_per_pixel != BITS_PER_PIXEL {
            trace!(
                channel = chunk.channel,
                bpp = chunk.bits_per_pixel,
                "chunk with unsupported depth dropped"
            );
            return ChunkOutcome::UnsupportedDepth(chunk.bits_per_pixel);
        }

        let outcome = acc.apply(chunk.offset as usize, &chunk.payload);
        match outcome {
            ChunkOutcome::Gap { offset, received } => {
                warn!(channel = chunk.channel, offset, received, "out of sequence chunk dropped");
            }
            ChunkOutcome::Copied {
                offset,
                len,
                restarted: true,
            } => {
                debug!(channel = chunk.channel, offset, len, "channel stream restarted");
            }
            _ => {}
        }
        outcome
    }

    /// Feed a data message. Messages with another tag return `Ok(None)`;
    /// a malformed image chunk is an error.
    pub fn feed_frame(&mut self, frame: &Frame) -> Result<Option<ChunkOutcome>> {
        Ok(ImageChunk::from_frame(frame)?.map(|chunk| self.feed(&chunk)))
    }

    /// Drain `source` until every channel is complete or `timeout` elapses.
    ///
    /// A timeout is not an error: incomplete channels keep what they have.
    pub fn collect<S: MessageSource + ?Sized>(
        &mut self,
        source: &mut S,
        clock: &dyn Clock,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<CollectOutcome> {
        let deadline = clock.now() + timeout;
        loop {
            if self.is_complete() {
                debug!(channels = self.channels.len(), "all channels complete");
                return Ok(CollectOutcome::Complete);
            }
            cancel.check()?;
            if clock.now() >= deadline {
                let received: Vec<(i32, usize)> = self
                    .channels
                    .iter()
                    .map(|(id, acc)| (*id, acc.received()))
                    .collect();
                warn!(?received, expected = self.expected, ?timeout, "image collection timed out");
                return Ok(CollectOutcome::TimedOut);
            }

            if let Some(frame) = source.next_message()? {
                self.feed_frame(&frame)?;
            }
        }
    }

    /// Consume the reassembler, yielding accumulators by channel id.
    pub fn into_channels(self) -> BTreeMap<i32, ChannelAccumulator> {
        self.channels
    }
}
