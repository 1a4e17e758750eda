use bytes::{Bytes, BytesMut};

use crate::codec::Frame;
use crate::commands::SC_DATA;
use crate::error::{FrameError, Result};
use crate::wire::{decode_i32, decode_u32, put_i32, put_u32, INT_SIZE};

/// Fixed part of an image chunk body: channel, offset, bpp, length.
pub const CHUNK_HEADER_SIZE: usize = 4 * INT_SIZE;

/// One offset-addressed slice of an image on one logical channel.
///
/// Body layout of an `ScData` message:
/// ```text
/// ┌────────────┬────────────┬────────────┬────────────┬───────────────┐
/// │ Channel    │ Offset     │ Bits/pixel │ Length     │ Payload       │
/// │ (i32 LE)   │ (u32 LE)   │ (i32 LE)   │ (u32 LE)   │ (Length B)    │
/// └────────────┴────────────┴────────────┴────────────┴───────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageChunk {
    pub channel: i32,
    pub offset: u32,
    pub bits_per_pixel: i32,
    pub payload: Bytes,
}

impl ImageChunk {
    /// Decode an image chunk from a data-channel frame.
    ///
    /// Returns `Ok(None)` for frames carrying another tag.
    pub fn from_frame(frame: &Frame) -> Result<Option<Self>> {
        if frame.name.as_str() != SC_DATA {
            return Ok(None);
        }
        Self::decode(&frame.payload).map(Some)
    }

    /// Decode an `ScData` body.
    ///
    /// The declared payload length must be present in full; trailing bytes
    /// after it are ignored.
    pub fn decode(body: &Bytes) -> Result<Self> {
        let mut cursor = 0;
        let channel = decode_i32(body, &mut cursor)?;
        let offset = decode_u32(body, &mut cursor)?;
        let bits_per_pixel = decode_i32(body, &mut cursor)?;
        let len = decode_u32(body, &mut cursor)? as usize;

        let remaining = body.len() - cursor;
        if remaining < len {
            return Err(FrameError::Truncated {
                needed: len,
                remaining,
            });
        }

        Ok(Self {
            channel,
            offset,
            bits_per_pixel,
            payload: body.slice(cursor..cursor + len),
        })
    }

    /// Encode the chunk body (used by simulators and tests).
    ///
    /// Fails when the payload length does not fit the 32-bit length field.
    pub fn encode(&self) -> Result<Bytes> {
        let len = length_field(self.payload.len())?;
        let mut buf = BytesMut::with_capacity(CHUNK_HEADER_SIZE + self.payload.len());
        put_i32(&mut buf, self.channel);
        put_u32(&mut buf, self.offset);
        put_i32(&mut buf, self.bits_per_pixel);
        put_u32(&mut buf, len);
        buf.extend_from_slice(&self.payload);
        Ok(buf.freeze())
    }
}

fn length_field(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| FrameError::PayloadTooLarge {
        size: len,
        max: u32::MAX as usize,
    })
}
