use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Width of the zero-padded command-name field.
pub const NAME_WIDTH: usize = 16;

/// Frame header: name (16) + body length (4) + flags (4) + reserved (8) = 32 bytes.
pub const HEADER_SIZE: usize = 32;

/// Header flag asking the instrument to send a response.
pub const FLAG_RESPONSE: u32 = 0x0001;

/// Default maximum body size: 64 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

const RESERVED_SIZE: usize = 8;

/// A validated command name that fits the fixed-width name field.
///
/// Construction fails instead of truncating: an over-long name is a
/// programming error and must never reach the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandName(String);

impl CommandName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() || !name.is_ascii() || name.as_bytes().contains(&0) {
            return Err(FrameError::InvalidName(name.to_string()));
        }
        if name.len() > NAME_WIDTH {
            return Err(FrameError::NameTooLong {
                name: name.to_string(),
                len: name.len(),
                max: NAME_WIDTH,
            });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The zero-padded wire field.
    pub fn to_field(&self) -> [u8; NAME_WIDTH] {
        let mut field = [0u8; NAME_WIDTH];
        field[..self.0.len()].copy_from_slice(self.0.as_bytes());
        field
    }

    fn from_field(field: &[u8]) -> Result<Self> {
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let name = std::str::from_utf8(&field[..end])
            .map_err(|_| FrameError::InvalidName(String::from_utf8_lossy(field).into_owned()))?;
        Self::new(name)
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for CommandName {
    type Error = FrameError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

/// A framed message: command name tag, header flags and body.
///
/// Used for outgoing commands, command responses and data-channel
/// messages alike; only the interpretation of the body differs.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The command name this message belongs to.
    pub name: CommandName,
    /// Header flags.
    pub flags: u32,
    /// The message body.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(name: CommandName, flags: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            name,
            flags,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + body).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Whether the sender asked for a response.
    pub fn wants_response(&self) -> bool {
        self.flags & FLAG_RESPONSE != 0
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────────┬───────────┬──────────┬────────────┬──────────────────┐
/// │ Name (16B)     │ Body len  │ Flags    │ Reserved   │ Body             │
/// │ ASCII, 0-pad   │ (4B LE)   │ (4B LE)  │ (8B zero)  │ (Body len bytes) │
/// └────────────────┴───────────┴──────────┴────────────┴──────────────────┘
/// ```
pub fn encode_frame(name: &CommandName, flags: u32, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&name.to_field());
    dst.put_u32_le(payload.len() as u32);
    dst.put_u32_le(flags);
    dst.put_bytes(0, RESERVED_SIZE);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let name = CommandName::from_field(&src[..NAME_WIDTH])?;
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&src[NAME_WIDTH..NAME_WIDTH + 4]);
    let payload_len = u32::from_le_bytes(len_bytes) as usize;
    let mut flag_bytes = [0u8; 4];
    flag_bytes.copy_from_slice(&src[NAME_WIDTH + 4..NAME_WIDTH + 8]);
    let flags = u32::from_le_bytes(flag_bytes);

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame {
        name,
        flags,
        payload,
    }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body size in bytes. Default: 64 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
