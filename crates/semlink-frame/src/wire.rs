//! Primitive wire codec.
//!
//! All integers are little-endian two's complement, floating values are
//! little-endian IEEE-754 binary64, and strings use a length-prefixed layout:
//!
//! ```text
//! ┌──────────────┬───────────────────────┬──────┬──────────────┐
//! │ Length (4B)  │ ASCII text            │ NUL  │ zero padding │
//! │ u32 LE = L   │                       │      │ to 4B bound  │
//! └──────────────┴───────────────────────┴──────┴──────────────┘
//!                 └──────────────── L bytes ────────────────────┘
//! ```
//!
//! Decoding takes the buffer and a mutable read cursor and fails with
//! [`FrameError::Truncated`] when fewer bytes remain than the value needs.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Encoded size of an int32 / uint32.
pub const INT_SIZE: usize = 4;

/// Encoded size of a float64.
pub const FLOAT_SIZE: usize = 8;

/// Strings are padded to a multiple of this many bytes.
pub const STRING_ALIGN: usize = 4;

/// Append an int32.
pub fn put_i32(dst: &mut BytesMut, value: i32) {
    dst.put_i32_le(value);
}

/// Append a uint32.
pub fn put_u32(dst: &mut BytesMut, value: u32) {
    dst.put_u32_le(value);
}

/// Append a float64.
pub fn put_f64(dst: &mut BytesMut, value: f64) {
    dst.put_f64_le(value);
}

/// Append a length-prefixed, NUL-terminated, 4-byte padded string.
pub fn put_str(dst: &mut BytesMut, value: &str) -> Result<()> {
    if !value.is_ascii() {
        return Err(FrameError::InvalidString(format!(
            "{value:?} is not ASCII"
        )));
    }
    if value.as_bytes().contains(&0) {
        return Err(FrameError::InvalidString(format!(
            "{value:?} contains a NUL byte"
        )));
    }

    let padded = padded_len(value.len());
    if padded > u32::MAX as usize {
        return Err(FrameError::InvalidString(format!(
            "string of {} bytes is too long",
            value.len()
        )));
    }

    dst.reserve(INT_SIZE + padded);
    dst.put_u32_le(padded as u32);
    dst.put_slice(value.as_bytes());
    dst.put_bytes(0, padded - value.len());
    Ok(())
}

/// Encoded body length of a string of `text_len` bytes (excluding the prefix).
pub fn padded_len(text_len: usize) -> usize {
    (text_len + 1).div_ceil(STRING_ALIGN) * STRING_ALIGN
}

fn take<'a>(buf: &'a [u8], cursor: &mut usize, needed: usize) -> Result<&'a [u8]> {
    let remaining = buf.len().saturating_sub(*cursor);
    if remaining < needed {
        return Err(FrameError::Truncated { needed, remaining });
    }
    let slice = &buf[*cursor..*cursor + needed];
    *cursor += needed;
    Ok(slice)
}

/// Decode an int32 at `cursor`, advancing it.
pub fn decode_i32(buf: &[u8], cursor: &mut usize) -> Result<i32> {
    let bytes = take(buf, cursor, INT_SIZE)?;
    let mut raw = [0u8; INT_SIZE];
    raw.copy_from_slice(bytes);
    Ok(i32::from_le_bytes(raw))
}

/// Decode a uint32 at `cursor`, advancing it.
pub fn decode_u32(buf: &[u8], cursor: &mut usize) -> Result<u32> {
    let bytes = take(buf, cursor, INT_SIZE)?;
    let mut raw = [0u8; INT_SIZE];
    raw.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(raw))
}

/// Decode a float64 at `cursor`, advancing it.
pub fn decode_f64(buf: &[u8], cursor: &mut usize) -> Result<f64> {
    let bytes = take(buf, cursor, FLOAT_SIZE)?;
    let mut raw = [0u8; FLOAT_SIZE];
    raw.copy_from_slice(bytes);
    Ok(f64::from_le_bytes(raw))
}

/// Decode a string at `cursor`, advancing past its padding.
pub fn decode_str(buf: &[u8], cursor: &mut usize) -> Result<String> {
    let start = *cursor;
    let len = decode_u32(buf, cursor)? as usize;
    let body = match take(buf, cursor, len) {
        Ok(body) => body,
        Err(err) => {
            *cursor = start;
            return Err(err);
        }
    };

    let text = match body.iter().position(|&b| b == 0) {
        Some(nul) => &body[..nul],
        None => body,
    };
    if !text.is_ascii() {
        *cursor = start;
        return Err(FrameError::InvalidString(
            "decoded string is not ASCII".to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(text).into_owned())
}

/// Cursor over a response body.
///
/// Thin convenience over the free decode functions for call sites that read
/// several values in a row.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn i32(&mut self) -> Result<i32> {
        decode_i32(self.buf, &mut self.pos)
    }

    pub fn u32(&mut self) -> Result<u32> {
        decode_u32(self.buf, &mut self.pos)
    }

    pub fn f64(&mut self) -> Result<f64> {
        decode_f64(self.buf, &mut self.pos)
    }

    pub fn string(&mut self) -> Result<String> {
        decode_str(self.buf, &mut self.pos)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The unread tail of the buffer.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Builder for a command argument body.
///
/// ```
/// use semlink_frame::Args;
///
/// let body = Args::new().int(3).float(12.5).finish();
/// assert_eq!(body.len(), 12);
/// ```
#[derive(Debug, Default, Clone)]
pub struct Args {
    buf: BytesMut,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn int(mut self, value: i32) -> Self {
        put_i32(&mut self.buf, value);
        self
    }

    pub fn uint(mut self, value: u32) -> Self {
        put_u32(&mut self.buf, value);
        self
    }

    pub fn float(mut self, value: f64) -> Self {
        put_f64(&mut self.buf, value);
        self
    }

    /// Append a string; fails on non-ASCII or NUL-containing text.
    pub fn string(mut self, value: &str) -> Result<Self> {
        put_str(&mut self.buf, value)?;
        Ok(self)
    }

    /// Append already encoded bytes.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.put_slice(bytes);
        self
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn int32_roundtrip_property() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut values = vec![0, 1, -1, i32::MIN, i32::MAX, i32::MIN + 1, i32::MAX - 1];
        values.extend((0..2048).map(|_| rng.gen::<i32>()));

        for value in values {
            let mut buf = BytesMut::new();
            put_i32(&mut buf, value);
            assert_eq!(buf.len(), INT_SIZE);
            let mut cursor = 0;
            assert_eq!(decode_i32(&buf, &mut cursor).unwrap(), value);
            assert_eq!(cursor, INT_SIZE);
        }
    }

    #[test]
    fn float64_roundtrip_property() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut values = vec![
            0.0,
            -0.0,
            1.0,
            -1.5,
            f64::MIN,
            f64::MAX,
            f64::MIN_POSITIVE,
            f64::EPSILON,
            f64::INFINITY,
            f64::NEG_INFINITY,
            30_000.0,
        ];
        values.extend(
            (0..2048)
                .map(|_| f64::from_bits(rng.gen::<u64>()))
                .filter(|v| !v.is_nan()),
        );

        for value in values {
            let mut buf = BytesMut::new();
            put_f64(&mut buf, value);
            let mut cursor = 0;
            let decoded = decode_f64(&buf, &mut cursor).unwrap();
            assert_eq!(decoded.to_bits(), value.to_bits());
        }
    }

    #[test]
    fn string_roundtrip_property() {
        let mut rng = StdRng::seed_from_u64(23);
        let mut values: Vec<String> = vec![
            String::new(),
            "a".into(),
            "abc".into(),
            "abcd".into(),
            "SE".into(),
            "Tescan VEGA 3.2.0".into(),
        ];
        for _ in 0..256 {
            let len = rng.gen_range(0..40);
            let text: String = (0..len)
                .map(|_| char::from(rng.gen_range(0x20u8..0x7F)))
                .collect();
            values.push(text);
        }

        for value in values {
            let mut buf = BytesMut::new();
            put_str(&mut buf, &value).unwrap();
            assert_eq!(buf.len() % STRING_ALIGN, 0);
            let mut cursor = 0;
            assert_eq!(decode_str(&buf, &mut cursor).unwrap(), value);
            assert_eq!(cursor, buf.len());
        }
    }

    #[test]
    fn string_layout_is_padded_with_terminator() {
        let mut buf = BytesMut::new();
        put_str(&mut buf, "abc").unwrap();
        assert_eq!(buf.as_ref(), &[4, 0, 0, 0, b'a', b'b', b'c', 0]);

        let mut buf = BytesMut::new();
        put_str(&mut buf, "abcd").unwrap();
        assert_eq!(&buf[..4], &[8, 0, 0, 0]);
        assert_eq!(&buf[4..], b"abcd\0\0\0\0");
    }

    #[test]
    fn encode_rejects_unrepresentable_strings() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            put_str(&mut buf, "a\0b"),
            Err(FrameError::InvalidString(_))
        ));
        assert!(matches!(
            put_str(&mut buf, "µm"),
            Err(FrameError::InvalidString(_))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_short_buffers_fail_with_truncated() {
        let mut cursor = 0;
        assert!(matches!(
            decode_i32(&[1, 2, 3], &mut cursor),
            Err(FrameError::Truncated {
                needed: 4,
                remaining: 3
            })
        ));
        assert_eq!(cursor, 0);

        let mut cursor = 2;
        assert!(matches!(
            decode_f64(&[0; 8], &mut cursor),
            Err(FrameError::Truncated {
                needed: 8,
                remaining: 6
            })
        ));

        // Length prefix promises 8 bytes but only 4 follow.
        let mut cursor = 0;
        let short = [8, 0, 0, 0, b'a', b'b', 0, 0];
        assert!(matches!(
            decode_str(&short, &mut cursor),
            Err(FrameError::Truncated { .. })
        ));
        assert_eq!(cursor, 0);
    }

    #[test]
    fn reader_walks_mixed_body() {
        let body = Args::new()
            .int(-7)
            .float(2.25)
            .string("ok")
            .unwrap()
            .uint(65_536)
            .finish();

        let mut reader = WireReader::new(&body);
        assert_eq!(reader.i32().unwrap(), -7);
        assert_eq!(reader.f64().unwrap(), 2.25);
        assert_eq!(reader.string().unwrap(), "ok");
        assert_eq!(reader.u32().unwrap(), 65_536);
        assert_eq!(reader.remaining(), 0);
        assert!(reader.i32().is_err());
    }
}
