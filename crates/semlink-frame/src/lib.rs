//! Command framing and primitive wire codec for the SEM control protocol.
//!
//! Every message on either instrument connection is framed with:
//! - A 16-byte ASCII command name, zero padded
//! - A 4-byte little-endian body length
//! - A 4-byte little-endian flags word
//! - 8 reserved bytes
//!
//! Bodies are concatenations of primitives encoded by [`wire`]. No partial
//! reads, no buffer management in user code.

pub mod codec;
pub mod commands;
pub mod error;
pub mod image;
pub mod reader;
pub mod wire;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, CommandName, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD,
    FLAG_RESPONSE, HEADER_SIZE, NAME_WIDTH,
};
pub use error::{FrameError, Result};
pub use image::{ImageChunk, CHUNK_HEADER_SIZE};
pub use reader::FrameReader;
pub use wire::{Args, WireReader};
pub use writer::FrameWriter;
