//! TCP transport for the SEM remote-control protocol.
//!
//! The instrument speaks over two independent TCP connections:
//! - a command connection for request/response control traffic
//! - a data connection for unsolicited streamed payloads
//!
//! This is the lowest layer of semlink. Everything else builds on top of
//! the [`SemStream`] and [`Endpoint`] types provided here.

pub mod endpoint;
pub mod error;
pub mod stream;

pub use endpoint::{duration_ms, DataPort, Endpoint, DEFAULT_COMMAND_PORT, DEFAULT_DATA_PORT_OFFSET};
pub use error::{Result, TransportError};
pub use stream::SemStream;
