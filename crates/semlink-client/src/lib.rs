//! Protocol client for SEM remote control.
//!
//! A [`SemClient`] owns one command connection for request/response control
//! and one data connection, opened on first use, that streams image chunks.
//! State-changing commands can block until the instrument reports the
//! affected subsystems idle, and [`SemClient::acquire_images`] drives a full
//! scan from channel setup to reassembled images.

pub mod cancel;
pub mod client;
pub mod clock;
pub mod command;
pub mod config;
pub mod data;
pub mod error;
pub mod ops;
pub mod reassembly;
pub mod scan;
pub mod settle;

pub use cancel::CancelToken;
pub use client::{SemClient, SemClientBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::CommandChannel;
pub use config::ClientConfig;
pub use data::{DataChannel, MessageSource, Messages};
pub use error::{ClientError, Result};
pub use ops::{ProtocolVersion, Settle, StagePosition, VacuumState};
pub use reassembly::{ChannelAccumulator, ChunkOutcome, CollectOutcome, Reassembler, BITS_PER_PIXEL};
pub use scan::{AcquisitionRequest, Image, Roi};
pub use settle::{BusyProbe, SettleWaiter, WaitMask};
