//! Simulated SEM instrument for tests and offline use.
//!
//! [`MockInstrument::spawn`] binds a command listener and a data listener on
//! loopback and serves both protocols on background threads. A
//! [`MockBehavior`] switchboard decides how it answers: parameter values,
//! busy-flag countdowns, rejected scans, scripted image chunk sequences,
//! delays and commands that never get a reply. Every command received is
//! recorded so tests can assert on traffic order.

mod behavior;
mod server;
mod state;

pub use behavior::{pixel, ChunkPlan, MockBehavior, PlannedChunk};
pub use server::{MockConfig, MockHandle, MockInstrument};
pub use state::{InstrumentState, RecordedCommand, UNKNOWN_COMMAND};
