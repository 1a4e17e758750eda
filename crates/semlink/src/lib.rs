//! Remote control of scanning electron microscopes over the vendor TCP protocol.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP endpoints and streams for the command and data connections
//! - [`frame`]: Command-name framing and the primitive argument codec
//! - [`client`]: Typed instrument operations, settle waits and image acquisition
//! - [`mock`]: Simulated instrument for tests (behind `mock` feature)

/// Re-export transport types.
pub mod transport {
    pub use semlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use semlink_frame::*;
}

/// Re-export client types.
pub mod client {
    pub use semlink_client::*;
}

/// Re-export the simulated instrument (requires `mock` feature).
#[cfg(feature = "mock")]
pub mod mock {
    pub use semlink_mock::*;
}

pub use semlink_client::{
    AcquisitionRequest, CancelToken, ClientConfig, ClientError, Image, Roi, SemClient, Settle,
    StagePosition, WaitMask,
};
pub use semlink_transport::{DataPort, Endpoint};
