use std::time::Duration;

use semlink_frame::DEFAULT_MAX_PAYLOAD;
use semlink_transport::duration_ms;
use serde::{Deserialize, Serialize};

/// Client-side tuning knobs. Network addressing lives in [`semlink_transport::Endpoint`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Pause between busy-flag polls while settling.
    #[serde(rename = "settle_poll_interval_ms", with = "duration_ms")]
    pub settle_poll_interval: Duration,
    /// Upper bound for a single settle wait.
    #[serde(rename = "settle_timeout_ms", with = "duration_ms")]
    pub settle_timeout: Duration,
    /// Image collection deadline as a multiple of the command timeout.
    pub collect_timeout_factor: u32,
    /// Read deadline of one data-channel read; a quiet period this long ends
    /// the current message sequence.
    #[serde(rename = "data_read_timeout_ms", with = "duration_ms")]
    pub data_read_timeout: Duration,
    /// Largest frame body accepted on either connection.
    pub max_payload_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            settle_poll_interval: Duration::from_millis(50),
            settle_timeout: Duration::from_secs(30),
            collect_timeout_factor: 3,
            data_read_timeout: Duration::from_millis(250),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ClientConfig {
    /// Collection deadline for a given base command timeout.
    pub fn collect_timeout(&self, command_timeout: Duration) -> Duration {
        command_timeout.saturating_mul(self.collect_timeout_factor.max(1))
    }
}
