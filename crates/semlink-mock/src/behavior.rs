//! Switchboard controlling how the simulated instrument answers.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// One scripted image chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChunk {
    pub channel: i32,
    pub offset: u32,
    pub len: usize,
    pub bits_per_pixel: i32,
}

impl PlannedChunk {
    /// An 8-bit chunk.
    pub fn new(channel: i32, offset: u32, len: usize) -> Self {
        Self {
            channel,
            offset,
            len,
            bits_per_pixel: 8,
        }
    }
}

/// What the data connection sends after a scan is triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkPlan {
    /// Every enabled channel, in order, cut into chunks of `chunk_size`
    /// bytes until `width * height` bytes are sent.
    Contiguous { chunk_size: usize },
    /// Exactly these chunks, whatever the scan size.
    Scripted(Vec<PlannedChunk>),
}

impl Default for ChunkPlan {
    fn default() -> Self {
        ChunkPlan::Contiguous { chunk_size: 16 * 1024 }
    }
}

/// Tunable behaviour of the mock instrument.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Reply to `TcpGetVersion`.
    pub version: String,
    /// Frame id returned by the next `ScScanXY`; negative rejects the scan.
    pub frame_id: i32,
    /// Busy-flag polls a state change stays busy for.
    pub busy_polls: u32,
    pub chunk_plan: ChunkPlan,
    /// Pause between image chunks.
    pub chunk_delay: Duration,
    /// Pause before every reply.
    pub response_delay: Duration,
    /// Extra pause before replies to specific commands.
    pub delays: HashMap<String, Duration>,
    /// Commands that are recorded but never answered.
    pub silent: HashSet<String>,
    /// Commands answered with a negative int32 code.
    pub failures: HashMap<String, i32>,
    /// Commands answered normally a number of times, then with a code.
    pub failures_after: HashMap<String, (u32, i32)>,
    /// Reply to `DtEnumDetectors`, one name per entry.
    pub detectors: Vec<String>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            version: "3.2.20".to_string(),
            frame_id: 1,
            busy_polls: 2,
            chunk_plan: ChunkPlan::default(),
            chunk_delay: Duration::ZERO,
            response_delay: Duration::ZERO,
            delays: HashMap::new(),
            silent: HashSet::new(),
            failures: HashMap::new(),
            failures_after: HashMap::new(),
            detectors: vec!["SE".to_string(), "BSE".to_string()],
        }
    }
}

impl MockBehavior {
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_chunk_plan(mut self, plan: ChunkPlan) -> Self {
        self.chunk_plan = plan;
        self
    }

    pub fn with_delay(mut self, command: &str, delay: Duration) -> Self {
        self.delays.insert(command.to_string(), delay);
        self
    }

    pub fn with_silent(mut self, command: &str) -> Self {
        self.silent.insert(command.to_string());
        self
    }

    pub fn with_failure(mut self, command: &str, code: i32) -> Self {
        self.failures.insert(command.to_string(), code);
        self
    }

    /// Answer the first `successes` calls of `command` normally and every
    /// later one with `code`.
    pub fn with_failure_after(mut self, command: &str, successes: u32, code: i32) -> Self {
        self.failures_after
            .insert(command.to_string(), (successes, code));
        self
    }

    /// Total pause before replying to `command`.
    pub(crate) fn delay_for(&self, command: &str) -> Duration {
        self.response_delay + self.delays.get(command).copied().unwrap_or_default()
    }
}

/// Deterministic pixel value at `offset` of `channel`'s image.
pub fn pixel(channel: i32, offset: usize) -> u8 {
    ((offset + channel.unsigned_abs() as usize * 7) % 251) as u8
}
