//! Simulated instrument state and command handling.

use std::collections::HashMap;

use bytes::Bytes;
use semlink_frame::commands::*;
use semlink_frame::{Args, WireReader};
use tracing::debug;

use crate::behavior::{ChunkPlan, MockBehavior, PlannedChunk};

const OPTICS: u32 = 0x01;
const AUTO: u32 = 0x02;
const STAGE: u32 = 0x04;
const VACUUM: u32 = 0x08;
const SCAN: u32 = 0x10;

/// Result code for commands the mock does not implement.
pub const UNKNOWN_COMMAND: i32 = -1;

/// A command as it arrived on the command connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    pub name: String,
    pub body: Vec<u8>,
    pub wants_response: bool,
}

impl RecordedCommand {
    /// First int32 argument, if any.
    pub fn int_arg(&self) -> Option<i32> {
        WireReader::new(&self.body).i32().ok()
    }
}

/// Instrument parameters as the mock sees them.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentState {
    pub high_voltage: f64,
    pub beam_on: bool,
    pub working_distance: f64,
    pub view_field: f64,
    pub beam_current: f64,
    /// x, y, z, rotation, tilt.
    pub stage: [f64; 5],
    pub vacuum: i32,
    pub gui_scanning: bool,
    pub scan_speed: i32,
    pub accumulation: i32,
    pub enabled_channels: Vec<i32>,
    pub busy: u32,
    pub registered_data_port: Option<u16>,
    pub scans: u32,
    /// Image chunks written to the data connection.
    pub chunks_streamed: u32,
    pub(crate) busy_polls_left: u32,
    pub(crate) calls: HashMap<String, u32>,
}

impl Default for InstrumentState {
    fn default() -> Self {
        Self {
            high_voltage: 15_000.0,
            beam_on: false,
            working_distance: 10.0,
            view_field: 0.5,
            beam_current: 100.0,
            stage: [0.0; 5],
            vacuum: 0,
            gui_scanning: true,
            scan_speed: 5,
            accumulation: 1,
            enabled_channels: Vec::new(),
            busy: 0,
            registered_data_port: None,
            scans: 0,
            chunks_streamed: 0,
            busy_polls_left: 0,
            calls: HashMap::new(),
        }
    }
}

/// Image chunks to stream after a scan trigger.
#[derive(Debug, Clone)]
pub(crate) struct ScanJob {
    pub(crate) chunks: Vec<PlannedChunk>,
}

/// How to answer one command.
#[derive(Debug)]
pub(crate) struct Reply {
    /// `None` keeps the instrument silent.
    pub(crate) body: Option<Bytes>,
    pub(crate) scan: Option<ScanJob>,
}

impl Reply {
    fn body(body: Bytes) -> Self {
        Self {
            body: Some(body),
            scan: None,
        }
    }

    fn empty() -> Self {
        Self::body(Bytes::new())
    }

    fn int(value: i32) -> Self {
        Self::body(Args::new().int(value).finish())
    }

    fn float(value: f64) -> Self {
        Self::body(Args::new().float(value).finish())
    }

    fn string(value: &str) -> Self {
        match Args::new().string(value) {
            Ok(args) => Self::body(args.finish()),
            Err(_) => Self::int(UNKNOWN_COMMAND),
        }
    }
}

impl InstrumentState {
    fn start_busy(&mut self, bits: u32, behavior: &MockBehavior) {
        if behavior.busy_polls > 0 {
            self.busy |= bits;
            self.busy_polls_left = behavior.busy_polls;
        }
    }

    /// Apply a command and build its reply.
    pub(crate) fn dispatch(&mut self, behavior: &MockBehavior, name: &str, body: &[u8]) -> Reply {
        let calls = {
            let count = self.calls.entry(name.to_string()).or_default();
            *count += 1;
            *count
        };

        if behavior.silent.contains(name) {
            debug!(command = name, "staying silent");
            return Reply {
                body: None,
                scan: None,
            };
        }
        if let Some(&code) = behavior.failures.get(name) {
            return Reply::int(code);
        }
        if let Some(&(successes, code)) = behavior.failures_after.get(name) {
            if calls > successes {
                return Reply::int(code);
            }
        }

        let mut args = WireReader::new(body);
        let mut float = || args.f64().unwrap_or_default();

        match name {
            TCP_GET_VERSION => Reply::string(&behavior.version),
            TCP_REG_DATA_PORT => {
                let port = WireReader::new(body).i32().unwrap_or_default();
                self.registered_data_port = u16::try_from(port).ok();
                Reply::empty()
            }

            HV_GET_VOLTAGE => Reply::float(self.high_voltage),
            HV_SET_VOLTAGE => {
                self.high_voltage = float();
                self.start_busy(OPTICS, behavior);
                Reply::empty()
            }
            HV_BEAM_ON | HV_BEAM_OFF => {
                self.beam_on = name == HV_BEAM_ON;
                self.start_busy(OPTICS, behavior);
                Reply::empty()
            }
            HV_GET_BEAM => Reply::int(i32::from(self.beam_on)),

            GET_WD => Reply::float(self.working_distance),
            SET_WD => {
                self.working_distance = float();
                self.start_busy(OPTICS, behavior);
                Reply::empty()
            }
            GET_VIEW_FIELD => Reply::float(self.view_field),
            SET_VIEW_FIELD => {
                self.view_field = float();
                self.start_busy(OPTICS, behavior);
                Reply::empty()
            }
            GET_BEAM_CURRENT => Reply::float(self.beam_current),
            SET_BEAM_CURRENT => {
                self.beam_current = float();
                self.start_busy(OPTICS, behavior);
                Reply::empty()
            }
            AUTO_WD => {
                self.start_busy(OPTICS | AUTO, behavior);
                Reply::empty()
            }

            STG_GET_POSITION => {
                let mut reply = Args::new();
                for value in self.stage {
                    reply = reply.float(value);
                }
                Reply::body(reply.finish())
            }
            STG_MOVE_TO => {
                for axis in self.stage.iter_mut() {
                    *axis = float();
                }
                self.start_busy(STAGE, behavior);
                Reply::empty()
            }
            STG_IS_BUSY => Reply::int(i32::from(self.busy & STAGE != 0)),
            STG_STOP => {
                self.busy &= !STAGE;
                Reply::empty()
            }

            VAC_GET_STATUS => Reply::int(self.vacuum),
            VAC_PUMP => {
                self.vacuum = 0;
                self.start_busy(VACUUM, behavior);
                Reply::empty()
            }
            VAC_VENT => {
                self.vacuum = 3;
                self.start_busy(VACUUM, behavior);
                Reply::empty()
            }

            DT_ENUM_DETECTORS => Reply::string(&behavior.detectors.join("\n")),
            DT_ENABLE => {
                let mut r = WireReader::new(body);
                let channel = r.i32().unwrap_or_default();
                let enable = r.i32().unwrap_or_default();
                self.enabled_channels.retain(|c| *c != channel);
                if enable != 0 {
                    self.enabled_channels.push(channel);
                }
                Reply::empty()
            }

            SC_SET_SPEED => {
                self.scan_speed = WireReader::new(body).i32().unwrap_or_default();
                self.start_busy(SCAN, behavior);
                Reply::empty()
            }
            SC_SET_ACCUM => {
                self.accumulation = WireReader::new(body).i32().unwrap_or_default();
                self.start_busy(SCAN, behavior);
                Reply::empty()
            }
            SC_STOP_SCAN => {
                self.busy &= !SCAN;
                Reply::empty()
            }
            SC_SCAN_XY => self.trigger_scan(behavior, body),
            GUI_SET_SCANNING => {
                self.gui_scanning = WireReader::new(body).i32().unwrap_or_default() != 0;
                Reply::empty()
            }

            GET_BUSY_FLAGS => {
                let mask = WireReader::new(body).i32().unwrap_or(-1) as u32;
                if self.busy_polls_left > 0 {
                    self.busy_polls_left -= 1;
                } else {
                    self.busy = 0;
                }
                Reply::int((self.busy & mask) as i32)
            }

            other => {
                debug!(command = other, "unknown command");
                Reply::int(UNKNOWN_COMMAND)
            }
        }
    }

    fn trigger_scan(&mut self, behavior: &MockBehavior, body: &[u8]) -> Reply {
        if behavior.frame_id < 0 {
            return Reply::int(behavior.frame_id);
        }

        let mut r = WireReader::new(body);
        let width = r.i32().unwrap_or_default().max(0) as usize;
        let height = r.i32().unwrap_or_default().max(0) as usize;
        let frame_id = behavior.frame_id + self.scans as i32;
        self.scans += 1;

        let chunks = match &behavior.chunk_plan {
            ChunkPlan::Scripted(chunks) => chunks.clone(),
            ChunkPlan::Contiguous { chunk_size } => {
                let total = width * height;
                let step = (*chunk_size).max(1);
                let mut chunks = Vec::new();
                for &channel in &self.enabled_channels {
                    let mut offset = 0;
                    while offset < total {
                        let len = step.min(total - offset);
                        chunks.push(PlannedChunk::new(channel, offset as u32, len));
                        offset += len;
                    }
                }
                chunks
            }
        };

        debug!(frame_id, width, height, chunks = chunks.len(), "scan triggered");
        Reply {
            body: Some(Args::new().int(frame_id).finish()),
            scan: Some(ScanJob { chunks }),
        }
    }
}
