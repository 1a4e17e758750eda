//! Typed instrument operations.
//!
//! Each operation is one command exchange, optionally followed by a settle
//! wait on the subsystems the command affects.

use std::fmt;

use bytes::Bytes;
use semlink_frame::commands::*;
use semlink_frame::{Args, WireReader};
use serde::{Deserialize, Serialize};

use crate::client::SemClient;
use crate::error::{ClientError, Result};
use crate::settle::WaitMask;

/// How a setter completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Settle {
    /// Read the acknowledgement, then block until the affected subsystems
    /// report idle.
    #[default]
    Wait,
    /// Fire and forget: no response is requested and nothing is awaited.
    NoWait,
}

/// Protocol version announced by the instrument, e.g. `3.2.20`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub raw: String,
}

impl ProtocolVersion {
    /// Parse the first `major[.minor]` group in `text`.
    pub fn parse(text: &str) -> Option<Self> {
        let start = text.find(|c: char| c.is_ascii_digit())?;
        let numeric: String = text[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let mut parts = numeric.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts
            .next()
            .filter(|part| !part.is_empty())
            .map(str::parse::<u32>)
            .transpose()
            .ok()?
            .unwrap_or(0);

        Some(Self {
            major,
            minor,
            raw: text.trim().to_string(),
        })
    }

    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Stage coordinates: x, y, z in mm; rotation and tilt in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StagePosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rotation: f64,
    pub tilt: f64,
}

impl StagePosition {
    fn to_args(self) -> Bytes {
        Args::new()
            .float(self.x)
            .float(self.y)
            .float(self.z)
            .float(self.rotation)
            .float(self.tilt)
            .finish()
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(body);
        Ok(Self {
            x: r.f64()?,
            y: r.f64()?,
            z: r.f64()?,
            rotation: r.f64()?,
            tilt: r.f64()?,
        })
    }
}

/// Chamber vacuum state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VacuumState {
    Ready,
    Pumping,
    Venting,
    Vented,
    Error,
    Unknown(i32),
}

impl From<i32> for VacuumState {
    fn from(code: i32) -> Self {
        match code {
            0 => VacuumState::Ready,
            1 => VacuumState::Pumping,
            2 => VacuumState::Venting,
            3 => VacuumState::Vented,
            -1 => VacuumState::Error,
            other => VacuumState::Unknown(other),
        }
    }
}

impl fmt::Display for VacuumState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VacuumState::Ready => f.write_str("ready"),
            VacuumState::Pumping => f.write_str("pumping"),
            VacuumState::Venting => f.write_str("venting"),
            VacuumState::Vented => f.write_str("vented"),
            VacuumState::Error => f.write_str("error"),
            VacuumState::Unknown(code) => write!(f, "unknown ({code})"),
        }
    }
}

/// Fail with `CommandFailure` when a response body carries a negative code.
pub(crate) fn check_status(command: &str, body: &[u8]) -> Result<()> {
    if body.len() >= 4 {
        let code = WireReader::new(body).i32()?;
        if code < 0 {
            return Err(ClientError::CommandFailure {
                command: command.to_string(),
                code,
            });
        }
    }
    Ok(())
}

impl SemClient {
    fn query_f64(&self, command: &str) -> Result<f64> {
        let body = self.send(command, &[])?;
        Ok(WireReader::new(&body).f64()?)
    }

    fn query_i32(&self, command: &str) -> Result<i32> {
        let body = self.send(command, &[])?;
        Ok(WireReader::new(&body).i32()?)
    }

    fn query_string(&self, command: &str) -> Result<String> {
        let body = self.send(command, &[])?;
        Ok(WireReader::new(&body).string()?)
    }

    fn apply(&self, command: &str, args: &[u8], mask: WaitMask, settle: Settle) -> Result<()> {
        match settle {
            Settle::Wait => {
                let waiter = self.settle_waiter();
                self.with_command(|channel| {
                    let body = channel.send(command, args)?;
                    // A rejected setter starts nothing to settle.
                    check_status(command, &body)?;
                    waiter.wait(channel, mask)
                })
            }
            Settle::NoWait => self.send_no_response(command, args),
        }
    }

    fn require(&self, major: u32, minor: u32, operation: &str) -> Result<()> {
        let version = self.protocol_version();
        if version.at_least(major, minor) {
            Ok(())
        } else {
            Err(ClientError::UnsupportedOperation {
                operation: operation.to_string(),
                reason: format!("requires protocol {major}.{minor}, instrument reports {version}"),
            })
        }
    }

    /// Query the protocol version string again.
    pub fn query_version(&self) -> Result<String> {
        self.query_string(TCP_GET_VERSION)
    }

    /// Accelerating voltage in volts.
    pub fn high_voltage(&self) -> Result<f64> {
        self.query_f64(HV_GET_VOLTAGE)
    }

    pub fn set_high_voltage(&self, volts: f64, settle: Settle) -> Result<()> {
        let args = Args::new().float(volts).finish();
        self.apply(HV_SET_VOLTAGE, &args, WaitMask::OPTICS, settle)
    }

    pub fn beam_on(&self, settle: Settle) -> Result<()> {
        self.apply(HV_BEAM_ON, &[], WaitMask::OPTICS, settle)
    }

    pub fn beam_off(&self, settle: Settle) -> Result<()> {
        self.apply(HV_BEAM_OFF, &[], WaitMask::OPTICS, settle)
    }

    pub fn beam_is_on(&self) -> Result<bool> {
        Ok(self.query_i32(HV_GET_BEAM)? != 0)
    }

    /// Working distance in mm.
    pub fn working_distance(&self) -> Result<f64> {
        self.query_f64(GET_WD)
    }

    pub fn set_working_distance(&self, mm: f64, settle: Settle) -> Result<()> {
        let args = Args::new().float(mm).finish();
        self.apply(SET_WD, &args, WaitMask::OPTICS, settle)
    }

    /// Field of view in mm.
    pub fn view_field(&self) -> Result<f64> {
        self.query_f64(GET_VIEW_FIELD)
    }

    pub fn set_view_field(&self, mm: f64, settle: Settle) -> Result<()> {
        let args = Args::new().float(mm).finish();
        self.apply(SET_VIEW_FIELD, &args, WaitMask::OPTICS, settle)
    }

    /// Probe current in pA. Needs protocol 3.1 or later.
    pub fn beam_current(&self) -> Result<f64> {
        self.require(3, 1, "beam current")?;
        self.query_f64(GET_BEAM_CURRENT)
    }

    pub fn set_beam_current(&self, picoamps: f64, settle: Settle) -> Result<()> {
        self.require(3, 1, "beam current")?;
        let args = Args::new().float(picoamps).finish();
        self.apply(SET_BEAM_CURRENT, &args, WaitMask::OPTICS, settle)
    }

    /// Run automatic focus using the detector on `channel`.
    pub fn auto_focus(&self, channel: i32, settle: Settle) -> Result<()> {
        let args = Args::new().int(channel).finish();
        self.apply(AUTO_WD, &args, WaitMask::OPTICS | WaitMask::AUTO, settle)
    }

    pub fn stage_position(&self) -> Result<StagePosition> {
        let body = self.send(STG_GET_POSITION, &[])?;
        StagePosition::decode(&body)
    }

    pub fn move_stage(&self, target: StagePosition, settle: Settle) -> Result<()> {
        self.apply(STG_MOVE_TO, &target.to_args(), WaitMask::STAGE, settle)
    }

    pub fn stage_is_busy(&self) -> Result<bool> {
        Ok(self.query_i32(STG_IS_BUSY)? != 0)
    }

    pub fn stop_stage(&self) -> Result<()> {
        let body = self.send(STG_STOP, &[])?;
        check_status(STG_STOP, &body)
    }

    pub fn vacuum_status(&self) -> Result<VacuumState> {
        Ok(VacuumState::from(self.query_i32(VAC_GET_STATUS)?))
    }

    pub fn pump(&self, settle: Settle) -> Result<()> {
        self.apply(VAC_PUMP, &[], WaitMask::VACUUM, settle)
    }

    pub fn vent(&self, settle: Settle) -> Result<()> {
        self.apply(VAC_VENT, &[], WaitMask::VACUUM, settle)
    }

    /// Detector names, one per line of the instrument's listing.
    pub fn detectors(&self) -> Result<Vec<String>> {
        let listing = self.query_string(DT_ENUM_DETECTORS)?;
        Ok(listing
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Enable or disable an 8-bit data channel.
    pub fn enable_channel(&self, channel: i32, enabled: bool) -> Result<()> {
        let args = Args::new().int(channel).int(i32::from(enabled)).int(8).finish();
        let body = self.send(DT_ENABLE, &args)?;
        check_status(DT_ENABLE, &body)
    }

    /// Select a scan speed index.
    pub fn set_scan_speed(&self, speed: u32, settle: Settle) -> Result<()> {
        let args = Args::new().int(to_i32(speed, "scan speed")?).finish();
        self.apply(SC_SET_SPEED, &args, WaitMask::SCAN, settle)
    }

    /// Number of frames accumulated per image.
    pub fn set_accumulation(&self, frames: u32, settle: Settle) -> Result<()> {
        let args = Args::new().int(to_i32(frames, "accumulation")?).finish();
        self.apply(SC_SET_ACCUM, &args, WaitMask::SCAN, settle)
    }

    pub fn stop_scan(&self) -> Result<()> {
        let body = self.send(SC_STOP_SCAN, &[])?;
        check_status(SC_STOP_SCAN, &body)
    }

    /// Enable or disable continuous UI-driven scanning.
    pub fn set_gui_scanning(&self, enabled: bool) -> Result<()> {
        let args = Args::new().int(i32::from(enabled)).finish();
        let body = self.send(GUI_SET_SCANNING, &args)?;
        check_status(GUI_SET_SCANNING, &body)
    }

    /// Currently busy subsystems among `mask`.
    pub fn busy_flags(&self, mask: WaitMask) -> Result<WaitMask> {
        use crate::settle::BusyProbe;

        self.with_command(|channel| channel.busy_flags(mask))
    }
}

pub(crate) fn to_i32(value: u32, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| ClientError::InvalidRequest(format!("{what} {value} does not fit an int32")))
}
