//! Command names understood by the instrument.
//!
//! Every name fits the 16-byte name field; `tests::all_names_fit` guards it.

/// Protocol version string.
pub const TCP_GET_VERSION: &str = "TcpGetVersion";
/// Register the local port of the data connection.
pub const TCP_REG_DATA_PORT: &str = "TcpRegDataPort";

/// High voltage readback (V).
pub const HV_GET_VOLTAGE: &str = "HVGetVoltage";
/// High voltage setpoint (V).
pub const HV_SET_VOLTAGE: &str = "HVSetVoltage";
/// Switch the beam on.
pub const HV_BEAM_ON: &str = "HVBeamOn";
/// Switch the beam off.
pub const HV_BEAM_OFF: &str = "HVBeamOff";
/// Beam state (0 off, 1 on).
pub const HV_GET_BEAM: &str = "HVGetBeam";

/// Working distance readback (mm).
pub const GET_WD: &str = "GetWD";
/// Working distance setpoint (mm).
pub const SET_WD: &str = "SetWD";
/// Field of view readback (mm).
pub const GET_VIEW_FIELD: &str = "GetViewField";
/// Field of view setpoint (mm).
pub const SET_VIEW_FIELD: &str = "SetViewField";
/// Probe current readback (pA).
pub const GET_BEAM_CURRENT: &str = "GetBeamCurrent";
/// Probe current setpoint (pA).
pub const SET_BEAM_CURRENT: &str = "SetBeamCurrent";
/// Automatic focus on a detector channel.
pub const AUTO_WD: &str = "AutoWD";

/// Stage position (x, y, z, rotation, tilt).
pub const STG_GET_POSITION: &str = "StgGetPosition";
/// Move the stage to an absolute position.
pub const STG_MOVE_TO: &str = "StgMoveTo";
/// Stage motion state (0 idle).
pub const STG_IS_BUSY: &str = "StgIsBusy";
/// Abort stage motion.
pub const STG_STOP: &str = "StgStop";

/// Vacuum state code.
pub const VAC_GET_STATUS: &str = "VacGetStatus";
/// Pump the chamber.
pub const VAC_PUMP: &str = "VacPump";
/// Vent the chamber.
pub const VAC_VENT: &str = "VacVent";

/// Detector list as a newline separated string.
pub const DT_ENUM_DETECTORS: &str = "DtEnumDetectors";
/// Enable or disable a data channel (channel, enable, bits per pixel).
pub const DT_ENABLE: &str = "DtEnable";

/// Scan speed index.
pub const SC_SET_SPEED: &str = "ScSetSpeed";
/// Frame accumulation count.
pub const SC_SET_ACCUM: &str = "ScSetAccum";
/// Stop any scan in progress.
pub const SC_STOP_SCAN: &str = "ScStopScan";
/// Trigger a scan of a region; returns the frame id.
pub const SC_SCAN_XY: &str = "ScScanXY";
/// Image data chunk tag on the data connection.
pub const SC_DATA: &str = "ScData";

/// Enable or disable UI-driven continuous scanning.
pub const GUI_SET_SCANNING: &str = "GUISetScanning";

/// Busy flags of all subsystems as an int32 bitmask.
pub const GET_BUSY_FLAGS: &str = "GetBusyFlags";

/// Every command name this crate knows about.
pub const ALL: &[&str] = &[
    TCP_GET_VERSION,
    TCP_REG_DATA_PORT,
    HV_GET_VOLTAGE,
    HV_SET_VOLTAGE,
    HV_BEAM_ON,
    HV_BEAM_OFF,
    HV_GET_BEAM,
    GET_WD,
    SET_WD,
    GET_VIEW_FIELD,
    SET_VIEW_FIELD,
    GET_BEAM_CURRENT,
    SET_BEAM_CURRENT,
    AUTO_WD,
    STG_GET_POSITION,
    STG_MOVE_TO,
    STG_IS_BUSY,
    STG_STOP,
    VAC_GET_STATUS,
    VAC_PUMP,
    VAC_VENT,
    DT_ENUM_DETECTORS,
    DT_ENABLE,
    SC_SET_SPEED,
    SC_SET_ACCUM,
    SC_STOP_SCAN,
    SC_SCAN_XY,
    SC_DATA,
    GUI_SET_SCANNING,
    GET_BUSY_FLAGS,
];

/// Returns the subsystem a command belongs to, for diagnostics.
pub fn subsystem(name: &str) -> &'static str {
    match name {
        TCP_GET_VERSION | TCP_REG_DATA_PORT | GET_BUSY_FLAGS => "protocol",
        n if n.starts_with("HV") => "high-voltage",
        GET_WD | SET_WD | GET_VIEW_FIELD | SET_VIEW_FIELD | GET_BEAM_CURRENT
        | SET_BEAM_CURRENT | AUTO_WD => "optics",
        n if n.starts_with("Stg") => "stage",
        n if n.starts_with("Vac") => "vacuum",
        n if n.starts_with("Dt") => "detector",
        n if n.starts_with("Sc") || n.starts_with("GUI") => "scanning",
        _ => "unknown",
    }
}
