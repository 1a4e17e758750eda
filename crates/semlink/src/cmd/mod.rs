use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{CliError, CliResult};
use crate::output::OutputFormat;

pub mod acquire;
pub mod connect;
pub mod get;
pub mod info;
pub mod mock;
pub mod send;
pub mod set;
pub mod stage;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect and print instrument identity and state.
    Info(InfoArgs),
    /// Read one instrument parameter.
    Get(GetArgs),
    /// Change one instrument parameter.
    Set(SetArgs),
    /// Query or move the specimen stage.
    Stage(StageArgs),
    /// Acquire images and write one PGM file per channel.
    Acquire(AcquireArgs),
    /// Send a raw command with typed arguments.
    Send(SendArgs),
    /// Run a simulated instrument until interrupted.
    Mock(MockArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Info(args) => info::run(args, format),
        Command::Get(args) => get::run(args, format),
        Command::Set(args) => set::run(args, format),
        Command::Stage(args) => stage::run(args, format),
        Command::Acquire(args) => acquire::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Mock(args) => mock::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where the instrument is. Flags win over the environment, which wins
/// over `--config`.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Instrument host name or address.
    #[arg(long, env = "SEMLINK_HOST", global = true)]
    pub host: Option<String>,
    /// Command port.
    #[arg(long, short = 'p', env = "SEMLINK_PORT", global = true)]
    pub port: Option<u16>,
    /// Data port (default: command port + 1).
    #[arg(long, env = "SEMLINK_DATA_PORT", global = true)]
    pub data_port: Option<u16>,
    /// Per-command timeout (e.g. 5s, 500ms).
    #[arg(long, env = "SEMLINK_TIMEOUT", global = true)]
    pub timeout: Option<String>,
    /// JSON file with `endpoint` and `client` sections.
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Parameter {
    /// Protocol version string.
    Version,
    /// Accelerating voltage (V).
    HighVoltage,
    /// Beam state.
    Beam,
    /// Working distance (mm).
    WorkingDistance,
    /// Field of view (mm).
    ViewField,
    /// Probe current (pA).
    BeamCurrent,
    /// Chamber vacuum state.
    Vacuum,
    /// Available detectors.
    Detectors,
    /// Busy subsystems.
    Busy,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    pub parameter: Parameter,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Setting {
    /// Accelerating voltage (V).
    HighVoltage,
    /// Beam state: on or off.
    Beam,
    /// Working distance (mm).
    WorkingDistance,
    /// Field of view (mm).
    ViewField,
    /// Probe current (pA).
    BeamCurrent,
    /// Chamber vacuum: pump or vent.
    Vacuum,
    /// Automatic focus on the given detector channel.
    AutoFocus,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    pub setting: Setting,
    pub value: String,
    /// Return as soon as the command is sent instead of waiting for the
    /// instrument to settle.
    #[arg(long)]
    pub no_wait: bool,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct StageArgs {
    #[command(subcommand)]
    pub command: StageCommand,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Subcommand, Debug)]
pub enum StageCommand {
    /// Print the current stage position.
    Get,
    /// Move to an absolute position; omitted axes keep their value.
    Move(StageTarget),
    /// Abort stage motion.
    Stop,
}

#[derive(Args, Debug)]
pub struct StageTarget {
    #[arg(long, allow_negative_numbers = true)]
    pub x: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub y: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub z: Option<f64>,
    /// Rotation in degrees.
    #[arg(long, allow_negative_numbers = true)]
    pub rotation: Option<f64>,
    /// Tilt in degrees.
    #[arg(long, allow_negative_numbers = true)]
    pub tilt: Option<f64>,
    /// Do not wait for the stage to stop.
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Args, Debug)]
pub struct AcquireArgs {
    /// Image width in pixels.
    #[arg(long)]
    pub width: u32,
    /// Image height in pixels.
    #[arg(long)]
    pub height: u32,
    /// Detector channels in output order (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "0")]
    pub channels: Vec<i32>,
    /// Scan speed index; 0 keeps the current speed.
    #[arg(long, default_value = "0")]
    pub dwell: u32,
    /// Frames to accumulate.
    #[arg(long, default_value = "1")]
    pub frames: u32,
    /// Region of interest: left,top,right,bottom.
    #[arg(long, value_delimiter = ',')]
    pub roi: Option<Vec<u32>>,
    /// Directory for the PGM files.
    #[arg(long, short = 'o', default_value = ".")]
    pub output: PathBuf,
    /// File name prefix; files are named `<prefix>-ch<channel>.pgm`.
    #[arg(long, default_value = "image")]
    pub prefix: String,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
pub enum WireType {
    I32,
    U32,
    F64,
    Str,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Command name (at most 16 ASCII characters).
    pub name: String,
    /// Arguments as `type:value` with type one of i, u, f, s.
    pub args: Vec<String>,
    /// Send without asking for a response.
    #[arg(long, conflicts_with_all = ["decode", "wait"])]
    pub no_response: bool,
    /// Decode the response as this sequence of values (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub decode: Vec<WireType>,
    /// Wait for these subsystems to settle afterwards (e.g. optics|stage).
    #[arg(long, value_name = "MASK")]
    pub wait: Option<String>,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct MockArgs {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Command port; 0 picks a free port.
    #[arg(long, short = 'p', default_value = "8300")]
    pub port: u16,
    /// Data port; default is command port + 1, or a free port when the
    /// command port is 0.
    #[arg(long)]
    pub data_port: Option<u16>,
    /// Protocol version the mock reports.
    #[arg(long, default_value = "3.2.20")]
    pub protocol_version: String,
    /// Busy-flag polls before a state change settles.
    #[arg(long, default_value = "2")]
    pub busy_polls: u32,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
