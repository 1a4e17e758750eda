use semlink_client::{SemClient, Settle};
use serde::Serialize;

use crate::cmd::{connect, SetArgs, Setting};
use crate::exit::{client_error, CliError, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct SetOutput<'a> {
    setting: &'static str,
    value: &'a str,
    settled: bool,
}

/// A validated value for one setting.
#[derive(Debug, PartialEq)]
enum Change {
    HighVoltage(f64),
    Beam(bool),
    WorkingDistance(f64),
    ViewField(f64),
    BeamCurrent(f64),
    Pump,
    Vent,
    AutoFocus(i32),
}

pub fn run(args: SetArgs, format: OutputFormat) -> CliResult<i32> {
    let change = parse(args.setting, &args.value)?;
    let settle = if args.no_wait {
        Settle::NoWait
    } else {
        Settle::Wait
    };

    let client = connect::connect(&args.connection)?;
    apply(&client, change, settle)
        .map_err(|err| client_error(&format!("set {} failed", name(args.setting)), err))?;

    let output = SetOutput {
        setting: name(args.setting),
        value: &args.value,
        settled: !args.no_wait,
    };
    let fields = [
        ("setting", output.setting.to_string()),
        ("value", output.value.to_string()),
        ("settled", output.settled.to_string()),
    ];
    print_record(&output, &fields, format);

    client.disconnect();
    Ok(SUCCESS)
}

fn parse(setting: Setting, value: &str) -> CliResult<Change> {
    let number = || {
        value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| CliError::usage(format!("{}: {value:?} is not a number", name(setting))))
    };

    match setting {
        Setting::HighVoltage => number().map(Change::HighVoltage),
        Setting::WorkingDistance => number().map(Change::WorkingDistance),
        Setting::ViewField => number().map(Change::ViewField),
        Setting::BeamCurrent => number().map(Change::BeamCurrent),
        Setting::Beam => match value.trim().to_ascii_lowercase().as_str() {
            "on" | "1" | "true" => Ok(Change::Beam(true)),
            "off" | "0" | "false" => Ok(Change::Beam(false)),
            _ => Err(CliError::usage(format!("beam: expected on or off, got {value:?}"))),
        },
        Setting::Vacuum => match value.trim().to_ascii_lowercase().as_str() {
            "pump" => Ok(Change::Pump),
            "vent" => Ok(Change::Vent),
            _ => Err(CliError::usage(format!("vacuum: expected pump or vent, got {value:?}"))),
        },
        Setting::AutoFocus => value
            .trim()
            .parse::<i32>()
            .map(Change::AutoFocus)
            .map_err(|_| CliError::usage(format!("auto_focus: {value:?} is not a channel id"))),
    }
}

fn apply(client: &SemClient, change: Change, settle: Settle) -> semlink_client::Result<()> {
    match change {
        Change::HighVoltage(volts) => client.set_high_voltage(volts, settle),
        Change::Beam(true) => client.beam_on(settle),
        Change::Beam(false) => client.beam_off(settle),
        Change::WorkingDistance(mm) => client.set_working_distance(mm, settle),
        Change::ViewField(mm) => client.set_view_field(mm, settle),
        Change::BeamCurrent(pa) => client.set_beam_current(pa, settle),
        Change::Pump => client.pump(settle),
        Change::Vent => client.vent(settle),
        Change::AutoFocus(channel) => client.auto_focus(channel, settle),
    }
}

fn name(setting: Setting) -> &'static str {
    match setting {
        Setting::HighVoltage => "high_voltage",
        Setting::Beam => "beam",
        Setting::WorkingDistance => "working_distance",
        Setting::ViewField => "view_field",
        Setting::BeamCurrent => "beam_current",
        Setting::Vacuum => "vacuum",
        Setting::AutoFocus => "auto_focus",
    }
}
