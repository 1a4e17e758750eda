use semlink_client::{SemClient, WaitMask};
use serde::Serialize;
use serde_json::{json, Value};

use crate::cmd::{connect, GetArgs, Parameter};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct GetOutput {
    parameter: &'static str,
    value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'static str>,
}

pub fn run(args: GetArgs, format: OutputFormat) -> CliResult<i32> {
    let client = connect::connect(&args.connection)?;
    let output = read(&client, args.parameter)
        .map_err(|err| client_error(&format!("get {} failed", name(args.parameter)), err))?;

    let text = match &output.value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };
    let value = match output.unit {
        Some(unit) => format!("{text} {unit}"),
        None => text,
    };
    print_record(&output, &[(output.parameter, value)], format);

    client.disconnect();
    Ok(SUCCESS)
}

fn read(client: &SemClient, parameter: Parameter) -> semlink_client::Result<GetOutput> {
    let (value, unit) = match parameter {
        Parameter::Version => (json!(client.query_version()?), None),
        Parameter::HighVoltage => (json!(client.high_voltage()?), Some("V")),
        Parameter::Beam => (json!(client.beam_is_on()?), None),
        Parameter::WorkingDistance => (json!(client.working_distance()?), Some("mm")),
        Parameter::ViewField => (json!(client.view_field()?), Some("mm")),
        Parameter::BeamCurrent => (json!(client.beam_current()?), Some("pA")),
        Parameter::Vacuum => (json!(client.vacuum_status()?.to_string()), None),
        Parameter::Detectors => (json!(client.detectors()?), None),
        Parameter::Busy => {
            let all = WaitMask::OPTICS
                | WaitMask::AUTO
                | WaitMask::STAGE
                | WaitMask::VACUUM
                | WaitMask::SCAN;
            (json!(client.busy_flags(all)?.to_string()), None)
        }
    };
    Ok(GetOutput {
        parameter: name(parameter),
        value,
        unit,
    })
}

fn name(parameter: Parameter) -> &'static str {
    match parameter {
        Parameter::Version => "version",
        Parameter::HighVoltage => "high_voltage",
        Parameter::Beam => "beam",
        Parameter::WorkingDistance => "working_distance",
        Parameter::ViewField => "view_field",
        Parameter::BeamCurrent => "beam_current",
        Parameter::Vacuum => "vacuum",
        Parameter::Detectors => "detectors",
        Parameter::Busy => "busy",
    }
}
