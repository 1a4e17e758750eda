use semlink_client::{ClientError, SemClient, VacuumState};
use serde::Serialize;

use crate::cmd::{connect, InfoArgs};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct InfoOutput {
    host: String,
    command_port: u16,
    data_port: Option<u16>,
    protocol_version: String,
    high_voltage_v: f64,
    beam_on: bool,
    working_distance_mm: f64,
    view_field_mm: f64,
    /// Absent when the protocol version predates probe current control.
    beam_current_pa: Option<f64>,
    vacuum: VacuumState,
    detectors: Vec<String>,
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let client = connect::connect(&args.connection)?;
    let info = collect(&client).map_err(|err| client_error("info failed", err))?;

    let fields = [
        ("host", info.host.clone()),
        ("command_port", info.command_port.to_string()),
        (
            "data_port",
            info.data_port
                .map_or_else(|| "-".to_string(), |port| port.to_string()),
        ),
        ("protocol_version", info.protocol_version.clone()),
        ("high_voltage_v", info.high_voltage_v.to_string()),
        ("beam_on", info.beam_on.to_string()),
        ("working_distance_mm", info.working_distance_mm.to_string()),
        ("view_field_mm", info.view_field_mm.to_string()),
        (
            "beam_current_pa",
            info.beam_current_pa
                .map_or_else(|| "unsupported".to_string(), |pa| pa.to_string()),
        ),
        ("vacuum", info.vacuum.to_string()),
        ("detectors", info.detectors.join(", ")),
    ];
    print_record(&info, &fields, format);

    client.disconnect();
    Ok(SUCCESS)
}

fn collect(client: &SemClient) -> semlink_client::Result<InfoOutput> {
    let endpoint = client.endpoint();
    let beam_current_pa = match client.beam_current() {
        Ok(pa) => Some(pa),
        Err(ClientError::UnsupportedOperation { .. }) => None,
        Err(err) => return Err(err),
    };

    Ok(InfoOutput {
        host: endpoint.host.clone(),
        command_port: endpoint.command_port,
        data_port: endpoint.data_port_number().ok(),
        protocol_version: client.protocol_version().to_string(),
        high_voltage_v: client.high_voltage()?,
        beam_on: client.beam_is_on()?,
        working_distance_mm: client.working_distance()?,
        view_field_mm: client.view_field()?,
        beam_current_pa,
        vacuum: client.vacuum_status()?,
        detectors: client.detectors()?,
    })
}
