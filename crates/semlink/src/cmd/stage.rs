use semlink_client::{SemClient, Settle, StagePosition};

use crate::cmd::{connect, StageArgs, StageCommand, StageTarget};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

pub fn run(args: StageArgs, format: OutputFormat) -> CliResult<i32> {
    let client = connect::connect(&args.connection)?;

    match args.command {
        StageCommand::Get => {
            let position = client
                .stage_position()
                .map_err(|err| client_error("stage get failed", err))?;
            print_position(&position, format);
        }
        StageCommand::Move(target) => {
            let position =
                move_to(&client, &target).map_err(|err| client_error("stage move failed", err))?;
            print_position(&position, format);
        }
        StageCommand::Stop => {
            client
                .stop_stage()
                .map_err(|err| client_error("stage stop failed", err))?;
        }
    }

    client.disconnect();
    Ok(SUCCESS)
}

fn move_to(client: &SemClient, target: &StageTarget) -> semlink_client::Result<StagePosition> {
    let current = client.stage_position()?;
    let destination = merge(current, target);
    let settle = if target.no_wait {
        Settle::NoWait
    } else {
        Settle::Wait
    };
    client.move_stage(destination, settle)?;
    Ok(destination)
}

/// Axes missing from `target` keep their `current` value.
fn merge(current: StagePosition, target: &StageTarget) -> StagePosition {
    StagePosition {
        x: target.x.unwrap_or(current.x),
        y: target.y.unwrap_or(current.y),
        z: target.z.unwrap_or(current.z),
        rotation: target.rotation.unwrap_or(current.rotation),
        tilt: target.tilt.unwrap_or(current.tilt),
    }
}

fn print_position(position: &StagePosition, format: OutputFormat) {
    let fields = [
        ("x_mm", position.x.to_string()),
        ("y_mm", position.y.to_string()),
        ("z_mm", position.z.to_string()),
        ("rotation_deg", position.rotation.to_string()),
        ("tilt_deg", position.tilt.to_string()),
    ];
    print_record(position, &fields, format);
}
