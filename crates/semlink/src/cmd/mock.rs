use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use semlink_mock::{MockBehavior, MockConfig, MockInstrument};
use serde::Serialize;
use tracing::{info, warn};

use crate::cmd::MockArgs;
use crate::exit::{io_error, CliError, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Serialize)]
struct MockOutput {
    command_addr: String,
    data_addr: String,
    protocol_version: String,
}

pub fn run(args: MockArgs, format: OutputFormat) -> CliResult<i32> {
    let config = mock_config(&args)?;
    let handle = MockInstrument::spawn(config).map_err(|err| io_error("mock bind failed", err))?;

    let output = MockOutput {
        command_addr: handle.command_addr().to_string(),
        data_addr: handle.data_addr().to_string(),
        protocol_version: args.protocol_version.clone(),
    };
    let fields = [
        ("command_addr", output.command_addr.clone()),
        ("data_addr", output.data_addr.clone()),
        ("protocol_version", output.protocol_version.clone()),
    ];
    print_record(&output, &fields, format);

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn!(error = %err, "failed to install Ctrl-C handler");
    }

    while !interrupted.load(Ordering::SeqCst) && handle.is_running() {
        thread::sleep(IDLE_POLL);
    }

    info!("mock instrument stopping");
    handle.stop();
    handle.join();
    Ok(SUCCESS)
}

fn mock_config(args: &MockArgs) -> CliResult<MockConfig> {
    let data_port = match (args.data_port, args.port) {
        (Some(port), _) => port,
        (None, 0) => 0,
        (None, port) => port.checked_add(1).ok_or_else(|| {
            CliError::usage(format!("no data port above {port}; pass --data-port"))
        })?,
    };

    let mut behavior = MockBehavior::default().with_version(&args.protocol_version);
    behavior.busy_polls = args.busy_polls;

    Ok(MockConfig {
        host: args.host.clone(),
        command_port: args.port,
        data_port,
        behavior,
    })
}
