use std::fs;
use std::path::Path;

use semlink_client::{CancelToken, ClientConfig, SemClient};
use semlink_transport::{DataPort, Endpoint};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cmd::{parse_duration, ConnectionArgs};
use crate::exit::{client_error, io_error, CliError, CliResult, DATA_INVALID};

/// Layout of a `--config` document. Both sections are optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    endpoint: Endpoint,
    client: ClientConfig,
}

fn load(path: &Path) -> CliResult<ConfigFile> {
    let text = fs::read_to_string(path)
        .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
    serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("invalid config {}: {err}", path.display()),
        )
    })
}

/// Merge the config file with explicit flags.
pub fn resolve(args: &ConnectionArgs) -> CliResult<(Endpoint, ClientConfig)> {
    let file = match &args.config {
        Some(path) => load(path)?,
        None => ConfigFile::default(),
    };

    let mut endpoint = file.endpoint;
    if let Some(host) = &args.host {
        endpoint.host = host.clone();
    }
    if let Some(port) = args.port {
        endpoint.command_port = port;
    }
    if let Some(port) = args.data_port {
        endpoint.data_port = DataPort::Explicit(port);
    }
    if let Some(timeout) = &args.timeout {
        let timeout = parse_duration(timeout)?;
        endpoint.timeout = timeout;
        endpoint.connect_timeout = timeout;
    }
    Ok((endpoint, file.client))
}

/// Connect with a cancel token wired to Ctrl-C.
pub fn connect(args: &ConnectionArgs) -> CliResult<SemClient> {
    let (endpoint, config) = resolve(args)?;
    let cancel = CancelToken::new();
    install_interrupt(&cancel);

    debug!(addr = %endpoint.command_addr(), "connecting");
    SemClient::builder(endpoint)
        .config(config)
        .cancel_token(cancel)
        .connect()
        .map_err(|err| client_error("connect failed", err))
}

fn install_interrupt(cancel: &CancelToken) {
    let token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || token.cancel()) {
        warn!(error = %err, "failed to install Ctrl-C handler");
    }
}
