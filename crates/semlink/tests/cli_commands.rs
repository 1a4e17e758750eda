#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::process::{Command, Output, Stdio};

use semlink_mock::{pixel, MockBehavior, MockConfig, MockHandle, MockInstrument};
use serde_json::Value;

fn spawn_mock(behavior: MockBehavior) -> MockHandle {
    MockInstrument::spawn(MockConfig::default().with_behavior(behavior))
        .expect("mock should start")
}

/// Run the binary as JSON-emitting client of `mock` with extra args.
fn semlink(mock: &MockHandle, args: &[&str]) -> Output {
    let endpoint = mock.endpoint();
    Command::new(env!("CARGO_BIN_EXE_semlink"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .arg("--host")
        .arg(&endpoint.host)
        .arg("--port")
        .arg(endpoint.command_port.to_string())
        .arg("--data-port")
        .arg(mock.data_addr().port().to_string())
        .args(["--timeout", "2s"])
        .env_remove("SEMLINK_HOST")
        .env_remove("SEMLINK_PORT")
        .env_remove("SEMLINK_DATA_PORT")
        .env_remove("SEMLINK_TIMEOUT")
        .output()
        .expect("semlink should run")
}

fn json_stdout(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "exit {:?}, stderr: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

#[test]
fn info_reports_version_and_state() {
    let mock = spawn_mock(MockBehavior::default());
    let info = json_stdout(&semlink(&mock, &["info"]));

    assert_eq!(info["protocol_version"], "3.2.20");
    assert_eq!(info["high_voltage_v"], 15000.0);
    assert_eq!(info["detectors"], serde_json::json!(["SE", "BSE"]));
    assert_eq!(info["data_port"], mock.data_addr().port());
}

#[test]
fn get_reads_working_distance() {
    let mock = spawn_mock(MockBehavior::default());
    let out = json_stdout(&semlink(&mock, &["get", "working-distance"]));

    assert_eq!(out["parameter"], "working_distance");
    assert_eq!(out["value"], 10.0);
    assert_eq!(out["unit"], "mm");
}

#[test]
fn set_waits_for_settle_and_updates_instrument() {
    let mock = spawn_mock(MockBehavior::default());
    let out = json_stdout(&semlink(&mock, &["set", "high-voltage", "20000"]));

    assert_eq!(out["settled"], true);
    assert_eq!(mock.state().high_voltage, 20_000.0);
    let names = mock.command_names();
    assert!(names.contains(&"HVSetVoltage".to_string()));
    assert!(names.contains(&"GetBusyFlags".to_string()));
}

#[test]
fn stage_move_keeps_unspecified_axes() {
    let mock = spawn_mock(MockBehavior::default());
    let before = mock.state().stage;
    let out = json_stdout(&semlink(&mock, &["stage", "move", "--x", "2.5", "--tilt", "-10"]));

    assert_eq!(out["x"], 2.5);
    let after = mock.state().stage;
    assert_eq!(after[0], 2.5);
    assert_eq!(after[1], before[1]);
    assert_eq!(after[4], -10.0);
}

#[test]
fn acquire_writes_one_pgm_per_channel() {
    let mock = spawn_mock(MockBehavior::default());
    let dir = tempfile::tempdir().expect("temp dir should be creatable");
    let dir_arg = dir.path().to_str().expect("temp path should be UTF-8");

    let out = json_stdout(&semlink(
        &mock,
        &[
            "acquire", "--width", "64", "--height", "32", "--channels", "1,0", "--output", dir_arg,
        ],
    ));

    let saved = out.as_array().expect("acquire prints a list");
    assert_eq!(saved.len(), 2);
    assert_eq!(saved[0]["channel"], 1);
    assert_eq!(saved[1]["channel"], 0);

    for channel in [0, 1] {
        let bytes = std::fs::read(dir.path().join(format!("image-ch{channel}.pgm")))
            .expect("pgm should exist");
        let header = b"P5\n64 32\n255\n";
        assert!(bytes.starts_with(header));
        let pixels = &bytes[header.len()..];
        assert_eq!(pixels.len(), 64 * 32);
        for (offset, value) in pixels.iter().enumerate() {
            assert_eq!(*value, pixel(channel, offset), "channel {channel} offset {offset}");
        }
    }
    assert!(mock.state().gui_scanning);
}

#[test]
fn send_decodes_raw_response() {
    let mock = spawn_mock(MockBehavior::default());
    let out = json_stdout(&semlink(&mock, &["send", "GetWD", "--decode", "f64"]));

    assert_eq!(out["command"], "GetWD");
    assert_eq!(out["response_len"], 8);
    assert_eq!(out["values"], serde_json::json!([10.0]));
}

#[test]
fn silent_instrument_exits_with_timeout_code() {
    let mock = spawn_mock(MockBehavior::default().with_silent("GetWD"));
    let output = Command::new(env!("CARGO_BIN_EXE_semlink"))
        .args(["--log-level", "error", "--format", "json", "get", "working-distance"])
        .arg("--host")
        .arg(mock.command_addr().ip().to_string())
        .arg("--port")
        .arg(mock.command_addr().port().to_string())
        .arg("--data-port")
        .arg(mock.data_addr().port().to_string())
        .args(["--timeout", "300ms"])
        .output()
        .expect("semlink should run");

    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn old_protocol_rejects_beam_current() {
    let mock = spawn_mock(MockBehavior::default().with_version("3.0.4"));
    let output = semlink(&mock, &["get", "beam-current"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not supported"));
}

#[test]
fn invalid_acquisition_is_a_usage_error() {
    let mock = spawn_mock(MockBehavior::default());
    let output = semlink(&mock, &["acquire", "--width", "0", "--height", "8"]);

    assert_eq!(output.status.code(), Some(64));
    assert!(!mock.command_names().contains(&"ScScanXY".to_string()));
}

#[test]
fn refused_connection_exits_with_transport_code() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        listener.local_addr().expect("addr").port()
    };

    let output = Command::new(env!("CARGO_BIN_EXE_semlink"))
        .args(["--log-level", "error", "info", "--host", "127.0.0.1", "--port"])
        .arg(port.to_string())
        .args(["--timeout", "1s"])
        .env_remove("SEMLINK_DATA_PORT")
        .output()
        .expect("semlink should run");

    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn mock_subcommand_serves_clients() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_semlink"))
        .args(["--log-level", "error", "--format", "json", "mock", "--port", "0"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("mock command should start");

    let stdout = child.stdout.take().expect("stdout is piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("mock should print its addresses");
    let addrs: Value = serde_json::from_str(&line).expect("address line should be JSON");
    let command_addr: std::net::SocketAddr = addrs["command_addr"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .expect("command_addr should be a socket address");
    let data_addr: std::net::SocketAddr = addrs["data_addr"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .expect("data_addr should be a socket address");

    let output = Command::new(env!("CARGO_BIN_EXE_semlink"))
        .args(["--log-level", "error", "--format", "json", "get", "version"])
        .arg("--host")
        .arg(command_addr.ip().to_string())
        .arg("--port")
        .arg(command_addr.port().to_string())
        .arg("--data-port")
        .arg(data_addr.port().to_string())
        .output()
        .expect("get should run");

    let _ = child.kill();
    let _ = child.wait();

    let out = json_stdout(&output);
    assert_eq!(out["value"], "3.2.20");
}
