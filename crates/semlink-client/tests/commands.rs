use std::io::Write;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use semlink_client::{ClientConfig, ClientError, SemClient, Settle, StagePosition, WaitMask};
use semlink_frame::commands::{GET_BUSY_FLAGS, GET_WD, HV_SET_VOLTAGE, SET_WD, STG_STOP};
use semlink_frame::{encode_frame, Args, FrameReader, FrameWriter, FLAG_RESPONSE, HEADER_SIZE};
use semlink_mock::{MockBehavior, MockConfig, MockHandle, MockInstrument, UNKNOWN_COMMAND};
use semlink_transport::Endpoint;

fn spawn(behavior: MockBehavior) -> MockHandle {
    MockInstrument::spawn(MockConfig::default().with_behavior(behavior)).expect("mock should start")
}

fn fast_config() -> ClientConfig {
    ClientConfig {
        settle_poll_interval: Duration::from_millis(5),
        settle_timeout: Duration::from_secs(2),
        data_read_timeout: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

fn connect(mock: &MockHandle, timeout: Duration) -> SemClient {
    SemClient::builder(mock.endpoint().with_timeout(timeout))
        .config(fast_config())
        .connect()
        .expect("client should connect")
}

fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn connect_reads_protocol_version() {
    let mock = spawn(MockBehavior::default().with_version("3.2.20"));
    let client = connect(&mock, Duration::from_secs(2));

    assert!(client.is_connected());
    assert_eq!(client.protocol_version().major, 3);
    assert_eq!(client.protocol_version().minor, 2);
    assert_eq!(client.query_version().expect("version query"), "3.2.20");
}

#[test]
fn setter_waits_for_optics_to_settle() {
    let mock = spawn(MockBehavior::default());
    let client = connect(&mock, Duration::from_secs(2));

    client
        .set_working_distance(4.25, Settle::Wait)
        .expect("set should succeed");

    assert_eq!(mock.state().working_distance, 4.25);
    assert_eq!(client.working_distance().expect("get should succeed"), 4.25);

    let names = mock.command_names();
    let set = names.iter().position(|n| n == SET_WD).expect("SetWD sent");
    let polls = names[set..].iter().filter(|n| *n == GET_BUSY_FLAGS).count();
    assert_eq!(polls, 3, "busy for two polls, idle on the third");

    let probe = &mock.commands()[set + 1];
    assert_eq!(probe.int_arg(), Some(WaitMask::OPTICS.bits() as i32));
}

#[test]
fn no_wait_setter_fires_and_forgets() {
    let mock = spawn(MockBehavior::default());
    let client = connect(&mock, Duration::from_secs(2));

    client
        .set_high_voltage(20_000.0, Settle::NoWait)
        .expect("send should succeed");
    assert!(wait_until(|| mock.state().high_voltage == 20_000.0));

    let commands = mock.commands();
    let sent = commands.last().expect("command recorded");
    assert!(!sent.wants_response);
    assert!(!commands.iter().any(|c| c.name == GET_BUSY_FLAGS));

    // The channel is still in step.
    assert_eq!(client.high_voltage().expect("get should succeed"), 20_000.0);
}

#[test]
fn beam_current_needs_newer_protocol() {
    let mock = spawn(MockBehavior::default().with_version("3.0.4"));
    let client = connect(&mock, Duration::from_secs(2));

    let err = client.beam_current().expect_err("old protocol");
    assert!(matches!(err, ClientError::UnsupportedOperation { .. }));
    assert!(client.is_connected());
    assert_eq!(mock.command_names(), vec!["TcpGetVersion".to_string()]);
}

#[test]
fn stage_move_round_trips() {
    let mock = spawn(MockBehavior::default());
    let client = connect(&mock, Duration::from_secs(2));

    let target = StagePosition {
        x: 1.5,
        y: -2.0,
        z: 12.0,
        rotation: 45.0,
        tilt: 10.0,
    };
    client
        .move_stage(target, Settle::Wait)
        .expect("move should succeed");

    assert_eq!(client.stage_position().expect("position"), target);
    assert!(!client.stage_is_busy().expect("busy query"));
}

#[test]
fn settle_timeout_keeps_connection_usable() {
    let mock = spawn(MockBehavior {
        busy_polls: u32::MAX,
        ..MockBehavior::default()
    });
    let client = SemClient::builder(mock.endpoint())
        .config(ClientConfig {
            settle_timeout: Duration::from_millis(150),
            ..fast_config()
        })
        .connect()
        .expect("client should connect");

    let err = client
        .auto_focus(0, Settle::Wait)
        .expect_err("never settles");
    assert!(matches!(err, ClientError::Timeout { .. }));
    assert!(client.is_connected());
    assert_eq!(client.high_voltage().expect("still usable"), 15_000.0);
}

#[test]
fn rejected_setter_fails_without_waiting_to_settle() {
    let mock = spawn(MockBehavior {
        busy_polls: u32::MAX,
        ..MockBehavior::default()
    }
    .with_failure(HV_SET_VOLTAGE, -3));
    let client = SemClient::builder(mock.endpoint())
        .config(ClientConfig {
            settle_timeout: Duration::from_millis(500),
            ..fast_config()
        })
        .connect()
        .expect("client should connect");

    // Leaves the optics busy.
    client
        .set_working_distance(5.0, Settle::NoWait)
        .expect("send should succeed");

    let started = Instant::now();
    let err = client
        .set_high_voltage(20_000.0, Settle::Wait)
        .expect_err("instrument rejects the voltage");
    assert!(matches!(err, ClientError::CommandFailure { code: -3, .. }));
    assert!(started.elapsed() < Duration::from_millis(500));

    let names = mock.command_names();
    let set = names.iter().position(|n| n == HV_SET_VOLTAGE).expect("HVSetVoltage sent");
    assert!(!names[set..].iter().any(|n| n == GET_BUSY_FLAGS));
    assert!(client.is_connected());
}

#[test]
fn garbage_reply_disconnects_the_client() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let port = listener.local_addr().expect("local addr").port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept should succeed");
        let mut reader = FrameReader::new(stream.try_clone().expect("clone"));
        let mut writer = FrameWriter::new(stream);

        let hello = reader.read_frame().expect("version request");
        let version = Args::new().string("3.2.20").expect("string arg").finish();
        writer.send(&hello.name, FLAG_RESPONSE, &version).expect("reply");

        let request = reader.read_frame().expect("GetWD request");
        let mut wire = BytesMut::from(&[0xFE; HEADER_SIZE][..]);
        let body = Args::new().float(4.0).finish();
        encode_frame(&request.name, FLAG_RESPONSE, &body, &mut wire).expect("encode reply");
        writer.get_mut().write_all(&wire).expect("garbage then reply");

        // Hold the socket until the client drops it.
        let _ = reader.read_frame();
    });

    let endpoint = Endpoint::new("127.0.0.1".to_string(), port).with_timeout(Duration::from_secs(2));
    let client = SemClient::builder(endpoint)
        .config(fast_config())
        .connect()
        .expect("client should connect");

    let err = client.working_distance().expect_err("stream is out of sync");
    assert!(matches!(err, ClientError::ConnectionLost(_)));
    assert!(!client.is_connected());

    let err = client.working_distance().expect_err("still disconnected");
    assert!(matches!(err, ClientError::ConnectionLost(_)));

    server.join().expect("server should finish");
}

#[test]
fn command_timeout_discards_the_late_response() {
    let mock = spawn(MockBehavior::default().with_delay(GET_WD, Duration::from_millis(300)));
    let client = connect(&mock, Duration::from_millis(100));

    let err = client.working_distance().expect_err("reply is too slow");
    assert!(matches!(err, ClientError::Timeout { .. }));
    assert!(client.is_connected());

    thread::sleep(Duration::from_millis(400));
    assert_eq!(client.view_field().expect("late reply skipped"), 0.5);
}

#[test]
fn concurrent_callers_get_their_own_responses() {
    let mock = spawn(MockBehavior::default());
    let client = Arc::new(connect(&mock, Duration::from_secs(2)));
    client.set_working_distance(7.0, Settle::Wait).expect("set wd");
    client.set_view_field(0.25, Settle::Wait).expect("set fov");

    let workers: Vec<_> = (0..6)
        .map(|i| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for _ in 0..40 {
                    match i % 3 {
                        0 => assert_eq!(client.working_distance().expect("wd"), 7.0),
                        1 => assert_eq!(client.view_field().expect("fov"), 0.25),
                        _ => assert_eq!(client.high_voltage().expect("hv"), 15_000.0),
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker should not panic");
    }
}

#[test]
fn negative_status_is_a_command_failure() {
    let mock = spawn(MockBehavior::default().with_failure(STG_STOP, -4));
    let client = connect(&mock, Duration::from_secs(2));

    let err = client.stop_stage().expect_err("instrument refuses");
    assert!(matches!(err, ClientError::CommandFailure { code: -4, .. }));
    assert!(client.is_connected());
}

#[test]
fn raw_send_returns_response_body() {
    let mock = spawn(MockBehavior::default());
    let client = connect(&mock, Duration::from_secs(2));

    let body = client.send("NoSuchCommand", &[]).expect("mock answers");
    assert_eq!(body.as_ref(), UNKNOWN_COMMAND.to_le_bytes());

    let err = client
        .send("ThisCommandNameIsTooLong", &[])
        .expect_err("name does not fit");
    assert!(matches!(err, ClientError::InvalidCommand(_)));
}

#[test]
fn detector_listing_is_split_into_names() {
    let mock = spawn(MockBehavior::default());
    let client = connect(&mock, Duration::from_secs(2));
    assert_eq!(client.detectors().expect("detectors"), vec!["SE", "BSE"]);
}

#[test]
fn disconnect_rejects_later_calls() {
    let mock = spawn(MockBehavior::default());
    let client = connect(&mock, Duration::from_secs(2));

    client.disconnect();
    assert!(!client.is_connected());
    let err = client.high_voltage().expect_err("disconnected");
    assert!(matches!(err, ClientError::ConnectionLost(_)));
}

#[test]
fn server_going_away_is_connection_lost() {
    let mock = spawn(MockBehavior::default());
    let client = connect(&mock, Duration::from_secs(2));
    drop(mock);

    let err = client.high_voltage().expect_err("server is gone");
    assert!(matches!(err, ClientError::ConnectionLost(_)));
    assert!(!client.is_connected());
}

#[test]
fn cancel_unblocks_a_pending_command() {
    let mock = spawn(MockBehavior::default().with_silent(GET_WD));
    let client = connect(&mock, Duration::from_secs(10));
    let token = client.cancel_token();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        token.cancel();
    });

    let started = Instant::now();
    let err = client.working_distance().expect_err("cancelled");
    assert!(matches!(err, ClientError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!client.is_connected());

    canceller.join().expect("canceller should finish");
}

#[test]
fn refused_connection_is_a_transport_error() {
    let mock = spawn(MockBehavior::default());
    let endpoint = mock.endpoint();
    drop(mock);

    let err = SemClient::connect(endpoint).expect_err("nothing listening");
    assert!(matches!(err, ClientError::Transport(_)));
}
