use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use semlink_client::{AcquisitionRequest, ClientConfig, ClientError, Roi, SemClient};
use semlink_frame::commands::{
    DT_ENABLE, GUI_SET_SCANNING, SC_SCAN_XY, SC_SET_ACCUM, SC_SET_SPEED, SC_STOP_SCAN,
    TCP_GET_VERSION, TCP_REG_DATA_PORT,
};
use semlink_frame::WireReader;
use semlink_mock::{pixel, ChunkPlan, MockBehavior, MockConfig, MockHandle, MockInstrument, PlannedChunk};

fn spawn(behavior: MockBehavior) -> MockHandle {
    MockInstrument::spawn(MockConfig::default().with_behavior(behavior)).expect("mock should start")
}

fn connect(mock: &MockHandle, timeout: Duration) -> SemClient {
    SemClient::builder(mock.endpoint().with_timeout(timeout))
        .config(ClientConfig {
            settle_poll_interval: Duration::from_millis(5),
            data_read_timeout: Duration::from_millis(50),
            ..ClientConfig::default()
        })
        .connect()
        .expect("client should connect")
}

fn scripted(chunks: Vec<PlannedChunk>) -> MockBehavior {
    MockBehavior::default().with_chunk_plan(ChunkPlan::Scripted(chunks))
}

#[test]
fn three_chunks_reassemble_a_full_image() {
    let mock = spawn(scripted(vec![
        PlannedChunk::new(0, 0, 30_000),
        PlannedChunk::new(0, 30_000, 20_000),
        PlannedChunk::new(0, 50_000, 15_536),
    ]));
    let client = connect(&mock, Duration::from_secs(2));

    let images = client
        .acquire_images(&AcquisitionRequest::new(256, 256, vec![0]))
        .expect("acquisition should succeed");

    assert_eq!(images.len(), 1);
    let image = &images[0];
    assert_eq!((image.channel, image.width, image.height), (0, 256, 256));
    assert!(image.complete);
    assert_eq!(image.data.len(), 65_536);
    assert!(image
        .data
        .iter()
        .enumerate()
        .all(|(offset, &value)| value == pixel(0, offset)));

    let names = mock.command_names();
    assert_eq!(
        names,
        vec![
            TCP_GET_VERSION,
            TCP_REG_DATA_PORT,
            DT_ENABLE,
            GUI_SET_SCANNING,
            SC_STOP_SCAN,
            SC_SCAN_XY,
            GUI_SET_SCANNING,
        ]
    );

    let commands = mock.commands();
    assert_eq!(commands[3].int_arg(), Some(0));
    assert_eq!(commands[6].int_arg(), Some(1));

    let mut scan = WireReader::new(&commands[5].body);
    let args: Vec<i32> = (0..7).map(|_| scan.i32().expect("scan arg")).collect();
    assert_eq!(args, vec![256, 256, 0, 0, 255, 255, 1]);

    let state = mock.state();
    assert!(state.gui_scanning);
    assert!(state.registered_data_port.is_some());
}

#[test]
fn channels_come_back_in_request_order() {
    let mock = spawn(MockBehavior::default().with_chunk_plan(ChunkPlan::Contiguous { chunk_size: 1000 }));
    let client = connect(&mock, Duration::from_secs(2));

    let images = client
        .acquire_images(&AcquisitionRequest::new(64, 64, vec![2, 0]))
        .expect("acquisition should succeed");

    let channels: Vec<i32> = images.iter().map(|i| i.channel).collect();
    assert_eq!(channels, vec![2, 0]);
    for image in &images {
        assert!(image.complete);
        assert_eq!(image.data[4095], pixel(image.channel, 4095));
    }
}

#[test]
fn collection_timeout_returns_the_partial_image() {
    let mock = spawn(scripted(vec![PlannedChunk::new(0, 0, 1000)]));
    let client = connect(&mock, Duration::from_millis(100));

    let started = Instant::now();
    let images = client
        .acquire_images(&AcquisitionRequest::new(64, 64, vec![0]))
        .expect("timeout is not an error");
    assert!(started.elapsed() >= Duration::from_millis(300));

    assert_eq!(images.len(), 1);
    let image = &images[0];
    assert!(!image.complete);
    assert_eq!(image.received, 1000);
    assert_eq!(image.data.len(), 4096);
    assert_eq!(image.data[999], pixel(0, 999));
    assert!(image.data[1000..].iter().all(|&b| b == 0));
    assert!(mock.state().gui_scanning);
}

#[test]
fn silent_channels_are_left_out() {
    let mock = spawn(scripted(vec![PlannedChunk::new(0, 0, 16 * 16)]));
    let client = connect(&mock, Duration::from_millis(100));

    let images = client
        .acquire_images(&AcquisitionRequest::new(16, 16, vec![0, 3]))
        .expect("acquisition should succeed");

    assert_eq!(images.len(), 1);
    assert_eq!(images[0].channel, 0);
}

#[test]
fn gap_chunk_is_dropped_and_stream_still_completes() {
    let mock = spawn(scripted(vec![
        PlannedChunk::new(0, 0, 1000),
        PlannedChunk::new(0, 2000, 1000),
        PlannedChunk::new(0, 1000, 1000),
        PlannedChunk::new(0, 2000, 1072),
    ]));
    let client = connect(&mock, Duration::from_secs(2));

    let images = client
        .acquire_images(&AcquisitionRequest::new(64, 48, vec![0]))
        .expect("acquisition should succeed");

    assert!(images[0].complete);
    assert!(images[0]
        .data
        .iter()
        .enumerate()
        .all(|(offset, &value)| value == pixel(0, offset)));
}

#[test]
fn rejected_scan_still_restores_scanning_mode() {
    let mock = spawn(MockBehavior {
        frame_id: -5,
        ..MockBehavior::default()
    });
    let client = connect(&mock, Duration::from_secs(2));

    let started = Instant::now();
    let err = client
        .acquire_images(&AcquisitionRequest::new(32, 32, vec![0]))
        .expect_err("scan is rejected");
    assert!(matches!(err, ClientError::CommandFailure { code: -5, .. }));
    // No collection deadline was waited out.
    assert!(started.elapsed() < Duration::from_secs(2));

    let commands = mock.commands();
    let last = commands.last().expect("commands recorded");
    assert_eq!(last.name, GUI_SET_SCANNING);
    assert_eq!(last.int_arg(), Some(1));
    assert!(mock.state().gui_scanning);
    assert!(client.is_connected());

    // Nothing was streamed, so nothing waits on the data connection.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(mock.state().chunks_streamed, 0);
    assert_eq!(mock.state().scans, 0);
}

#[test]
fn rejected_scan_setup_aborts_before_the_trigger() {
    let mock = spawn(
        MockBehavior::default()
            .with_failure(SC_STOP_SCAN, -7)
            .with_failure(SC_SET_SPEED, -2),
    );
    let client = connect(&mock, Duration::from_secs(2));

    let err = client
        .acquire_images(&AcquisitionRequest::new(8, 8, vec![0]).with_dwell(3))
        .expect_err("stop scan is rejected");
    match err {
        ClientError::CommandFailure { command, code } => {
            assert_eq!(command, SC_STOP_SCAN);
            assert_eq!(code, -7);
        }
        other => panic!("expected CommandFailure, got {other:?}"),
    }

    let names = mock.command_names();
    assert!(!names.iter().any(|n| n == SC_SET_SPEED || n == SC_SCAN_XY));
    assert_eq!(names.last().map(String::as_str), Some(GUI_SET_SCANNING));
    assert!(mock.state().gui_scanning);
    assert_eq!(mock.state().chunks_streamed, 0);
}

#[test]
fn acquisition_error_wins_over_restore_error() {
    let mock = spawn(
        MockBehavior {
            frame_id: -5,
            ..MockBehavior::default()
        }
        .with_failure_after(GUI_SET_SCANNING, 1, -9),
    );
    let client = connect(&mock, Duration::from_secs(2));

    let err = client
        .acquire_images(&AcquisitionRequest::new(16, 16, vec![0]))
        .expect_err("scan and restore both fail");
    match err {
        ClientError::CommandFailure { command, code } => {
            assert_eq!(command, SC_SCAN_XY);
            assert_eq!(code, -5);
        }
        other => panic!("expected CommandFailure, got {other:?}"),
    }

    let commands = mock.commands();
    let last = commands.last().expect("commands recorded");
    assert_eq!(last.name, GUI_SET_SCANNING);
    assert_eq!(last.int_arg(), Some(1));
    // The restore was refused.
    assert!(!mock.state().gui_scanning);
    assert!(client.is_connected());
}

#[test]
fn dwell_and_frames_are_configured_before_the_trigger() {
    let mock = spawn(MockBehavior::default());
    let client = connect(&mock, Duration::from_secs(2));

    client
        .acquire_images(&AcquisitionRequest::new(8, 8, vec![0]).with_dwell(3).with_frames(4))
        .expect("acquisition should succeed");

    let commands = mock.commands();
    let speed = commands.iter().position(|c| c.name == SC_SET_SPEED).expect("speed set");
    let accum = commands.iter().position(|c| c.name == SC_SET_ACCUM).expect("accum set");
    let trigger = commands.iter().position(|c| c.name == SC_SCAN_XY).expect("scan triggered");
    assert!(speed < trigger && accum < trigger);
    assert_eq!(commands[speed].int_arg(), Some(3));
    assert_eq!(commands[accum].int_arg(), Some(4));
}

#[test]
fn invalid_request_sends_nothing() {
    let mock = spawn(MockBehavior::default());
    let client = connect(&mock, Duration::from_secs(2));

    let request = AcquisitionRequest::new(32, 32, vec![0]).with_roi(Roi {
        left: 0,
        top: 0,
        right: 40,
        bottom: 0,
    });
    let err = client.acquire_images(&request).expect_err("roi out of range");
    assert!(matches!(err, ClientError::InvalidRequest(_)));
    assert_eq!(mock.command_names(), vec![TCP_GET_VERSION]);
}

#[test]
fn second_concurrent_acquisition_is_rejected() {
    let mock = spawn(MockBehavior {
        chunk_plan: ChunkPlan::Contiguous { chunk_size: 64 },
        chunk_delay: Duration::from_millis(20),
        ..MockBehavior::default()
    });
    let client = Arc::new(connect(&mock, Duration::from_secs(2)));

    let first = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.acquire_images(&AcquisitionRequest::new(32, 32, vec![0])))
    };
    thread::sleep(Duration::from_millis(200));

    let err = client
        .acquire_images(&AcquisitionRequest::new(32, 32, vec![0]))
        .expect_err("one acquisition at a time");
    assert!(matches!(err, ClientError::AcquisitionInProgress));

    let images = first
        .join()
        .expect("first acquisition should not panic")
        .expect("first acquisition should succeed");
    assert!(images[0].complete);
}

#[test]
fn cancel_interrupts_collection() {
    let mock = spawn(MockBehavior {
        chunk_plan: ChunkPlan::Contiguous { chunk_size: 16 },
        chunk_delay: Duration::from_millis(50),
        ..MockBehavior::default()
    });
    let client = connect(&mock, Duration::from_secs(10));
    let token = client.cancel_token();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        token.cancel();
    });

    let started = Instant::now();
    let err = client
        .acquire_images(&AcquisitionRequest::new(64, 64, vec![0]))
        .expect_err("cancelled");
    assert!(matches!(err, ClientError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!client.is_connected());

    canceller.join().expect("canceller should finish");
}
