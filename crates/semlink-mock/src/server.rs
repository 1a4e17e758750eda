//! Threaded TCP server for the mock instrument.

use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use semlink_frame::commands::SC_DATA;
use semlink_frame::{CommandName, FrameConfig, FrameError, FrameReader, FrameWriter, ImageChunk, FLAG_RESPONSE};
use semlink_transport::{DataPort, Endpoint};
use tracing::{debug, info, warn};

use crate::behavior::{pixel, MockBehavior};
use crate::state::{InstrumentState, RecordedCommand, ScanJob};

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const SESSION_READ_TIMEOUT: Duration = Duration::from_millis(50);
const DATA_ACCEPT_ATTEMPTS: u32 = 200;

/// Where and how the mock listens.
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub host: String,
    /// `0` picks an ephemeral port.
    pub command_port: u16,
    /// `0` picks an ephemeral port.
    pub data_port: u16,
    pub behavior: MockBehavior,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            command_port: 0,
            data_port: 0,
            behavior: MockBehavior::default(),
        }
    }
}

impl MockConfig {
    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }
}

#[derive(Debug, Default)]
struct Shared {
    behavior: MockBehavior,
    state: InstrumentState,
    log: Vec<RecordedCommand>,
    data_stream: Option<TcpStream>,
}

type SharedState = Arc<Mutex<Shared>>;

fn lock(shared: &SharedState) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock instrument listening on a command and a data port.
pub struct MockInstrument;

impl MockInstrument {
    /// Bind both listeners and serve them on background threads.
    pub fn spawn(config: MockConfig) -> io::Result<MockHandle> {
        let command = TcpListener::bind((config.host.as_str(), config.command_port))?;
        let data = TcpListener::bind((config.host.as_str(), config.data_port))?;
        command.set_nonblocking(true)?;
        data.set_nonblocking(true)?;

        let command_addr = command.local_addr()?;
        let data_addr = data.local_addr()?;
        info!(%command_addr, %data_addr, "mock instrument listening");

        let shared: SharedState = Arc::new(Mutex::new(Shared {
            behavior: config.behavior,
            ..Shared::default()
        }));
        let running = Arc::new(AtomicBool::new(true));

        let threads = vec![
            {
                let shared = Arc::clone(&shared);
                let running = Arc::clone(&running);
                thread::spawn(move || serve_commands(command, shared, running))
            },
            {
                let shared = Arc::clone(&shared);
                let running = Arc::clone(&running);
                thread::spawn(move || serve_data(data, shared, running))
            },
        ];

        Ok(MockHandle {
            command_addr,
            data_addr,
            shared,
            running,
            threads,
        })
    }
}

/// Control handle for a running mock. Dropping it stops the server.
pub struct MockHandle {
    command_addr: SocketAddr,
    data_addr: SocketAddr,
    shared: SharedState,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl MockHandle {
    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }

    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    /// Endpoint pointing a client at this mock.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.command_addr.ip().to_string(), self.command_addr.port())
            .with_data_port(DataPort::Explicit(self.data_addr.port()))
    }

    /// Change the behaviour of the running mock.
    pub fn configure(&self, update: impl FnOnce(&mut MockBehavior)) {
        update(&mut lock(&self.shared).behavior);
    }

    /// Snapshot of the simulated instrument.
    pub fn state(&self) -> InstrumentState {
        lock(&self.shared).state.clone()
    }

    /// Every command received so far, in arrival order.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        lock(&self.shared).log.clone()
    }

    /// Names of every command received so far.
    pub fn command_names(&self) -> Vec<String> {
        lock(&self.shared)
            .log
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Block until the server threads exit.
    pub fn join(mut self) {
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.stop();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn serve_commands(listener: TcpListener, shared: SharedState, running: Arc<AtomicBool>) {
    let mut sessions = Vec::new();
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "command connection accepted");
                let shared = Arc::clone(&shared);
                let running = Arc::clone(&running);
                sessions.push(thread::spawn(move || {
                    if let Err(err) = serve_session(stream, shared, running) {
                        debug!(%peer, error = %err, "command session ended");
                    }
                }));
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                warn!(error = %err, "command accept failed");
                break;
            }
        }
    }
    for session in sessions {
        let _ = session.join();
    }
    info!("mock instrument stopped");
}

fn serve_data(listener: TcpListener, shared: SharedState, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "data connection accepted");
                if stream.set_nonblocking(false).is_ok() {
                    let _ = stream.set_nodelay(true);
                    lock(&shared).data_stream = Some(stream);
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                warn!(error = %err, "data accept failed");
                break;
            }
        }
    }
    if let Some(stream) = lock(&shared).data_stream.take() {
        let _ = stream.shutdown(std::net::Shutdown::Both);
    }
}

fn serve_session(stream: TcpStream, shared: SharedState, running: Arc<AtomicBool>) -> Result<(), FrameError> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let config = FrameConfig {
        read_timeout: Some(SESSION_READ_TIMEOUT),
        ..FrameConfig::default()
    };
    stream.set_read_timeout(config.read_timeout)?;
    let mut reader = FrameReader::with_config(stream.try_clone()?, config.clone());
    let mut writer = FrameWriter::with_config(stream, config);

    while running.load(Ordering::SeqCst) {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(err) if err.is_timeout() => continue,
            Err(FrameError::ConnectionClosed) => return Ok(()),
            Err(err) => return Err(err),
        };

        let (reply, delay, chunk_delay) = {
            let mut guard = lock(&shared);
            let shared = &mut *guard;
            shared.log.push(RecordedCommand {
                name: frame.name.to_string(),
                body: frame.payload.to_vec(),
                wants_response: frame.wants_response(),
            });
            let reply = shared
                .state
                .dispatch(&shared.behavior, frame.name.as_str(), &frame.payload);
            (
                reply,
                shared.behavior.delay_for(frame.name.as_str()),
                shared.behavior.chunk_delay,
            )
        };

        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if let Some(body) = reply.body {
            if frame.wants_response() {
                writer.send(&frame.name, FLAG_RESPONSE, &body)?;
            }
        }
        if let Some(job) = reply.scan {
            let shared = Arc::clone(&shared);
            thread::spawn(move || stream_image(job, shared, chunk_delay));
        }
    }
    Ok(())
}

fn stream_image(job: ScanJob, shared: SharedState, chunk_delay: Duration) {
    let Some(stream) = wait_for_data_stream(&shared) else {
        warn!("scan triggered without a data connection");
        return;
    };
    let name = match CommandName::new(SC_DATA) {
        Ok(name) => name,
        Err(_) => return,
    };

    let mut writer = FrameWriter::new(stream);
    for planned in job.chunks {
        let start = planned.offset as usize;
        let payload: Vec<u8> = (start..start + planned.len)
            .map(|offset| pixel(planned.channel, offset))
            .collect();
        let chunk = ImageChunk {
            channel: planned.channel,
            offset: planned.offset,
            bits_per_pixel: planned.bits_per_pixel,
            payload: Bytes::from(payload),
        };
        let body = match chunk.encode() {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "cannot encode image chunk");
                return;
            }
        };
        if let Err(err) = writer.send(&name, 0, &body) {
            debug!(error = %err, "image stream interrupted");
            return;
        }
        lock(&shared).state.chunks_streamed += 1;
        if !chunk_delay.is_zero() {
            thread::sleep(chunk_delay);
        }
    }
}

/// The data listener polls, so a connection made just before the trigger
/// may not be registered yet.
fn wait_for_data_stream(shared: &SharedState) -> Option<TcpStream> {
    for _ in 0..DATA_ACCEPT_ATTEMPTS {
        let cloned = lock(shared).data_stream.as_ref().map(TcpStream::try_clone);
        match cloned {
            Some(Ok(stream)) => return Some(stream),
            Some(Err(err)) => {
                warn!(error = %err, "cannot clone data connection");
                return None;
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    }
    None
}
