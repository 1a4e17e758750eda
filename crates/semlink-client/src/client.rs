use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use semlink_frame::commands::TCP_GET_VERSION;
use semlink_frame::WireReader;
use semlink_transport::{Endpoint, SemStream};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::clock::{Clock, SystemClock};
use crate::command::CommandChannel;
use crate::config::ClientConfig;
use crate::data::DataChannel;
use crate::error::{ClientError, Result};
use crate::ops::ProtocolVersion;
use crate::settle::{SettleWaiter, WaitMask};

/// Builder for [`SemClient`].
pub struct SemClientBuilder {
    endpoint: Endpoint,
    config: ClientConfig,
    cancel: Option<CancelToken>,
    clock: Option<Arc<dyn Clock>>,
}

impl SemClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a cancellation token with the caller.
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Replace the time source of settle and collect loops.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Open the command connection and read the protocol version.
    ///
    /// The data connection is opened later, on first use.
    pub fn connect(self) -> Result<SemClient> {
        let Self {
            endpoint,
            config,
            cancel,
            clock,
        } = self;
        let cancel = cancel.unwrap_or_default();
        cancel.check()?;

        let stream = endpoint.connect_command()?;
        cancel.register(&stream)?;
        let command_stream = stream.try_clone()?;
        let mut command = CommandChannel::open(stream, endpoint.timeout, config.max_payload_size)?;

        let body = command.send(TCP_GET_VERSION, &[])?;
        let text = WireReader::new(&body).string()?;
        let version = ProtocolVersion::parse(&text).ok_or_else(|| {
            ClientError::Decode(format!("unrecognised protocol version {text:?}"))
        })?;
        info!(addr = %endpoint.command_addr(), %version, "connected");

        let data = DataChannel::new(
            endpoint.clone(),
            config.data_read_timeout,
            config.max_payload_size,
            cancel.clone(),
        );

        Ok(SemClient {
            endpoint,
            config,
            command: Mutex::new(command),
            command_stream,
            data: Mutex::new(data),
            connected: AtomicBool::new(true),
            acquiring: AtomicBool::new(false),
            cancel,
            clock: clock.unwrap_or_else(|| Arc::new(SystemClock)),
            version,
        })
    }
}

/// Controller for one instrument: a command connection and a lazily opened
/// data connection.
///
/// `SemClient` is `Send + Sync`. Commands from any number of threads are
/// serialized through one lock because responses are matched by send order.
/// The data connection has its own lock so image collection never blocks
/// on command traffic.
pub struct SemClient {
    endpoint: Endpoint,
    config: ClientConfig,
    command: Mutex<CommandChannel<SemStream, SemStream>>,
    command_stream: SemStream,
    data: Mutex<DataChannel>,
    connected: AtomicBool,
    pub(crate) acquiring: AtomicBool,
    cancel: CancelToken,
    clock: Arc<dyn Clock>,
    version: ProtocolVersion,
}

impl SemClient {
    /// Connect with default configuration.
    pub fn connect(endpoint: Endpoint) -> Result<Self> {
        Self::builder(endpoint).connect()
    }

    pub fn builder(endpoint: Endpoint) -> SemClientBuilder {
        SemClientBuilder {
            endpoint,
            config: ClientConfig::default(),
            cancel: None,
            clock: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Version reported by the instrument at connect time.
    pub fn protocol_version(&self) -> &ProtocolVersion {
        &self.version
    }

    /// Token that cancels every blocking operation of this client.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Close both connections. Later calls fail with `ConnectionLost`.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(addr = %self.endpoint.command_addr(), "disconnected");
        }
        self.shutdown_sockets();
    }

    /// Send a raw command and return the response body.
    pub fn send(&self, name: &str, body: &[u8]) -> Result<Bytes> {
        self.with_command(|channel| channel.send(name, body))
    }

    /// Send a raw command without asking for a response.
    pub fn send_no_response(&self, name: &str, body: &[u8]) -> Result<()> {
        self.with_command(|channel| channel.send_no_response(name, body))
    }

    /// Send a raw command, then block until the `mask` subsystems settle.
    ///
    /// The command lock is held across the wait so no other command
    /// interleaves with the busy-flag polls. The body is not interpreted, so
    /// the wait runs whatever it says; typed setters skip it on rejection.
    pub fn send_with_wait(&self, name: &str, body: &[u8], mask: WaitMask) -> Result<Bytes> {
        let waiter = self.settle_waiter();
        self.with_command(|channel| {
            let response = channel.send(name, body)?;
            waiter.wait(channel, mask)?;
            Ok(response)
        })
    }

    /// Block until the `mask` subsystems report idle.
    pub fn wait_settled(&self, mask: WaitMask) -> Result<()> {
        let waiter = self.settle_waiter();
        self.with_command(|channel| waiter.wait(channel, mask))
    }

    pub(crate) fn settle_waiter(&self) -> SettleWaiter<'_> {
        SettleWaiter::new(
            self.clock.as_ref(),
            &self.cancel,
            self.config.settle_timeout,
            self.config.settle_poll_interval,
        )
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ClientError::ConnectionLost("not connected".to_string()))
        }
    }

    /// Run `op` under the command lock, tracking fatal outcomes.
    pub(crate) fn with_command<T>(
        &self,
        op: impl FnOnce(&mut CommandChannel<SemStream, SemStream>) -> Result<T>,
    ) -> Result<T> {
        self.ensure_connected()?;
        let result = {
            let mut channel = self
                .command
                .lock()
                .map_err(|_| ClientError::ConnectionLost("command channel poisoned".to_string()))?;
            op(&mut channel)
        };
        self.track(result)
    }

    pub(crate) fn lock_data(&self) -> Result<MutexGuard<'_, DataChannel>> {
        self.data
            .lock()
            .map_err(|_| ClientError::ConnectionLost("data channel poisoned".to_string()))
    }

    /// Turn errors seen after cancellation into `Cancelled` and drop the
    /// connection on fatal ones. Must not be called with the data lock held.
    pub(crate) fn track<T>(&self, result: Result<T>) -> Result<T> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(_) if self.cancel.is_cancelled() => ClientError::Cancelled,
            Err(err) => err,
        };
        if err.is_fatal() {
            if self.connected.swap(false, Ordering::SeqCst) {
                warn!(error = %err, "connection lost");
            }
            self.shutdown_sockets();
        }
        Err(err)
    }

    fn shutdown_sockets(&self) {
        let _ = self.command_stream.shutdown();
        if let Ok(mut data) = self.data.try_lock() {
            data.close();
        }
    }
}

impl Drop for SemClient {
    fn drop(&mut self) {
        self.shutdown_sockets();
    }
}

impl std::fmt::Debug for SemClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemClient")
            .field("endpoint", &self.endpoint)
            .field("version", &self.version)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
