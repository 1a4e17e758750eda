use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::SemStream;

/// Well-known command port of the instrument's remote-control server.
pub const DEFAULT_COMMAND_PORT: u16 = 8300;

/// Offset from the command port used when no explicit data port is given.
pub const DEFAULT_DATA_PORT_OFFSET: u16 = 1;

/// Where the data connection lives relative to the command connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataPort {
    /// Command port plus a fixed offset.
    Offset(u16),
    /// An explicit port number.
    Explicit(u16),
}

impl Default for DataPort {
    fn default() -> Self {
        DataPort::Offset(DEFAULT_DATA_PORT_OFFSET)
    }
}

/// Connection endpoint of one instrument.
///
/// Owned by exactly one client; reconnecting means building a fresh client
/// from the same (cloned) endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    /// Host name or IP address of the instrument PC.
    pub host: String,
    /// Command connection port.
    pub command_port: u16,
    /// Data connection port.
    pub data_port: DataPort,
    /// Per-operation timeout for command round trips.
    #[serde(with = "duration_ms", rename = "timeout_ms")]
    pub timeout: Duration,
    /// Timeout for establishing each TCP connection.
    #[serde(with = "duration_ms", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            command_port: DEFAULT_COMMAND_PORT,
            data_port: DataPort::default(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl Endpoint {
    /// Endpoint for `host:command_port` with default data port and timeouts.
    pub fn new(host: impl Into<String>, command_port: u16) -> Self {
        Self {
            host: host.into(),
            command_port,
            ..Self::default()
        }
    }

    /// Override the data port.
    pub fn with_data_port(mut self, data_port: DataPort) -> Self {
        self.data_port = data_port;
        self
    }

    /// Override the command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolved data port number.
    pub fn data_port_number(&self) -> Result<u16> {
        match self.data_port {
            DataPort::Explicit(port) => Ok(port),
            DataPort::Offset(offset) => {
                self.command_port
                    .checked_add(offset)
                    .ok_or(TransportError::PortOverflow {
                        port: self.command_port,
                        offset,
                    })
            }
        }
    }

    /// Open the command connection (blocking, bounded by `connect_timeout`).
    pub fn connect_command(&self) -> Result<SemStream> {
        let stream = self.connect_port(self.command_port)?;
        info!(host = %self.host, port = self.command_port, "connected command channel");
        Ok(stream)
    }

    /// Open the data connection (blocking, bounded by `connect_timeout`).
    pub fn connect_data(&self) -> Result<SemStream> {
        let port = self.data_port_number()?;
        let stream = self.connect_port(port)?;
        info!(host = %self.host, port, "connected data channel");
        Ok(stream)
    }

    fn connect_port(&self, port: u16) -> Result<SemStream> {
        let label = format!("{}:{}", self.host, port);
        let addrs: Vec<SocketAddr> = (self.host.as_str(), port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Resolve {
                addr: label.clone(),
                source,
            })?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            debug!(%addr, "connecting");
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    let stream = SemStream::from_tcp(stream);
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(TransportError::Connect {
            addr: label,
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "host resolved to no addresses",
                )
            }),
        })
    }

    /// `host:port` of the command connection, for diagnostics.
    pub fn command_addr(&self) -> String {
        format!("{}:{}", self.host, self.command_port)
    }
}

/// Serialize `Duration` as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn data_port_defaults_to_offset() {
        let endpoint = Endpoint::new("localhost", 8300);
        assert_eq!(endpoint.data_port_number().unwrap(), 8301);
    }

    #[test]
    fn explicit_data_port_wins() {
        let endpoint = Endpoint::new("localhost", 8300).with_data_port(DataPort::Explicit(9000));
        assert_eq!(endpoint.data_port_number().unwrap(), 9000);
    }

    #[test]
    fn data_port_offset_overflow_is_reported() {
        let endpoint = Endpoint::new("localhost", u16::MAX);
        assert!(matches!(
            endpoint.data_port_number(),
            Err(TransportError::PortOverflow { .. })
        ));
    }

    #[test]
    fn connect_command_and_data() {
        let command = TcpListener::bind("127.0.0.1:0").unwrap();
        let data = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::new("127.0.0.1", command.local_addr().unwrap().port())
            .with_data_port(DataPort::Explicit(data.local_addr().unwrap().port()));

        let handle = std::thread::spawn(move || {
            let (mut conn, _) = command.accept().unwrap();
            let mut buf = [0u8; 5];
            conn.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"hello");
            let _ = data.accept().unwrap();
        });

        let mut stream = endpoint.connect_command().unwrap();
        stream.write_all(b"hello").unwrap();
        let data_stream = endpoint.connect_data().unwrap();
        assert!(data_stream.local_addr().unwrap().port() > 0);

        handle.join().unwrap();
    }

    #[test]
    fn connect_refused_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Endpoint::new("127.0.0.1", port).connect_command();
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn endpoint_json_uses_millisecond_durations() {
        let endpoint = Endpoint::new("sem.lab", 8300).with_timeout(Duration::from_millis(1500));
        let json = serde_json::to_value(&endpoint).unwrap();
        assert_eq!(json["timeout_ms"], 1500);
        assert_eq!(json["data_port"]["offset"], 1);

        let parsed: Endpoint =
            serde_json::from_str(r#"{"host":"10.0.0.7","data_port":{"explicit":8400}}"#).unwrap();
        assert_eq!(parsed.host, "10.0.0.7");
        assert_eq!(parsed.command_port, DEFAULT_COMMAND_PORT);
        assert_eq!(parsed.data_port, DataPort::Explicit(8400));
    }
}
