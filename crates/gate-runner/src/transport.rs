//! Byte channels to the gate device.
//!
//! The session only needs something it can read and write bytes on. Serial
//! ports and TCP sockets are opened from a [`TransportConfig`]; tests hand in
//! an in-memory duplex instead.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::time::Duration;

use gate_protocol::LineFramer;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, trace};

use crate::error::{GateError, GateResult};

/// Baud rate the gate firmware runs at.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Upper bound on reaching a TCP endpoint.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK_SIZE: usize = 256;

/// A bidirectional byte stream to the device.
pub trait DeviceIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DeviceIo for T {}

pub type BoxedIo = Box<dyn DeviceIo>;

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

/// Where the device is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// A local serial port (USB-UART bridge).
    Serial {
        path: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// A TCP endpoint, such as `gatectl emulate` or a serial-over-network bridge.
    Tcp { address: String },
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::Serial { path, baud_rate } => {
                write!(f, "serial {}@{}", path, baud_rate)
            }
            TransportConfig::Tcp { address } => write!(f, "tcp {}", address),
        }
    }
}

/// Open the configured transport.
pub async fn open(config: &TransportConfig) -> GateResult<BoxedIo> {
    let unavailable = |reason: String| GateError::TransportUnavailable {
        target: config.to_string(),
        reason,
    };

    match config {
        TransportConfig::Serial { path, baud_rate } => {
            let port = tokio_serial::new(path, *baud_rate)
                .open_native_async()
                .map_err(|e| unavailable(e.to_string()))?;
            info!("opened serial port {} at {} baud", path, baud_rate);
            Ok(Box::new(port))
        }
        TransportConfig::Tcp { address } => {
            let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
                .await
                .map_err(|_| unavailable(format!("no answer within {:?}", CONNECT_TIMEOUT)))?
                .map_err(|e| unavailable(e.to_string()))?;
            stream.set_nodelay(true).map_err(|e| unavailable(e.to_string()))?;
            info!("connected to {}", address);
            Ok(Box::new(stream))
        }
    }
}

/// Reads complete lines from a byte stream.
pub struct LineReader<R> {
    inner: R,
    framer: LineFramer,
    pending: VecDeque<String>,
    buf: [u8; READ_CHUNK_SIZE],
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        LineReader {
            inner,
            framer: LineFramer::new(),
            pending: VecDeque::new(),
            buf: [0u8; READ_CHUNK_SIZE],
        }
    }

    /// Next complete line, or `None` at end of stream.
    ///
    /// A partial line left in the buffer at end of stream is dropped.
    /// Cancel safe: a line is only removed from the queue when it is returned.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }

            let n = self.inner.read(&mut self.buf).await?;
            if n == 0 {
                let dropped = self.framer.reset();
                if dropped > 0 {
                    debug!("stream closed with {} bytes of partial line", dropped);
                }
                return Ok(None);
            }
            trace!("read {} bytes", n);
            self.pending.extend(self.framer.feed(&self.buf[..n]));
        }
    }
}

/// Writes newline-terminated lines to a byte stream.
pub struct LineWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        LineWriter { inner }
    }

    /// Write `bytes` as-is and flush.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await
    }

    /// Write one line, appending the terminator, and flush.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.write_raw(&LineFramer::encode_line(line)).await
    }

    /// Shut down the write half.
    pub async fn close(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_reassembles_split_lines() {
        let (client, mut device) = tokio::io::duplex(64);
        let mut reader = LineReader::new(client);

        device.write_all(b"STATUS:GATE:OP").await.unwrap();
        device.write_all(b"EN\nEVENT:IN,IR\nSTAT").await.unwrap();
        drop(device);

        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("STATUS:GATE:OPEN"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("EVENT:IN,IR"));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_writer_appends_terminator() {
        let (client, device) = tokio::io::duplex(64);
        let mut writer = LineWriter::new(client);
        let mut reader = LineReader::new(device);

        writer.write_line("OPEN").await.unwrap();
        writer.write_raw(b"TIMEOUT:15\n").await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("OPEN"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("TIMEOUT:15"));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_open_unreachable_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = open(&TransportConfig::Tcp { address }).await.err().unwrap();
        assert!(matches!(err, GateError::TransportUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_open_missing_serial_port() {
        let config = TransportConfig::Serial {
            path: "/dev/does-not-exist-gate".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        };
        let err = open(&config).await.err().unwrap();
        assert!(matches!(err, GateError::TransportUnavailable { .. }));
        assert!(err.to_string().contains("/dev/does-not-exist-gate"));
    }

    #[test]
    fn test_display() {
        let serial = TransportConfig::Serial {
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
        };
        assert_eq!(serial.to_string(), "serial /dev/ttyUSB0@9600");
    }
}
