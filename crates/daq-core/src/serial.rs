//! Serial line transport for ASCII command/response devices.
//!
//! This module provides the shared serial types used by driver crates and the
//! [`LineTransport`], which frames commands with a line terminator and reads
//! responses as bursts of fixed-size chunks.
//!
//! # Types
//!
//! - [`SerialPortIO`]: Trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: Type-erased boxed serial port
//! - [`SharedPortUnbuffered`]: Thread-safe shared serial port without buffering
//! - [`LineSettings`]: Framing and read parameters
//! - [`LineTransport`]: Command/response exchange over a shared port
//!
//! # Read termination
//!
//! A burst ends at the first chunk shorter than `chunk_size`. Each chunk waits at
//! most `read_timeout`, so a silent device ends the burst with an empty chunk.
//! A port that reports end-of-file before any reply byte fails the read with
//! [`DaqError::SerialUnexpectedEof`]. The timeout is mandatory: without it the loop has no termination condition and
//! [`LineTransport::read_all`] fails with [`DaqError::Configuration`].
//!
//! # Example
//!
//! ```rust,ignore
//! use daq_core::serial::{LineSettings, LineTransport};
//!
//! let transport = LineTransport::open("/dev/ttyUSB0", 115_200, LineSettings::default(), "iBeam").await?;
//! let reply = transport.communicate("sh pow").await?;
//! ```

use crate::error::{AppResult, DaqError};
use crate::response::decode_response;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Thread-safe shared serial port without buffering.
///
/// Chunked burst reads need direct byte-level access, so the transport does not
/// wrap the port in a `BufReader`.
pub type SharedPortUnbuffered = Arc<Mutex<DynSerial>>;

/// Create a SharedPortUnbuffered from a type-erased serial port.
pub fn wrap_shared_unbuffered(port: DynSerial) -> SharedPortUnbuffered {
    Arc::new(Mutex::new(port))
}

// =============================================================================
// Serial Port Utilities
// =============================================================================

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control. Failure to open the port
/// is reported as [`DaqError::Connection`].
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> AppResult<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                DaqError::Connection(format!(
                    "Failed to open {} serial port {}: {}",
                    device_name_owned, port_path_owned, e
                ))
            })
    })
    .await
    .map_err(|e| DaqError::Connection(format!("spawn_blocking for serial port opening failed: {e}")))?
}

/// Names of the serial ports the OS reports.
#[cfg(feature = "serial")]
pub fn available_ports() -> AppResult<Vec<String>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| DaqError::Connection(format!("Failed to enumerate serial ports: {e}")))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Drain stale data from a serial port buffer.
///
/// Reads and discards until nothing arrives within `timeout_ms`. Returns the
/// number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total_discarded += n,
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    total_discarded
}

/// Read one chunk of up to `chunk_size` bytes, waiting at most `timeout`.
///
/// Returns fewer bytes than requested when the deadline passes or the port
/// reports end-of-file. The flag is set in the latter case.
async fn read_chunk<R: AsyncRead + Unpin>(
    port: &mut R,
    chunk_size: usize,
    timeout: Duration,
) -> AppResult<(Vec<u8>, bool)> {
    let mut chunk = vec![0u8; chunk_size];
    let mut filled = 0usize;
    let mut end_of_file = false;
    let deadline = tokio::time::Instant::now() + timeout;

    while filled < chunk_size {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, port.read(&mut chunk[filled..])).await {
            Ok(Ok(0)) => {
                end_of_file = true;
                break;
            }
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => break,
            Ok(Err(e)) => return Err(DaqError::Io(e)),
            Err(_) => break,
        }
    }

    chunk.truncate(filled);
    Ok((chunk, end_of_file))
}

/// Read a full response burst from `port`.
///
/// Chunks of `chunk_size` bytes are concatenated until one comes back short.
/// A port that reaches end-of-file before any byte of the burst arrived yields
/// [`DaqError::SerialUnexpectedEof`]; a silent but open port yields an empty burst.
pub async fn read_burst<R: AsyncRead + Unpin>(
    port: &mut R,
    chunk_size: usize,
    timeout: Option<Duration>,
) -> AppResult<Vec<u8>> {
    let timeout = timeout.ok_or_else(|| {
        DaqError::Configuration("serial port needs a read timeout for burst reads".into())
    })?;
    if chunk_size == 0 {
        return Err(DaqError::Configuration("chunk_size must be at least 1".into()));
    }

    let mut buffer = Vec::with_capacity(chunk_size);
    loop {
        let (chunk, end_of_file) = read_chunk(port, chunk_size, timeout).await?;
        if end_of_file && buffer.is_empty() && chunk.is_empty() {
            return Err(DaqError::SerialUnexpectedEof);
        }
        let complete = chunk.len() < chunk_size;
        buffer.extend_from_slice(&chunk);
        if complete {
            break;
        }
    }
    Ok(buffer)
}

// =============================================================================
// Line Transport
// =============================================================================

/// Framing and read parameters for a [`LineTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct LineSettings {
    /// Appended to every command.
    pub terminator: String,
    /// Bytes requested per read.
    pub chunk_size: usize,
    /// Wait per chunk. `None` is a configuration error on the first read.
    pub read_timeout: Option<Duration>,
    /// Number of trailing characters (the prompt) stripped from each response.
    pub suffix_len: usize,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            terminator: "\r\n".to_string(),
            chunk_size: 200,
            read_timeout: Some(Duration::from_millis(30)),
            suffix_len: 5,
        }
    }
}

/// ASCII command/response transport over a shared serial port.
///
/// Each exchange holds the port lock for the write and the whole read, so
/// commands from different tasks never interleave on the wire. The port is
/// closed when the last clone of the transport is dropped.
#[derive(Clone)]
pub struct LineTransport {
    port: SharedPortUnbuffered,
    settings: LineSettings,
}

impl LineTransport {
    /// Wrap an already opened port.
    pub fn new(port: DynSerial, settings: LineSettings) -> Self {
        Self {
            port: wrap_shared_unbuffered(port),
            settings,
        }
    }

    /// Open `port_path` at `baud_rate` (8N1) and wrap it.
    #[cfg(feature = "serial")]
    pub async fn open(
        port_path: &str,
        baud_rate: u32,
        settings: LineSettings,
        device_name: &str,
    ) -> AppResult<Self> {
        let port = open_serial_async(port_path, baud_rate, device_name).await?;
        tracing::debug!(port = port_path, baud_rate, "{} serial port opened", device_name);
        Ok(Self::new(Box::new(port), settings))
    }

    /// Framing settings in use.
    pub fn settings(&self) -> &LineSettings {
        &self.settings
    }

    /// Discard anything already waiting on the line.
    pub async fn drain(&self, timeout_ms: u64) -> usize {
        let mut port = self.port.lock().await;
        let discarded = drain_serial_buffer(&mut *port, timeout_ms).await;
        if discarded > 0 {
            tracing::debug!("Discarded {} stale bytes", discarded);
        }
        discarded
    }

    /// Write one command line without reading a response.
    pub async fn write_line(&self, command: &str) -> AppResult<()> {
        let mut port = self.port.lock().await;
        Self::write_framed(&mut *port, command, &self.settings.terminator).await
    }

    /// Read one response burst without sending anything.
    pub async fn read_all(&self) -> AppResult<Vec<u8>> {
        let mut port = self.port.lock().await;
        read_burst(&mut *port, self.settings.chunk_size, self.settings.read_timeout).await
    }

    /// Send a command and return the decoded response with the prompt stripped.
    pub async fn communicate(&self, command: &str) -> AppResult<String> {
        let mut port = self.port.lock().await;
        Self::write_framed(&mut *port, command, &self.settings.terminator).await?;
        let raw =
            read_burst(&mut *port, self.settings.chunk_size, self.settings.read_timeout).await?;
        let text = decode_response(&raw, self.settings.suffix_len);
        tracing::trace!(command, response = %text.trim(), "serial exchange");
        Ok(text)
    }

    async fn write_framed(port: &mut DynSerial, command: &str, terminator: &str) -> AppResult<()> {
        let line = format!("{}{}", command, terminator);
        port.write_all(line.as_bytes()).await.map_err(disconnected_or_io)?;
        port.flush().await.map_err(disconnected_or_io)?;
        Ok(())
    }
}

/// A write to a port whose far end is gone reports the missing connection.
fn disconnected_or_io(e: std::io::Error) -> DaqError {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionReset => DaqError::SerialPortNotConnected,
        _ => DaqError::Io(e),
    }
}

impl std::fmt::Debug for LineTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineTransport")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
