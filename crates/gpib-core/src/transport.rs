//! Raw byte-stream transport beneath the GPIB bridge adapters.
//!
//! A [`Transport`] is a serial line with a non-blocking read side: the bridge
//! adapters never issue a blocking read, they ask for whatever the driver has
//! buffered and poll again later (see [`crate::poll`]). The real implementation
//! is [`SerialTransport`] over the `serialport` crate; tests use
//! [`crate::mock::MockTransport`].
//!
//! # Example
//!
//! ```rust,ignore
//! use gpib_core::transport::{SerialSettings, SerialTransport, Transport};
//!
//! let settings = SerialSettings::new("/dev/ttyUSB0", 460_800);
//! let mut port = SerialTransport::open(&settings)?;
//! port.write(b"++ver\n")?;
//! let pending = port.read_available()?;
//! ```

use crate::error::{GpibError, GpibResult};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, trace};

/// Byte-level contract the bridge adapters are written against.
///
/// No method may block indefinitely. `read_available` returns immediately,
/// possibly with zero bytes.
pub trait Transport: Send {
    /// Write all of `bytes`, returning the count written.
    fn write(&mut self, bytes: &[u8]) -> GpibResult<usize>;

    /// Bytes currently buffered by the driver. Never blocks.
    fn read_available(&mut self) -> GpibResult<Vec<u8>>;

    /// Discard anything waiting in the receive buffer.
    fn flush_input(&mut self) -> GpibResult<()>;

    /// Release the underlying device. Idempotent.
    fn close(&mut self);

    /// Whether the device is still held open.
    fn is_open(&self) -> bool;
}

/// Type-erased boxed transport.
pub type DynTransport = Box<dyn Transport>;

/// Line settings used to open a [`SerialTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl SerialSettings {
    /// 8N1 settings at the given baud rate.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }

    /// Override the character size.
    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }
}

/// Driver-level read timeout. Reads are only issued for bytes already known
/// to be buffered, so this only bounds a misbehaving driver.
const DRIVER_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// [`Transport`] over a local serial port.
pub struct SerialTransport {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open the port described by `settings` and flush its input buffer.
    ///
    /// # Errors
    /// [`GpibError::Open`] when the device is missing, busy, or not
    /// accessible.
    pub fn open(settings: &SerialSettings) -> GpibResult<Self> {
        let port = serialport::new(&settings.path, settings.baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .flow_control(FlowControl::None)
            .timeout(DRIVER_READ_TIMEOUT)
            .open()
            .map_err(|source| GpibError::Open {
                port: settings.path.clone(),
                source,
            })?;

        debug!(
            port = %settings.path,
            baud = settings.baud_rate,
            "Serial port opened"
        );

        let mut transport = Self {
            path: settings.path.clone(),
            port: Some(port),
        };
        transport.flush_input()?;
        Ok(transport)
    }

    fn port_mut(&mut self) -> GpibResult<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(GpibError::NotOpen)
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> GpibResult<usize> {
        let port = self.port_mut()?;
        port.write_all(bytes)?;
        port.flush()?;
        trace!(bytes = bytes.len(), "Serial write");
        Ok(bytes.len())
    }

    fn read_available(&mut self) -> GpibResult<Vec<u8>> {
        let port = self.port_mut()?;
        let waiting = port.bytes_to_read().map_err(std::io::Error::from)? as usize;
        if waiting == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; waiting];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn flush_input(&mut self) -> GpibResult<()> {
        self.port_mut()?
            .clear(ClearBuffer::Input)
            .map_err(std::io::Error::from)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.path, "Serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
