//! National Instruments GPIB-232CV-A passthrough adapter.
//!
//! The 232CV-A is transparent: bytes written to the serial line go straight
//! onto the bus and the instrument's reply comes straight back. The target
//! address is set with DIP switches on the box, so this adapter cannot select
//! it and reports [`GpibBridge::supports_addressing`] as `false`.
//!
//! Serial settings: 38400 baud, 7 data bits, no parity, one stop bit.
//! Default reply terminator is LF.

use crate::config::BridgeConfig;
use crate::GpibBridge;
use gpib_core::clock::system_clock;
use gpib_core::{
    DynTransport, GpibError, GpibResult, ReadRequest, ReplyPoller, SerialSettings,
    SerialTransport, SharedClock,
};
use serialport::DataBits;
use tracing::{debug, info, warn};

const BAUD_RATE: u32 = 38_400;
const DEFAULT_TERMINATOR: u8 = b'\n';

/// Passthrough bridge adapter.
pub struct TransparentAdapter {
    config: BridgeConfig,
    transport: Option<DynTransport>,
    poller: ReplyPoller,
}

impl TransparentAdapter {
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Use `clock` for read timeouts instead of wall time.
    pub fn with_clock(config: BridgeConfig, clock: SharedClock) -> Self {
        Self {
            poller: ReplyPoller::new(clock).with_interval(config.poll_interval()),
            config,
            transport: None,
        }
    }

    /// Line settings for `port`.
    pub fn serial_settings(port: &str) -> SerialSettings {
        SerialSettings::new(port, BAUD_RATE).with_data_bits(DataBits::Seven)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn transport_mut(&mut self) -> GpibResult<&mut DynTransport> {
        self.transport.as_mut().ok_or(GpibError::NotOpen)
    }
}

impl GpibBridge for TransparentAdapter {
    fn name(&self) -> &'static str {
        "National Instruments GPIB-232CV-A"
    }

    fn open(&mut self, port: &str) -> GpibResult<()> {
        let transport = SerialTransport::open(&Self::serial_settings(port))?;
        self.attach(Box::new(transport))
    }

    fn attach(&mut self, mut transport: DynTransport) -> GpibResult<()> {
        if !transport.is_open() {
            return Err(GpibError::NotOpen);
        }
        if self.transport.is_some() {
            self.close();
        }
        transport.flush_input()?;
        self.poller.clear();
        self.transport = Some(transport);
        info!(adapter = self.name(), "GPIB bridge opened");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    fn close(&mut self) -> bool {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            self.poller.clear();
            debug!(adapter = self.name(), "GPIB bridge closed");
        }
        true
    }

    fn write(&mut self, command: &str) -> GpibResult<usize> {
        let transport = self.transport_mut()?;
        debug!(command, "GPIB write");
        transport.write(command.as_bytes())
    }

    fn read(&mut self, request: &ReadRequest, on_poll: &mut dyn FnMut()) -> GpibResult<String> {
        let transport = self.transport.as_mut().ok_or(GpibError::NotOpen)?;
        let frame = self
            .poller
            .poll(&mut **transport, request, DEFAULT_TERMINATOR, on_poll)?;
        Ok(String::from_utf8_lossy(&frame).into_owned())
    }

    fn flush_input(&mut self) -> GpibResult<()> {
        self.poller.clear();
        self.transport_mut()?.flush_input()
    }

    fn self_test(&mut self) -> bool {
        let ok = self.is_open();
        if !ok {
            warn!(adapter = self.name(), "Self-test failed: port not open");
        }
        ok
    }

    fn supports_addressing(&self) -> bool {
        false
    }

    fn default_terminator(&self) -> u8 {
        DEFAULT_TERMINATOR
    }
}

impl Drop for TransparentAdapter {
    fn drop(&mut self) {
        if self.transport.is_some() {
            self.close();
        }
    }
}
