//! Galvant GPIB-USB command-prefixed adapter.
//!
//! The bridge speaks a small control dialect on the same serial line as the
//! instrument traffic: lines starting with `++` configure the bridge, all other
//! lines are forwarded to the addressed instrument. Every write is terminated
//! with LF. The bridge runs with auto-read off, so each read first asks it to
//! dump the instrument's buffered reply.
//!
//! ## Session setup
//!
//! On open the adapter disables auto-read, sets the bridge read timeout and
//! EOS mode, clears the interface, addresses the analyzer and locks out the
//! front panel. Each step is followed by a short settle; the address change
//! gets a longer one. Closing clears the interface again and returns the
//! analyzer to local control.
//!
//! Serial settings: 460800 baud, 8N1. Default reply terminator is CR.

use crate::config::{with_arg, BridgeConfig};
use crate::GpibBridge;
use gpib_core::clock::system_clock;
use gpib_core::{
    DynTransport, GpibError, GpibResult, ReadRequest, ReplyPoller, SerialSettings,
    SerialTransport, SharedClock,
};
use std::time::Duration;
use tracing::{debug, info, warn};

const BAUD_RATE: u32 = 460_800;
const DEFAULT_TERMINATOR: u8 = b'\r';
const SELF_TEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Command-prefixed bridge adapter.
pub struct PrefixedAdapter {
    config: BridgeConfig,
    transport: Option<DynTransport>,
    poller: ReplyPoller,
    clock: SharedClock,
}

impl PrefixedAdapter {
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Use `clock` for settles and read timeouts instead of wall time.
    pub fn with_clock(config: BridgeConfig, clock: SharedClock) -> Self {
        Self {
            poller: ReplyPoller::new(clock.clone()).with_interval(config.poll_interval()),
            config,
            transport: None,
            clock,
        }
    }

    /// Line settings for `port`.
    pub fn serial_settings(port: &str) -> SerialSettings {
        SerialSettings::new(port, BAUD_RATE)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The initialization sequence with the pause after each command.
    fn init_sequence(&self) -> Vec<(String, Duration)> {
        let c = &self.config;
        let settle = Duration::from_millis(c.settle_ms);
        vec![
            (with_arg(&c.commands.auto, u8::from(c.auto_mode)), settle),
            (with_arg(&c.commands.read_timeout, c.read_timeout_ms), settle),
            (with_arg(&c.commands.eos, c.eos_mode.arg()), settle),
            (c.commands.interface_clear.clone(), settle),
            (
                with_arg(&c.commands.address, c.target_address),
                Duration::from_millis(c.address_settle_ms),
            ),
            (c.commands.lockout.clone(), settle),
        ]
    }

    fn send_line(&mut self, line: &str) -> GpibResult<usize> {
        let transport = self.transport.as_mut().ok_or(GpibError::NotOpen)?;
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        transport.write(&bytes)
    }

    fn initialize(&mut self) -> GpibResult<()> {
        for (command, settle) in self.init_sequence() {
            debug!(command = %command, "Bridge init");
            self.send_line(&command)?;
            self.clock.sleep(settle);
        }
        Ok(())
    }
}

impl GpibBridge for PrefixedAdapter {
    fn name(&self) -> &'static str {
        "Galvant GPIB USB Adapter"
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

        if let Err(e) = self.initialize() {
            warn!(adapter = self.name(), error = %e, "Bridge initialization failed");
            if let Some(mut transport) = self.transport.take() {
                transport.close();
            }
            return Err(e);
        }

        info!(
            adapter = self.name(),
            address = self.config.target_address,
            "GPIB bridge opened"
        );
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    /// Both teardown commands are attempted even if the first one fails.
    fn close(&mut self) -> bool {
        if self.transport.is_none() {
            return true;
        }

        let mut clean = true;
        let teardown = [
            self.config.commands.interface_clear.clone(),
            self.config.commands.local.clone(),
        ];
        for command in &teardown {
            if let Err(e) = self.send_line(command) {
                warn!(command = %command, error = %e, "Bridge teardown command failed");
                clean = false;
            }
        }

        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.poller.clear();
        debug!(adapter = self.name(), clean, "GPIB bridge closed");
        clean
    }

    fn write(&mut self, command: &str) -> GpibResult<usize> {
        debug!(command, "GPIB write");
        self.send_line(command)
    }

    fn read(&mut self, request: &ReadRequest, on_poll: &mut dyn FnMut()) -> GpibResult<String> {
        if !self.poller.has_frame(request, DEFAULT_TERMINATOR) {
            let read_command = self.config.commands.read.clone();
            self.send_line(&read_command)?;
        }

        let transport = self.transport.as_mut().ok_or(GpibError::NotOpen)?;
        let frame = self
            .poller
            .poll(&mut **transport, request, DEFAULT_TERMINATOR, on_poll)?;
        Ok(String::from_utf8_lossy(&frame).into_owned())
    }

    fn flush_input(&mut self) -> GpibResult<()> {
        self.poller.clear();
        self.transport
            .as_mut()
            .ok_or(GpibError::NotOpen)?
            .flush_input()
    }

    fn self_test(&mut self) -> bool {
        let version = self.config.commands.version.clone();
        match self.send_line(&version) {
            Ok(n) if n == version.len() + 1 => {}
            Ok(n) => {
                warn!(sent = n, "Self-test failed: short write");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Self-test failed: write error");
                return false;
            }
        }

        let request = ReadRequest::until_terminator(SELF_TEST_TIMEOUT).with_terminator(b'\r');
        match self.read(&request, &mut || {}) {
            Ok(reply) if reply.starts_with(&self.config.version_banner) => {
                info!(version = %reply.trim_end(), "Bridge self-test passed");
                true
            }
            Ok(reply) => {
                warn!(reply = %reply.trim_end(), "Self-test failed: unexpected version reply");
                false
            }
            Err(e) => {
                warn!(error = %e, "Self-test failed: no version reply");
                false
            }
        }
    }

    fn supports_addressing(&self) -> bool {
        true
    }

    fn default_terminator(&self) -> u8 {
        DEFAULT_TERMINATOR
    }
}

impl Drop for PrefixedAdapter {
    fn drop(&mut self) {
        if self.transport.is_some() {
            self.close();
        }
    }
}
