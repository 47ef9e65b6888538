//! Analyzer session: connect, measure, sweep, disconnect.
//!
//! An [`AnalyzerSession`] owns at most one open bridge. Connecting runs the
//! full bring-up sequence:
//!
//! 1. validate the bridge settings (no I/O on failure)
//! 2. open the serial port and initialize the bridge
//! 3. warn if the bridge cannot select the GPIB address itself
//! 4. bridge self-test
//! 5. flush stale input
//! 6. level check: the analyzer must answer a 1 kHz / 0.1 V measurement with
//!    a 12-byte reply
//!
//! Any failure closes the bridge again and returns the error; its `Display`
//! is the reason to show the user. Once connected, [`run_sweep`] and
//! [`single_measurement`] drive the analyzer through the
//! [`daq_driver_hp8903`] engine.
//!
//! [`run_sweep`]: AnalyzerSession::run_sweep
//! [`single_measurement`]: AnalyzerSession::single_measurement

use crate::config::{AnalyzerConfig, MeasurementConfig};
use daq_driver_hp8903::{
    codec, measure, MeasurementResult, MeasurementSpec, SweepEngine, SweepPlan, SweepPoint,
    SweepSeries, SweepState,
};
use gpib_bridge::{Bridge, BridgeConfig, BridgeKind, GpibBridge};
use gpib_core::clock::system_clock;
use gpib_core::{DynTransport, GpibError, GpibResult, ReadRequest, SharedClock};
use tracing::{error, info, warn};

/// Length of the analyzer's reply to the level check (`+1.000E-01\r\n`).
const LEVEL_CHECK_REPLY_LEN: usize = 12;

/// What a successful connect found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReport {
    /// Adapter name.
    pub adapter: &'static str,
    /// Bridge kind that was opened.
    pub kind: BridgeKind,
    /// Configured GPIB address of the analyzer.
    pub address: u8,
    /// Whether the bridge selected the address itself. When `false` the
    /// address must be set on the bridge hardware.
    pub addressed: bool,
    /// Raw reply to the level check.
    pub level_reply: String,
}

/// One analyzer connection.
pub struct AnalyzerSession {
    bridge: Option<Bridge>,
    bridge_defaults: BridgeConfig,
    timing: MeasurementConfig,
    engine: SweepEngine,
    clock: SharedClock,
}

impl Default for AnalyzerSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzerSession {
    /// Session with default bridge settings and timing.
    pub fn new() -> Self {
        Self::with_clock(BridgeConfig::default(), MeasurementConfig::default(), system_clock())
    }

    /// Session using the `[bridge]` and `[measurement]` sections of `config`.
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        let mut bridge_defaults = config.bridge.to_bridge_config();
        bridge_defaults.poll_interval_ms = config.measurement.poll_interval_ms;
        Self::with_clock(bridge_defaults, config.measurement.clone(), system_clock())
    }

    /// Session on an explicit clock.
    pub fn with_clock(
        bridge_defaults: BridgeConfig,
        timing: MeasurementConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            bridge: None,
            bridge_defaults,
            engine: SweepEngine::new().with_timeout(timing.timeout()),
            timing,
            clock,
        }
    }

    /// Open `port` with a bridge of `kind` and bring the analyzer at
    /// `address` up.
    pub fn connect(&mut self, kind: BridgeKind, address: u8, port: &str) -> GpibResult<ConnectReport> {
        self.connect_using(kind, address, |bridge| bridge.open(port))
    }

    /// [`connect`](Self::connect) over an already-open transport.
    pub fn connect_with_transport(
        &mut self,
        kind: BridgeKind,
        address: u8,
        transport: DynTransport,
    ) -> GpibResult<ConnectReport> {
        self.connect_using(kind, address, |bridge| bridge.attach(transport))
    }

    fn connect_using<F>(&mut self, kind: BridgeKind, address: u8, open: F) -> GpibResult<ConnectReport>
    where
        F: FnOnce(&mut Bridge) -> GpibResult<()>,
    {
        let config = BridgeConfig {
            target_address: address,
            ..self.bridge_defaults.clone()
        };
        config.validate()?;

        if self.bridge.is_some() {
            self.disconnect();
        }

        let mut bridge = Bridge::with_clock(kind, config, self.clock.clone());
        if let Err(e) = open(&mut bridge) {
            error!(adapter = bridge.name(), error = %e, "Failed to open GPIB bridge");
            bridge.close();
            return Err(e);
        }

        let addressed = bridge.supports_addressing();
        if !addressed {
            warn!(
                adapter = bridge.name(),
                address,
                "Bridge cannot select the GPIB address; set it on the bridge hardware"
            );
        }

        match self.bring_up(&mut bridge) {
            Ok(level_reply) => {
                info!(
                    adapter = bridge.name(),
                    address,
                    reply = %level_reply.trim_end(),
                    "HP 8903 connected"
                );
                let report = ConnectReport {
                    adapter: bridge.name(),
                    kind,
                    address,
                    addressed,
                    level_reply,
                };
                self.bridge = Some(bridge);
                Ok(report)
            }
            Err(e) => {
                error!(adapter = bridge.name(), error = %e, "HP 8903 connect failed");
                bridge.close();
                Err(e)
            }
        }
    }

    /// Self-test, flush and level check on a freshly opened bridge.
    fn bring_up(&self, bridge: &mut Bridge) -> GpibResult<String> {
        if !bridge.self_test() {
            return Err(GpibError::SelfTest(bridge.name().to_string()));
        }
        bridge.flush_input()?;

        bridge.write(&codec::encode(&MeasurementSpec::level_check()))?;
        bridge.read(
            &ReadRequest::exact(LEVEL_CHECK_REPLY_LEN, self.timing.init_timeout()),
            &mut || {},
        )
    }

    /// Close the bridge, returning the analyzer to local control.
    ///
    /// Returns `false` if a teardown step failed; the session is
    /// disconnected either way.
    pub fn disconnect(&mut self) -> bool {
        match self.bridge.take() {
            Some(mut bridge) => {
                let clean = bridge.close();
                info!(adapter = bridge.name(), clean, "HP 8903 disconnected");
                clean
            }
            None => true,
        }
    }

    /// Whether a bridge is open.
    pub fn is_connected(&self) -> bool {
        self.bridge.as_ref().is_some_and(|b| b.is_open())
    }

    /// The open bridge, if any.
    pub fn bridge(&self) -> Option<&Bridge> {
        self.bridge.as_ref()
    }

    /// Connection state with a one-line description.
    pub fn status(&self) -> (bool, String) {
        match &self.bridge {
            Some(bridge) => bridge.status(),
            None => (false, "Not connected".to_string()),
        }
    }

    pub fn sweep_state(&self) -> &SweepState {
        self.engine.state()
    }

    /// Run a sweep, calling `on_step` after every point.
    ///
    /// # Errors
    /// [`GpibError::NotOpen`] without calling `on_step` when not connected;
    /// otherwise whatever [`SweepEngine::run`] returns.
    pub fn run_sweep<F>(
        &mut self,
        plan: &SweepPlan,
        template: &MeasurementSpec,
        on_step: F,
    ) -> GpibResult<SweepSeries>
    where
        F: FnMut(&SweepPoint),
    {
        self.run_sweep_with_hook(plan, template, on_step, &mut || {})
    }

    /// [`run_sweep`](Self::run_sweep) with a hook called while waiting for
    /// each reply.
    pub fn run_sweep_with_hook<F>(
        &mut self,
        plan: &SweepPlan,
        template: &MeasurementSpec,
        on_step: F,
        on_poll: &mut dyn FnMut(),
    ) -> GpibResult<SweepSeries>
    where
        F: FnMut(&SweepPoint),
    {
        let bridge = self.bridge.as_mut().ok_or(GpibError::NotOpen)?;
        self.engine
            .run_with_hook(bridge, plan, template, on_step, on_poll)
    }

    /// Take one measurement with `spec`.
    pub fn single_measurement(&mut self, spec: &MeasurementSpec) -> GpibResult<MeasurementResult> {
        spec.validate()?;
        let timeout = self.timing.timeout();
        let bridge = self.bridge.as_mut().ok_or(GpibError::NotOpen)?;
        measure(bridge, spec, timeout, &mut || {})
    }
}
