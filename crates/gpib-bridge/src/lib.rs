//! Serial-to-GPIB bridge adapters.
//!
//! Two bridges are supported, each behind the [`GpibBridge`] trait:
//!
//! - [`PrefixedAdapter`]: Galvant GPIB-USB, configured in-band with `++`
//!   commands and able to address the analyzer
//! - [`TransparentAdapter`]: NI GPIB-232CV-A, a raw passthrough addressed by
//!   DIP switches
//!
//! The set is closed, so the selectable handle [`Bridge`] is an enum with
//! static dispatch rather than a trait object.
//!
//! # Example
//!
//! ```rust,ignore
//! use gpib_bridge::{Bridge, BridgeConfig, BridgeKind, GpibBridge};
//! use gpib_core::ReadRequest;
//! use std::time::Duration;
//!
//! let mut bridge = Bridge::new(BridgeKind::Prefixed, BridgeConfig::for_address(28));
//! bridge.open("/dev/ttyUSB0")?;
//! bridge.write("FR1000.0HZAP0.1VLM1LNT3")?;
//! let reply = bridge.read(&ReadRequest::until_terminator(Duration::from_millis(2500)), &mut || {})?;
//! bridge.close();
//! ```

pub mod config;
pub mod prefixed;
pub mod transparent;

pub use config::{BridgeCommands, BridgeConfig, BridgeKind, EosMode, MAX_GPIB_ADDRESS};
pub use prefixed::PrefixedAdapter;
pub use transparent::TransparentAdapter;

use enum_dispatch::enum_dispatch;
use gpib_core::clock::system_clock;
use gpib_core::{DynTransport, GpibResult, ReadRequest, SharedClock};

/// Operations every bridge adapter provides.
///
/// An adapter is Closed until [`open`](GpibBridge::open) or
/// [`attach`](GpibBridge::attach) succeeds, then Open until
/// [`close`](GpibBridge::close). I/O on a closed adapter fails with
/// [`gpib_core::GpibError::NotOpen`].
#[enum_dispatch]
pub trait GpibBridge {
    /// Human-readable adapter name.
    fn name(&self) -> &'static str;

    /// Open the serial device at `port` and bring the bridge up.
    fn open(&mut self, port: &str) -> GpibResult<()>;

    /// Bring the bridge up over an already-open transport.
    fn attach(&mut self, transport: DynTransport) -> GpibResult<()>;

    /// Whether the underlying transport is held open.
    fn is_open(&self) -> bool;

    /// Release the bridge, returning the instrument to local control where
    /// the bridge can. Returns `false` if any teardown step failed; the
    /// adapter is closed either way.
    fn close(&mut self) -> bool;

    /// Send one instrument command, returning the byte count written.
    fn write(&mut self, command: &str) -> GpibResult<usize>;

    /// Read one reply frame, calling `on_poll` once per idle poll.
    fn read(&mut self, request: &ReadRequest, on_poll: &mut dyn FnMut()) -> GpibResult<String>;

    /// Discard pending input, including any buffered remainder.
    fn flush_input(&mut self) -> GpibResult<()>;

    /// Check that the bridge is present and responding.
    fn self_test(&mut self) -> bool;

    /// Whether the bridge can select the target GPIB address itself.
    fn supports_addressing(&self) -> bool;

    /// Terminator used when a [`ReadRequest`] names none.
    fn default_terminator(&self) -> u8;
}

/// A selected bridge adapter.
#[enum_dispatch(GpibBridge)]
pub enum Bridge {
    Prefixed(PrefixedAdapter),
    Transparent(TransparentAdapter),
}

impl Bridge {
    /// Build an adapter of `kind` on the system clock.
    pub fn new(kind: BridgeKind, config: BridgeConfig) -> Self {
        Self::with_clock(kind, config, system_clock())
    }

    /// Build an adapter of `kind` on `clock`.
    pub fn with_clock(kind: BridgeKind, config: BridgeConfig, clock: SharedClock) -> Self {
        match kind {
            BridgeKind::Prefixed => PrefixedAdapter::with_clock(config, clock).into(),
            BridgeKind::Transparent => TransparentAdapter::with_clock(config, clock).into(),
        }
    }

    pub fn kind(&self) -> BridgeKind {
        match self {
            Bridge::Prefixed(_) => BridgeKind::Prefixed,
            Bridge::Transparent(_) => BridgeKind::Transparent,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        match self {
            Bridge::Prefixed(a) => a.config(),
            Bridge::Transparent(a) => a.config(),
        }
    }

    /// Whether the bridge is open, with a short description for status bars.
    pub fn status(&self) -> (bool, String) {
        if self.is_open() {
            (true, format!("{} connected", self.name()))
        } else {
            (false, format!("{} not connected", self.name()))
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("kind", &self.kind())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpib_core::mock::MockTransport;
    use gpib_core::ManualClock;
    use std::time::Duration;

    #[test]
    fn test_kind_selects_adapter() {
        let clock = ManualClock::new();
        let prefixed = Bridge::with_clock(BridgeKind::Prefixed, BridgeConfig::default(), clock.shared());
        let transparent =
            Bridge::with_clock(BridgeKind::Transparent, BridgeConfig::default(), clock.shared());

        assert_eq!(prefixed.kind(), BridgeKind::Prefixed);
        assert!(prefixed.supports_addressing());
        assert_eq!(prefixed.default_terminator(), b'\r');

        assert_eq!(transparent.kind(), BridgeKind::Transparent);
        assert!(!transparent.supports_addressing());
        assert_eq!(transparent.default_terminator(), b'\n');
    }

    #[test]
    fn test_dispatch_through_enum() {
        let mock = MockTransport::new();
        mock.on_write("T3", "+1.000E-01\n");
        let clock = ManualClock::new();
        let mut bridge =
            Bridge::with_clock(BridgeKind::Transparent, BridgeConfig::default(), clock.shared());

        assert!(!bridge.status().0);
        bridge.attach(Box::new(mock.clone())).unwrap();
        let (open, text) = bridge.status();
        assert!(open);
        assert_eq!(text, "National Instruments GPIB-232CV-A connected");

        bridge.write("FR1000.0HZT3").unwrap();
        let reply = bridge
            .read(&ReadRequest::until_terminator(Duration::from_millis(100)), &mut || {})
            .unwrap();
        assert_eq!(reply, "+1.000E-01\n");
        assert!(bridge.close());
        assert!(!bridge.is_open());
    }
}
