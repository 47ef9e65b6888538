//! # HP 8903 Control
//!
//! Drives an HP 8903 audio analyzer through a serial-to-GPIB bridge: connect,
//! single measurements, and frequency or amplitude sweeps.
//!
//! ## Crate Structure
//!
//! The work is split across the workspace:
//!
//! - **`gpib_core`**: serial transport, reply polling, clock and the shared
//!   `GpibError`.
//! - **`gpib_bridge`**: the two bridge adapters behind the `GpibBridge` trait.
//! - **`daq_driver_hp8903`**: the analyzer command codec, error table and
//!   sweep engine.
//!
//! This crate ties them together:
//!
//! - **`config`**: `AnalyzerConfig`, loaded from `config/hp8903.toml` and
//!   `HP8903_*` environment variables.
//! - **`session`**: `AnalyzerSession`, the connect sequence and the entry
//!   points for measuring.
//! - **`tracing_init`**: logging setup.

pub mod config;
pub mod session;
pub mod tracing_init;

pub use config::{AnalyzerConfig, ConfigError};
pub use session::{AnalyzerSession, ConnectReport};

pub use daq_driver_hp8903::{
    MeasurementMode, MeasurementResult, MeasurementSpec, SweepPlan, SweepPoint, SweepSeries,
    SweepState,
};
pub use gpib_bridge::BridgeKind;
pub use gpib_core::{GpibError, GpibResult};
