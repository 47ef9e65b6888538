//! HP 8903 audio analyzer driver.
//!
//! - [`codec`]: measurement settings and the analyzer's command/reply format
//! - [`errors`]: the analyzer's numbered error codes
//! - [`sweep`]: sweep plans, the single-shot [`measure`] call and [`SweepEngine`]
//!
//! The driver talks to the analyzer through any [`gpib_bridge::GpibBridge`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_hp8903::{MeasurementMode, MeasurementSpec, SweepEngine, SweepPlan};
//!
//! let template = MeasurementSpec::new(MeasurementMode::ThdPercent, 1000.0, 1.0);
//! let plan = SweepPlan::logarithmic(20.0, 20_000.0, 10);
//! let series = SweepEngine::new().run(&mut bridge, &plan, &template, |point| {
//!     println!("{:>10.1} Hz  {:?}", point.x, point.outcome);
//! })?;
//! ```

pub mod codec;
pub mod errors;
pub mod sweep;

pub use codec::{
    decode, decode_reading, encode, Filter, FilterSet, LowPass, MeasurementMode,
    MeasurementResult, MeasurementSpec, PlugIn, RatioMode, Unit,
};
pub use sweep::{
    measure, StepError, StepOutcome, SweepEngine, SweepKind, SweepPlan, SweepPoint, SweepSeries,
    SweepState, DEFAULT_MEASUREMENT_TIMEOUT,
};
