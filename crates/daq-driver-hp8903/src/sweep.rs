//! Sweep planning and execution.
//!
//! A [`SweepPlan`] steps one source parameter: logarithmic plans step the
//! frequency (a fixed number of points per decade), linear plans step the
//! amplitude. [`SweepEngine::run`] first takes the preliminary readings that
//! put the analyzer's ratio reference in a known state, then measures every
//! planned point in order and reports each one through the step callback.
//!
//! A step that times out, returns an analyzer error code, or returns garbage
//! is recorded as failed and the sweep moves on. A transport failure ends the
//! sweep.

use crate::codec::{self, MeasurementMode, MeasurementResult, MeasurementSpec, RatioMode, Unit};
use gpib_bridge::GpibBridge;
use gpib_core::{ErrorKind, GpibError, GpibResult, ReadRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Read bound for one measurement. The analyzer needs up to a couple of
/// seconds to settle at low frequencies.
pub const DEFAULT_MEASUREMENT_TIMEOUT: Duration = Duration::from_millis(2500);

/// Slack when deciding whether the last log point still fits below `stop`.
const DECADE_TOLERANCE: f64 = 1e-9;

/// Longest sweep accepted, matching the analyzer's own step limit.
pub const MAX_SWEEP_POINTS: u32 = 255;

// =============================================================================
// Plan
// =============================================================================

/// Which parameter a sweep steps, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    /// Frequency, `step_count` points per decade.
    Logarithmic,
    /// Amplitude, `step_count` points in total.
    Linear,
}

/// Sweep range and density.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    pub kind: SweepKind,
    pub start: f64,
    pub stop: f64,
    pub step_count: u32,
}

impl SweepPlan {
    /// Frequency sweep with `steps_per_decade` points per decade.
    pub fn logarithmic(start_hz: f64, stop_hz: f64, steps_per_decade: u32) -> Self {
        Self {
            kind: SweepKind::Logarithmic,
            start: start_hz,
            stop: stop_hz,
            step_count: steps_per_decade,
        }
    }

    /// Amplitude sweep with `samples` evenly spaced points.
    pub fn linear(start_v: f64, stop_v: f64, samples: u32) -> Self {
        Self {
            kind: SweepKind::Linear,
            start: start_v,
            stop: stop_v,
            step_count: samples,
        }
    }

    pub fn validate(&self) -> GpibResult<()> {
        if !self.start.is_finite() || !self.stop.is_finite() {
            return Err(GpibError::Config("Sweep bounds must be finite".into()));
        }
        if self.start > self.stop {
            return Err(GpibError::Config(format!(
                "Sweep start {} is above stop {}",
                self.start, self.stop
            )));
        }
        if self.step_count == 0 {
            return Err(GpibError::Config("Sweep needs at least one step".into()));
        }
        if self.kind == SweepKind::Logarithmic && self.start <= 0.0 {
            return Err(GpibError::Config(format!(
                "Logarithmic sweep must start above zero, got {}",
                self.start
            )));
        }
        let count = self.point_count();
        if count > f64::from(MAX_SWEEP_POINTS) {
            return Err(GpibError::Config(format!(
                "Sweep has {} points, at most {} allowed",
                count, MAX_SWEEP_POINTS
            )));
        }
        Ok(())
    }

    /// Number of points the plan produces, computed without building them.
    fn point_count(&self) -> f64 {
        match self.kind {
            SweepKind::Logarithmic => {
                let decades = (self.stop / self.start).log10();
                (decades * f64::from(self.step_count) + DECADE_TOLERANCE).floor() + 1.0
            }
            SweepKind::Linear => f64::from(self.step_count),
        }
    }

    /// The values stepped through, in order. Empty for an invalid plan.
    pub fn points(&self) -> Vec<f64> {
        if self.validate().is_err() {
            return Vec::new();
        }
        match self.kind {
            SweepKind::Logarithmic => {
                let steps = f64::from(self.step_count);
                let decades = (self.stop / self.start).log10();
                let last = (decades * steps + DECADE_TOLERANCE).floor() as u32;
                (0..=last)
                    .map(|n| (self.start * 10f64.powf(f64::from(n) / steps)).min(self.stop))
                    .collect()
            }
            SweepKind::Linear => {
                if self.step_count == 1 {
                    return vec![self.start];
                }
                let intervals = f64::from(self.step_count - 1);
                let delta = (self.stop - self.start) / intervals;
                (0..self.step_count)
                    .map(|i| {
                        if i == self.step_count - 1 {
                            self.stop
                        } else {
                            self.start + delta * f64::from(i)
                        }
                    })
                    .collect()
            }
        }
    }

    /// `template` with the swept parameter set to `x` and the ratio field
    /// cleared.
    pub fn apply(&self, template: &MeasurementSpec, x: f64) -> MeasurementSpec {
        let spec = template.with_ratio(RatioMode::None);
        match self.kind {
            SweepKind::Logarithmic => spec.with_frequency(x),
            SweepKind::Linear => spec.with_amplitude(x),
        }
    }

    /// Readings taken before the first step.
    ///
    /// Ratio modes take a plain reading and then store the input as ratio
    /// reference; every other mode turns ratio off with one reading. An
    /// amplitude sweep takes them at its start amplitude.
    pub fn preliminaries(&self, template: &MeasurementSpec) -> Vec<MeasurementSpec> {
        let base = match self.kind {
            SweepKind::Logarithmic => *template,
            SweepKind::Linear => template.with_amplitude(self.start),
        };
        if template.mode.is_ratio() {
            vec![
                base.with_ratio(RatioMode::None),
                base.with_ratio(RatioMode::InputRef),
            ]
        } else {
            vec![base.with_ratio(RatioMode::OutputRef)]
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Why a single step produced no reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StepError {
    pub kind: ErrorKind,
    /// Analyzer error code, for instrument errors.
    pub code: Option<u8>,
    pub message: String,
}

impl From<&GpibError> for StepError {
    fn from(err: &GpibError) -> Self {
        Self {
            kind: err.kind(),
            code: err.instrument_code(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Reading(f64),
    Failed(StepError),
}

impl StepOutcome {
    /// The reading, or NaN for a failed step.
    pub fn value(&self) -> f64 {
        match self {
            StepOutcome::Reading(v) => *v,
            StepOutcome::Failed(_) => f64::NAN,
        }
    }

    pub fn is_reading(&self) -> bool {
        matches!(self, StepOutcome::Reading(_))
    }
}

/// One measured point of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPoint {
    /// Position in the plan, from zero.
    pub index: usize,
    /// Swept parameter value (Hz or V).
    pub x: f64,
    pub outcome: StepOutcome,
}

/// Every point of a finished sweep, in plan order.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSeries {
    pub plan: SweepPlan,
    pub mode: MeasurementMode,
    pub unit: Unit,
    pub points: Vec<SweepPoint>,
}

impl SweepSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn x_values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.x).collect()
    }

    /// Readings with NaN in failed slots.
    pub fn y_values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.outcome.value()).collect()
    }

    pub fn failed_count(&self) -> usize {
        self.points.iter().filter(|p| !p.outcome.is_reading()).count()
    }

    pub fn x_label(&self) -> &'static str {
        match self.plan.kind {
            SweepKind::Logarithmic => "Frequency (Hz)",
            SweepKind::Linear => "Input Level (V)",
        }
    }

    pub fn y_label(&self) -> String {
        self.mode.axis_label(self.unit)
    }
}

// =============================================================================
// Measurement
// =============================================================================

/// Send one measurement and interpret the reply. Every failure, soft or
/// fatal, is an `Err`.
fn read_value<B: GpibBridge>(
    bridge: &mut B,
    spec: &MeasurementSpec,
    timeout: Duration,
    on_poll: &mut dyn FnMut(),
) -> GpibResult<f64> {
    let command = codec::encode(spec);
    debug!(command = %command, "Sending measurement");
    // a reply that missed the previous read bound must not answer this command
    bridge.flush_input()?;
    bridge.write(&command)?;
    let reply = bridge.read(&ReadRequest::until_terminator(timeout), on_poll)?;
    debug!(reply = %reply.trim_end(), "Measurement reply");
    codec::decode_reading(&reply)
}

/// Take one measurement.
///
/// Timeouts, analyzer error codes and unreadable replies come back as an
/// error [`MeasurementResult`]; only transport failures are `Err`.
pub fn measure<B: GpibBridge>(
    bridge: &mut B,
    spec: &MeasurementSpec,
    timeout: Duration,
    on_poll: &mut dyn FnMut(),
) -> GpibResult<MeasurementResult> {
    match read_value(bridge, spec, timeout, on_poll) {
        Ok(value) => Ok(MeasurementResult::reading(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(error = %e, "Measurement failed");
            Ok(match e.instrument_code() {
                Some(code) => MeasurementResult::instrument_error(code),
                None => MeasurementResult::failed(),
            })
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Where the engine is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SweepState {
    #[default]
    Idle,
    Running {
        step: usize,
    },
    /// The last sweep was aborted; holds the reason.
    Failed(String),
}

/// Runs sweeps against a bridge.
#[derive(Debug)]
pub struct SweepEngine {
    state: SweepState,
    timeout: Duration,
}

impl Default for SweepEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepEngine {
    pub fn new() -> Self {
        Self {
            state: SweepState::Idle,
            timeout: DEFAULT_MEASUREMENT_TIMEOUT,
        }
    }

    /// Change the read bound used for every measurement.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> &SweepState {
        &self.state
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `plan` with `template` settings, calling `on_step` after each point.
    pub fn run<B, F>(
        &mut self,
        bridge: &mut B,
        plan: &SweepPlan,
        template: &MeasurementSpec,
        on_step: F,
    ) -> GpibResult<SweepSeries>
    where
        B: GpibBridge,
        F: FnMut(&SweepPoint),
    {
        self.run_with_hook(bridge, plan, template, on_step, &mut || {})
    }

    /// [`run`](Self::run) with a hook called once per idle poll while waiting
    /// for each reply.
    pub fn run_with_hook<B, F>(
        &mut self,
        bridge: &mut B,
        plan: &SweepPlan,
        template: &MeasurementSpec,
        mut on_step: F,
        on_poll: &mut dyn FnMut(),
    ) -> GpibResult<SweepSeries>
    where
        B: GpibBridge,
        F: FnMut(&SweepPoint),
    {
        plan.validate()?;
        for spec in plan.preliminaries(template) {
            spec.validate()?;
        }
        let xs = plan.points();
        for x in [xs.first(), xs.last()].into_iter().flatten() {
            plan.apply(template, *x).validate()?;
        }

        if !bridge.is_open() {
            return Err(self.abort(GpibError::NotOpen));
        }

        info!(
            mode = %template.mode,
            kind = ?plan.kind,
            points = xs.len(),
            "Starting sweep"
        );
        self.state = SweepState::Running { step: 0 };

        for spec in plan.preliminaries(template) {
            match read_value(bridge, &spec, self.timeout, on_poll) {
                Ok(value) => debug!(ratio = ?spec.ratio, value, "Preliminary reading"),
                Err(e) if e.is_fatal() => return Err(self.abort(e)),
                Err(e) => warn!(ratio = ?spec.ratio, error = %e, "Preliminary reading failed"),
            }
        }

        let mut points = Vec::with_capacity(xs.len());
        for (index, x) in xs.into_iter().enumerate() {
            self.state = SweepState::Running { step: index };
            let spec = plan.apply(template, x);

            let outcome = match read_value(bridge, &spec, self.timeout, on_poll) {
                Ok(value) => StepOutcome::Reading(value),
                Err(e) if e.is_fatal() => {
                    on_step(&SweepPoint {
                        index,
                        x,
                        outcome: StepOutcome::Failed(StepError::from(&e)),
                    });
                    return Err(self.abort(e));
                }
                Err(e) => {
                    warn!(index, x, error = %e, "Sweep step failed");
                    StepOutcome::Failed(StepError::from(&e))
                }
            };

            let point = SweepPoint { index, x, outcome };
            on_step(&point);
            points.push(point);
        }

        self.state = SweepState::Idle;
        let series = SweepSeries {
            plan: *plan,
            mode: template.mode,
            unit: template.unit,
            points,
        };
        info!(
            points = series.len(),
            failed = series.failed_count(),
            "Sweep complete"
        );
        Ok(series)
    }

    fn abort(&mut self, err: GpibError) -> GpibError {
        error!(error = %err, "Sweep aborted");
        self.state = SweepState::Failed(err.to_string());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() <= 1e-9 * b.abs().max(1.0), "{a} != {b}");
    }

    #[test]
    fn test_log_plan_one_decade() {
        let points = SweepPlan::logarithmic(20.0, 200.0, 10).points();
        assert_eq!(points.len(), 11);
        assert_close(points[0], 20.0);
        assert_close(points[10], 200.0);
        assert_close(points[5], 20.0 * 10f64.sqrt());
    }

    #[test]
    fn test_log_plan_stops_below_stop() {
        let points = SweepPlan::logarithmic(20.0, 20_000.0, 3).points();
        assert_eq!(points.len(), 10);
        assert!(*points.last().unwrap() <= 20_000.0 * (1.0 + 1e-9));

        let points = SweepPlan::logarithmic(100.0, 150.0, 2).points();
        assert_eq!(points, vec![100.0]);
    }

    #[test]
    fn test_linear_plan() {
        let points = SweepPlan::linear(0.1, 1.0, 10).points();
        assert_eq!(points.len(), 10);
        assert_close(points[0], 0.1);
        assert_close(points[1], 0.2);
        assert_eq!(points[9], 1.0);

        assert_eq!(SweepPlan::linear(0.5, 2.0, 1).points(), vec![0.5]);
    }

    #[test]
    fn test_plan_validation() {
        assert!(SweepPlan::logarithmic(200.0, 20.0, 10).validate().is_err());
        assert!(SweepPlan::logarithmic(0.0, 20.0, 10).validate().is_err());
        assert!(SweepPlan::linear(0.0, 1.0, 0).validate().is_err());
        assert!(SweepPlan::linear(0.0, f64::INFINITY, 5).validate().is_err());
        assert!(SweepPlan::linear(0.0, 1.0, 5).validate().is_ok());
        assert!(SweepPlan::linear(0.0, 1.0, 0).points().is_empty());
    }

    #[test]
    fn test_oversized_plans_rejected_without_building_points() {
        assert!(SweepPlan::linear(0.1, 1.0, MAX_SWEEP_POINTS).validate().is_ok());
        assert!(matches!(
            SweepPlan::linear(0.1, 1.0, MAX_SWEEP_POINTS + 1).validate(),
            Err(GpibError::Config(_))
        ));
        assert!(SweepPlan::linear(0.1, 1.0, u32::MAX).points().is_empty());

        // 20 Hz to 20 kHz is three decades: 3 * 84 + 1 = 253 points
        assert!(SweepPlan::logarithmic(20.0, 20_000.0, 84).validate().is_ok());
        assert!(SweepPlan::logarithmic(20.0, 20_000.0, 85).validate().is_err());
        assert!(SweepPlan::logarithmic(20.0, 20_000.0, u32::MAX).points().is_empty());
    }

    #[test]
    fn test_apply_substitutes_and_clears_ratio() {
        let template = MeasurementSpec::new(MeasurementMode::ThdRatio, 1000.0, 0.5)
            .with_ratio(RatioMode::InputRef);

        let log = SweepPlan::logarithmic(20.0, 200.0, 10).apply(&template, 40.0);
        assert_eq!(log.frequency_hz, 40.0);
        assert_eq!(log.amplitude_v, 0.5);
        assert_eq!(log.ratio, RatioMode::None);

        let lin = SweepPlan::linear(0.1, 1.0, 10).apply(&template, 0.3);
        assert_eq!(lin.frequency_hz, 1000.0);
        assert_eq!(lin.amplitude_v, 0.3);
    }

    #[test]
    fn test_preliminaries_by_mode() {
        let plan = SweepPlan::logarithmic(20.0, 200.0, 10);

        let thd = MeasurementSpec::new(MeasurementMode::ThdPercent, 1000.0, 1.0);
        let pre = plan.preliminaries(&thd);
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].ratio, RatioMode::OutputRef);

        let ratio = MeasurementSpec::new(MeasurementMode::FreqResponseRatio, 1000.0, 1.0);
        let pre = plan.preliminaries(&ratio);
        assert_eq!(
            pre.iter().map(|s| s.ratio).collect::<Vec<_>>(),
            vec![RatioMode::None, RatioMode::InputRef]
        );

        let level = MeasurementSpec::new(MeasurementMode::OutputLevel, 1000.0, 1.0);
        let pre = SweepPlan::linear(0.2, 2.0, 5).preliminaries(&level);
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].amplitude_v, 0.2);
        assert_eq!(pre[0].ratio, RatioMode::OutputRef);
    }

    #[test]
    fn test_step_error_from_gpib_error() {
        let err = GpibError::Instrument {
            code: 96,
            description: "No signal sensed at input.",
        };
        let step = StepError::from(&err);
        assert_eq!(step.kind, ErrorKind::Instrument);
        assert_eq!(step.code, Some(96));
        assert_eq!(step.to_string(), "Instrument error 96: No signal sensed at input.");
    }

    #[test]
    fn test_series_helpers() {
        let series = SweepSeries {
            plan: SweepPlan::linear(0.1, 0.2, 2),
            mode: MeasurementMode::OutputLevel,
            unit: Unit::Linear,
            points: vec![
                SweepPoint {
                    index: 0,
                    x: 0.1,
                    outcome: StepOutcome::Reading(0.09),
                },
                SweepPoint {
                    index: 1,
                    x: 0.2,
                    outcome: StepOutcome::Failed(StepError {
                        kind: ErrorKind::Timeout,
                        code: None,
                        message: "timeout".into(),
                    }),
                },
            ],
        };
        assert_eq!(series.x_values(), vec![0.1, 0.2]);
        assert!(series.y_values()[1].is_nan());
        assert_eq!(series.failed_count(), 1);
        assert_eq!(series.x_label(), "Input Level (V)");
        assert_eq!(series.y_label(), "Output Level (V)");
    }
}
