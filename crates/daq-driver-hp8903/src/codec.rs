//! HP 8903 measurement command codec.
//!
//! Protocol overview:
//! - Commands are a single line of fixed two-letter fields, no separators
//! - Field order: `FR<f>HZ AP<a>VL M<n> L<n>H<n> LN|LG [R1|R0] T3`
//! - Numbers use `%.4E` style scientific notation (`1.0000E+03`)
//! - `T3` triggers one settled reading and places it in the output buffer
//! - Replies are one number in scientific notation (`+00262E-07`); values
//!   above 4.0e9 encode an error code instead of a reading
//!
//! Reference: HP 8903B Operating Manual, "HP-IB Codes".

use crate::errors::{self, ERROR_CODE_OFFSET, ERROR_SENTINEL};
use gpib_core::{GpibError, GpibResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest source frequency the analyzer accepts (Hz).
pub const MIN_FREQUENCY_HZ: f64 = 20.0;
/// Highest source frequency the analyzer accepts (Hz).
pub const MAX_FREQUENCY_HZ: f64 = 100_000.0;
/// Lowest source amplitude (V RMS).
pub const MIN_AMPLITUDE_V: f64 = 0.0006;
/// Highest source amplitude (V RMS).
pub const MAX_AMPLITUDE_V: f64 = 6.0;

// =============================================================================
// Measurement settings
// =============================================================================

/// What the analyzer measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementMode {
    /// Distortion (THD+n).
    #[default]
    ThdPercent,
    /// AC level across frequency.
    FreqResponse,
    /// Distortion relative to a reference reading.
    ThdRatio,
    /// AC level relative to a reference reading.
    FreqResponseRatio,
    /// AC level against source amplitude.
    OutputLevel,
}

impl MeasurementMode {
    /// Measurement function field: `M3` distortion, `M1` AC level.
    pub fn command_code(self) -> &'static str {
        match self {
            MeasurementMode::ThdPercent | MeasurementMode::ThdRatio => "M3",
            MeasurementMode::FreqResponse
            | MeasurementMode::FreqResponseRatio
            | MeasurementMode::OutputLevel => "M1",
        }
    }

    /// Whether readings are taken relative to a stored reference.
    pub fn is_ratio(self) -> bool {
        matches!(
            self,
            MeasurementMode::ThdRatio | MeasurementMode::FreqResponseRatio
        )
    }

    /// Unit string for readings in this mode.
    pub fn unit_label(self, unit: Unit) -> &'static str {
        match (self, unit) {
            (MeasurementMode::OutputLevel, _) => "V",
            (MeasurementMode::FreqResponse, Unit::Linear) => "V RMS",
            (MeasurementMode::FreqResponse, Unit::Log) => "dB V",
            (_, Unit::Linear) => "%",
            (_, Unit::Log) => "dB",
        }
    }

    /// Y-axis label for a plot of readings in this mode.
    pub fn axis_label(self, unit: Unit) -> String {
        let quantity = match self {
            MeasurementMode::ThdPercent => "THD+n",
            MeasurementMode::FreqResponse => "AC Level",
            MeasurementMode::ThdRatio => "THD+n (Ratio)",
            MeasurementMode::FreqResponseRatio => "AC Level (Ratio)",
            MeasurementMode::OutputLevel => "Output Level",
        };
        format!("{} ({})", quantity, self.unit_label(unit))
    }

    /// X-axis label for the sweep this mode is normally run with.
    pub fn sweep_axis_label(self) -> &'static str {
        match self {
            MeasurementMode::OutputLevel => "Input Level (V)",
            _ => "Frequency (Hz)",
        }
    }
}

impl fmt::Display for MeasurementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeasurementMode::ThdPercent => "THD+n",
            MeasurementMode::FreqResponse => "Frequency Response",
            MeasurementMode::ThdRatio => "THD+n (Ratio)",
            MeasurementMode::FreqResponseRatio => "Frequency Response (Ratio)",
            MeasurementMode::OutputLevel => "Output Level",
        };
        write!(f, "{}", name)
    }
}

/// Linear or logarithmic readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    #[default]
    Linear,
    Log,
}

impl Unit {
    pub fn command_code(self) -> &'static str {
        match self {
            Unit::Linear => "LN",
            Unit::Log => "LG",
        }
    }
}

/// Ratio reference selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioMode {
    /// Leave the analyzer's ratio setting untouched.
    #[default]
    None,
    /// Store the current input as reference (`R1`).
    InputRef,
    /// Ratio off, readings referenced to the output (`R0`).
    OutputRef,
}

impl RatioMode {
    /// Ratio field; empty when no ratio change is requested.
    pub fn command_code(self) -> &'static str {
        match self {
            RatioMode::None => "",
            RatioMode::InputRef => "R1",
            RatioMode::OutputRef => "R0",
        }
    }
}

/// Low-pass filter selection (at most one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowPass {
    #[default]
    None,
    Khz30,
    Khz80,
}

/// Plug-in filter selection (at most one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlugIn {
    #[default]
    None,
    Left,
    Right,
}

/// One of the four front-panel filter keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    LowPass30k,
    LowPass80k,
    LeftPlugIn,
    RightPlugIn,
}

impl Filter {
    pub fn label(self) -> &'static str {
        match self {
            Filter::LowPass30k => "30 kHz Low Pass",
            Filter::LowPass80k => "80 kHz Low Pass",
            Filter::LeftPlugIn => "Left Plug-in Filter",
            Filter::RightPlugIn => "Right Plug-in Filter",
        }
    }
}

/// Active filters. Each pair holds at most one member by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSet {
    pub low_pass: LowPass,
    pub plug_in: PlugIn,
}

impl FilterSet {
    /// Build from four independent checkbox states.
    ///
    /// # Errors
    /// [`GpibError::Config`] when both filters of a pair are set.
    pub fn from_flags(lp30: bool, lp80: bool, left: bool, right: bool) -> GpibResult<Self> {
        let low_pass = match (lp30, lp80) {
            (true, true) => {
                return Err(GpibError::Config(
                    "30 kHz and 80 kHz low-pass filters are mutually exclusive".into(),
                ))
            }
            (true, false) => LowPass::Khz30,
            (false, true) => LowPass::Khz80,
            (false, false) => LowPass::None,
        };
        let plug_in = match (left, right) {
            (true, true) => {
                return Err(GpibError::Config(
                    "left and right plug-in filters are mutually exclusive".into(),
                ))
            }
            (true, false) => PlugIn::Left,
            (false, true) => PlugIn::Right,
            (false, false) => PlugIn::None,
        };
        Ok(Self { low_pass, plug_in })
    }

    /// Activate `filter`, deselecting its partner.
    pub fn select(&mut self, filter: Filter) {
        match filter {
            Filter::LowPass30k => self.low_pass = LowPass::Khz30,
            Filter::LowPass80k => self.low_pass = LowPass::Khz80,
            Filter::LeftPlugIn => self.plug_in = PlugIn::Left,
            Filter::RightPlugIn => self.plug_in = PlugIn::Right,
        }
    }

    /// Deactivate `filter` if it is active.
    pub fn deselect(&mut self, filter: Filter) {
        match filter {
            Filter::LowPass30k if self.low_pass == LowPass::Khz30 => self.low_pass = LowPass::None,
            Filter::LowPass80k if self.low_pass == LowPass::Khz80 => self.low_pass = LowPass::None,
            Filter::LeftPlugIn if self.plug_in == PlugIn::Left => self.plug_in = PlugIn::None,
            Filter::RightPlugIn if self.plug_in == PlugIn::Right => self.plug_in = PlugIn::None,
            _ => {}
        }
    }

    /// Active filters in front-panel order.
    pub fn active(&self) -> Vec<Filter> {
        let mut active = Vec::with_capacity(2);
        match self.low_pass {
            LowPass::Khz30 => active.push(Filter::LowPass30k),
            LowPass::Khz80 => active.push(Filter::LowPass80k),
            LowPass::None => {}
        }
        match self.plug_in {
            PlugIn::Left => active.push(Filter::LeftPlugIn),
            PlugIn::Right => active.push(Filter::RightPlugIn),
            PlugIn::None => {}
        }
        active
    }

    /// Filter fields, low-pass first (`L1H2`).
    pub fn command_code(&self) -> &'static str {
        match (self.low_pass, self.plug_in) {
            (LowPass::None, PlugIn::None) => "L0H0",
            (LowPass::None, PlugIn::Left) => "L0H1",
            (LowPass::None, PlugIn::Right) => "L0H2",
            (LowPass::Khz30, PlugIn::None) => "L1H0",
            (LowPass::Khz30, PlugIn::Left) => "L1H1",
            (LowPass::Khz30, PlugIn::Right) => "L1H2",
            (LowPass::Khz80, PlugIn::None) => "L2H0",
            (LowPass::Khz80, PlugIn::Left) => "L2H1",
            (LowPass::Khz80, PlugIn::Right) => "L2H2",
        }
    }
}

/// Settings for one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementSpec {
    pub mode: MeasurementMode,
    pub unit: Unit,
    /// Source frequency (Hz).
    pub frequency_hz: f64,
    /// Source amplitude (V RMS).
    pub amplitude_v: f64,
    pub filters: FilterSet,
    pub ratio: RatioMode,
}

impl Default for MeasurementSpec {
    fn default() -> Self {
        Self {
            mode: MeasurementMode::default(),
            unit: Unit::default(),
            frequency_hz: 1000.0,
            amplitude_v: 1.0,
            filters: FilterSet::default(),
            ratio: RatioMode::default(),
        }
    }
}

impl MeasurementSpec {
    pub fn new(mode: MeasurementMode, frequency_hz: f64, amplitude_v: f64) -> Self {
        Self {
            mode,
            frequency_hz,
            amplitude_v,
            ..Default::default()
        }
    }

    /// The level check the analyzer must answer right after connecting:
    /// 1 kHz, 0.1 V RMS, AC level, linear, no filters.
    pub fn level_check() -> Self {
        Self::new(MeasurementMode::FreqResponse, 1000.0, 0.1)
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_ratio(mut self, ratio: RatioMode) -> Self {
        self.ratio = ratio;
        self
    }

    pub fn with_frequency(mut self, frequency_hz: f64) -> Self {
        self.frequency_hz = frequency_hz;
        self
    }

    pub fn with_amplitude(mut self, amplitude_v: f64) -> Self {
        self.amplitude_v = amplitude_v;
        self
    }

    /// Check the source settings against the analyzer's ranges.
    pub fn validate(&self) -> GpibResult<()> {
        if !self.frequency_hz.is_finite()
            || !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&self.frequency_hz)
        {
            return Err(GpibError::Config(format!(
                "Frequency {} Hz outside {}..={} Hz",
                self.frequency_hz, MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ
            )));
        }
        if !self.amplitude_v.is_finite()
            || !(MIN_AMPLITUDE_V..=MAX_AMPLITUDE_V).contains(&self.amplitude_v)
        {
            return Err(GpibError::Config(format!(
                "Amplitude {} V outside {}..={} V",
                self.amplitude_v, MIN_AMPLITUDE_V, MAX_AMPLITUDE_V
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Results
// =============================================================================

/// Decoded reply to one measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementResult {
    /// The reading; NaN when the measurement failed.
    pub raw_value: f64,
    pub is_error: bool,
    /// Analyzer error code, when the reply carried one.
    pub error_code: Option<u8>,
}

impl MeasurementResult {
    pub fn reading(value: f64) -> Self {
        Self {
            raw_value: value,
            is_error: false,
            error_code: None,
        }
    }

    pub fn instrument_error(code: u8) -> Self {
        Self {
            raw_value: f64::NAN,
            is_error: true,
            error_code: Some(code),
        }
    }

    /// A failure without an analyzer code (timeout, garbled reply).
    pub fn failed() -> Self {
        Self {
            raw_value: f64::NAN,
            is_error: true,
            error_code: None,
        }
    }

    /// The reading, if the measurement succeeded.
    pub fn value(&self) -> Option<f64> {
        (!self.is_error).then_some(self.raw_value)
    }

    /// Description of the analyzer error code, if any.
    pub fn description(&self) -> Option<&'static str> {
        self.error_code.map(errors::describe)
    }
}

// =============================================================================
// Encoding / decoding
// =============================================================================

/// Format `value` as `%.4E` does: `1.0000E+03`, `-2.5000E-04`.
pub fn format_sci(value: f64) -> String {
    let formatted = format!("{:.4E}", value);
    match formatted.split_once('E') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exp) => {
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{}E{}{:02}", mantissa, sign, exp.unsigned_abs())
            }
            Err(_) => formatted,
        },
        None => formatted,
    }
}

/// Build the command line for one measurement.
pub fn encode(spec: &MeasurementSpec) -> String {
    let mut command = String::with_capacity(40);
    command.push_str("FR");
    command.push_str(&format_sci(spec.frequency_hz));
    command.push_str("HZ");
    command.push_str("AP");
    command.push_str(&format_sci(spec.amplitude_v));
    command.push_str("VL");
    command.push_str(spec.mode.command_code());
    command.push_str(spec.filters.command_code());
    command.push_str(spec.unit.command_code());
    command.push_str(spec.ratio.command_code());
    command.push_str("T3");
    command
}

/// Interpret a reply, turning failures into an error result.
pub fn decode(reply: &str) -> MeasurementResult {
    match decode_reading(reply) {
        Ok(value) => MeasurementResult::reading(value),
        Err(GpibError::Instrument { code, .. }) => MeasurementResult::instrument_error(code),
        Err(_) => MeasurementResult::failed(),
    }
}

/// Interpret a reply as a reading.
///
/// # Errors
/// - [`GpibError::Instrument`] for an error-code reply
/// - [`GpibError::Protocol`] for anything that is not a finite number, or an
///   error reply whose code field is not two digits
pub fn decode_reading(reply: &str) -> GpibResult<f64> {
    let trimmed = reply.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| GpibError::Protocol(format!("not a number: '{}'", trimmed)))?;
    if !value.is_finite() {
        return Err(GpibError::Protocol(format!("not a finite reading: '{}'", trimmed)));
    }

    if value > ERROR_SENTINEL {
        let code = trimmed
            .get(ERROR_CODE_OFFSET..ERROR_CODE_OFFSET + 2)
            .filter(|field| field.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|field| field.parse::<u8>().ok())
            .ok_or_else(|| {
                GpibError::Protocol(format!("error reply without a code: '{}'", trimmed))
            })?;
        return Err(GpibError::Instrument {
            code,
            description: errors::describe(code),
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_sci_matches_printf() {
        assert_eq!(format_sci(1000.0), "1.0000E+03");
        assert_eq!(format_sci(0.1), "1.0000E-01");
        assert_eq!(format_sci(20.0), "2.0000E+01");
        assert_eq!(format_sci(100_000.0), "1.0000E+05");
        assert_eq!(format_sci(0.0006), "6.0000E-04");
        assert_eq!(format_sci(1.0), "1.0000E+00");
        assert_eq!(format_sci(-2.5e-4), "-2.5000E-04");
    }

    #[test]
    fn test_encode_field_order() {
        let spec = MeasurementSpec::new(MeasurementMode::FreqResponse, 1000.0, 0.1);
        assert_eq!(encode(&spec), "FR1.0000E+03HZAP1.0000E-01VLM1L0H0LNT3");
    }

    #[test]
    fn test_encode_filters_and_ratio() {
        let filters = FilterSet::from_flags(true, false, false, true).unwrap();
        let spec = MeasurementSpec::new(MeasurementMode::ThdRatio, 20.0, 1.5)
            .with_unit(Unit::Log)
            .with_filters(filters)
            .with_ratio(RatioMode::InputRef);
        assert_eq!(encode(&spec), "FR2.0000E+01HZAP1.5000E+00VLM3L1H2LGR1T3");

        let spec = spec.with_filters(FilterSet::default()).with_ratio(RatioMode::OutputRef);
        assert!(encode(&spec).contains("M3L0H0LGR0T3"));
    }

    #[test]
    fn test_mode_codes() {
        assert_eq!(MeasurementMode::ThdPercent.command_code(), "M3");
        assert_eq!(MeasurementMode::ThdRatio.command_code(), "M3");
        assert_eq!(MeasurementMode::FreqResponse.command_code(), "M1");
        assert_eq!(MeasurementMode::FreqResponseRatio.command_code(), "M1");
        assert_eq!(MeasurementMode::OutputLevel.command_code(), "M1");
    }

    #[test]
    fn test_encoded_values_parse_back() {
        for &(freq, amp) in &[(20.0, 0.0006), (1234.5, 0.12345), (99_999.0, 5.9999)] {
            let command = encode(&MeasurementSpec::new(MeasurementMode::ThdPercent, freq, amp));
            let fr = &command[2..command.find("HZ").unwrap()];
            let ap = &command[command.find("AP").unwrap() + 2..command.find("VL").unwrap()];

            let freq_back: f64 = fr.parse().unwrap();
            let amp_back: f64 = ap.parse().unwrap();
            assert!(((freq_back - freq) / freq).abs() < 1e-4, "{fr} vs {freq}");
            assert!(((amp_back - amp) / amp).abs() < 1e-4, "{ap} vs {amp}");
        }
    }

    #[test]
    fn test_filter_flags_reject_both_of_a_pair() {
        assert!(matches!(
            FilterSet::from_flags(true, true, false, false),
            Err(GpibError::Config(_))
        ));
        assert!(matches!(
            FilterSet::from_flags(false, false, true, true),
            Err(GpibError::Config(_))
        ));
        assert_eq!(
            FilterSet::from_flags(false, false, false, false).unwrap().command_code(),
            "L0H0"
        );
    }

    #[test]
    fn test_filter_select_replaces_partner() {
        let mut filters = FilterSet::default();
        filters.select(Filter::LowPass30k);
        filters.select(Filter::LeftPlugIn);
        filters.select(Filter::LowPass80k);
        assert_eq!(filters.command_code(), "L2H1");
        assert_eq!(filters.active(), vec![Filter::LowPass80k, Filter::LeftPlugIn]);

        filters.deselect(Filter::LowPass30k);
        assert_eq!(filters.low_pass, LowPass::Khz80);
        filters.deselect(Filter::LowPass80k);
        assert_eq!(filters.command_code(), "L0H1");
    }

    #[test]
    fn test_decode_reading() {
        let result = decode("+00262E-07\r");
        assert_eq!(result.value(), Some(262e-7));
        assert!(!result.is_error);
        assert_eq!(result.description(), None);
    }

    #[test]
    fn test_decode_error_code() {
        let result = decode("+90010E+05\r");
        assert!(result.is_error);
        assert!(result.raw_value.is_nan());
        assert_eq!(result.error_code, Some(10));
        assert_eq!(result.description(), Some("Reading too large for display."));

        match decode_reading("+90010E+05") {
            Err(GpibError::Instrument { code, description }) => {
                assert_eq!(code, 10);
                assert_eq!(description, "Reading too large for display.");
            }
            other => panic!("expected instrument error, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_code() {
        let result = decode("+90012E+05");
        assert_eq!(result.error_code, Some(12));
        assert_eq!(result.description(), Some(errors::UNKNOWN_ERROR));
    }

    #[test]
    fn test_decode_garbage_is_protocol_error() {
        let result = decode("GARBAGE");
        assert!(result.is_error);
        assert_eq!(result.error_code, None);
        assert!(matches!(decode_reading(""), Err(GpibError::Protocol(_))));
        assert!(matches!(decode_reading("nan"), Err(GpibError::Protocol(_))));
        // above the sentinel but the code field is not numeric
        assert!(matches!(decode_reading("5.0E+09"), Err(GpibError::Protocol(_))));
    }

    #[test]
    fn test_validate_ranges() {
        assert!(MeasurementSpec::new(MeasurementMode::ThdPercent, 20.0, 0.0006)
            .validate()
            .is_ok());
        assert!(MeasurementSpec::new(MeasurementMode::ThdPercent, 100_000.0, 6.0)
            .validate()
            .is_ok());
        assert!(MeasurementSpec::new(MeasurementMode::ThdPercent, 19.9, 1.0)
            .validate()
            .is_err());
        assert!(MeasurementSpec::new(MeasurementMode::ThdPercent, 1000.0, 6.5)
            .validate()
            .is_err());
        assert!(MeasurementSpec::new(MeasurementMode::ThdPercent, f64::NAN, 1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_labels() {
        assert_eq!(MeasurementMode::ThdPercent.axis_label(Unit::Linear), "THD+n (%)");
        assert_eq!(MeasurementMode::FreqResponse.axis_label(Unit::Log), "AC Level (dB V)");
        assert_eq!(
            MeasurementMode::FreqResponseRatio.axis_label(Unit::Linear),
            "AC Level (Ratio) (%)"
        );
        assert_eq!(MeasurementMode::OutputLevel.axis_label(Unit::Log), "Output Level (V)");
        assert_eq!(MeasurementMode::OutputLevel.sweep_axis_label(), "Input Level (V)");
        assert_eq!(MeasurementMode::ThdRatio.to_string(), "THD+n (Ratio)");

        let filters = FilterSet::from_flags(false, true, false, true).unwrap();
        let labels: Vec<&str> = filters.active().into_iter().map(Filter::label).collect();
        assert_eq!(labels, vec!["80 kHz Low Pass", "Right Plug-in Filter"]);
    }

    #[test]
    fn test_spec_from_toml() {
        let spec: MeasurementSpec = toml::from_str(
            r#"
            mode = "freq_response_ratio"
            unit = "log"
            frequency_hz = 400.0

            [filters]
            low_pass = "khz30"
            "#,
        )
        .unwrap();
        assert_eq!(spec.mode, MeasurementMode::FreqResponseRatio);
        assert_eq!(spec.amplitude_v, 1.0);
        assert_eq!(spec.filters.command_code(), "L1H0");
    }
}
