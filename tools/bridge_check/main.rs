//! Bridge Check CLI Tool
//!
//! Connects to an HP 8903 through a GPIB bridge, takes one measurement,
//! prints it and hands the analyzer back to local control. Use it to confirm
//! cabling, port and GPIB address before running sweeps.
//!
//! # Usage
//!
//! ```bash
//! # Bridge settings from config/hp8903.toml
//! cargo run --bin bridge_check
//!
//! # NI GPIB-232CV-A on a different port
//! cargo run --bin bridge_check -- --kind transparent --port /dev/ttyS0
//!
//! # THD+n in dB at 10 kHz, 0.5 V
//! cargo run --bin bridge_check -- --mode thd --log -f 10000 -a 0.5
//!
//! # THD+n through the 30 kHz low pass and the left plug-in
//! cargo run --bin bridge_check -- --mode thd --filter lp30k --filter left
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use daq_driver_hp8903::{Filter, FilterSet, MeasurementMode, MeasurementSpec, Unit};
use gpib_bridge::BridgeKind;
use hp8903_daq::config::{AnalyzerConfig, DEFAULT_CONFIG_PATH};
use hp8903_daq::tracing_init::{self, TracingConfig};
use hp8903_daq::AnalyzerSession;
use std::path::PathBuf;
use tracing::info;

// =============================================================================
// CLI Argument Structure
// =============================================================================

/// Bridge Check - one measurement through a GPIB bridge
#[derive(Parser, Debug)]
#[command(name = "bridge_check")]
#[command(version = "0.1.0")]
#[command(about = "Connect to an HP 8903 and take one measurement", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Bridge kind (overrides the config file)
    #[arg(short, long, value_enum)]
    kind: Option<KindArg>,

    /// Serial port (overrides the config file)
    #[arg(short, long)]
    port: Option<String>,

    /// Analyzer GPIB address (overrides the config file)
    #[arg(long)]
    address: Option<u8>,

    /// Measurement to take
    #[arg(short, long, value_enum, default_value_t = ModeArg::Level)]
    mode: ModeArg,

    /// Report in dB instead of linear units
    #[arg(long)]
    log: bool,

    /// Source frequency in Hz
    #[arg(short, long, default_value_t = 1000.0)]
    frequency: f64,

    /// Source amplitude in volts
    #[arg(short, long, default_value_t = 1.0)]
    amplitude: f64,

    /// Analyzer filter to switch in (repeatable; a later filter replaces
    /// its partner)
    #[arg(long, value_enum)]
    filter: Vec<FilterArg>,

    /// Enable debug logging with source locations
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    /// Galvant GPIB-USB
    Prefixed,
    /// National Instruments GPIB-232CV-A
    Transparent,
}

impl From<KindArg> for BridgeKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Prefixed => BridgeKind::Prefixed,
            KindArg::Transparent => BridgeKind::Transparent,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// THD+n
    Thd,
    /// AC level
    Level,
    /// Source output level
    Output,
}

impl From<ModeArg> for MeasurementMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Thd => MeasurementMode::ThdPercent,
            ModeArg::Level => MeasurementMode::FreqResponse,
            ModeArg::Output => MeasurementMode::OutputLevel,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FilterArg {
    /// 30 kHz low pass
    Lp30k,
    /// 80 kHz low pass
    Lp80k,
    /// Left plug-in filter
    Left,
    /// Right plug-in filter
    Right,
}

impl From<FilterArg> for Filter {
    fn from(filter: FilterArg) -> Self {
        match filter {
            FilterArg::Lp30k => Filter::LowPass30k,
            FilterArg::Lp80k => Filter::LowPass80k,
            FilterArg::Left => Filter::LeftPlugIn,
            FilterArg::Right => Filter::RightPlugIn,
        }
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AnalyzerConfig::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if args.verbose {
        config.application.log_level = "debug".to_string();
    }
    if let Some(kind) = args.kind {
        config.bridge.kind = kind.into();
    }
    if let Some(port) = &args.port {
        config.bridge.port = port.clone();
    }
    if let Some(address) = args.address {
        config.bridge.address = address;
    }
    config.validate()?;

    let tracing_config = TracingConfig::from_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_file_and_line(args.verbose);
    tracing_init::init(tracing_config).map_err(anyhow::Error::msg)?;
    info!(app = %config.application.name, "bridge_check starting");

    let unit = if args.log { Unit::Log } else { Unit::Linear };
    let mut filters = FilterSet::default();
    for filter in &args.filter {
        filters.select((*filter).into());
    }
    let spec = MeasurementSpec::new(args.mode.into(), args.frequency, args.amplitude)
        .with_unit(unit)
        .with_filters(filters);
    spec.validate()?;

    let mut session = AnalyzerSession::from_config(&config);
    let report = session
        .connect(config.bridge.kind, config.bridge.address, &config.bridge.port)
        .with_context(|| format!("connecting on {}", config.bridge.port))?;

    println!("Bridge:   {}", report.adapter);
    println!("Address:  {}", report.address);
    if !report.addressed {
        println!("          (address is set on the bridge hardware)");
    }
    println!("Init:     {}", report.level_reply.trim_end());
    let active: Vec<&str> = spec.filters.active().into_iter().map(Filter::label).collect();
    if !active.is_empty() {
        println!("Filters:  {}", active.join(", "));
    }

    let outcome = session.single_measurement(&spec);
    let clean = session.disconnect();
    let result = outcome?;

    let label = spec.mode.axis_label(spec.unit);
    match result.value() {
        Some(value) => println!("{label}: {value:.6E}"),
        None => match result.description() {
            Some(description) => bail!("{}: {}", spec.mode, description),
            None => bail!("{}: no valid reply from the analyzer", spec.mode),
        },
    }

    if !clean {
        bail!("bridge teardown failed; analyzer may still be in remote");
    }
    Ok(())
}
