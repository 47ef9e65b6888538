//! Analyzer configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/hp8903.toml` (base configuration)
//! 2. Environment variables prefixed with `HP8903_`, `__` separating sections
//!
//! Every section and key has a default, so an empty or missing file yields a
//! usable configuration.
//!
//! # Example
//! ```no_run
//! use hp8903_daq::config::AnalyzerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // HP8903_BRIDGE__ADDRESS=28 overrides [bridge] address
//! let config = AnalyzerConfig::load()?;
//! config.validate()?;
//! println!("Bridge: {} on {}", config.bridge.kind, config.bridge.port);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use gpib_bridge::{BridgeConfig, BridgeKind, EosMode, MAX_GPIB_ADDRESS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/hp8903.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "HP8903_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be read or had the wrong shape.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Values were read but are unusable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Bridge selection and line settings
    pub bridge: BridgeSection,
    /// Measurement timing
    pub measurement: MeasurementConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "HP 8903 Control".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// `[bridge]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    /// Which adapter is attached
    pub kind: BridgeKind,
    /// Serial device path
    pub port: String,
    /// Analyzer GPIB address (0-30)
    pub address: u8,
    /// Bridge-side read timeout
    pub read_timeout_ms: u32,
    /// End-of-string mode
    pub eos: EosMode,
    /// Bridge auto-read after write
    pub auto_mode: bool,
}

impl Default for BridgeSection {
    fn default() -> Self {
        let defaults = BridgeConfig::default();
        Self {
            kind: BridgeKind::Prefixed,
            port: default_port().to_string(),
            address: defaults.target_address,
            read_timeout_ms: defaults.read_timeout_ms,
            eos: defaults.eos_mode,
            auto_mode: defaults.auto_mode,
        }
    }
}

fn default_port() -> &'static str {
    if cfg!(windows) {
        "COM1"
    } else {
        "/dev/ttyUSB0"
    }
}

impl BridgeSection {
    /// Adapter settings for this section, with default dialect keywords.
    pub fn to_bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            target_address: self.address,
            read_timeout_ms: self.read_timeout_ms,
            eos_mode: self.eos,
            auto_mode: self.auto_mode,
            ..BridgeConfig::default()
        }
    }
}

/// `[measurement]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    /// Read bound for one measurement
    pub timeout_ms: u64,
    /// Read bound for the level check right after connecting
    pub init_timeout_ms: u64,
    /// Pause between two polls of the serial port
    pub poll_interval_ms: u64,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2500,
            init_timeout_ms: 5000,
            poll_interval_ms: 2,
        }
    }
}

impl MeasurementConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

impl AnalyzerConfig {
    /// Load configuration from `config/hp8903.toml` and environment variables
    ///
    /// Example: `HP8903_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        let format = self.application.log_format.to_lowercase();
        if !VALID_LOG_FORMATS.contains(&format.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_LOG_FORMATS.join(", ")
            )));
        }

        if self.bridge.address > MAX_GPIB_ADDRESS {
            return Err(ConfigError::Invalid(format!(
                "Invalid bridge address {}. Must be 0-{}",
                self.bridge.address, MAX_GPIB_ADDRESS
            )));
        }

        if self.bridge.port.trim().is_empty() {
            return Err(ConfigError::Invalid("bridge port must not be empty".into()));
        }

        if self.bridge.read_timeout_ms == 0
            || self.measurement.timeout_ms == 0
            || self.measurement.init_timeout_ms == 0
        {
            return Err(ConfigError::Invalid("timeouts must be greater than zero".into()));
        }

        if self.measurement.poll_interval_ms >= self.measurement.timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "poll_interval_ms ({}) must be below timeout_ms ({})",
                self.measurement.poll_interval_ms, self.measurement.timeout_ms
            )));
        }

        Ok(())
    }
}
