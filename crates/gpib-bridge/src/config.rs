//! Bridge configuration.
//!
//! [`BridgeConfig`] is fixed when an adapter is constructed and never changes
//! while it is open. The command-prefixed dialect is firmware-defined, so its
//! keywords live in [`BridgeCommands`] and can be overridden from TOML for
//! bridges that spell them differently.
//!
//! ```toml
//! target_address = 28
//! read_timeout_ms = 2500
//! eos_mode = "cr_lf"
//!
//! [commands]
//! local = "++loc"
//! ```

use gpib_core::{GpibError, GpibResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Highest primary address on a GPIB bus.
pub const MAX_GPIB_ADDRESS: u8 = 30;

/// Which bridge hardware sits between the serial port and the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeKind {
    /// Command-prefixed USB adapter (Galvant GPIB-USB, `++` dialect).
    Prefixed,
    /// Raw passthrough adapter (NI GPIB-232CV-A), addressed by DIP switches.
    Transparent,
}

impl fmt::Display for BridgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeKind::Prefixed => write!(f, "prefixed"),
            BridgeKind::Transparent => write!(f, "transparent"),
        }
    }
}

impl FromStr for BridgeKind {
    type Err = GpibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prefixed" | "galvant" => Ok(BridgeKind::Prefixed),
            "transparent" | "ni" => Ok(BridgeKind::Transparent),
            other => Err(GpibError::Config(format!(
                "Unknown bridge kind '{}'. Must be one of: prefixed, transparent",
                other
            ))),
        }
    }
}

/// End-of-string convention selected with the bridge's `eos` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EosMode {
    /// Append CR+LF.
    #[default]
    CrLf,
    /// Append CR.
    Cr,
    /// Append LF.
    Lf,
    /// Append nothing.
    None,
}

impl EosMode {
    /// Numeric argument understood by the bridge firmware.
    pub fn arg(self) -> u8 {
        match self {
            EosMode::CrLf => 0,
            EosMode::Cr => 1,
            EosMode::Lf => 2,
            EosMode::None => 3,
        }
    }
}

/// Control keywords of the command-prefixed dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeCommands {
    /// Automatic read-after-write mode (`0`/`1`).
    pub auto: String,
    /// Bridge read timeout in milliseconds.
    pub read_timeout: String,
    /// End-of-string mode.
    pub eos: String,
    /// Interface clear.
    pub interface_clear: String,
    /// Target GPIB address.
    pub address: String,
    /// Remote with local lockout.
    pub lockout: String,
    /// Dump the instrument's buffered response.
    pub read: String,
    /// Return the instrument to local control.
    pub local: String,
    /// Firmware version query.
    pub version: String,
}

impl Default for BridgeCommands {
    fn default() -> Self {
        Self {
            auto: "++auto".to_string(),
            read_timeout: "++read_tmo_ms".to_string(),
            eos: "++eos".to_string(),
            interface_clear: "++ifc".to_string(),
            address: "++addr".to_string(),
            lockout: "++llo".to_string(),
            read: "++read".to_string(),
            local: "++loc".to_string(),
            version: "++ver".to_string(),
        }
    }
}

/// Join a keyword and its argument the way the bridge expects.
pub(crate) fn with_arg(keyword: &str, arg: impl fmt::Display) -> String {
    format!("{} {}", keyword, arg)
}

/// Connection settings for a bridge adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// GPIB primary address of the analyzer (0-30).
    pub target_address: u8,
    /// Bridge-side read timeout. The analyzer settles slowly, so this is long.
    pub read_timeout_ms: u32,
    /// End-of-string convention.
    pub eos_mode: EosMode,
    /// Whether the bridge reads automatically after every write.
    pub auto_mode: bool,
    /// Pause after each initialization command.
    pub settle_ms: u64,
    /// Pause after setting the address.
    pub address_settle_ms: u64,
    /// Pause between two polls of the serial port while waiting for a reply.
    pub poll_interval_ms: u64,
    /// Prefix a healthy version reply starts with.
    pub version_banner: String,
    /// Dialect keywords.
    pub commands: BridgeCommands,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            target_address: 0,
            read_timeout_ms: 2500,
            eos_mode: EosMode::CrLf,
            auto_mode: false,
            settle_ms: 20,
            address_settle_ms: 100,
            poll_interval_ms: 2,
            version_banner: "Version".to_string(),
            commands: BridgeCommands::default(),
        }
    }
}

impl BridgeConfig {
    /// Default settings for the instrument at `address`.
    pub fn for_address(address: u8) -> Self {
        Self {
            target_address: address,
            ..Default::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject settings that cannot work before touching the port.
    pub fn validate(&self) -> GpibResult<()> {
        if self.target_address > MAX_GPIB_ADDRESS {
            return Err(GpibError::Config(format!(
                "GPIB address must be between 0 and {}, got {}",
                MAX_GPIB_ADDRESS, self.target_address
            )));
        }
        if self.read_timeout_ms == 0 {
            return Err(GpibError::Config(
                "read_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.poll_interval_ms >= u64::from(self.read_timeout_ms) {
            return Err(GpibError::Config(format!(
                "poll_interval_ms ({}) must be below read_timeout_ms ({})",
                self.poll_interval_ms, self.read_timeout_ms
            )));
        }
        if self.version_banner.is_empty() {
            return Err(GpibError::Config("version_banner must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_galvant_firmware() {
        let config = BridgeConfig::default();
        assert_eq!(config.read_timeout_ms, 2500);
        assert_eq!(config.eos_mode.arg(), 0);
        assert!(!config.auto_mode);
        assert_eq!(config.commands.local, "++loc");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_address_out_of_range() {
        let config = BridgeConfig::for_address(31);
        assert!(matches!(config.validate(), Err(GpibError::Config(_))));
        assert!(BridgeConfig::for_address(30).validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            target_address = 28
            eos_mode = "lf"

            [commands]
            local = "++local"
            "#,
        )
        .unwrap();

        assert_eq!(config.target_address, 28);
        assert_eq!(config.eos_mode, EosMode::Lf);
        assert_eq!(config.commands.local, "++local");
        assert_eq!(config.commands.interface_clear, "++ifc");
        assert_eq!(config.read_timeout_ms, 2500);
    }

    #[test]
    fn test_bridge_kind_parse() {
        assert_eq!("prefixed".parse::<BridgeKind>().unwrap(), BridgeKind::Prefixed);
        assert_eq!("NI".parse::<BridgeKind>().unwrap(), BridgeKind::Transparent);
        assert!("usbtmc".parse::<BridgeKind>().is_err());
        assert_eq!(BridgeKind::Transparent.to_string(), "transparent");
    }

    #[test]
    fn test_with_arg() {
        assert_eq!(with_arg("++addr", 28), "++addr 28");
    }
}
