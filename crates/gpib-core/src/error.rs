//! Error types shared by every layer of the GPIB stack.
//!
//! `GpibError` is the single error type for transports, bridge adapters, the
//! instrument codec and the sweep engine. Each variant belongs to one
//! [`ErrorKind`], and the kind decides how the sweep engine reacts:
//!
//! - **Transport**: the device could not be opened, written or read, or the
//!   bridge is not open. Fatal: the current operation is aborted and the
//!   underlying cause is surfaced verbatim.
//! - **Timeout**: no complete reply arrived within the bound. Soft during a
//!   sweep, fatal during connect and self-test.
//! - **Instrument**: the analyzer reported one of its numbered error codes.
//!   Soft: the sweep records the code and continues.
//! - **Protocol**: the reply was neither a number nor a recognizable error
//!   code. Soft: the value is recorded as not-a-number.
//! - **Config**: invalid address, range or step count. Raised before any I/O.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results carrying a [`GpibError`].
pub type GpibResult<T> = std::result::Result<T, GpibError>;

/// Coarse classification of a [`GpibError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Timeout,
    Instrument,
    Protocol,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Instrument => "instrument",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Config => "config",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for bridge and instrument communication.
#[derive(Error, Debug)]
pub enum GpibError {
    /// The serial device could not be opened (busy, missing, permissions).
    #[error("Failed to open serial port '{port}': {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// Read, write or flush on an open transport failed.
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A protocol operation was attempted while the bridge is closed.
    #[error("GPIB bridge is not open")]
    NotOpen,

    /// The bridge controller did not pass its self-test.
    #[error("GPIB bridge self-test failed: {0}")]
    SelfTest(String),

    /// No complete reply within the read bound.
    #[error("No complete reply within {timeout:?} (waited {elapsed:?})")]
    Timeout { timeout: Duration, elapsed: Duration },

    /// The analyzer answered with one of its numbered error codes.
    #[error("Instrument error {code}: {description}")]
    Instrument { code: u8, description: &'static str },

    /// The reply could not be interpreted.
    #[error("Malformed instrument reply: {0}")]
    Protocol(String),

    /// Invalid settings, rejected before any I/O is attempted.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GpibError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GpibError::Open { .. } | GpibError::Io(_) | GpibError::NotOpen => {
                ErrorKind::Transport
            }
            GpibError::SelfTest(_) => ErrorKind::Transport,
            GpibError::Timeout { .. } => ErrorKind::Timeout,
            GpibError::Instrument { .. } => ErrorKind::Instrument,
            GpibError::Protocol(_) => ErrorKind::Protocol,
            GpibError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether this error must abort a running sweep.
    ///
    /// Timeouts, instrument codes and malformed replies only spoil the
    /// current step; transport and configuration failures end the sweep.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Config)
    }

    /// Instrument error code, if this error carries one.
    pub fn instrument_code(&self) -> Option<u8> {
        match self {
            GpibError::Instrument { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GpibError::Timeout {
            timeout: Duration::from_millis(500),
            elapsed: Duration::from_millis(502),
        };
        assert!(err.to_string().contains("500ms"));

        let err = GpibError::Instrument {
            code: 10,
            description: "Reading too large for display.",
        };
        assert_eq!(
            err.to_string(),
            "Instrument error 10: Reading too large for display."
        );
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(GpibError::NotOpen.kind(), ErrorKind::Transport);
        assert_eq!(
            GpibError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            GpibError::Protocol("garbage".into()).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(GpibError::Config("address".into()).kind(), ErrorKind::Config);
    }

    #[test]
    fn test_fatal_policy() {
        assert!(GpibError::NotOpen.is_fatal());
        assert!(!GpibError::Timeout {
            timeout: Duration::ZERO,
            elapsed: Duration::ZERO
        }
        .is_fatal());
        assert!(!GpibError::Protocol("x".into()).is_fatal());
        assert!(!GpibError::Instrument {
            code: 96,
            description: "No signal sensed at input."
        }
        .is_fatal());
    }

    #[test]
    fn test_instrument_code() {
        let err = GpibError::Instrument {
            code: 31,
            description: "Cannot make measurement.",
        };
        assert_eq!(err.instrument_code(), Some(31));
        assert_eq!(GpibError::NotOpen.instrument_code(), None);
    }
}
