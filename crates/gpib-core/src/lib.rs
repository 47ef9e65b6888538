//! Core types for talking to GPIB instruments through serial bridges.
//!
//! - [`error`]: the [`GpibError`] taxonomy shared by every layer
//! - [`transport`]: the non-blocking byte-stream [`Transport`] and its serial implementation
//! - [`poll`]: the bounded reply poll loop used by the bridge adapters
//! - [`clock`]: injectable time source so timeouts are testable
//! - [`mock`]: scripted in-memory transport for tests

pub mod clock;
pub mod error;
pub mod mock;
pub mod poll;
pub mod transport;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{ErrorKind, GpibError, GpibResult};
pub use poll::{ReadRequest, ReplyPoller, DEFAULT_POLL_INTERVAL};
pub use transport::{DynTransport, SerialSettings, SerialTransport, Transport};
