//! Bounded-time reply polling.
//!
//! Serial bridges give no blocking "read one frame" primitive, so replies are
//! collected by polling [`Transport::read_available`] into an adapter-owned
//! buffer until a frame is complete or the timeout elapses. Between polls the
//! caller's keep-responsive hook runs once, then the loop sleeps one poll
//! interval on the injected [`Clock`].
//!
//! Frames are either terminator-delimited (terminator included in the frame)
//! or fixed-length. Bytes received past the end of a frame stay buffered for
//! the next read. A timed-out read discards its partial frame.

use crate::clock::SharedClock;
use crate::error::{GpibError, GpibResult};
use crate::transport::Transport;
use std::time::Duration;
use tracing::trace;

/// Default pause between two polls of the transport.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// What a read should wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    /// `0` reads up to the terminator; `N > 0` reads exactly `N` bytes.
    pub expected_len: usize,
    /// Upper bound on the whole read.
    pub timeout: Duration,
    /// Frame terminator; `None` uses the adapter's default.
    pub terminator: Option<u8>,
}

impl ReadRequest {
    /// Read one terminator-delimited frame.
    pub fn until_terminator(timeout: Duration) -> Self {
        Self {
            expected_len: 0,
            timeout,
            terminator: None,
        }
    }

    /// Read exactly `len` bytes.
    pub fn exact(len: usize, timeout: Duration) -> Self {
        Self {
            expected_len: len,
            timeout,
            terminator: None,
        }
    }

    /// Override the adapter's default terminator.
    pub fn with_terminator(mut self, terminator: u8) -> Self {
        self.terminator = Some(terminator);
        self
    }
}

/// Adapter-local reply accumulator.
///
/// Each adapter owns one, so two adapters (for example in parallel tests)
/// never share partially received data.
pub struct ReplyPoller {
    buffer: Vec<u8>,
    interval: Duration,
    clock: SharedClock,
}

impl ReplyPoller {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            buffer: Vec::new(),
            interval: DEFAULT_POLL_INTERVAL,
            clock,
        }
    }

    /// Change the pause between polls.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Bytes received but not yet returned as part of a frame.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Whether the buffered remainder already satisfies `request`.
    pub fn has_frame(&self, request: &ReadRequest, default_terminator: u8) -> bool {
        if request.expected_len > 0 {
            return self.buffer.len() >= request.expected_len;
        }
        let terminator = request.terminator.unwrap_or(default_terminator);
        self.buffer.contains(&terminator)
    }

    /// Drop any buffered remainder.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Poll `transport` until `request` is satisfied or times out.
    ///
    /// `default_terminator` applies when the request does not name one.
    ///
    /// # Errors
    /// [`GpibError::Timeout`] when the bound elapses first; transport errors
    /// are passed through unchanged.
    pub fn poll(
        &mut self,
        transport: &mut dyn Transport,
        request: &ReadRequest,
        default_terminator: u8,
        on_poll: &mut dyn FnMut(),
    ) -> GpibResult<Vec<u8>> {
        let terminator = request.terminator.unwrap_or(default_terminator);
        let start = self.clock.now();

        loop {
            let chunk = transport.read_available()?;
            if !chunk.is_empty() {
                trace!(bytes = chunk.len(), "Reply chunk received");
                self.buffer.extend_from_slice(&chunk);
            }

            if let Some(frame) = self.take_frame(request.expected_len, terminator) {
                return Ok(frame);
            }

            let elapsed = self.clock.now().saturating_duration_since(start);
            if elapsed >= request.timeout {
                self.buffer.clear();
                return Err(GpibError::Timeout {
                    timeout: request.timeout,
                    elapsed,
                });
            }

            on_poll();
            self.clock.sleep(self.interval);
        }
    }

    fn take_frame(&mut self, expected_len: usize, terminator: u8) -> Option<Vec<u8>> {
        if expected_len > 0 {
            if self.buffer.len() >= expected_len {
                return Some(self.buffer.drain(..expected_len).collect());
            }
            return None;
        }

        let end = self.buffer.iter().position(|&b| b == terminator)?;
        Some(self.buffer.drain(..=end).collect())
    }
}
