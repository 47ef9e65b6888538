//! Scripted in-memory transport for testing bridge adapters without hardware.
//!
//! `MockTransport` records every write and answers according to reply rules:
//! when a write contains a rule's pattern, the rule's next reply is queued for
//! the read side. A `None` reply means the device stays silent, which is how
//! tests provoke read timeouts. Clones share state, so a test keeps one handle
//! for assertions while the adapter owns another.
//!
//! # Example
//!
//! ```
//! use gpib_core::mock::MockTransport;
//! use gpib_core::transport::Transport;
//!
//! let mock = MockTransport::new();
//! mock.on_write("++ver", "Version 6.1\r\n");
//!
//! let mut port = mock.clone();
//! port.write(b"++ver\n").unwrap();
//! assert_eq!(port.read_available().unwrap(), b"Version 6.1\r\n");
//! assert_eq!(mock.written(), vec!["++ver\n"]);
//! ```

use crate::error::{GpibError, GpibResult};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug)]
struct ReplyRule {
    pattern: Vec<u8>,
    script: VecDeque<Option<Vec<u8>>>,
    fallback: Option<Vec<u8>>,
}

impl ReplyRule {
    fn next_reply(&mut self) -> Option<Vec<u8>> {
        match self.script.pop_front() {
            Some(reply) => reply,
            None => self.fallback.clone(),
        }
    }
}

#[derive(Debug)]
struct MockState {
    open: bool,
    writes: Vec<Vec<u8>>,
    pending: VecDeque<u8>,
    rules: Vec<ReplyRule>,
    failing_patterns: Vec<Vec<u8>>,
    broken: bool,
    chunk_size: Option<usize>,
    flushes: usize,
}

/// Cloneable scripted [`Transport`].
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

impl MockTransport {
    /// A new, open transport with no reply rules.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                open: true,
                writes: Vec::new(),
                pending: VecDeque::new(),
                rules: Vec::new(),
                failing_patterns: Vec::new(),
                broken: false,
                chunk_size: None,
                flushes: 0,
            })),
        }
    }

    /// Answer every write containing `pattern` with `reply`.
    pub fn on_write(&self, pattern: &str, reply: &str) {
        self.state.lock().rules.push(ReplyRule {
            pattern: pattern.as_bytes().to_vec(),
            script: VecDeque::new(),
            fallback: Some(reply.as_bytes().to_vec()),
        });
    }

    /// Answer successive writes containing `pattern` with successive entries
    /// of `replies`; `None` leaves that write unanswered. Once the script is
    /// exhausted further matching writes get no reply.
    pub fn on_write_sequence<'a, I>(&self, pattern: &str, replies: I)
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let script = replies
            .into_iter()
            .map(|r| r.map(|s| s.as_bytes().to_vec()))
            .collect();
        self.state.lock().rules.push(ReplyRule {
            pattern: pattern.as_bytes().to_vec(),
            script,
            fallback: None,
        });
    }

    /// Make bytes available to the read side immediately.
    pub fn push_read(&self, bytes: &[u8]) {
        self.state.lock().pending.extend(bytes.iter().copied());
    }

    /// Fail (after recording) every write containing `pattern`.
    pub fn fail_writes_containing(&self, pattern: &str) {
        self.state
            .lock()
            .failing_patterns
            .push(pattern.as_bytes().to_vec());
    }

    /// Simulate an unplugged cable: every read and write fails with an I/O error.
    pub fn set_broken(&self, broken: bool) {
        self.state.lock().broken = broken;
    }

    /// Hand out at most `size` bytes per `read_available` call.
    pub fn set_chunk_size(&self, size: usize) {
        self.state.lock().chunk_size = Some(size.max(1));
    }

    /// Every write so far, lossily decoded as text.
    pub fn written(&self) -> Vec<String> {
        self.state
            .lock()
            .writes
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// Forget the recorded writes.
    pub fn clear_written(&self) {
        self.state.lock().writes.clear();
    }

    /// Number of bytes waiting on the read side.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// How many times `flush_input` was called.
    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn broken_pipe() -> GpibError {
    GpibError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "mock transport disconnected",
    ))
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> GpibResult<usize> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(GpibError::NotOpen);
        }
        state.writes.push(bytes.to_vec());
        if state.broken {
            return Err(broken_pipe());
        }
        if state
            .failing_patterns
            .iter()
            .any(|p| contains(bytes, p))
        {
            return Err(GpibError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "mock write failure",
            )));
        }

        let reply = state
            .rules
            .iter_mut()
            .find(|rule| contains(bytes, &rule.pattern))
            .and_then(ReplyRule::next_reply);
        if let Some(reply) = reply {
            state.pending.extend(reply);
        }
        Ok(bytes.len())
    }

    fn read_available(&mut self) -> GpibResult<Vec<u8>> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(GpibError::NotOpen);
        }
        if state.broken {
            return Err(broken_pipe());
        }
        let n = state
            .chunk_size
            .map_or(state.pending.len(), |size| size.min(state.pending.len()));
        Ok(state.pending.drain(..n).collect())
    }

    fn flush_input(&mut self) -> GpibResult<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(GpibError::NotOpen);
        }
        state.pending.clear();
        state.flushes += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }
}
