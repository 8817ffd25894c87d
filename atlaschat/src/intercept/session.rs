//! Runtime-only attachment state, owned by the engine.
//!
//! A session exists exactly while the capture listener is installed. It is
//! never reused: tearing down drops it, and attaching builds a fresh one with
//! a new generation number.

use crate::intercept::host::ListenerId;

/// Outcome of one element-watcher poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTick {
    /// The input surface was found and cached; polling stopped.
    Found,
    /// Not found yet; polling continues.
    Pending { attempts: u32 },
    /// The attempt ceiling was reached; polling stopped.
    GaveUp { attempts: u32 },
}

/// Polling state for the input-surface lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementWatcher {
    attempts: u32,
    max_attempts: u32,
}

impl ElementWatcher {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Count one failed lookup. Returns true once the ceiling is reached.
    pub fn record_miss(&mut self) -> bool {
        self.attempts += 1;
        self.attempts >= self.max_attempts
    }
}

#[derive(Debug)]
pub struct AttachmentSession<H> {
    pub generation: u64,
    pub listener: ListenerId,
    /// Cached input surface; re-acquired lazily when missing or disconnected.
    pub input: Option<H>,
    /// At most one in-flight interception.
    pub processing: bool,
    /// One-shot pass for the next submit keystroke.
    pub suppress_next_intercept: bool,
    pub watcher: Option<ElementWatcher>,
}

impl<H> AttachmentSession<H> {
    pub fn new(generation: u64, listener: ListenerId, max_attempts: u32) -> Self {
        Self {
            generation,
            listener,
            input: None,
            processing: false,
            suppress_next_intercept: false,
            watcher: Some(ElementWatcher::new(max_attempts)),
        }
    }

    /// Take the one-shot pass if armed.
    pub fn consume_suppress(&mut self) -> bool {
        std::mem::take(&mut self.suppress_next_intercept)
    }
}
