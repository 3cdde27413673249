//! # Fibonacci Backoff
//!
//! Requeue delays for reconciles that fail with an unclassified error.
//! Sequence: 10s, 10s, 20s, 30s, 50s, 80s, 130s, ... capped at 5 minutes.
//! A successful reconcile resets the host's sequence.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Fibonacci backoff calculator
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_seconds: u64,
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Return the current delay and advance the sequence.
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_seconds;
        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = next.min(self.max_seconds);
        Duration::from_secs(result)
    }

    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}

/// Per-host backoff state, keyed by `namespace/name`.
#[derive(Debug)]
pub struct HostBackoff {
    min_seconds: u64,
    max_seconds: u64,
    states: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl HostBackoff {
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            max_seconds,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Next requeue delay for a failing host.
    pub fn on_error(&self, key: &str) -> Duration {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states
            .entry(key.to_string())
            .or_insert_with(|| FibonacciBackoff::new(self.min_seconds, self.max_seconds))
            .next_backoff()
    }

    /// Forget the failure history of a host.
    pub fn on_success(&self, key: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

impl Default for HostBackoff {
    fn default() -> Self {
        Self::new(10, 300)
    }
}
