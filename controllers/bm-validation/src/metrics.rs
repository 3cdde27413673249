//! Prometheus metrics of the operator.

use crate::error::ControllerError;
use crate::state::ValidationState;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::fmt;

pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    errors: IntCounter,
    terminal_failures: IntCounterVec,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new_custom(Some("bm_validation".to_string()), None)?;
        let reconciles = IntCounterVec::new(
            Opts::new("reconciles_total", "Reconcile steps by validation state"),
            &["state"],
        )?;
        let errors = IntCounter::new("reconcile_errors_total", "Reconciles that returned an error")?;
        let terminal_failures = IntCounterVec::new(
            Opts::new("validation_failures_total", "Hosts that failed validation, by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(terminal_failures.clone()))?;
        Ok(Self {
            registry,
            reconciles,
            errors,
            terminal_failures,
        })
    }

    pub fn observe_state(&self, state: ValidationState) {
        self.reconciles.with_label_values(&[state.as_str()]).inc();
    }

    pub fn observe_error(&self) {
        self.errors.inc();
    }

    pub fn observe_failure(&self, reason: &str) {
        self.terminal_failures.with_label_values(&[reason]).inc();
    }

    /// Registry contents in the Prometheus text format.
    pub fn encode(&self) -> Result<String, ControllerError> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_state(ValidationState::Begin);
        metrics.observe_state(ValidationState::Begin);
        metrics.observe_error();
        metrics.observe_failure("ImageMatchingFwNotFound");

        let text = metrics.encode().unwrap();
        assert!(text.contains("bm_validation_reconciles_total{state=\"Begin\"} 2"));
        assert!(text.contains("bm_validation_reconcile_errors_total 1"));
        assert!(text.contains("bm_validation_validation_failures_total{reason=\"ImageMatchingFwNotFound\"} 1"));
    }
}
