//! Process-wide atomic counters.
//!
//! Counters are bumped silently at the call site; [`Metrics::flush`] emits
//! the current values as one `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    workflows_started: AtomicU64,
    inference_failures: AtomicU64,
    cancellations: AtomicU64,
    model_loads: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            workflows_started: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            cancellations: AtomicU64::new(0),
            model_loads: AtomicU64::new(0),
        }
    }

    pub fn inc_workflows_started(&self) {
        self.workflows_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "workflows_started", "counter incremented");
    }

    pub fn inc_inference_failures(&self) {
        self.inference_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "inference_failures", "counter incremented");
    }

    pub fn inc_cancellations(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cancellations", "counter incremented");
    }

    pub fn inc_model_loads(&self) {
        self.model_loads.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "model_loads", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            workflows_started = self.workflows_started(),
            inference_failures = self.inference_failures(),
            cancellations = self.cancellations(),
            model_loads = self.model_loads(),
        );
    }

    pub fn workflows_started(&self) -> u64 {
        self.workflows_started.load(Ordering::Relaxed)
    }

    pub fn inference_failures(&self) -> u64 {
        self.inference_failures.load(Ordering::Relaxed)
    }

    pub fn cancellations(&self) -> u64 {
        self.cancellations.load(Ordering::Relaxed)
    }

    pub fn model_loads(&self) -> u64 {
        self.model_loads.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.workflows_started.store(0, Ordering::Relaxed);
        self.inference_failures.store(0, Ordering::Relaxed);
        self.cancellations.store(0, Ordering::Relaxed);
        self.model_loads.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_workflows_started();
        m.inc_workflows_started();
        assert_eq!(m.workflows_started(), 2);

        m.inc_inference_failures();
        assert_eq!(m.inference_failures(), 1);

        m.inc_cancellations();
        m.inc_model_loads();
        m.inc_model_loads();
        assert_eq!(m.cancellations(), 1);
        assert_eq!(m.model_loads(), 2);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_workflows_started();
        m.inc_cancellations();
        m.reset();
        assert_eq!(m.workflows_started(), 0);
        assert_eq!(m.cancellations(), 0);
    }
}
