// Metrics module - Prometheus metrics for transformation observability

use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};

use crate::capabilities::BackendKind;
use crate::format::OutputFormat;

/// Engine-wide transformation metrics
pub struct TransformMetrics {
    /// Completed transformations by backend and output format
    pub transformations: IntCounterVec,

    /// Failed transformations by backend and error kind
    pub failures: IntCounterVec,

    /// Transformation duration in seconds, by backend
    pub duration: HistogramVec,
}

/// Global singleton instance of metrics
static METRICS: OnceLock<TransformMetrics> = OnceLock::new();

impl TransformMetrics {
    /// Initialize and return the global metrics instance
    ///
    /// Subsequent calls return the same instance.
    pub fn global() -> &'static Self {
        METRICS.get_or_init(|| {
            let transformations = register_int_counter_vec!(
                "tessera_transformations_total",
                "Completed transformations by backend and output format",
                &["backend", "format"]
            )
            .expect("metric registration");

            let failures = register_int_counter_vec!(
                "tessera_transformation_failures_total",
                "Failed transformations by backend and error kind",
                &["backend", "kind"]
            )
            .expect("metric registration");

            let duration = register_histogram_vec!(
                "tessera_transformation_duration_seconds",
                "Transformation duration by backend",
                &["backend"],
                vec![0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
            )
            .expect("metric registration");

            TransformMetrics {
                transformations,
                failures,
                duration,
            }
        })
    }

    pub fn record_success(&self, backend: BackendKind, format: OutputFormat, elapsed: Duration) {
        self.transformations
            .with_label_values(&[backend.as_str(), format.as_str()])
            .inc();
        self.duration
            .with_label_values(&[backend.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_failure(&self, backend: BackendKind, kind: &str) {
        self.failures
            .with_label_values(&[backend.as_str(), kind])
            .inc();
    }
}
