//! Tracing, logging, metrics (shared setup).

/// Initialize process-wide tracing with JSON output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::Json);
}

/// Tracing configuration (filters, output format).
pub mod tracing;

/// Run metrics and the sinks that receive them.
pub mod metrics;

pub use metrics::{
    InMemoryMetricsSink, JobMetric, MetricsSink, RunMetrics, StageMetric, TracingMetricsSink,
};
