use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for cycle/probe latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`, `gauge!`,
/// `histogram!`) can be used anywhere in the codebase. The `PrometheusHandle`
/// is retained solely for rendering the `/metrics` endpoint.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    ///
    /// Must be called **once** at startup before any `counter!` / `gauge!` /
    /// `histogram!` calls.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // --- Describe all metrics (adds HELP / TYPE lines) ---

        // reconciliation cycles
        describe_counter!(
            "syncer_cycle_total",
            Unit::Count,
            "Total reconciliation cycles completed per target"
        );
        describe_histogram!(
            "syncer_cycle_duration_seconds",
            Unit::Seconds,
            "Reconciliation cycle duration per target"
        );
        describe_histogram!(
            "syncer_diff_size",
            Unit::Count,
            "Number of instances in the diff set per service"
        );

        // health checks
        describe_counter!(
            "syncer_health_probe_total",
            Unit::Count,
            "Total health probes by outcome (success, failure, timeout)"
        );
        describe_gauge!(
            "syncer_instance_health_status",
            Unit::Count,
            "Per-instance health status: 1=healthy 0=unhealthy"
        );

        // scheduler / rate limiting
        describe_counter!(
            "syncer_queue_dispatched_total",
            Unit::Count,
            "Total tasks dispatched per named queue"
        );
        describe_counter!(
            "syncer_queue_rejected_total",
            Unit::Count,
            "Total tasks rejected by a queue's rate limiter"
        );
        describe_counter!(
            "syncer_dead_letter_total",
            Unit::Count,
            "Total tasks exhausting their retry budget"
        );

        // façade
        describe_counter!(
            "syncer_facade_requests_total",
            Unit::Count,
            "Total HTTP requests handled by the façade, by path and status"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
