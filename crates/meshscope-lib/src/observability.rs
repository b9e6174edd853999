//! Observability infrastructure for meshscope
//!
//! Provides:
//! - Prometheus metrics (connection gauge, collection duration, request latency)
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use tracing::info;

/// Buckets for the duration of one collection cycle (in seconds)
pub const COLLECT_DURATION_BUCKETS: &[f64] = &[
    10.0, 20.0, 30.0, 60.0, 90.0, 120.0, 150.0, 180.0, 240.0, 270.0, 320.0, 360.0, 480.0, 540.0,
    600.0, 1000.0,
];

/// Buckets for HTTP request latency (in seconds)
pub const REQUEST_DURATION_BUCKETS: &[f64] =
    &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Name of the connection gauge, before namespace/subsystem prefixing
pub const CONNECTION_METRIC: &str = "scope_connection";

const CONNECTION_LABELS: &[&str] = &["topology", "src", "src_ns", "dest", "dest_ns", "dest_port"];

/// Fully qualified metric name as Prometheus exposes it
pub fn qualified_name(namespace: &str, subsystem: &str, name: &str) -> String {
    [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

/// Label tuple of one correlated connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionLabels {
    pub topology: String,
    pub src: String,
    pub src_ns: String,
    pub dest: String,
    pub dest_ns: String,
    pub dest_port: String,
}

/// Metrics published by the collector
#[derive(Clone)]
pub struct CollectorMetrics {
    connection: GaugeVec,
    duration_seconds: HistogramVec,
}

impl CollectorMetrics {
    /// Create the collector metrics and register them with `registry`.
    ///
    /// Fails when metrics with the same names are already registered.
    pub fn register(
        registry: &Registry,
        namespace: &str,
        subsystem: &str,
    ) -> prometheus::Result<Self> {
        let connection = GaugeVec::new(
            Opts::new(CONNECTION_METRIC, "Connection between two workloads")
                .namespace(namespace)
                .subsystem(subsystem),
            CONNECTION_LABELS,
        )?;
        let duration_seconds = HistogramVec::new(
            HistogramOpts::new("scope_duration_seconds", "Duration of one collection cycle")
                .namespace(namespace)
                .subsystem(subsystem)
                .buckets(COLLECT_DURATION_BUCKETS.to_vec()),
            &["topology"],
        )?;

        registry.register(Box::new(connection.clone()))?;
        registry.register(Box::new(duration_seconds.clone()))?;

        Ok(Self {
            connection,
            duration_seconds,
        })
    }

    /// Mark a connection as observed. Repeated observations are idempotent.
    pub fn observe_connection(&self, labels: &ConnectionLabels) {
        self.connection
            .with_label_values(&[
                labels.topology.as_str(),
                labels.src.as_str(),
                labels.src_ns.as_str(),
                labels.dest.as_str(),
                labels.dest_ns.as_str(),
                labels.dest_port.as_str(),
            ])
            .set(1.0);
    }

    pub fn observe_duration(&self, topology: &str, duration_secs: f64) {
        self.duration_seconds
            .with_label_values(&[topology])
            .observe(duration_secs);
    }

    /// Drop every observed connection
    pub fn reset(&self) {
        self.connection.reset();
    }

    /// Number of distinct connections currently exported
    pub fn connection_count(&self) -> usize {
        use prometheus::core::Collector;

        self.connection
            .collect()
            .iter()
            .map(|family| family.get_metric().len())
            .sum()
    }

    /// Number of cycles observed for a topology
    pub fn duration_sample_count(&self, topology: &str) -> u64 {
        self.duration_seconds
            .with_label_values(&[topology])
            .get_sample_count()
    }
}

/// Metrics published by the HTTP API
#[derive(Clone)]
pub struct HttpMetrics {
    request_duration_seconds: HistogramVec,
}

impl HttpMetrics {
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "Duration of HTTP requests")
                .buckets(REQUEST_DURATION_BUCKETS.to_vec()),
            &["code", "path"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        Ok(Self {
            request_duration_seconds,
        })
    }

    pub fn observe_request(&self, code: u16, path: &str, duration_secs: f64) {
        self.request_duration_seconds
            .with_label_values(&[code.to_string().as_str(), path])
            .observe(duration_secs);
    }
}

/// Structured logger for service lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    service: String,
}

impl StructuredLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Log service startup
    pub fn log_startup(&self, version: &str, topology: &str) {
        info!(
            event = "service_started",
            service = %self.service,
            version = %version,
            topology = %topology,
            "meshscope started"
        );
    }

    /// Log service shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "meshscope shutting down"
        );
    }
}
