//! Correlation cycle and its periodic jobs
//!
//! One cycle fetches a topology snapshot, fans its nodes out to a bounded pool
//! of workers and publishes a gauge observation for every edge whose both ends
//! resolve to a known workload and whose port is exposed by the destination.

use super::cache::NodeCache;
use super::filter::SkipPatterns;
use super::CollectorConfig;
use crate::health::{components, HealthRegistry};
use crate::k8s::{KubeObject, ResolveError, WorkloadResolver};
use crate::observability::{CollectorMetrics, ConnectionLabels};
use crate::schedule::{run_stateful, run_stateless};
use crate::scope::{Connection, NodeSummary, ScopeError, TopologyClient};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors that abort a cycle or prevent building a collector
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("error get topology {topology} / {source}")]
    Topology {
        topology: String,
        #[source]
        source: ScopeError,
    },

    #[error("invalid skip pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("max node handlers must be greater than zero")]
    NoHandlers,
}

/// Failure while processing a single node; logged, never aborts the cycle
#[derive(Debug, Error)]
enum NodeError {
    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Outcome of one collection cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Nodes in the topology snapshot that were processed
    pub nodes: usize,
    /// Nodes excluded by a skip pattern
    pub skipped_nodes: usize,
    /// Nodes whose processing failed
    pub failed_nodes: usize,
    /// Edges published as connections
    pub connections: usize,
}

#[derive(Default)]
struct CycleCounters {
    nodes: AtomicUsize,
    skipped_nodes: AtomicUsize,
    failed_nodes: AtomicUsize,
    connections: AtomicUsize,
}

impl CycleCounters {
    fn snapshot(&self) -> CollectStats {
        CollectStats {
            nodes: self.nodes.load(Ordering::Relaxed),
            skipped_nodes: self.skipped_nodes.load(Ordering::Relaxed),
            failed_nodes: self.failed_nodes.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
        }
    }
}

/// Correlates topology edges with their owning workloads
pub struct Collector {
    config: CollectorConfig,
    client: Arc<dyn TopologyClient>,
    resolver: WorkloadResolver,
    metrics: CollectorMetrics,
    skip: SkipPatterns,
    health: Option<HealthRegistry>,
}

impl Collector {
    pub fn new(
        config: CollectorConfig,
        client: Arc<dyn TopologyClient>,
        resolver: WorkloadResolver,
        metrics: CollectorMetrics,
    ) -> Result<Self, CollectError> {
        if config.max_node_handlers == 0 {
            return Err(CollectError::NoHandlers);
        }
        let skip = SkipPatterns::new(&config.skip_patterns)?;

        Ok(Self {
            config,
            client,
            resolver,
            metrics,
            skip,
            health: None,
        })
    }

    /// Report cycle outcomes to a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Run one correlation cycle.
    ///
    /// Node details fetched during the cycle are dropped when it returns,
    /// whether it succeeded or not.
    pub async fn collect(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<CollectStats, CollectError> {
        let cache = Arc::new(NodeCache::new(
            self.config.topology_id.clone(),
            Arc::clone(&self.client),
        ));

        let result = self.collect_with_cache(&cache, cancel).await;
        cache.reset();
        result
    }

    async fn collect_with_cache(
        self: &Arc<Self>,
        cache: &Arc<NodeCache>,
        cancel: &CancellationToken,
    ) -> Result<CollectStats, CollectError> {
        let start = Instant::now();
        let topology_id = &self.config.topology_id;

        let topology = self
            .client
            .get_topology(topology_id)
            .await
            .map_err(|source| CollectError::Topology {
                topology: topology_id.clone(),
                source,
            })?;

        debug!(
            topology = %topology_id,
            nodes = topology.nodes.len(),
            handlers = self.config.max_node_handlers,
            "Collecting topology"
        );

        let (tx, rx) = mpsc::channel::<NodeSummary>(self.config.max_node_handlers);
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(CycleCounters::default());

        let workers: Vec<_> = (0..self.config.max_node_handlers)
            .map(|_| {
                let collector = Arc::clone(self);
                let cache = Arc::clone(cache);
                let rx = Arc::clone(&rx);
                let counters = Arc::clone(&counters);
                let cancel = cancel.clone();

                tokio::spawn(async move {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let next = rx.lock().await.recv().await;
                        let Some(summary) = next else {
                            break;
                        };
                        collector.handle_node(&cache, &summary, &counters).await;
                    }
                })
            })
            .collect();

        for summary in topology.nodes.into_values() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = tx.send(summary) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(tx);

        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Node worker failed");
            }
        }

        let elapsed = start.elapsed();
        self.metrics
            .observe_duration(topology_id, elapsed.as_secs_f64());

        let stats = counters.snapshot();
        info!(
            topology = %topology_id,
            nodes = stats.nodes,
            skipped_nodes = stats.skipped_nodes,
            failed_nodes = stats.failed_nodes,
            connections = stats.connections,
            elapsed_ms = elapsed.as_millis() as u64,
            "Collection cycle complete"
        );

        Ok(stats)
    }

    async fn handle_node(&self, cache: &NodeCache, summary: &NodeSummary, counters: &CycleCounters) {
        counters.nodes.fetch_add(1, Ordering::Relaxed);

        match self.expose_node_metrics(cache, summary).await {
            Ok(NodeOutcome::Skipped) => {
                counters.skipped_nodes.fetch_add(1, Ordering::Relaxed);
            }
            Ok(NodeOutcome::Exposed(count)) => {
                counters.connections.fetch_add(count, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed_nodes.fetch_add(1, Ordering::Relaxed);
                error!(
                    node_id = %summary.id,
                    label = %summary.label,
                    error = %e,
                    "Failed to expose node metrics"
                );
            }
        }
    }

    /// Publish every valid outgoing edge of one topology node
    async fn expose_node_metrics(
        &self,
        cache: &NodeCache,
        summary: &NodeSummary,
    ) -> Result<NodeOutcome, NodeError> {
        let source = match cache.get(&summary.id).await {
            Ok(node) => node,
            Err(e) if e.is_not_found() => {
                warn!(node_id = %summary.id, error = %e, "Source node not found, skipping");
                return Ok(NodeOutcome::Exposed(0));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(pattern) = self.skip.matching(source.label()) {
            debug!(label = %source.label(), pattern = %pattern, "Skipping node");
            return Ok(NodeOutcome::Skipped);
        }

        let source_owner = match self.resolver.resolve_owner(&source) {
            Ok(owner) => owner,
            Err(e) => {
                warn!(label = %source.label(), error = %e, "Source owner not resolved, skipping");
                return Ok(NodeOutcome::Exposed(0));
            }
        };

        let Some(connections) = source.outgoing_connections() else {
            warn!(label = %source.label(), "Node has no outgoing connections table, skipping");
            return Ok(NodeOutcome::Exposed(0));
        };

        let mut exposed = 0;
        for connection in connections {
            if self
                .expose_edge(cache, &source_owner, connection)
                .await?
            {
                exposed += 1;
            }
        }

        Ok(NodeOutcome::Exposed(exposed))
    }

    /// Publish one edge if it is valid; returns whether it was published
    async fn expose_edge(
        &self,
        cache: &NodeCache,
        source_owner: &KubeObject,
        connection: &Connection,
    ) -> Result<bool, NodeError> {
        let destination = match cache.get(&connection.node_id).await {
            Ok(node) => node,
            Err(e) if e.is_not_found() => {
                warn!(node_id = %connection.node_id, error = %e, "Destination node not found, skipping");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(pattern) = self.skip.matching(destination.label()) {
            debug!(label = %destination.label(), pattern = %pattern, "Skipping destination");
            return Ok(false);
        }

        let destination_owner = match self.resolver.resolve_owner(&destination) {
            Ok(owner) => owner,
            Err(e) => {
                warn!(label = %destination.label(), error = %e, "Destination owner not resolved, skipping");
                return Ok(false);
            }
        };

        let port = connection.port();
        let exposed_ports = match self.resolver.resolve_exposed_ports(&destination) {
            Ok(ports) => ports,
            Err(e) if e.is_not_found() => {
                warn!(label = %destination.label(), error = %e, "Destination pod not resolved, skipping");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        if !exposed_ports.is_empty() && !exposed_ports.contains(port) {
            debug!(
                src = %source_owner.name,
                dest = %destination_owner.name,
                port = %port,
                exposed_ports = ?exposed_ports,
                "Port not exposed by destination, skipping"
            );
            return Ok(false);
        }

        self.metrics.observe_connection(&ConnectionLabels {
            topology: self.config.topology_id.clone(),
            src: source_owner.name.clone(),
            src_ns: source_owner.namespace.clone(),
            dest: destination_owner.name.clone(),
            dest_ns: destination_owner.namespace.clone(),
            dest_port: port.to_string(),
        });

        Ok(true)
    }

    /// Clear every published connection
    pub fn reset(&self) {
        self.metrics.reset();
        debug!(topology = %self.config.topology_id, "Connection metrics reset");
    }

    /// Collect repeatedly, pausing the configured interval between cycles.
    ///
    /// Returns immediately when no collect interval is configured.
    pub async fn run_collect_interval(self: Arc<Self>, cancel: CancellationToken) {
        let Some(pause) = self.config.collect_interval else {
            info!("Collect interval not configured, periodic collection disabled");
            return;
        };

        info!(
            topology = %self.config.topology_id,
            interval_secs = pause.as_secs(),
            "Starting collection loop"
        );

        let token = cancel.clone();
        run_stateful(cancel, pause, move || {
            let collector = Arc::clone(&self);
            let token = token.clone();
            async move { collector.collect_and_report(&token).await }
        })
        .await;

        info!("Collection loop stopped");
    }

    /// Reset the connection gauge on a fixed period.
    ///
    /// Returns immediately when no reset interval is configured.
    pub async fn run_reset_interval(self: Arc<Self>, cancel: CancellationToken) {
        let Some(period) = self.config.reset_interval else {
            info!("Reset interval not configured, periodic reset disabled");
            return;
        };

        info!(interval_secs = period.as_secs(), "Starting reset loop");

        run_stateless(cancel, period, move || {
            let collector = Arc::clone(&self);
            async move { collector.reset() }
        })
        .await;

        info!("Reset loop stopped");
    }

    async fn collect_and_report(self: &Arc<Self>, cancel: &CancellationToken) {
        let result = self.collect(cancel).await;
        if let Err(e) = &result {
            error!(error = %e, "Collection cycle failed");
        }
        if let Some(health) = &self.health {
            health.record(components::COLLECTOR, &result).await;
        }
    }
}

enum NodeOutcome {
    Skipped,
    Exposed(usize),
}
