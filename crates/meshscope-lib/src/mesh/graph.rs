//! In-memory dependency graph refreshed from the metrics backend

use super::{MeshError, MetricsClient};
use crate::health::{components, HealthRegistry};
use crate::models::{Connection, Inbound, MeshNode, Outbound};
use crate::schedule::run_stateless;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Configuration for the mesh graph
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Trailing window of connections to aggregate (default: 1 hour)
    pub since: Duration,
    /// Period of background refreshes, disabled when `None`
    pub update_interval: Option<Duration>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            since: Duration::from_secs(3600),
            update_interval: None,
        }
    }
}

/// Strip the pod-template and replica decorations from a workload name:
/// everything up to an opening parenthesis, closing parentheses and a
/// trailing `-<digits>`
pub fn normalize_name(name: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(.*\(|\)|-\d+$)").expect("node name pattern is valid"))
        .replace_all(name, "")
        .into_owned()
}

/// Aggregate connections into graph nodes.
///
/// Connections are de-duplicated by normalized `src -> dest` (the last one
/// wins) and destinations that are plain IP addresses are dropped.
pub fn build_nodes(connections: Vec<Connection>) -> BTreeMap<String, MeshNode> {
    let mut unique: BTreeMap<String, Connection> = BTreeMap::new();
    for mut connection in connections {
        connection.source = normalize_name(&connection.source);
        connection.destination = normalize_name(&connection.destination);
        let key = format!("{} -> {}", connection.source, connection.destination);
        unique.insert(key, connection);
    }

    let mut nodes: BTreeMap<String, MeshNode> = BTreeMap::new();
    for connection in unique.into_values() {
        if connection.destination.parse::<IpAddr>().is_ok() {
            continue;
        }

        nodes
            .entry(connection.source.clone())
            .or_insert_with(|| MeshNode::new(connection.source.clone()))
            .outbounds
            .push(Outbound {
                name: connection.destination.clone(),
                namespace: connection.destination_namespace.clone(),
                port: connection.destination_port.clone(),
            });

        nodes
            .entry(connection.destination.clone())
            .or_insert_with(|| MeshNode::new(connection.destination.clone()))
            .inbounds
            .push(Inbound {
                name: connection.source,
                namespace: connection.source_namespace,
            });
    }

    nodes
}

/// Human readable age, rounded to whole seconds (e.g. "1h2m5s")
fn format_age(age: Duration) -> String {
    let secs = (age.as_millis() + 500) / 1000;
    let (hours, minutes, seconds) = (secs / 3600, secs % 3600 / 60, secs % 60);

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[derive(Debug, Default)]
struct MeshState {
    nodes: BTreeMap<String, MeshNode>,
    last_updated: Option<DateTime<Utc>>,
}

/// Directed service graph, replaced wholesale on every refresh
pub struct MeshGraph {
    config: MeshConfig,
    client: Arc<dyn MetricsClient>,
    state: RwLock<MeshState>,
    health: Option<HealthRegistry>,
}

impl MeshGraph {
    pub fn new(config: MeshConfig, client: Arc<dyn MetricsClient>) -> Self {
        Self {
            config,
            client,
            state: RwLock::new(MeshState::default()),
            health: None,
        }
    }

    /// Report refresh outcomes to a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Rebuild the graph from the trailing window; returns the node count
    pub async fn update_data(&self) -> Result<usize, MeshError> {
        let end = Utc::now();
        let start = end - chrono::Duration::seconds(self.config.since.as_secs() as i64);

        let result = self.client.get_connections(start, end).await;
        if let Some(health) = &self.health {
            health.record(components::MESH, &result).await;
        }

        let nodes = build_nodes(result?);
        let count = nodes.len();

        let mut state = self.state.write().await;
        state.nodes = nodes;
        state.last_updated = Some(Utc::now());

        debug!(nodes = count, "Mesh graph updated");
        Ok(count)
    }

    /// Refresh only if the data is older than `max_age`; returns whether a
    /// refresh happened
    pub async fn refresh_if_stale(&self, max_age: Duration) -> Result<bool, MeshError> {
        let stale = match self.since_last_update().await {
            Some(age) => age > max_age,
            None => true,
        };

        if stale {
            self.update_data().await?;
        }
        Ok(stale)
    }

    pub async fn get_node(&self, name: &str) -> Option<MeshNode> {
        self.state.read().await.nodes.get(name).cloned()
    }

    pub async fn all_nodes(&self) -> BTreeMap<String, MeshNode> {
        self.state.read().await.nodes.clone()
    }

    pub async fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_updated
    }

    async fn since_last_update(&self) -> Option<Duration> {
        self.last_updated()
            .await
            .map(|at| (Utc::now() - at).to_std().unwrap_or_default())
    }

    /// Age of the data, e.g. "42s ago", or "never" before the first refresh
    pub async fn since_last_updated(&self) -> String {
        match self.since_last_update().await {
            Some(age) => format!("{} ago", format_age(age)),
            None => "never".to_string(),
        }
    }

    /// Refresh on the configured period.
    ///
    /// Returns immediately when no update interval is configured.
    pub async fn run_update_interval(self: Arc<Self>, cancel: CancellationToken) {
        let Some(period) = self.config.update_interval else {
            info!("Mesh update interval not configured, periodic refresh disabled");
            return;
        };

        info!(interval_secs = period.as_secs(), "Starting mesh update loop");

        run_stateless(cancel, period, move || {
            let graph = Arc::clone(&self);
            async move {
                if let Err(e) = graph.update_data().await {
                    error!(error = %e, "Mesh update failed");
                }
            }
        })
        .await;

        info!("Mesh update loop stopped");
    }
}
