//! Connection collection from the topology service
//!
//! This module walks topology snapshots, resolves each edge's endpoints to
//! their owning workloads through the resource store, and publishes the
//! resulting connections as Prometheus gauge observations.

mod cache;
mod filter;
mod r#loop;


pub use cache::NodeCache;
pub use filter::SkipPatterns;
pub use r#loop::{CollectError, CollectStats, Collector};

use std::time::Duration;

/// Configuration for the collector
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Topology to walk (default: "containers")
    pub topology_id: String,
    /// Label patterns of nodes that are never correlated
    pub skip_patterns: Vec<String>,
    /// Number of concurrent node workers (default: 10)
    pub max_node_handlers: usize,
    /// Period of the connection gauge reset, disabled when `None`
    pub reset_interval: Option<Duration>,
    /// Pause between collection cycles, disabled when `None`
    pub collect_interval: Option<Duration>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            topology_id: "containers".to_string(),
            skip_patterns: Vec::new(),
            max_node_handlers: 10,
            reset_interval: None,
            collect_interval: None,
        }
    }
}
