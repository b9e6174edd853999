//! Per-cycle memoization of node detail lookups

use crate::scope::{NodeDetail, ScopeError, TopologyClient};
use dashmap::DashMap;
use std::sync::Arc;

/// Node details fetched during one collection cycle.
///
/// A node that is the destination of many edges is fetched once per cycle.
/// Concurrent misses for the same id may both fetch; the last write wins.
pub struct NodeCache {
    topology_id: String,
    client: Arc<dyn TopologyClient>,
    nodes: DashMap<String, Arc<NodeDetail>>,
}

impl NodeCache {
    pub fn new(topology_id: impl Into<String>, client: Arc<dyn TopologyClient>) -> Self {
        Self {
            topology_id: topology_id.into(),
            client,
            nodes: DashMap::new(),
        }
    }

    /// Cached detail for `node_id`, fetching and storing it on a miss
    pub async fn get(&self, node_id: &str) -> Result<Arc<NodeDetail>, ScopeError> {
        if let Some(node) = self.nodes.get(node_id) {
            return Ok(Arc::clone(node.value()));
        }

        let node = Arc::new(self.client.get_node(&self.topology_id, node_id).await?);
        self.nodes.insert(node_id.to_string(), Arc::clone(&node));
        Ok(node)
    }

    /// Store a detail that was fetched elsewhere
    pub fn set(&self, node: NodeDetail) {
        self.nodes.insert(node.id().to_string(), Arc::new(node));
    }

    pub fn reset(&self) {
        self.nodes.clear();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
