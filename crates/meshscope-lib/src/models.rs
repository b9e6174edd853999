//! Core data models of the service dependency graph

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One published connection, as read back from Prometheus
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub source: String,
    pub source_namespace: String,
    pub destination: String,
    pub destination_namespace: String,
    pub destination_port: String,
}

impl Connection {
    /// Build from a series label set; missing labels become empty strings
    pub fn from_labels(labels: &HashMap<String, String>) -> Self {
        let label = |name: &str| labels.get(name).cloned().unwrap_or_default();

        Self {
            source: label("src"),
            source_namespace: label("src_ns"),
            destination: label("dest"),
            destination_namespace: label("dest_ns"),
            destination_port: label("dest_port"),
        }
    }
}

/// Workload in the dependency graph with its edges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshNode {
    pub name: String,
    pub outbounds: Vec<Outbound>,
    pub inbounds: Vec<Inbound>,
}

impl MeshNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Workload this node calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbound {
    pub name: String,
    pub namespace: String,
    pub port: String,
}

/// Workload calling this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inbound {
    pub name: String,
    pub namespace: String,
}

/// Body of `GET /v1/public/mesh`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshResponse {
    pub nodes: BTreeMap<String, MeshNode>,
    pub last_updated: String,
}

/// Body of `GET /v1/public/mesh/{name}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshNodeResponse {
    pub node: MeshNode,
    pub last_updated: String,
}
