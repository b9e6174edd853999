//! Wire types of the topology service API
//!
//! Only the fields the correlator reads are modelled strictly; everything
//! else is defaulted so that newer service versions keep deserializing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Table id of the connection table listing outbound peers
pub const OUTBOUND_ID: &str = "outgoing-connections";
/// Table id of the connection table listing inbound peers
pub const INBOUND_ID: &str = "incoming-connections";

/// Table carrying the container's docker labels
pub const LABEL_DOCKER: &str = "docker_label_";
/// Row inside [`LABEL_DOCKER`] holding the owning pod uid
pub const LABEL_POD_UID: &str = "label_io.kubernetes.pod.uid";

/// Metadata row id carrying a connection's destination port
const PORT_METADATA_ID: &str = "port";

/// Returned by `/api/topology/{topology}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub nodes: HashMap<String, NodeSummary>,
}

/// Returned by `/api/topology/{topology}/{node}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResponse {
    pub node: NodeDetail,
}

/// Summary information about a topology node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub label_minor: String,
    #[serde(default)]
    pub rank: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    #[serde(default)]
    pub pseudo: bool,
    #[serde(default)]
    pub metadata: Vec<MetadataRow>,
    #[serde(default)]
    pub parents: Vec<Parent>,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub adjacency: Vec<String>,
}

/// Full node record, fetched lazily per node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDetail {
    #[serde(flatten)]
    pub summary: NodeSummary,
    #[serde(default)]
    pub children: Vec<NodeSummaryGroup>,
    #[serde(default)]
    pub connections: Vec<ConnectionsSummary>,
}

impl NodeDetail {
    pub fn id(&self) -> &str {
        &self.summary.id
    }

    pub fn label(&self) -> &str {
        &self.summary.label
    }

    /// Uid of the pod running this container, read from its docker labels
    pub fn pod_uid(&self) -> Option<&str> {
        self.summary
            .tables
            .iter()
            .filter(|table| table.id == LABEL_DOCKER)
            .flat_map(|table| table.rows.iter())
            .find(|row| row.id == LABEL_POD_UID)
            .and_then(|row| row.entries.get("value"))
            .map(String::as_str)
            .filter(|uid| !uid.is_empty())
    }

    /// Name of the parent pod, if the service reports one
    pub fn pod_name(&self) -> Option<&str> {
        self.summary
            .parents
            .iter()
            .find(|parent| parent.topology_id == "pods")
            .map(|parent| parent.label.as_str())
    }

    /// Rows of the outbound connections table, `None` when the table is absent
    pub fn outgoing_connections(&self) -> Option<&[Connection]> {
        self.connections
            .iter()
            .find(|summary| summary.id == OUTBOUND_ID)
            .map(|summary| summary.connections.as_slice())
    }
}

/// Topology-typed group of children for a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummaryGroup {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub nodes: Vec<NodeSummary>,
    #[serde(default)]
    pub topology_id: String,
    #[serde(default)]
    pub columns: Vec<Column>,
}

/// Table of connections to or from a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsSummary {
    pub id: String,
    #[serde(default)]
    pub topology_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// A row in a connections table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub label_minor: String,
    #[serde(default)]
    pub metadata: Vec<MetadataRow>,
}

impl Connection {
    /// Destination port of the connection, empty when not reported
    pub fn port(&self) -> &str {
        self.metadata
            .iter()
            .find(|row| row.id == PORT_METADATA_ID)
            .map(|row| row.value.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRow {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub priority: f64,
    #[serde(default)]
    pub data_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parent {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub topology_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub default_sort: bool,
    #[serde(default)]
    pub data_type: String,
}

/// Table row, entries map column id to cell value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    #[serde(default)]
    pub entries: HashMap<String, String>,
}
