//! Topology discovery service access
//!
//! The topology service reports which containers talk to which. This module
//! provides its wire types and an HTTP client behind the [`TopologyClient`]
//! trait so the collector can be exercised without a live service.

mod client;
mod types;

pub use client::{ScopeClient, ScopeConfig, ScopeError, TopologyClient};
pub use types::{
    Column, Connection, ConnectionsSummary, MetadataRow, NodeDetail, NodeResponse, NodeSummary,
    NodeSummaryGroup, Parent, Row, Table, Topology, INBOUND_ID, LABEL_DOCKER, LABEL_POD_UID,
    OUTBOUND_ID,
};
