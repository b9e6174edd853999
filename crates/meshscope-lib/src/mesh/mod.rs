//! Service dependency graph built from published connections
//!
//! The collector publishes connections as gauge observations; this module
//! reads them back out of Prometheus over a trailing window and aggregates
//! them into a directed graph of workloads.

mod graph;
mod query;

pub use graph::{build_nodes, normalize_name, MeshConfig, MeshGraph};
pub use query::{PromClient, PrometheusConfig};

use crate::models::Connection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors returned by the metrics backend
#[derive(Debug, Error)]
pub enum PrometheusError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("query failed ({code}): {body}")]
    Status { code: u16, body: String },

    #[error("query error {error_type}: {message}")]
    Api { error_type: String, message: String },

    #[error("invalid matrix / result type {0}")]
    UnexpectedResult(String),
}

/// Errors raised while refreshing the graph
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("error get connections / {0}")]
    Query(#[from] PrometheusError),
}

/// Source of published connections over a time window
#[async_trait]
pub trait MetricsClient: Send + Sync {
    async fn get_connections(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Connection>, PrometheusError>;
}
