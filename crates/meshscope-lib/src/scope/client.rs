//! HTTP client for the topology service

use super::types::{NodeDetail, NodeResponse, Topology};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Errors returned by the topology service
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("not found / {0}")]
    NotFound(String),

    #[error("client error / {0}")]
    Client(String),

    #[error("internal error / {0}")]
    Internal(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl ScopeError {
    /// True when the requested topology or node does not exist (any more)
    pub fn is_not_found(&self) -> bool {
        matches!(self, ScopeError::NotFound(_))
    }
}

/// Read access to topology snapshots and node details
#[async_trait]
pub trait TopologyClient: Send + Sync {
    /// Fetch the snapshot of a topology
    async fn get_topology(&self, topology_id: &str) -> Result<Topology, ScopeError>;

    /// Fetch the detail of one node of a topology
    async fn get_node(&self, topology_id: &str, node_id: &str) -> Result<NodeDetail, ScopeError>;
}

/// Configuration for the topology service client
#[derive(Debug, Clone)]
pub struct ScopeConfig {
    /// Base address of the service (e.g. "http://weave-scope-app:80")
    pub address: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            address: "http://localhost:4040".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// reqwest backed [`TopologyClient`]
#[derive(Debug, Clone)]
pub struct ScopeClient {
    client: Client,
    base_url: Url,
}

impl ScopeClient {
    pub fn new(config: &ScopeConfig) -> Result<Self, ScopeError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        let mut base_url = Url::parse(&config.address)?;
        let path = base_url.path().trim_end_matches('/').to_string();
        base_url.set_path(&path);

        Ok(Self { client, base_url })
    }

    /// Build an endpoint url below the base path, escaping every segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ScopeError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ScopeError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, ScopeError> {
        let response = self
            .client
            .get(url)
            .header("Content-Type", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if status.is_client_error() || status.is_server_error() {
            let message = format!("({}) {}", status.as_u16(), String::from_utf8_lossy(&body));
            return Err(match status {
                StatusCode::NOT_FOUND => ScopeError::NotFound(message),
                s if s.is_server_error() => ScopeError::Internal(message),
                _ => ScopeError::Client(message),
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl TopologyClient for ScopeClient {
    async fn get_topology(&self, topology_id: &str) -> Result<Topology, ScopeError> {
        let start = Instant::now();
        let url = self.endpoint(&["api", "topology", topology_id])?;

        let topology: Topology = self.get(url).await?;

        debug!(
            topology = %topology_id,
            nodes = topology.nodes.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fetched topology"
        );
        Ok(topology)
    }

    async fn get_node(&self, topology_id: &str, node_id: &str) -> Result<NodeDetail, ScopeError> {
        let start = Instant::now();
        let url = self.endpoint(&["api", "topology", topology_id, node_id])?;

        let response: NodeResponse = self.get(url).await?;

        debug!(
            topology = %topology_id,
            node_id = %node_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fetched node"
        );
        Ok(response.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::Server) -> ScopeClient {
        ScopeClient::new(&ScopeConfig {
            address: server.url(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_topology() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/topology/containers")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"nodes": {"a": {"id": "a", "label": "frontend"}}}"#)
            .create_async()
            .await;

        let topology = client_for(&server).get_topology("containers").await.unwrap();

        mock.assert_async().await;
        assert_eq!(topology.nodes["a"].label, "frontend");
    }

    #[tokio::test]
    async fn test_get_node() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/topology/containers/abc123")
            .with_status(200)
            .with_body(r#"{"node": {"id": "abc123", "label": "checkout"}}"#)
            .create_async()
            .await;

        let node = client_for(&server)
            .get_node("containers", "abc123")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(node.id(), "abc123");
        assert_eq!(node.label(), "checkout");
    }

    #[test]
    fn test_node_id_is_escaped() {
        let client = ScopeClient::new(&ScopeConfig::default()).unwrap();

        let url = client
            .endpoint(&["api", "topology", "containers", "abc;<container>"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:4040/api/topology/containers/abc;%3Ccontainer%3E"
        );

        let url = client.endpoint(&["api", "topology", "hosts", "a/b"]).unwrap();
        assert!(url.as_str().ends_with("/hosts/a%2Fb"));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/topology/containers/gone")
            .with_status(404)
            .with_body("no such node")
            .create_async()
            .await;
        server
            .mock("GET", "/api/topology/containers/bad")
            .with_status(400)
            .create_async()
            .await;
        server
            .mock("GET", "/api/topology/containers/broken")
            .with_status(503)
            .create_async()
            .await;

        let client = client_for(&server);

        let err = client.get_node("containers", "gone").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("(404) no such node"));

        let err = client.get_node("containers", "bad").await.unwrap_err();
        assert!(matches!(err, ScopeError::Client(_)));

        let err = client.get_node("containers", "broken").await.unwrap_err();
        assert!(matches!(err, ScopeError::Internal(_)));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_body_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/topology/containers")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = client_for(&server)
            .get_topology("containers")
            .await
            .unwrap_err();
        assert!(matches!(err, ScopeError::Decode(_)));
    }

    #[test]
    fn test_base_path_is_kept() {
        let client = ScopeClient::new(&ScopeConfig {
            address: "http://scope.local/proxy/".to_string(),
            ..Default::default()
        })
        .unwrap();

        let url = client.endpoint(&["api", "topology", "pods"]).unwrap();
        assert_eq!(url.as_str(), "http://scope.local/proxy/api/topology/pods");
    }
}
