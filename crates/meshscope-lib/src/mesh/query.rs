//! Range query client for the Prometheus HTTP API

use super::{MetricsClient, PrometheusError};
use crate::models::Connection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Configuration for the Prometheus client
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    /// Base address of the Prometheus server
    pub address: String,
    /// Bearer token sent with every query
    pub token: Option<String>,
    /// Resolution step of range queries
    pub step: Duration,
    pub request_timeout: Duration,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            address: "http://localhost:9090".to_string(),
            token: None,
            step: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    metric: HashMap<String, String>,
}

/// reqwest backed [`MetricsClient`]
#[derive(Debug, Clone)]
pub struct PromClient {
    client: Client,
    query_url: Url,
    token: Option<String>,
    step: Duration,
    metric: String,
}

impl PromClient {
    /// Client querying the connection gauge named `metric`
    pub fn new(config: &PrometheusConfig, metric: impl Into<String>) -> Result<Self, PrometheusError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        let mut query_url = Url::parse(&config.address)?;
        query_url
            .path_segments_mut()
            .map_err(|_| PrometheusError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(["api", "v1", "query_range"]);

        Ok(Self {
            client,
            query_url,
            token: config.token.clone(),
            step: config.step,
            metric: metric.into(),
        })
    }

    /// PromQL aggregating connections per workload pair
    pub fn connections_query(&self) -> String {
        format!("sum ({}) by (src, dest, dest_port, topology)", self.metric)
    }

    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Series>, PrometheusError> {
        let mut request = self.client.get(self.query_url.clone()).query(&[
            ("query", query.to_string()),
            ("start", start.timestamp().to_string()),
            ("end", end.timestamp().to_string()),
            ("step", format!("{}s", self.step.as_secs().max(1))),
        ]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        let parsed: QueryResponse = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(PrometheusError::Status {
                    code: status.as_u16(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if parsed.status != "success" {
            return Err(PrometheusError::Api {
                error_type: parsed.error_type.unwrap_or_default(),
                message: parsed.error.unwrap_or_default(),
            });
        }

        if !parsed.warnings.is_empty() {
            warn!(query = %query, warnings = ?parsed.warnings, "Prometheus returned warnings");
        }

        let data = parsed
            .data
            .ok_or_else(|| PrometheusError::UnexpectedResult("missing data".to_string()))?;
        if data.result_type != "matrix" {
            return Err(PrometheusError::UnexpectedResult(data.result_type));
        }

        Ok(serde_json::from_value(data.result)?)
    }
}

#[async_trait]
impl MetricsClient for PromClient {
    async fn get_connections(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Connection>, PrometheusError> {
        let started = Instant::now();
        let query = self.connections_query();

        let series = self.query_range(&query, start, end).await?;
        let connections: Vec<_> = series
            .iter()
            .map(|series| Connection::from_labels(&series.metric))
            .collect();

        debug!(
            start = %start,
            end = %end,
            series = connections.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched connections"
        );
        Ok(connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::Server, token: Option<&str>) -> PromClient {
        PromClient::new(
            &PrometheusConfig {
                address: server.url(),
                token: token.map(str::to_string),
                ..Default::default()
            },
            "telescope_scope_connection",
        )
        .unwrap()
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let end = DateTime::from_timestamp(1_700_003_600, 0).unwrap();
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        (start, end)
    }

    #[tokio::test]
    async fn test_get_connections_parses_matrix() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded(
                    "query".into(),
                    "sum (telescope_scope_connection) by (src, dest, dest_port, topology)".into(),
                ),
                Matcher::UrlEncoded("start".into(), "1700000000".into()),
                Matcher::UrlEncoded("end".into(), "1700003600".into()),
                Matcher::UrlEncoded("step".into(), "60s".into()),
            ]))
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body(
                r#"{
                    "status": "success",
                    "data": {
                        "resultType": "matrix",
                        "result": [
                            {"metric": {"src": "frontend", "dest": "checkout", "dest_port": "8080", "topology": "containers"},
                             "values": [[1700000000, "1"]]},
                            {"metric": {"src": "checkout", "src_ns": "shop", "dest": "payments", "dest_ns": "billing", "dest_port": "9000"},
                             "values": [[1700000000, "1"]]}
                        ]
                    },
                    "warnings": ["partial response"]
                }"#,
            )
            .create_async()
            .await;

        let (start, end) = window();
        let connections = client_for(&server, Some("secret"))
            .get_connections(start, end)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(connections.len(), 2);
        assert_eq!(connections[0].source, "frontend");
        assert_eq!(connections[0].source_namespace, "");
        assert_eq!(connections[1].destination_namespace, "billing");
        assert_eq!(connections[1].destination_port, "9000");
    }

    #[tokio::test]
    async fn test_non_matrix_result_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status": "success", "data": {"resultType": "vector", "result": []}}"#)
            .create_async()
            .await;

        let (start, end) = window();
        let err = client_for(&server, None)
            .get_connections(start, end)
            .await
            .unwrap_err();

        assert!(matches!(err, PrometheusError::UnexpectedResult(ref kind) if kind == "vector"));
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"status": "error", "errorType": "bad_data", "error": "parse error"}"#)
            .create_async()
            .await;

        let (start, end) = window();
        let err = client_for(&server, None)
            .get_connections(start, end)
            .await
            .unwrap_err();

        assert!(matches!(err, PrometheusError::Api { ref error_type, .. } if error_type == "bad_data"));
        assert!(err.to_string().contains("parse error"));
    }

    #[tokio::test]
    async fn test_non_json_failure_keeps_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::Any)
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let (start, end) = window();
        let err = client_for(&server, None)
            .get_connections(start, end)
            .await
            .unwrap_err();

        assert!(matches!(err, PrometheusError::Status { code: 502, .. }));
    }
}
