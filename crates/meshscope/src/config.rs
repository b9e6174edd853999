//! Service configuration
//!
//! Values come from an optional `meshscope.{yaml,json,toml}` file and from
//! `MESHSCOPE__<SECTION>__<KEY>` environment variables, the latter winning.

use anyhow::{bail, Context, Result};
use meshscope_lib::collector::CollectorConfig;
use meshscope_lib::mesh::{MeshConfig, PrometheusConfig};
use meshscope_lib::scope::ScopeConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_NAME: &str = "meshscope";
const ENV_PREFIX: &str = "MESHSCOPE";

/// Service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scope: ScopeSection,
    #[serde(default)]
    pub kube: KubeSection,
    #[serde(default)]
    pub collector: CollectorSection,
    #[serde(default)]
    pub prometheus: PrometheusSection,
    #[serde(default)]
    pub mesh: MeshSection,
}

/// HTTP API server
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on draining in-flight requests at shutdown
    #[serde(default = "default_graceful_seconds")]
    pub graceful_seconds: u64,

    /// Allow cross-origin requests from any origin
    #[serde(default)]
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            graceful_seconds: default_graceful_seconds(),
            cors: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopeSection {
    #[serde(default = "default_scope_address")]
    pub address: String,
}

impl Default for ScopeSection {
    fn default() -> Self {
        Self {
            address: default_scope_address(),
        }
    }
}

impl ScopeSection {
    pub fn to_config(&self) -> ScopeConfig {
        ScopeConfig {
            address: self.address.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KubeSection {
    /// Path to a kubeconfig file; in-cluster or default config otherwise
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSection {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub subsystem: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorSection {
    #[serde(default = "default_topology_id")]
    pub topology_id: String,

    #[serde(default)]
    pub skip_patterns: Vec<String>,

    #[serde(default = "default_max_node_handlers")]
    pub max_node_handlers: usize,

    #[serde(default)]
    pub reset_interval_secs: Option<u64>,

    #[serde(default)]
    pub collect_interval_secs: Option<u64>,

    #[serde(default)]
    pub metrics: MetricsSection,
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            topology_id: default_topology_id(),
            skip_patterns: Vec::new(),
            max_node_handlers: default_max_node_handlers(),
            reset_interval_secs: None,
            collect_interval_secs: None,
            metrics: MetricsSection::default(),
        }
    }
}

impl CollectorSection {
    pub fn to_config(&self) -> CollectorConfig {
        CollectorConfig {
            topology_id: self.topology_id.clone(),
            skip_patterns: self.skip_patterns.clone(),
            max_node_handlers: self.max_node_handlers,
            reset_interval: self.reset_interval_secs.map(Duration::from_secs),
            collect_interval: self.collect_interval_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusSection {
    #[serde(default = "default_prometheus_address")]
    pub address: String,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_step_secs")]
    pub step_secs: u64,
}

impl Default for PrometheusSection {
    fn default() -> Self {
        Self {
            address: default_prometheus_address(),
            token: None,
            step_secs: default_step_secs(),
        }
    }
}

impl PrometheusSection {
    pub fn to_config(&self) -> PrometheusConfig {
        PrometheusConfig {
            address: self.address.clone(),
            token: self.token.clone(),
            step: Duration::from_secs(self.step_secs),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshSection {
    #[serde(default = "default_since_secs")]
    pub since_secs: u64,

    #[serde(default)]
    pub update_interval_secs: Option<u64>,
}

impl Default for MeshSection {
    fn default() -> Self {
        Self {
            since_secs: default_since_secs(),
            update_interval_secs: None,
        }
    }
}

impl MeshSection {
    pub fn to_config(&self) -> MeshConfig {
        MeshConfig {
            since: Duration::from_secs(self.since_secs),
            update_interval: self.update_interval_secs.map(Duration::from_secs),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_graceful_seconds() -> u64 {
    10
}

fn default_scope_address() -> String {
    "http://localhost:4040".to_string()
}

fn default_topology_id() -> String {
    "containers".to_string()
}

fn default_max_node_handlers() -> usize {
    10
}

fn default_prometheus_address() -> String {
    "http://localhost:9090".to_string()
}

fn default_step_secs() -> u64 {
    60
}

fn default_since_secs() -> u64 {
    3600
}

impl AppConfig {
    /// Load configuration from the config file (if any) and environment.
    ///
    /// The file is looked up in `./config`, `.` and then `config_dir`; later
    /// locations override earlier ones.
    pub fn load(config_dir: Option<&Path>) -> Result<Self> {
        let mut dirs = vec![PathBuf::from("config"), PathBuf::from(".")];
        dirs.extend(config_dir.map(Path::to_path_buf));

        let mut builder = config::Config::builder();
        for dir in dirs {
            let base = dir.join(CONFIG_NAME);
            builder = builder
                .add_source(config::File::with_name(&base.to_string_lossy()).required(false));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("collector.skip_patterns"),
            )
            .build()
            .context("failed to read configuration")?;

        let config: AppConfig = config
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.collector.max_node_handlers == 0 {
            bail!("collector.max_node_handlers must be greater than zero");
        }
        if self.prometheus.step_secs == 0 {
            bail!("prometheus.step_secs must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.graceful_seconds, 10);
        assert_eq!(config.collector.topology_id, "containers");
        assert_eq!(config.collector.max_node_handlers, 10);
        assert!(config.collector.collect_interval_secs.is_none());
        assert_eq!(config.prometheus.step_secs, 60);
        assert_eq!(config.mesh.since_secs, 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("meshscope.yaml"),
            r#"
server:
  port: 9100
  cors: true
scope:
  address: http://weave-scope-app.weave:80
collector:
  topology_id: pods
  skip_patterns: ["^kube-", "weave"]
  max_node_handlers: 4
  collect_interval_secs: 30
  reset_interval_secs: 3600
  metrics:
    namespace: telescope
prometheus:
  address: http://prometheus:9090
  token: secret
mesh:
  update_interval_secs: 60
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(dir.path())).unwrap();

        assert_eq!(config.server.port, 9100);
        assert!(config.server.cors);
        assert_eq!(config.scope.address, "http://weave-scope-app.weave:80");
        assert_eq!(config.collector.metrics.namespace, "telescope");
        assert_eq!(config.collector.metrics.subsystem, "");
        assert_eq!(config.prometheus.token.as_deref(), Some("secret"));

        let collector = config.collector.to_config();
        assert_eq!(collector.topology_id, "pods");
        assert_eq!(collector.skip_patterns, vec!["^kube-", "weave"]);
        assert_eq!(collector.max_node_handlers, 4);
        assert_eq!(collector.collect_interval, Some(Duration::from_secs(30)));
        assert_eq!(collector.reset_interval, Some(Duration::from_secs(3600)));

        let mesh = config.mesh.to_config();
        assert_eq!(mesh.since, Duration::from_secs(3600));
        assert_eq!(mesh.update_interval, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_zero_handlers_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("meshscope.toml"),
            "[collector]\nmax_node_handlers = 0\n",
        )
        .unwrap();

        let err = AppConfig::load(Some(dir.path())).unwrap_err();
        assert!(err.to_string().contains("max_node_handlers"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();

        let config = AppConfig::load(Some(dir.path())).unwrap();
        assert_eq!(config.server.port, 8080);
    }
}
