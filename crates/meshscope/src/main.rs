//! meshscope - workload connection correlator
//!
//! Correlates topology service edges with the Kubernetes workloads that own
//! them, publishes the result as Prometheus metrics and serves the resulting
//! service dependency graph.

use anyhow::{Context, Result};
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use meshscope::{api, config};
use meshscope_lib::{
    collector::Collector,
    health::{components, HealthRegistry},
    k8s::{default_resources, ResourceStore, WatchConfig, WorkloadResolver},
    mesh::{MeshGraph, PromClient},
    observability::{qualified_name, CollectorMetrics, HttpMetrics, StructuredLogger, CONNECTION_METRIC},
    scope::ScopeClient,
};
use prometheus::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "meshscope", version, about = "Correlate topology edges with Kubernetes workloads")]
struct Args {
    /// Directory containing a meshscope.{yaml,json,toml} config file
    #[arg(long, env = "MESHSCOPE_CONFIG")]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::AppConfig::load(args.config_dir.as_deref())?;
    info!(
        topology = %config.collector.topology_id,
        scope = %config.scope.address,
        prometheus = %config.prometheus.address,
        "meshscope configured"
    );

    let logger = StructuredLogger::new("meshscope");
    logger.log_startup(VERSION, &config.collector.topology_id);

    let registry = Registry::new();
    let namespace = &config.collector.metrics.namespace;
    let subsystem = &config.collector.metrics.subsystem;
    let collector_metrics = CollectorMetrics::register(&registry, namespace, subsystem)
        .context("failed to register collector metrics")?;
    let http_metrics =
        HttpMetrics::register(&registry).context("failed to register http metrics")?;

    let health_registry = HealthRegistry::new();
    health_registry.register(components::KUBE_STORE).await;
    health_registry.register(components::COLLECTOR).await;
    health_registry.register(components::MESH).await;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        let logger = logger.clone();
        async move {
            let reason = shutdown_signal().await;
            logger.log_shutdown(reason);
            cancel.cancel();
        }
    });

    // Seed the resource store before anything resolves against it
    let client = kube_client(&config.kube).await?;
    let store = Arc::new(ResourceStore::new().with_health(health_registry.clone()));
    let resources = default_resources(client);
    let seeded = store
        .seed(&resources)
        .await
        .context("failed to list kubernetes resources")?;
    health_registry.set_ready(store.is_seeded());
    info!(objects = seeded, "Resource store seeded");

    let mut tasks = store.spawn_watchers(resources, cancel.clone(), WatchConfig::default());

    let scope_client = Arc::new(
        ScopeClient::new(&config.scope.to_config()).context("failed to create scope client")?,
    );
    let collector = Arc::new(
        Collector::new(
            config.collector.to_config(),
            scope_client,
            WorkloadResolver::new(Arc::clone(&store)),
            collector_metrics,
        )
        .context("invalid collector configuration")?
        .with_health(health_registry.clone()),
    );

    let prom_client = PromClient::new(
        &config.prometheus.to_config(),
        qualified_name(namespace, subsystem, CONNECTION_METRIC),
    )
    .context("failed to create prometheus client")?;
    let mesh = Arc::new(
        MeshGraph::new(config.mesh.to_config(), Arc::new(prom_client))
            .with_health(health_registry.clone()),
    );
    if let Err(e) = mesh.update_data().await {
        warn!(error = %e, "Initial mesh update failed");
    }

    tasks.push(tokio::spawn(
        Arc::clone(&collector).run_collect_interval(cancel.clone()),
    ));
    tasks.push(tokio::spawn(
        Arc::clone(&collector).run_reset_interval(cancel.clone()),
    ));
    tasks.push(tokio::spawn(
        Arc::clone(&mesh).run_update_interval(cancel.clone()),
    ));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        registry,
        http_metrics,
        mesh,
    ));
    tasks.push(tokio::spawn({
        let server_config = config.server.clone();
        let cancel = cancel.clone();
        async move {
            if let Err(e) = api::serve(&server_config, app_state, cancel.clone()).await {
                error!(error = %e, "API server failed");
                cancel.cancel();
            }
        }
    }));

    cancel.cancelled().await;
    info!("Shutting down");

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Task failed during shutdown");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Kubernetes client from an explicit kubeconfig, or inferred from the
/// environment (in-cluster service account or default kubeconfig)
async fn kube_client(config: &config::KubeSection) -> Result<kube::Client> {
    let Some(path) = &config.kubeconfig else {
        return kube::Client::try_default()
            .await
            .context("failed to infer kubernetes configuration");
    };

    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
    let client_config =
        kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("invalid kubeconfig")?;

    kube::Client::try_from(client_config).context("failed to create kubernetes client")
}

/// Resolves on SIGINT or SIGTERM with the received signal's description
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
