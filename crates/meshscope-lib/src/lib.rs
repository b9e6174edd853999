//! Core library of meshscope
//!
//! This crate provides the core functionality for:
//! - Watching Kubernetes workloads into a uid indexed cache
//! - Correlating topology service edges with their owning workloads
//! - Publishing connections as Prometheus metrics
//! - Aggregating published connections into a service dependency graph
//! - Health checks and observability

pub mod collector;
pub mod health;
pub mod k8s;
pub mod mesh;
pub mod models;
pub mod observability;
pub mod schedule;
pub mod scope;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{CollectorMetrics, HttpMetrics, StructuredLogger};
