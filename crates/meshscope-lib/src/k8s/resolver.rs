//! Maps topology nodes to the workloads that own them

use super::object::{KubeObject, ObjectKind};
use super::store::ResourceStore;
use crate::scope::NodeDetail;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("node {label} carries no pod uid label")]
    NoPodUid { label: String },

    #[error("object {uid} of node {label} not found")]
    NotFound { uid: String, label: String },

    #[error("object {uid} is a {kind}, not a pod")]
    NotAPod { uid: String, kind: ObjectKind },
}

impl ResolveError {
    /// Conditions that are expected for nodes outside the cluster and only
    /// warrant skipping the node
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ResolveError::NoPodUid { .. } | ResolveError::NotFound { .. }
        )
    }
}

/// Resolves container nodes to pods and their root owners
#[derive(Debug, Clone)]
pub struct WorkloadResolver {
    store: Arc<ResourceStore>,
}

impl WorkloadResolver {
    pub fn new(store: Arc<ResourceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ResourceStore> {
        &self.store
    }

    fn pod_uid<'a>(&self, node: &'a NodeDetail) -> Result<&'a str, ResolveError> {
        node.pod_uid().ok_or_else(|| ResolveError::NoPodUid {
            label: node.label().to_string(),
        })
    }

    /// Pod object running the node's container
    pub fn resolve_pod(&self, node: &NodeDetail) -> Result<Arc<KubeObject>, ResolveError> {
        let uid = self.pod_uid(node)?;
        let object = self.store.get(uid).ok_or_else(|| ResolveError::NotFound {
            uid: uid.to_string(),
            label: node.label().to_string(),
        })?;

        if !object.is_pod() {
            return Err(ResolveError::NotAPod {
                uid: uid.to_string(),
                kind: object.kind,
            });
        }
        Ok(object)
    }

    /// Top-most known owner of the node's pod
    pub fn resolve_owner(&self, node: &NodeDetail) -> Result<Arc<KubeObject>, ResolveError> {
        let uid = self.pod_uid(node)?;
        self.store
            .root_object(uid)
            .ok_or_else(|| ResolveError::NotFound {
                uid: uid.to_string(),
                label: node.label().to_string(),
            })
    }

    /// Declared container ports of the node's pod.
    ///
    /// An empty set means the pod declares no ports and any destination port
    /// is accepted.
    pub fn resolve_exposed_ports(&self, node: &NodeDetail) -> Result<BTreeSet<String>, ResolveError> {
        let pod = self.resolve_pod(node)?;
        Ok(pod
            .container_ports
            .iter()
            .map(|port| port.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::object::OwnerRef;
    use crate::scope::{NodeSummary, Row, Table, LABEL_DOCKER, LABEL_POD_UID};
    use std::collections::HashMap;

    fn node(label: &str, pod_uid: Option<&str>) -> NodeDetail {
        let tables = pod_uid
            .map(|uid| {
                vec![Table {
                    id: LABEL_DOCKER.to_string(),
                    rows: vec![Row {
                        id: LABEL_POD_UID.to_string(),
                        entries: HashMap::from([("value".to_string(), uid.to_string())]),
                    }],
                    ..Default::default()
                }]
            })
            .unwrap_or_default();

        NodeDetail {
            summary: NodeSummary {
                id: format!("{};<container>", label),
                label: label.to_string(),
                tables,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn store() -> Arc<ResourceStore> {
        let store = ResourceStore::new();
        store.apply(KubeObject {
            uid: "pod-1".to_string(),
            kind: ObjectKind::Pod,
            namespace: "shop".to_string(),
            name: "checkout-7d9f-x2".to_string(),
            resource_version: None,
            owner_references: vec![OwnerRef {
                uid: "deploy-1".to_string(),
                kind: "Deployment".to_string(),
            }],
            container_ports: vec![9090, 8080, 8080],
        });
        store.apply(KubeObject {
            uid: "deploy-1".to_string(),
            kind: ObjectKind::Deployment,
            namespace: "shop".to_string(),
            name: "checkout".to_string(),
            resource_version: None,
            owner_references: Vec::new(),
            container_ports: Vec::new(),
        });
        Arc::new(store)
    }

    #[test]
    fn test_resolve_owner() {
        let resolver = WorkloadResolver::new(store());

        let owner = resolver.resolve_owner(&node("checkout", Some("pod-1"))).unwrap();
        assert_eq!(owner.name, "checkout");
        assert_eq!(owner.kind, ObjectKind::Deployment);
    }

    #[test]
    fn test_resolve_owner_not_found() {
        let resolver = WorkloadResolver::new(store());

        let err = resolver.resolve_owner(&node("nginx", None)).unwrap_err();
        assert!(err.is_not_found());

        let err = resolver
            .resolve_owner(&node("nginx", Some("pod-unknown")))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_resolve_exposed_ports_are_ordered_and_unique() {
        let resolver = WorkloadResolver::new(store());

        let ports = resolver
            .resolve_exposed_ports(&node("checkout", Some("pod-1")))
            .unwrap();
        assert_eq!(
            ports.into_iter().collect::<Vec<_>>(),
            vec!["8080".to_string(), "9090".to_string()]
        );
    }

    #[test]
    fn test_resolve_exposed_ports_rejects_non_pod() {
        let resolver = WorkloadResolver::new(store());

        let err = resolver
            .resolve_exposed_ports(&node("checkout", Some("deploy-1")))
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotAPod { .. }));
        assert!(!err.is_not_found());
    }
}
