//! Orchestration objects as seen by the resource store
//!
//! Every watched kind is flattened into one [`KubeObject`] record. Only pods
//! carry a payload (their declared container ports); the workload kinds are
//! kept for identity and ownership so owner chains can be walked.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of orchestration objects kept in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Pod,
    Deployment,
    ReplicaSet,
    DaemonSet,
    Job,
    CronJob,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 6] = [
        ObjectKind::CronJob,
        ObjectKind::DaemonSet,
        ObjectKind::Deployment,
        ObjectKind::Job,
        ObjectKind::Pod,
        ObjectKind::ReplicaSet,
    ];

    /// Plural resource name, as used in log lines
    pub fn plural(&self) -> &'static str {
        match self {
            ObjectKind::Pod => "pods",
            ObjectKind::Deployment => "deployments",
            ObjectKind::ReplicaSet => "replicasets",
            ObjectKind::DaemonSet => "daemonsets",
            ObjectKind::Job => "jobs",
            ObjectKind::CronJob => "cronjobs",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

/// Link from an object to the object that manages it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub uid: String,
    /// Kind as declared on the reference, e.g. "ReplicaSet"
    pub kind: String,
}

/// Flattened orchestration object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeObject {
    pub uid: String,
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
    pub resource_version: Option<String>,
    pub owner_references: Vec<OwnerRef>,
    /// Declared container ports, only populated for pods
    pub container_ports: Vec<i32>,
}

impl KubeObject {
    /// Build a record from any kube resource's metadata.
    ///
    /// Objects without a uid cannot be indexed and yield `None`.
    pub fn from_resource<K: ResourceExt>(kind: ObjectKind, resource: &K) -> Option<Self> {
        let uid = resource.uid()?;
        let owner_references = resource
            .owner_references()
            .iter()
            .map(|owner| OwnerRef {
                uid: owner.uid.clone(),
                kind: owner.kind.clone(),
            })
            .collect();

        Some(Self {
            uid,
            kind,
            namespace: resource.namespace().unwrap_or_default(),
            name: resource.name_any(),
            resource_version: resource.resource_version(),
            owner_references,
            container_ports: Vec::new(),
        })
    }

    pub fn is_pod(&self) -> bool {
        self.kind == ObjectKind::Pod
    }

    /// Uid of the owner followed when walking the owner chain.
    ///
    /// Only the first reference is considered.
    pub fn first_owner(&self) -> Option<&str> {
        self.owner_references.first().map(|owner| owner.uid.as_str())
    }
}

/// Conversion of a typed kube resource into a [`KubeObject`]
pub trait IntoKubeObject {
    const KIND: ObjectKind;

    fn to_object(&self) -> Option<KubeObject>;
}

macro_rules! impl_workload_object {
    ($resource:ty, $kind:expr) => {
        impl IntoKubeObject for $resource {
            const KIND: ObjectKind = $kind;

            fn to_object(&self) -> Option<KubeObject> {
                KubeObject::from_resource(Self::KIND, self)
            }
        }
    };
}

impl_workload_object!(Deployment, ObjectKind::Deployment);
impl_workload_object!(ReplicaSet, ObjectKind::ReplicaSet);
impl_workload_object!(DaemonSet, ObjectKind::DaemonSet);
impl_workload_object!(Job, ObjectKind::Job);
impl_workload_object!(CronJob, ObjectKind::CronJob);

impl IntoKubeObject for Pod {
    const KIND: ObjectKind = ObjectKind::Pod;

    fn to_object(&self) -> Option<KubeObject> {
        let mut object = KubeObject::from_resource(Self::KIND, self)?;
        object.container_ports = self
            .spec
            .iter()
            .flat_map(|spec| spec.containers.iter())
            .flat_map(|container| container.ports.iter().flatten())
            .map(|port| port.container_port)
            .collect();
        Some(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn meta(uid: Option<&str>, owner: Option<(&str, &str)>) -> ObjectMeta {
        ObjectMeta {
            name: Some("checkout-7d9f-x2".to_string()),
            namespace: Some("shop".to_string()),
            uid: uid.map(str::to_string),
            resource_version: Some("42".to_string()),
            owner_references: owner.map(|(uid, kind)| {
                vec![OwnerReference {
                    api_version: "apps/v1".to_string(),
                    kind: kind.to_string(),
                    name: "checkout-7d9f".to_string(),
                    uid: uid.to_string(),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        }
    }

    fn container(ports: &[i32]) -> Container {
        Container {
            name: "app".to_string(),
            ports: Some(
                ports
                    .iter()
                    .map(|port| ContainerPort {
                        container_port: *port,
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_collects_ports_from_all_containers() {
        let pod = Pod {
            metadata: meta(Some("pod-uid"), Some(("rs-uid", "ReplicaSet"))),
            spec: Some(PodSpec {
                containers: vec![container(&[8080, 9090]), container(&[15090])],
                ..Default::default()
            }),
            ..Default::default()
        };

        let object = pod.to_object().unwrap();

        assert_eq!(object.kind, ObjectKind::Pod);
        assert_eq!(object.uid, "pod-uid");
        assert_eq!(object.namespace, "shop");
        assert_eq!(object.name, "checkout-7d9f-x2");
        assert_eq!(object.resource_version.as_deref(), Some("42"));
        assert_eq!(object.container_ports, vec![8080, 9090, 15090]);
        assert_eq!(object.first_owner(), Some("rs-uid"));
        assert_eq!(object.owner_references[0].kind, "ReplicaSet");
    }

    #[test]
    fn test_workload_without_owner() {
        let deployment = Deployment {
            metadata: meta(Some("deploy-uid"), None),
            ..Default::default()
        };

        let object = deployment.to_object().unwrap();

        assert_eq!(object.kind, ObjectKind::Deployment);
        assert!(object.container_ports.is_empty());
        assert_eq!(object.first_owner(), None);
    }

    #[test]
    fn test_object_without_uid_is_skipped() {
        let job = Job {
            metadata: meta(None, None),
            ..Default::default()
        };

        assert!(job.to_object().is_none());
    }
}
