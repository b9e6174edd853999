//! Per-kind list/watch adapters
//!
//! Each adapter knows how to list every object of one kind and how to open a
//! watch stream for it. The store only sees the [`ResourceKind`] trait.

use super::object::{IntoKubeObject, KubeObject, ObjectKind};
use async_trait::async_trait;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::runtime::watcher;
use kube::Client;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while listing or watching a kind
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("error fetch {kind} / {source}")]
    List {
        kind: ObjectKind,
        #[source]
        source: kube::Error,
    },

    #[error("watch on {kind} failed: {message}")]
    Watch { kind: ObjectKind, message: String },
}

/// Change delivered by a watch stream
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// Object was added or modified
    Applied(KubeObject),
    /// Object was removed
    Deleted(KubeObject),
    /// Full listing of the kind, sent when the watch (re)starts
    Restarted(Vec<KubeObject>),
}

/// List/watch access to one kind of orchestration object
#[async_trait]
pub trait ResourceKind: Send + Sync {
    fn kind(&self) -> ObjectKind;

    /// List all current objects of this kind across namespaces
    async fn list(&self) -> Result<Vec<KubeObject>, StoreError>;

    /// Open a watch stream for this kind.
    ///
    /// The stream may end; callers are expected to resubscribe.
    fn watch(&self) -> BoxStream<'static, Result<WatchEvent, StoreError>>;
}

/// [`ResourceKind`] backed by the Kubernetes API
pub struct KubeResource<K> {
    api: Api<K>,
}

impl<K> KubeResource<K>
where
    K: kube::Resource,
    K::DynamicType: Default,
{
    /// Adapter over all namespaces
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

impl<K: IntoKubeObject> KubeResource<K> {
    fn convert(event: watcher::Event<K>) -> Option<WatchEvent> {
        match event {
            watcher::Event::Applied(resource) => resource.to_object().map(WatchEvent::Applied),
            watcher::Event::Deleted(resource) => resource.to_object().map(WatchEvent::Deleted),
            watcher::Event::Restarted(resources) => Some(WatchEvent::Restarted(
                resources.iter().filter_map(K::to_object).collect(),
            )),
        }
    }
}

#[async_trait]
impl<K> ResourceKind for KubeResource<K>
where
    K: IntoKubeObject + kube::Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    fn kind(&self) -> ObjectKind {
        K::KIND
    }

    async fn list(&self) -> Result<Vec<KubeObject>, StoreError> {
        let list = self
            .api
            .list(&ListParams::default())
            .await
            .map_err(|source| StoreError::List {
                kind: K::KIND,
                source,
            })?;

        Ok(list.items.iter().filter_map(K::to_object).collect())
    }

    fn watch(&self) -> BoxStream<'static, Result<WatchEvent, StoreError>> {
        watcher(self.api.clone(), watcher::Config::default())
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) => Self::convert(event).map(Ok),
                    Err(error) => Some(Err(StoreError::Watch {
                        kind: K::KIND,
                        message: error.to_string(),
                    })),
                })
            })
            .boxed()
    }
}

/// Adapters for every kind the store indexes
pub fn default_resources(client: Client) -> Vec<Arc<dyn ResourceKind>> {
    vec![
        Arc::new(KubeResource::<CronJob>::new(client.clone())),
        Arc::new(KubeResource::<DaemonSet>::new(client.clone())),
        Arc::new(KubeResource::<Deployment>::new(client.clone())),
        Arc::new(KubeResource::<Job>::new(client.clone())),
        Arc::new(KubeResource::<Pod>::new(client.clone())),
        Arc::new(KubeResource::<ReplicaSet>::new(client)),
    ]
}
