//! UID indexed cache of orchestration objects
//!
//! The store is seeded once from a full listing of every kind and then kept
//! fresh by one supervised watch task per kind. Readers never block writers;
//! the index is a sharded concurrent map.

use super::object::{KubeObject, ObjectKind};
use super::resource::{ResourceKind, StoreError, WatchEvent};
use crate::health::{components, HealthRegistry};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::try_join_all;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How far the store's view of one kind can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// Not listed yet
    Uninitialized,
    /// Listed once, watch not yet delivering
    Seeded,
    /// Watch is delivering events
    Live,
    /// Watch ended or failed, waiting to resubscribe
    Resubscribing,
}

/// Backoff applied when a watch stream fails or ends
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Concurrent object index keyed by uid
#[derive(Debug, Default)]
pub struct ResourceStore {
    objects: DashMap<String, Arc<KubeObject>>,
    coverage: DashMap<ObjectKind, Coverage>,
    health: Option<HealthRegistry>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report watch coverage to a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Current object for a uid
    pub fn get(&self, uid: &str) -> Option<Arc<KubeObject>> {
        self.objects.get(uid).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn coverage(&self, kind: ObjectKind) -> Coverage {
        self.coverage
            .get(&kind)
            .map(|entry| *entry.value())
            .unwrap_or(Coverage::Uninitialized)
    }

    /// True once every kind has been listed at least once
    pub fn is_seeded(&self) -> bool {
        ObjectKind::ALL
            .iter()
            .all(|kind| self.coverage(*kind) != Coverage::Uninitialized)
    }

    /// Insert or replace an object
    pub fn apply(&self, object: KubeObject) {
        self.objects.insert(object.uid.clone(), Arc::new(object));
    }

    pub fn remove(&self, uid: &str) -> Option<Arc<KubeObject>> {
        self.objects.remove(uid).map(|(_, object)| object)
    }

    /// Insert an object only if its uid is unknown.
    ///
    /// Returns false when a (newer) entry was already present.
    pub fn seed_object(&self, object: KubeObject) -> bool {
        match self.objects.entry(object.uid.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(object));
                true
            }
        }
    }

    /// Make the listed objects the complete set of one kind
    pub fn replace_kind(&self, kind: ObjectKind, objects: Vec<KubeObject>) {
        let listed: HashSet<&str> = objects.iter().map(|object| object.uid.as_str()).collect();
        self.objects
            .retain(|uid, object| object.kind != kind || listed.contains(uid.as_str()));

        for object in objects {
            self.apply(object);
        }
    }

    /// Walk the first-owner chain starting at `uid` and return the top-most
    /// object still known to the store.
    ///
    /// Returns `None` only when `uid` itself is unknown.
    pub fn root_object(&self, uid: &str) -> Option<Arc<KubeObject>> {
        let mut current = self.get(uid)?;
        let mut visited = HashSet::from([current.uid.clone()]);

        loop {
            let Some(owner_uid) = current.first_owner() else {
                return Some(current);
            };

            if !visited.insert(owner_uid.to_string()) {
                warn!(uid = %uid, owner_uid = %owner_uid, "Owner chain loops, stopping walk");
                return Some(current);
            }

            match self.get(owner_uid) {
                Some(owner) => current = owner,
                None => return Some(current),
            }
        }
    }

    /// List every kind concurrently and insert the results.
    ///
    /// Any failed listing aborts seeding.
    pub async fn seed(&self, resources: &[Arc<dyn ResourceKind>]) -> Result<usize, StoreError> {
        let listings = try_join_all(resources.iter().map(|resource| async move {
            let objects = resource.list().await?;
            Ok::<_, StoreError>((resource.kind(), objects))
        }))
        .await?;

        let mut seeded = 0;
        for (kind, objects) in listings {
            let count = objects.len();
            for object in objects {
                if self.seed_object(object) {
                    seeded += 1;
                }
            }
            self.coverage.insert(kind, Coverage::Seeded);
            info!(kind = %kind, objects = count, "Seeded resource kind");
        }

        Ok(seeded)
    }

    /// Spawn one supervised watch task per kind
    pub fn spawn_watchers(
        self: &Arc<Self>,
        resources: Vec<Arc<dyn ResourceKind>>,
        cancel: CancellationToken,
        config: WatchConfig,
    ) -> Vec<JoinHandle<()>> {
        resources
            .into_iter()
            .map(|resource| {
                let store = Arc::clone(self);
                let cancel = cancel.clone();
                let config = config.clone();
                tokio::spawn(async move { store.supervise(resource, cancel, config).await })
            })
            .collect()
    }

    async fn supervise(
        self: Arc<Self>,
        resource: Arc<dyn ResourceKind>,
        cancel: CancellationToken,
        config: WatchConfig,
    ) {
        let kind = resource.kind();
        let mut backoff = config.initial_backoff;

        info!(kind = %kind, "Starting resource watch");

        loop {
            let mut stream = resource.watch();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(kind = %kind, "Stopping resource watch");
                        return;
                    }
                    next = stream.next() => match next {
                        Some(Ok(event)) => {
                            self.handle_event(kind, event);
                            self.set_coverage(kind, Coverage::Live).await;
                            backoff = config.initial_backoff;
                        }
                        Some(Err(e)) => {
                            self.set_coverage(kind, Coverage::Resubscribing).await;
                            warn!(
                                kind = %kind,
                                error = %e,
                                backoff_secs = backoff.as_secs_f64(),
                                "Resource watch error"
                            );
                            if !sleep_or_cancel(&cancel, backoff).await {
                                return;
                            }
                            backoff = std::cmp::min(backoff * 2, config.max_backoff);
                        }
                        None => break,
                    }
                }
            }

            self.set_coverage(kind, Coverage::Resubscribing).await;
            warn!(
                kind = %kind,
                backoff_secs = backoff.as_secs_f64(),
                "Resource watch ended, resubscribing"
            );
            if !sleep_or_cancel(&cancel, backoff).await {
                return;
            }
            backoff = std::cmp::min(backoff * 2, config.max_backoff);
        }
    }

    /// Record a coverage transition and report the store's health when it
    /// changed
    async fn set_coverage(&self, kind: ObjectKind, coverage: Coverage) {
        if self.coverage.insert(kind, coverage) == Some(coverage) {
            return;
        }
        let Some(health) = &self.health else {
            return;
        };

        let mut lost: Vec<String> = self
            .coverage
            .iter()
            .filter(|entry| *entry.value() == Coverage::Resubscribing)
            .map(|entry| entry.key().to_string())
            .collect();

        if lost.is_empty() {
            health.set_healthy(components::KUBE_STORE).await;
        } else {
            lost.sort();
            health
                .set_degraded(
                    components::KUBE_STORE,
                    format!("watch resubscribing: {}", lost.join(", ")),
                )
                .await;
        }
    }

    fn handle_event(&self, kind: ObjectKind, event: WatchEvent) {
        match event {
            WatchEvent::Applied(object) => {
                debug!(kind = %kind, uid = %object.uid, name = %object.name, "Object applied");
                self.apply(object);
            }
            WatchEvent::Deleted(object) => {
                debug!(kind = %kind, uid = %object.uid, name = %object.name, "Object deleted");
                self.remove(&object.uid);
            }
            WatchEvent::Restarted(objects) => {
                info!(kind = %kind, objects = objects.len(), "Resource watch restarted");
                self.replace_kind(kind, objects);
            }
        }
    }
}

/// Returns false when cancelled before the duration elapsed
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
