//! Kubernetes object cache and workload resolution
//!
//! Pods and the workload kinds that may own them are listed once and then
//! watched for the lifetime of the process. The collector resolves topology
//! nodes against this cache instead of querying the API server per edge.

mod object;
mod resolver;
mod resource;
mod store;

pub use object::{IntoKubeObject, KubeObject, ObjectKind, OwnerRef};
pub use resolver::{ResolveError, WorkloadResolver};
pub use resource::{default_resources, KubeResource, ResourceKind, StoreError, WatchEvent};
pub use store::{Coverage, ResourceStore, WatchConfig};
