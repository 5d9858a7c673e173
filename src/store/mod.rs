//! Versioned record storage used by the reconcilers
//!
//! Reconcilers never talk to `kube::Api` directly; they go through [`Store`],
//! which has two implementations:
//!
//! - [`KubeStore`] - the Kubernetes API server (production)
//! - [`MemoryStore`] - an in-process store with the same optimistic
//!   concurrency, status subresource and finalizer-blocked deletion semantics
//!
//! Both report failures as `kube::Error`, so callers classify errors the same
//! way regardless of backend (404 not found, 409 conflict or already exists).

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::crd::{Database, DatabaseAccess, DatabaseAccessClass, DatabaseClass, DatabaseRequest};
use crate::scoped_api;

/// A record kind the reconcilers can read and write.
///
/// Maps the kind onto the right `Api` scope, since cluster-scoped and
/// namespaced kinds are constructed differently.
pub trait Record:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Whether records of this kind live in a namespace
    const NAMESPACED: bool;

    /// Build an `Api` for this kind, scoped to `namespace` when namespaced
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

macro_rules! namespaced_record {
    ($($kind:ty),* $(,)?) => {
        $(
            impl Record for $kind {
                const NAMESPACED: bool = true;

                fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                    scoped_api(client, namespace)
                }
            }
        )*
    };
}

macro_rules! cluster_record {
    ($($kind:ty),* $(,)?) => {
        $(
            impl Record for $kind {
                const NAMESPACED: bool = false;

                fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
                    Api::all(client)
                }
            }
        )*
    };
}

namespaced_record!(DatabaseRequest, DatabaseAccess, Secret);
cluster_record!(Database, DatabaseClass, DatabaseAccessClass);

/// Keyed record storage with optimistic concurrency.
///
/// `replace` and `replace_status` are conditional on the `resourceVersion`
/// carried in the object's metadata. `delete` of a record that still has
/// finalizers only marks it with a deletion timestamp.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get<K: Record>(&self, namespace: Option<&str>, name: &str)
    -> Result<Option<K>, kube::Error>;

    async fn list<K: Record>(&self, namespace: Option<&str>) -> Result<Vec<K>, kube::Error>;

    async fn create<K: Record>(&self, obj: &K) -> Result<K, kube::Error>;

    /// Replace metadata and spec; status is left untouched
    async fn replace<K: Record>(&self, obj: &K) -> Result<K, kube::Error>;

    /// Replace the status subresource only
    async fn replace_status<K: Record>(&self, obj: &K) -> Result<K, kube::Error>;

    async fn delete<K: Record>(&self, namespace: Option<&str>, name: &str)
    -> Result<(), kube::Error>;
}

/// 404 from the API server
pub fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 404)
}

/// 409 caused by a stale resourceVersion
pub fn is_conflict(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "Conflict")
}

/// 409 caused by creating a name that is taken
pub fn is_already_exists(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}
