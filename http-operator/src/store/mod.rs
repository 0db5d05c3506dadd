//! Access to the objects the reconciler reads and writes
//!
//! The reconciler only ever talks to an [`ObjectStore`], which keeps the convergence
//! logic independent of the transport. [`KubeStore`] is the real implementation on top of
//! [`kube::Api`]; [`MemoryStore`] keeps everything in process for tests.
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::{self, Debug, Display};
use thiserror::Error;

mod api;
mod memory;

pub use api::KubeStore;
pub use memory::{Call, Fault, MemoryStore};

/// Failures from an [`ObjectStore`]
///
/// The first three variants are the distinguishable outcomes the reconciler branches on.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The object does not exist
    #[error("object not found")]
    NotFound,

    /// A create lost against an object with the same name
    #[error("object already exists")]
    AlreadyExists,

    /// A write lost against a newer version of the object
    #[error("object was modified since it was read")]
    Conflict,

    /// The object to write has no name or namespace
    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),

    /// Any other API failure
    #[error("ApiError: {0}")]
    Api(#[source] kube::Error),
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 404 => Self::NotFound,
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => Self::AlreadyExists,
            kube::Error::Api(resp) if resp.code == 409 => Self::Conflict,
            _ => Self::Api(err),
        }
    }
}

/// The kind of request made against a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Fetch by name
    Get,
    /// Create a new object
    Create,
    /// Replace an existing object, guarded by its resourceVersion
    Replace,
    /// Delete by name
    Delete,
}

impl Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verb::Get => "get",
            Verb::Create => "create",
            Verb::Replace => "replace",
            Verb::Delete => "delete",
        })
    }
}

/// Namespaced object types an [`ObjectStore`] can hold
pub trait Kind:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Kind for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Generic get/create/replace/delete over namespaced objects
///
/// Calls are plain request/response: implementations must not retry internally,
/// retrying is up to whoever drives the reconciler.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `None` if it does not exist
    async fn get<K: Kind>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>;

    /// Create an object, [`StoreError::AlreadyExists`] if the name is taken
    async fn create<K: Kind>(&self, obj: &K) -> Result<(), StoreError>;

    /// Replace an object previously read, [`StoreError::Conflict`] if it changed since
    async fn replace<K: Kind>(&self, obj: &K) -> Result<(), StoreError>;

    /// Delete an object, [`StoreError::NotFound`] if it is already gone
    async fn delete<K: Kind>(&self, obj: &K) -> Result<(), StoreError>;
}

/// Namespace and name of an object about to be written
fn object_key<K: Resource>(obj: &K) -> Result<(&str, &str), StoreError> {
    let meta = obj.meta();
    let namespace = meta
        .namespace
        .as_deref()
        .ok_or(StoreError::MissingObjectKey(".metadata.namespace"))?;
    let name = meta
        .name
        .as_deref()
        .ok_or(StoreError::MissingObjectKey(".metadata.name"))?;
    Ok((namespace, name))
}
