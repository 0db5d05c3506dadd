use kube::Resource;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// The reconciliation key: a namespaced name
///
/// Everything the reconciler does for a `KindCustomHttp` is addressed through this
/// key, including the derived objects, whose names are pure functions of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace of the custom resource
    pub namespace: String,
    /// Name of the custom resource
    pub name: String,
}

impl ObjectKey {
    /// Build a key from its parts
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The key of a namespaced object, if it has both a name and a namespace
    pub fn from_obj<K: Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        Some(Self::new(meta.namespace.clone()?, meta.name.clone()?))
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
