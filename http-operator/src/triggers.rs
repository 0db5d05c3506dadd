//! Extra triggers for the `KindCustomHttp` controller
//!
//! Besides the custom resource itself the controller reacts to:
//!
//! - deletions of a `KindCustomHttp`, so its derived objects get cleaned up
//! - updates (not creations or deletions) of managed `Service`s
//! - any change of managed `ConfigMap`s, mapped to their parent through the instance label
use crate::{crd::KindCustomHttp, resources::owner_key, ObjectKey};
use futures::{future, stream, Stream, TryStreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{
    runtime::{
        reflector::ObjectRef,
        watcher::{self, watcher, Event},
        WatchStreamExt,
    },
    Api, Resource,
};
use serde::de::DeserializeOwned;
use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
};

/// `KindCustomHttp` objects as they were when they got deleted
pub fn deletions(
    api: Api<KindCustomHttp>,
    config: watcher::Config,
) -> impl Stream<Item = Result<KindCustomHttp, watcher::Error>> + Send {
    watcher(api, config).default_backoff().try_filter_map(|event| {
        future::ready(Ok(match event {
            Event::Delete(app) => Some(app),
            _ => None,
        }))
    })
}

/// Services that were modified after we first saw them
pub fn service_updates(
    api: Api<Service>,
    config: watcher::Config,
) -> impl Stream<Item = Result<Service, watcher::Error>> + Send {
    let mut filter = UpdateFilter::default();
    watcher(api, config)
        .default_backoff()
        .map_ok(move |event| stream::iter(filter.observe(event).map(Ok::<_, watcher::Error>)))
        .try_flatten()
}

/// The `KindCustomHttp` a derived object of the same name belongs to
pub fn same_name<K: Resource>(obj: &K) -> Option<ObjectRef<KindCustomHttp>> {
    let key = ObjectKey::from_obj(obj)?;
    Some(ObjectRef::new(&key.name).within(&key.namespace))
}

/// The `KindCustomHttp` recorded in a managed ConfigMap's owner marker
pub fn configmap_owner(cm: ConfigMap) -> Option<ObjectRef<KindCustomHttp>> {
    let key = owner_key(&cm.metadata)?;
    Some(ObjectRef::new(&key.name).within(&key.namespace))
}

/// Passes on updates of already known objects and swallows creations and deletions
///
/// An object is known once it has been seen; a later sighting with a different
/// `resourceVersion` is an update. A relist (`Init` .. `InitDone`) forgets objects that are
/// no longer listed without reporting them, and reports known objects that changed while
/// the watch was down.
#[derive(Debug, Default)]
pub struct UpdateFilter {
    versions: HashMap<ObjectKey, String>,
    relisted: Option<HashSet<ObjectKey>>,
}

impl UpdateFilter {
    /// Feed one watch event, returning the object if it was updated
    pub fn observe<K>(&mut self, event: Event<K>) -> Option<K>
    where
        K: Resource + Clone + Debug + DeserializeOwned,
    {
        match event {
            Event::Apply(obj) => self.touch(&obj).then_some(obj),
            Event::Delete(obj) => {
                let key = ObjectKey::from_obj(&obj)?;
                self.versions.remove(&key);
                None
            }
            Event::Init => {
                self.relisted = Some(HashSet::new());
                None
            }
            Event::InitApply(obj) => {
                if let (Some(relisted), Some(key)) = (self.relisted.as_mut(), ObjectKey::from_obj(&obj)) {
                    relisted.insert(key);
                }
                self.touch(&obj).then_some(obj)
            }
            Event::InitDone => {
                if let Some(relisted) = self.relisted.take() {
                    self.versions.retain(|key, _| relisted.contains(key));
                }
                None
            }
        }
    }

    /// Remember the object's version, returning whether it differs from a known one
    fn touch<K: Resource>(&mut self, obj: &K) -> bool {
        let Some(key) = ObjectKey::from_obj(obj) else {
            return false;
        };
        let version = obj.meta().resource_version.clone().unwrap_or_default();
        // a first sighting, or a replay of the version we already have, is no update
        matches!(self.versions.insert(key, version.clone()), Some(previous) if previous != version)
    }
}
