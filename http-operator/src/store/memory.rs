use super::{object_key, Kind, ObjectStore, StoreError, Verb};
use async_trait::async_trait;
use kube::error::ErrorResponse;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;

/// A request recorded by [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// What was asked
    pub verb: Verb,
    /// Kind of the object, e.g. `Deployment`
    pub kind: String,
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

/// A failure [`MemoryStore`] can be told to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Answer with [`StoreError::NotFound`]
    NotFound,
    /// Answer with [`StoreError::AlreadyExists`]
    AlreadyExists,
    /// Answer with [`StoreError::Conflict`]
    Conflict,
    /// Answer with a 503 [`StoreError::Api`]
    Unavailable,
}

impl Fault {
    fn into_error(self) -> StoreError {
        match self {
            Fault::NotFound => StoreError::NotFound,
            Fault::AlreadyExists => StoreError::AlreadyExists,
            Fault::Conflict => StoreError::Conflict,
            Fault::Unavailable => StoreError::Api(kube::Error::Api(ErrorResponse {
                status: "Failure".into(),
                message: "the server is currently unable to handle the request".into(),
                reason: "ServiceUnavailable".into(),
                code: 503,
            })),
        }
    }
}

type StoreKey = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<StoreKey, Value>,
    calls: Vec<Call>,
    faults: Vec<(Verb, String, Fault)>,
    revision: u64,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    /// Record a call and hand back the fault armed for it, if any
    fn record(&mut self, verb: Verb, kind: &str, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.calls.push(Call {
            verb,
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        match self.faults.iter().position(|(v, k, _)| *v == verb && k == kind) {
            Some(idx) => Err(self.faults.remove(idx).2.into_error()),
            None => Ok(()),
        }
    }
}

/// An in-process [`ObjectStore`]
///
/// Objects are kept as JSON, every request is recorded, writes are guarded by
/// `resourceVersion` like the API server does, and faults can be armed one request at a
/// time to exercise failure paths.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn storage_key<K: Kind>(namespace: &str, name: &str) -> StoreKey {
    (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
}

fn to_value<K: Kind>(obj: &K) -> Result<Value, StoreError> {
    serde_json::to_value(obj).map_err(|err| StoreError::Api(kube::Error::SerdeError(err)))
}

fn from_value<K: Kind>(value: Value) -> Result<K, StoreError> {
    serde_json::from_value(value).map_err(|err| StoreError::Api(kube::Error::SerdeError(err)))
}

impl MemoryStore {
    /// An empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an object in place without recording a call, as if someone else wrote it
    ///
    /// # Panics
    /// When the object has no name or namespace.
    pub fn insert<K: Kind>(&self, mut obj: K) {
        let (namespace, name) = object_key(&obj).expect("seeded objects need a namespace and name");
        let key = storage_key::<K>(namespace, name);
        let mut state = self.state.lock();
        obj.meta_mut().resource_version = Some(state.next_revision());
        let value = serde_json::to_value(&obj).expect("seeded objects serialize");
        state.objects.insert(key, value);
    }

    /// Remove an object without recording a call, returning whether it existed
    pub fn remove<K: Kind>(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .objects
            .remove(&storage_key::<K>(namespace, name))
            .is_some()
    }

    /// Peek at an object without recording a call
    #[must_use]
    pub fn object<K: Kind>(&self, namespace: &str, name: &str) -> Option<K> {
        let value = self
            .state
            .lock()
            .objects
            .get(&storage_key::<K>(namespace, name))
            .cloned()?;
        serde_json::from_value(value).ok()
    }

    /// Every request made so far
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Every create, replace and delete made so far
    #[must_use]
    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.verb != Verb::Get).collect()
    }

    /// Forget the recorded requests
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Fail the next `verb` request for objects of `kind` with `fault`
    pub fn fail_next(&self, verb: Verb, kind: &str, fault: Fault) {
        self.state.lock().faults.push((verb, kind.to_string(), fault));
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Kind>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        let key = storage_key::<K>(namespace, name);
        let value = {
            let mut state = self.state.lock();
            state.record(Verb::Get, &key.0, namespace, name)?;
            state.objects.get(&key).cloned()
        };
        value.map(from_value).transpose()
    }

    async fn create<K: Kind>(&self, obj: &K) -> Result<(), StoreError> {
        let (namespace, name) = object_key(obj)?;
        let key = storage_key::<K>(namespace, name);
        let mut value = to_value(obj)?;
        let mut state = self.state.lock();
        state.record(Verb::Create, &key.0, namespace, name)?;
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        value["metadata"]["resourceVersion"] = Value::String(state.next_revision());
        state.objects.insert(key, value);
        Ok(())
    }

    async fn replace<K: Kind>(&self, obj: &K) -> Result<(), StoreError> {
        let (namespace, name) = object_key(obj)?;
        let key = storage_key::<K>(namespace, name);
        let mut value = to_value(obj)?;
        let mut state = self.state.lock();
        state.record(Verb::Replace, &key.0, namespace, name)?;
        let current = state.objects.get(&key).ok_or(StoreError::NotFound)?;
        // unconditional when the caller did not read a version first
        if let Some(expected) = obj.meta().resource_version.as_deref() {
            if current["metadata"]["resourceVersion"].as_str() != Some(expected) {
                return Err(StoreError::Conflict);
            }
        }
        value["metadata"]["resourceVersion"] = Value::String(state.next_revision());
        state.objects.insert(key, value);
        Ok(())
    }

    async fn delete<K: Kind>(&self, obj: &K) -> Result<(), StoreError> {
        let (namespace, name) = object_key(obj)?;
        let key = storage_key::<K>(namespace, name);
        let mut state = self.state.lock();
        state.record(Verb::Delete, &key.0, namespace, name)?;
        state.objects.remove(&key).map(|_| ()).ok_or(StoreError::NotFound)
    }
}
