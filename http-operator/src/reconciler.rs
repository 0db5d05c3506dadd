//! Convergence of one `KindCustomHttp` key
//!
//! Each call re-reads everything from the [`ObjectStore`] and issues only the writes needed
//! to bring the derived objects in line with the current spec, so it is safe to call any
//! number of times, for any reason, with any subset of the derived objects already present.
//!
//! Steps run in a fixed order: Deployment, Service, ConfigMap. A failing step ends the call;
//! the next call picks up from whatever state the store is left in.
use crate::{
    crd::{KindCustomHttp, KindCustomHttpSpec},
    error::{Error, Result},
    resources::{self, configmap_name},
    store::{Kind, ObjectStore, StoreError, Verb},
    ObjectKey,
};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Service, ServiceSpec},
};
use kube::runtime::controller::Action;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Settings for the objects the reconciler writes
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Image of the server container
    pub image: String,
    /// Delay before re-checking a key after losing a create or update race
    pub conflict_requeue: Duration,
    /// Whether the deletion cascade also removes the derived ConfigMap
    pub cleanup_configmap: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            image: resources::DEFAULT_IMAGE.to_string(),
            conflict_requeue: Duration::from_millis(500),
            cleanup_configmap: true,
        }
    }
}

/// What one step did to one derived object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Created,
    Updated,
    Unchanged,
    Deleted,
    Absent,
    /// Someone else wrote the object between our read and our write
    LostRace,
}

/// Drives the derived objects of a `KindCustomHttp` toward its spec
///
/// Holds no state between calls besides the store handle and its settings.
pub struct Reconciler<S> {
    store: S,
    config: ReconcilerConfig,
}

fn store_error<K: Kind>(verb: Verb, namespace: &str, name: &str, source: StoreError) -> Error {
    Error::Store {
        verb,
        kind: K::kind(&()).to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        source,
    }
}

fn name_of<K: Kind>(obj: &K) -> (&str, &str) {
    let meta = obj.meta();
    (
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default(),
    )
}

impl<S: ObjectStore> Reconciler<S> {
    /// Create a reconciler writing through `store`
    pub fn new(store: S, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }

    /// The store this reconciler reads and writes
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Converge everything derived from the `KindCustomHttp` at `key`
    ///
    /// A missing custom resource triggers the deletion cascade instead.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        debug!("reconciling");
        let Some(app) = self.fetch::<KindCustomHttp>(&key.namespace, &key.name).await? else {
            info!("KindCustomHttp not found, removing derived objects");
            let (deployment, service, configmap) = self.cleanup(key).await?;
            info!(?deployment, ?service, ?configmap, "cleanup finished");
            return Ok(self.action_for(&[deployment, service, configmap]));
        };

        app.spec.validate().map_err(|reason| Error::InvalidSpec {
            key: key.clone(),
            reason,
        })?;
        let deployment = self.converge_deployment(key, &app.spec).await?;
        let service = self.converge_service(key, &app.spec).await?;
        let configmap = self.converge_configmap(key, &app.spec).await?;
        info!(?deployment, ?service, ?configmap, "converged");
        Ok(self.action_for(&[deployment, service, configmap]))
    }

    fn action_for(&self, outcomes: &[Outcome]) -> Action {
        if outcomes.contains(&Outcome::LostRace) {
            Action::requeue(self.config.conflict_requeue)
        } else {
            Action::await_change()
        }
    }

    async fn converge_deployment(&self, key: &ObjectKey, spec: &KindCustomHttpSpec) -> Result<Outcome> {
        let Some(mut existing) = self.fetch::<Deployment>(&key.namespace, &key.name).await? else {
            info!(replicas = spec.replica_count, "creating Deployment");
            return self
                .create(resources::deployment(key, spec, &self.config.image))
                .await;
        };

        // replicas is the only field kept in sync; edits to the rest are left alone
        let current = existing.spec.as_ref().and_then(|s| s.replicas);
        if current == Some(spec.replica_count) {
            return Ok(Outcome::Unchanged);
        }
        info!(from = ?current, to = spec.replica_count, "scaling Deployment");
        existing.spec.get_or_insert_with(Default::default).replicas = Some(spec.replica_count);
        self.replace(&existing).await
    }

    async fn converge_service(&self, key: &ObjectKey, spec: &KindCustomHttpSpec) -> Result<Outcome> {
        let Some(mut existing) = self.fetch::<Service>(&key.namespace, &key.name).await? else {
            info!(port = spec.port, "creating Service");
            return self.create(resources::service(key, spec)).await;
        };

        let ports = existing
            .spec
            .get_or_insert_with(ServiceSpec::default)
            .ports
            .get_or_insert_with(Vec::new);
        match ports.first_mut() {
            Some(first) if first.port == spec.port => return Ok(Outcome::Unchanged),
            Some(first) => {
                info!(from = first.port, to = spec.port, "changing Service port");
                first.port = spec.port;
            }
            None => {
                warn!(port = spec.port, "Service has no ports, rebuilding them");
                *ports = resources::service_ports(spec.port);
            }
        }
        self.replace(&existing).await
    }

    async fn converge_configmap(&self, key: &ObjectKey, spec: &KindCustomHttpSpec) -> Result<Outcome> {
        let name = configmap_name(&key.name);
        let Some(mut existing) = self.fetch::<ConfigMap>(&key.namespace, &name).await? else {
            info!(keys = spec.config_map_data.len(), "creating ConfigMap");
            return self.create(resources::config_map(key, spec)).await;
        };

        let desired = resources::config_data(spec);
        let current = existing.data.as_ref().filter(|data| !data.is_empty());
        if current == desired.as_ref() {
            return Ok(Outcome::Unchanged);
        }
        info!(keys = spec.config_map_data.len(), "replacing ConfigMap data");
        existing.data = desired;
        self.replace(&existing).await
    }

    /// Delete the derived objects of a vanished custom resource
    ///
    /// Everything with a derived name goes, including objects that existed before the
    /// custom resource and were adopted by it.
    async fn cleanup(&self, key: &ObjectKey) -> Result<(Outcome, Outcome, Outcome)> {
        let deployment = self.remove::<Deployment>(&key.namespace, &key.name).await?;
        let service = self.remove::<Service>(&key.namespace, &key.name).await?;
        let configmap = if self.config.cleanup_configmap {
            let name = configmap_name(&key.name);
            self.remove::<ConfigMap>(&key.namespace, &name).await?
        } else {
            Outcome::Unchanged
        };
        Ok((deployment, service, configmap))
    }

    async fn fetch<K: Kind>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.store
            .get(namespace, name)
            .await
            .map_err(|source| store_error::<K>(Verb::Get, namespace, name, source))
    }

    async fn create<K: Kind>(&self, obj: K) -> Result<Outcome> {
        match self.store.create(&obj).await {
            Ok(()) => Ok(Outcome::Created),
            Err(StoreError::AlreadyExists) => {
                debug!(kind = %K::kind(&()), "lost create race");
                Ok(Outcome::LostRace)
            }
            Err(source) => {
                let (namespace, name) = name_of(&obj);
                Err(store_error::<K>(Verb::Create, namespace, name, source))
            }
        }
    }

    async fn replace<K: Kind>(&self, obj: &K) -> Result<Outcome> {
        match self.store.replace(obj).await {
            Ok(()) => Ok(Outcome::Updated),
            Err(StoreError::Conflict) => {
                debug!(kind = %K::kind(&()), "lost update race");
                Ok(Outcome::LostRace)
            }
            Err(source) => {
                let (namespace, name) = name_of(obj);
                Err(store_error::<K>(Verb::Replace, namespace, name, source))
            }
        }
    }

    async fn remove<K: Kind>(&self, namespace: &str, name: &str) -> Result<Outcome> {
        let kind = K::kind(&());
        let Some(existing) = self.fetch::<K>(namespace, name).await? else {
            debug!(%kind, name, "nothing to delete");
            return Ok(Outcome::Absent);
        };
        info!(%kind, name, "deleting");
        match self.store.delete(&existing).await {
            Ok(()) => Ok(Outcome::Deleted),
            Err(StoreError::NotFound) => Ok(Outcome::Absent),
            Err(source) => Err(store_error::<K>(Verb::Delete, namespace, name, source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, Reconciler, ReconcilerConfig};
    use crate::{
        crd::{KindCustomHttp, KindCustomHttpSpec},
        error::Error,
        resources,
        store::{Call, Fault, MemoryStore, StoreError, Verb},
        ObjectKey,
    };
    use k8s_openapi::api::{
        apps::v1::Deployment,
        core::v1::{ConfigMap, Service},
    };
    use std::{collections::BTreeMap, time::Duration};

    const NS: &str = "apps";
    const NAME: &str = "web";

    fn key() -> ObjectKey {
        ObjectKey::new(NS, NAME)
    }

    fn spec(replicas: i32, port: i32, data: &[(&str, &str)]) -> KindCustomHttpSpec {
        KindCustomHttpSpec {
            replica_count: replicas,
            port,
            config_map_data: data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn app(spec: KindCustomHttpSpec) -> KindCustomHttp {
        let mut app = KindCustomHttp::new(NAME, spec);
        app.metadata.namespace = Some(NS.into());
        app
    }

    fn reconciler() -> Reconciler<MemoryStore> {
        Reconciler::new(MemoryStore::new(), ReconcilerConfig::default())
    }

    fn call(verb: Verb, kind: &str, name: &str) -> Call {
        Call {
            verb,
            kind: kind.into(),
            namespace: NS.into(),
            name: name.into(),
        }
    }

    fn deployment(r: &Reconciler<MemoryStore>) -> Deployment {
        r.store().object(NS, NAME).expect("deployment exists")
    }

    fn service(r: &Reconciler<MemoryStore>) -> Service {
        r.store().object(NS, NAME).expect("service exists")
    }

    fn config_map(r: &Reconciler<MemoryStore>) -> ConfigMap {
        r.store().object(NS, "web-configmap").expect("configmap exists")
    }

    fn replicas(d: &Deployment) -> Option<i32> {
        d.spec.as_ref().and_then(|s| s.replicas)
    }

    fn ports(s: &Service) -> Vec<i32> {
        s.spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .map(|ports| ports.iter().map(|p| p.port).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn creates_everything_from_scratch() {
        let r = reconciler();
        r.store().insert(app(spec(3, 8080, &[("LOG_LEVEL", "debug")])));

        let action = r.reconcile(&key()).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(r.store().writes(), vec![
            call(Verb::Create, "Deployment", "web"),
            call(Verb::Create, "Service", "web"),
            call(Verb::Create, "ConfigMap", "web-configmap"),
        ]);

        assert_eq!(replicas(&deployment(&r)), Some(3));
        let svc = service(&r);
        assert_eq!(ports(&svc), vec![8080]);
        assert_eq!(svc.spec.unwrap().cluster_ip.as_deref(), Some("None"));
        assert_eq!(
            config_map(&r).data,
            Some(BTreeMap::from([("LOG_LEVEL".to_string(), "debug".to_string())]))
        );
    }

    #[tokio::test]
    async fn second_pass_writes_nothing() {
        let r = reconciler();
        r.store().insert(app(spec(3, 8080, &[("LOG_LEVEL", "debug")])));
        r.reconcile(&key()).await.unwrap();
        r.store().clear_calls();

        r.reconcile(&key()).await.unwrap();
        assert!(r.store().writes().is_empty());
        // one read of the parent, one per derived object
        assert_eq!(r.store().calls().len(), 4);
    }

    #[tokio::test]
    async fn port_change_only_touches_the_service() {
        let r = reconciler();
        r.store().insert(app(spec(3, 8080, &[("LOG_LEVEL", "debug")])));
        r.reconcile(&key()).await.unwrap();
        r.store().clear_calls();

        r.store().insert(app(spec(3, 9090, &[("LOG_LEVEL", "debug")])));
        r.reconcile(&key()).await.unwrap();
        assert_eq!(r.store().writes(), vec![call(Verb::Replace, "Service", "web")]);
        assert_eq!(ports(&service(&r)), vec![9090]);
    }

    #[tokio::test]
    async fn partial_state_is_completed_without_touching_other_fields() {
        let r = reconciler();
        r.store().insert(app(spec(3, 8080, &[])));
        let mut existing = resources::deployment(&key(), &spec(1, 8080, &[]), "someone/else:v2");
        existing.metadata.labels = None;
        r.store().insert(existing);

        r.reconcile(&key()).await.unwrap();
        assert_eq!(r.store().writes(), vec![
            call(Verb::Replace, "Deployment", "web"),
            call(Verb::Create, "Service", "web"),
            call(Verb::Create, "ConfigMap", "web-configmap"),
        ]);

        let deploy = deployment(&r);
        assert_eq!(replicas(&deploy), Some(3));
        let pod = deploy.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), Some("someone/else:v2"));
        assert_eq!(deployment(&r).metadata.labels, None);
    }

    #[tokio::test]
    async fn configmap_data_is_replaced_not_merged() {
        let r = reconciler();
        r.store().insert(app(spec(1, 80, &[("b", "2")])));
        r.store()
            .insert(resources::config_map(&key(), &spec(1, 80, &[("a", "1")])));

        r.reconcile(&key()).await.unwrap();
        assert_eq!(
            config_map(&r).data,
            Some(BTreeMap::from([("b".to_string(), "2".to_string())]))
        );

        // emptying the spec empties the configmap
        r.store().insert(app(spec(1, 80, &[])));
        r.reconcile(&key()).await.unwrap();
        assert_eq!(config_map(&r).data, None);
    }

    #[tokio::test]
    async fn empty_and_absent_data_are_equal() {
        let r = reconciler();
        r.store().insert(app(spec(1, 80, &[])));
        let mut cm = resources::config_map(&key(), &spec(1, 80, &[]));
        cm.data = Some(BTreeMap::new());
        r.store().insert(cm);
        r.store().insert(resources::deployment(&key(), &spec(1, 80, &[]), "img"));
        r.store().insert(resources::service(&key(), &spec(1, 80, &[])));

        r.reconcile(&key()).await.unwrap();
        assert!(r.store().writes().is_empty());
    }

    #[tokio::test]
    async fn service_without_ports_is_rebuilt() {
        let r = reconciler();
        r.store().insert(app(spec(1, 8080, &[])));
        r.store().insert(resources::deployment(&key(), &spec(1, 8080, &[]), "img"));
        r.store().insert(resources::config_map(&key(), &spec(1, 8080, &[])));
        let mut svc = resources::service(&key(), &spec(1, 8080, &[]));
        svc.spec.as_mut().unwrap().ports = Some(vec![]);
        r.store().insert(svc);

        r.reconcile(&key()).await.unwrap();
        assert_eq!(r.store().writes(), vec![call(Verb::Replace, "Service", "web")]);
        let svc = service(&r);
        assert_eq!(svc.spec.unwrap().ports, Some(resources::service_ports(8080)));

        // a service with no spec at all is repaired the same way
        let mut bare = resources::service(&key(), &spec(1, 8080, &[]));
        bare.spec = None;
        r.store().insert(bare);
        r.reconcile(&key()).await.unwrap();
        assert_eq!(ports(&service(&r)), vec![8080]);
    }

    #[tokio::test]
    async fn deletion_cascade_is_idempotent() {
        let r = reconciler();
        r.store().insert(app(spec(2, 8080, &[("a", "1")])));
        r.reconcile(&key()).await.unwrap();
        assert!(r.store().remove::<KindCustomHttp>(NS, NAME));
        r.store().clear_calls();

        assert_eq!(r.reconcile(&key()).await.unwrap(), Action::await_change());
        assert_eq!(r.store().writes(), vec![
            call(Verb::Delete, "Deployment", "web"),
            call(Verb::Delete, "Service", "web"),
            call(Verb::Delete, "ConfigMap", "web-configmap"),
        ]);
        assert!(r.store().object::<Deployment>(NS, NAME).is_none());
        assert!(r.store().object::<Service>(NS, NAME).is_none());
        assert!(r.store().object::<ConfigMap>(NS, "web-configmap").is_none());

        r.store().clear_calls();
        r.reconcile(&key()).await.unwrap();
        assert!(r.store().writes().is_empty());
    }

    #[tokio::test]
    async fn deletion_can_leave_the_configmap() {
        let r = Reconciler::new(MemoryStore::new(), ReconcilerConfig {
            cleanup_configmap: false,
            ..ReconcilerConfig::default()
        });
        r.store().insert(app(spec(2, 8080, &[])));
        r.reconcile(&key()).await.unwrap();
        r.store().remove::<KindCustomHttp>(NS, NAME);
        r.store().clear_calls();

        r.reconcile(&key()).await.unwrap();
        assert_eq!(r.store().writes(), vec![
            call(Verb::Delete, "Deployment", "web"),
            call(Verb::Delete, "Service", "web"),
        ]);
        assert!(r.store().object::<ConfigMap>(NS, "web-configmap").is_some());
    }

    #[tokio::test]
    async fn adopted_objects_are_deleted_with_their_parent() {
        let r = reconciler();
        r.store().insert(app(spec(3, 8080, &[])));
        let mut adopted = resources::deployment(&key(), &spec(1, 8080, &[]), "someone/else:v2");
        adopted.metadata.labels = None;
        r.store().insert(adopted);

        r.reconcile(&key()).await.unwrap();
        let deploy = deployment(&r);
        assert_eq!(replicas(&deploy), Some(3));
        assert_eq!(deploy.metadata.labels, None);

        r.store().remove::<KindCustomHttp>(NS, NAME);
        r.store().clear_calls();
        r.reconcile(&key()).await.unwrap();
        assert_eq!(r.store().writes(), vec![
            call(Verb::Delete, "Deployment", "web"),
            call(Verb::Delete, "Service", "web"),
            call(Verb::Delete, "ConfigMap", "web-configmap"),
        ]);
        assert!(r.store().object::<Deployment>(NS, NAME).is_none());
    }

    #[tokio::test]
    async fn delete_racing_another_delete_succeeds() {
        let r = reconciler();
        r.store().insert(resources::deployment(&key(), &spec(1, 80, &[]), "img"));
        r.store().fail_next(Verb::Delete, "Deployment", Fault::NotFound);

        assert_eq!(r.reconcile(&key()).await.unwrap(), Action::await_change());
    }

    #[tokio::test]
    async fn lost_races_requeue_instead_of_failing() {
        let r = reconciler();
        r.store().insert(app(spec(3, 8080, &[])));
        r.store().fail_next(Verb::Create, "Deployment", Fault::AlreadyExists);

        let action = r.reconcile(&key()).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_millis(500)));
        // later steps still ran
        assert!(r.store().object::<Service>(NS, NAME).is_some());

        r.store().insert(app(spec(3, 9090, &[])));
        r.store().fail_next(Verb::Replace, "Service", Fault::Conflict);
        let action = r.reconcile(&key()).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_millis(500)));

        // the follow-up converges
        assert_eq!(r.reconcile(&key()).await.unwrap(), Action::await_change());
        assert_eq!(ports(&service(&r)), vec![9090]);
        assert_eq!(replicas(&deployment(&r)), Some(3));
    }

    #[tokio::test]
    async fn transient_failure_aborts_and_next_pass_resumes() {
        let r = reconciler();
        r.store().insert(app(spec(3, 8080, &[("a", "1")])));
        r.store().fail_next(Verb::Get, "Service", Fault::Unavailable);

        let err = r.reconcile(&key()).await.unwrap_err();
        match &err {
            Error::Store {
                verb: Verb::Get,
                kind,
                source: StoreError::Api(_),
                ..
            } => assert_eq!(kind, "Service"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_retryable());
        assert!(r.store().object::<Deployment>(NS, NAME).is_some());
        assert!(r.store().object::<ConfigMap>(NS, "web-configmap").is_none());

        r.store().clear_calls();
        r.reconcile(&key()).await.unwrap();
        assert_eq!(r.store().writes(), vec![
            call(Verb::Create, "Service", "web"),
            call(Verb::Create, "ConfigMap", "web-configmap"),
        ]);
    }

    #[tokio::test]
    async fn failing_parent_fetch_deletes_nothing() {
        let r = reconciler();
        r.store().insert(resources::deployment(&key(), &spec(1, 80, &[]), "img"));
        r.store()
            .fail_next(Verb::Get, "KindCustomHttp", Fault::Unavailable);

        assert!(r.reconcile(&key()).await.is_err());
        assert!(r.store().writes().is_empty());
        assert!(r.store().object::<Deployment>(NS, NAME).is_some());
    }

    #[tokio::test]
    async fn invalid_spec_writes_nothing() {
        let r = reconciler();
        r.store().insert(app(spec(-1, 8080, &[])));

        let err = r.reconcile(&key()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidSpec { .. }));
        assert!(!err.is_retryable());
        assert!(r.store().writes().is_empty());
    }

    #[tokio::test]
    async fn configured_image_is_used_on_create() {
        let r = Reconciler::new(MemoryStore::new(), ReconcilerConfig {
            image: "registry.local/http:1.2".into(),
            ..ReconcilerConfig::default()
        });
        r.store().insert(app(spec(1, 80, &[])));
        r.reconcile(&key()).await.unwrap();

        let pod = deployment(&r).spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), Some("registry.local/http:1.2"));
    }
}
