//! Runs the [`Reconciler`] under a [`kube::runtime::Controller`]
//!
//! The controller owns queueing: a key is never reconciled twice at the same time,
//! different keys run concurrently up to [`Config::concurrency`], and triggers for a busy
//! key are coalesced. Besides the custom resource it is woken by the streams in
//! [`triggers`].
//!
//! A deleted `KindCustomHttp` is not in the controller's cache any more, so its reconcile
//! surfaces as [`controller::Error::ObjectNotFound`]. Those are picked up from the output
//! stream and run through the reconciler's deletion cascade, with retries.
use crate::{
    crd::KindCustomHttp,
    error::{Error, Result},
    reconciler::Reconciler,
    resources::managed_selector,
    store::ObjectStore,
    triggers, ObjectKey,
};
use backon::{ExponentialBuilder, Retryable};
use futures::{future, StreamExt};
use k8s_openapi::{
    api::core::v1::{ConfigMap, Service},
    NamespaceResourceScope,
};
use kube::{
    api::Api,
    runtime::{
        controller::{self, Action, Config},
        reflector::ObjectRef,
        watcher, Controller,
    },
    Client, Resource, ResourceExt,
};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type ControllerResult = Result<(ObjectRef<KindCustomHttp>, Action), controller::Error<Error, watcher::Error>>;

/// State shared by all reconciles
pub struct Context<S> {
    /// Converges a single key
    pub reconciler: Reconciler<S>,
    /// Delay before retrying a key whose reconcile failed
    pub error_requeue: Duration,
    /// Delay before looking at a key again whose spec cannot be converged
    pub invalid_spec_requeue: Duration,
    /// Retries of the deletion cascade for a vanished `KindCustomHttp`
    pub cleanup_backoff: ExponentialBuilder,
}

impl<S> Context<S> {
    #[must_use]
    pub fn new(reconciler: Reconciler<S>) -> Self {
        Self {
            reconciler,
            error_requeue: Duration::from_secs(5),
            invalid_spec_requeue: Duration::from_secs(300),
            cleanup_backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(30))
                .with_max_times(10),
        }
    }
}

/// Reconcile the key of a `KindCustomHttp` handed over by the controller
pub async fn reconcile<S: ObjectStore>(app: Arc<KindCustomHttp>, ctx: Arc<Context<S>>) -> Result<Action> {
    let namespace = app
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = app
        .metadata
        .name
        .clone()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    ctx.reconciler.reconcile(&ObjectKey::new(namespace, name)).await
}

/// Requeue a failed key after a fixed delay, a long one if retrying cannot help
pub fn error_policy<S>(app: Arc<KindCustomHttp>, err: &Error, ctx: Arc<Context<S>>) -> Action {
    let delay = if err.is_retryable() {
        ctx.error_requeue
    } else {
        ctx.invalid_spec_requeue
    };
    warn!(
        name = %app.name_any(),
        namespace = %app.namespace().unwrap_or_default(),
        error = %err,
        ?delay,
        "reconcile failed"
    );
    Action::requeue(delay)
}

/// Run the deletion cascade for a `KindCustomHttp` that is gone
///
/// Retryable failures are retried with [`Context::cleanup_backoff`]; the controller
/// itself never requeues an object it cannot find.
pub async fn clean_up_after<S: ObjectStore>(ctx: Arc<Context<S>>, key: ObjectKey) -> Result<Action> {
    (|| ctx.reconciler.reconcile(&key))
        .retry(ctx.cleanup_backoff)
        .when(Error::is_retryable)
        .notify(|err, delay| warn!(%key, error = %err, ?delay, "cleanup failed, retrying"))
        .await
}

/// Log one controller result, starting a cleanup for objects it could not find
fn report<S>(result: ControllerResult, ctx: &Arc<Context<S>>) -> Option<JoinHandle<()>>
where
    S: ObjectStore + 'static,
{
    match result {
        Ok((obj, action)) => {
            debug!(object = %obj, ?action, "reconciled");
            None
        }
        Err(controller::Error::ObjectNotFound(obj)) => {
            let key = ObjectKey::new(obj.namespace?, obj.name);
            info!(%key, "KindCustomHttp is gone, cleaning up");
            let ctx = ctx.clone();
            Some(tokio::spawn(async move {
                if let Err(err) = clean_up_after(ctx, key.clone()).await {
                    warn!(%key, error = %err, "giving up on cleanup");
                }
            }))
        }
        // already logged by error_policy
        Err(controller::Error::ReconcilerFailed(_, obj)) => {
            debug!(object = %obj, "reconcile failed");
            None
        }
        Err(err) => {
            warn!(error = %err, "controller error");
            None
        }
    }
}

fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Watch and reconcile `KindCustomHttp` objects until a termination signal arrives
///
/// Only `namespace` is watched if given, the whole cluster otherwise.
pub async fn run<S>(client: Client, namespace: Option<&str>, concurrency: u16, ctx: Arc<Context<S>>)
where
    S: ObjectStore + 'static,
{
    let apps: Api<KindCustomHttp> = scoped(&client, namespace);
    let managed = watcher::Config::default().labels(&managed_selector());

    Controller::new(apps.clone(), watcher::Config::default())
        .with_config(Config::default().concurrency(concurrency))
        .watches(
            scoped::<ConfigMap>(&client, namespace),
            managed.clone(),
            triggers::configmap_owner,
        )
        .watches_stream(
            triggers::service_updates(scoped::<Service>(&client, namespace), managed),
            |svc| triggers::same_name(&svc),
        )
        .watches_stream(triggers::deletions(apps, watcher::Config::default()), |app| {
            triggers::same_name(&app)
        })
        .shutdown_on_signal()
        .run(reconcile::<S>, error_policy::<S>, ctx.clone())
        .for_each(|result| {
            report(result, &ctx);
            future::ready(())
        })
        .await;
    info!("controller stopped");
}
