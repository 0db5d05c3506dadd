//! Command line and environment settings of the operator
use crate::{
    controller::Context,
    reconciler::{Reconciler, ReconcilerConfig},
    resources::DEFAULT_IMAGE,
};
use backon::ExponentialBuilder;
use clap::Parser;
use std::time::Duration;

/// Reconciles KindCustomHttp resources into a Deployment, a headless Service and a ConfigMap
#[derive(Parser, Debug, Clone)]
#[command(name = "http-operator", version, about, long_about = None)]
pub struct Settings {
    /// Only watch this namespace instead of the whole cluster
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Container image for newly created Deployments
    #[arg(long, env = "HTTP_OPERATOR_IMAGE", default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// Number of keys reconciled at the same time
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: u16,

    /// Delay before re-checking a key after losing a write race, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub conflict_requeue_ms: u64,

    /// Delay before retrying a failed reconcile, in seconds
    #[arg(long, default_value_t = 5)]
    pub error_requeue_secs: u64,

    /// Delay before re-checking a KindCustomHttp whose spec cannot be converged, in seconds
    #[arg(long, default_value_t = 300)]
    pub invalid_spec_requeue_secs: u64,

    /// First retry delay of the cleanup after a deletion, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub retry_min_delay_ms: u64,

    /// Upper bound for the cleanup retry delay, in seconds
    #[arg(long, default_value_t = 30)]
    pub retry_max_delay_secs: u64,

    /// Leave the ConfigMap in place when its KindCustomHttp is deleted
    #[arg(long)]
    pub keep_configmap_on_delete: bool,

    /// Log as JSON lines instead of human readable text
    #[arg(long)]
    pub log_json: bool,
}

impl Settings {
    /// What the reconciler needs from these settings
    #[must_use]
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            image: self.image.clone(),
            conflict_requeue: Duration::from_millis(self.conflict_requeue_ms),
            cleanup_configmap: !self.keep_configmap_on_delete,
        }
    }

    /// The controller context for a reconciler over `store`
    pub fn context<S: crate::store::ObjectStore>(&self, store: S) -> Context<S> {
        Context {
            reconciler: Reconciler::new(store, self.reconciler_config()),
            error_requeue: Duration::from_secs(self.error_requeue_secs),
            invalid_spec_requeue: Duration::from_secs(self.invalid_spec_requeue_secs),
            cleanup_backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(self.retry_min_delay_ms))
                .with_max_delay(Duration::from_secs(self.retry_max_delay_secs))
                .with_max_times(10),
        }
    }
}
