//! A Kubernetes operator for `KindCustomHttp` resources
//!
//! Each `KindCustomHttp` declares a replica count, a port and some configuration data.
//! The operator keeps three objects named after it in line with that declaration:
//!
//! - a `Deployment` running the HTTP server image with `replicaCount` replicas
//! - a headless `Service` exposing `port`
//! - a `ConfigMap` called `<name>-configmap` holding `configMapData`, mounted at `/config`
//!
//! and removes them again once the `KindCustomHttp` is gone.
//!
//! The moving parts:
//!
//! - [`crd`] defines the custom resource
//! - [`resources`] builds the desired derived objects
//! - [`store`] abstracts reading and writing objects, against the API server or in memory
//! - [`reconciler`] converges a single key
//! - [`triggers`] maps watch events of related objects to the custom resource
//! - [`controller`] runs the reconciler under a `kube` controller with requeues and retries
//! - [`config`] holds the command line settings of the operator binary
//!
//! # Example
//! ```no_run
//! use http_operator::{controller, Context, KubeStore, Reconciler, ReconcilerConfig};
//! use std::sync::Arc;
//!
//! # async fn wrapper() -> Result<(), kube::Error> {
//! let client = kube::Client::try_default().await?;
//! let reconciler = Reconciler::new(KubeStore::new(client.clone()), ReconcilerConfig::default());
//! controller::run(client, Some("apps"), 8, Arc::new(Context::new(reconciler))).await;
//! # Ok(())
//! # }
//! ```
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
mod object_key;
pub mod reconciler;
pub mod resources;
pub mod store;
pub mod triggers;

pub use controller::Context;
pub use crd::{KindCustomHttp, KindCustomHttpSpec, KindCustomHttpStatus};
pub use error::{Error, Result};
pub use object_key::ObjectKey;
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use store::{KubeStore, ObjectStore};
