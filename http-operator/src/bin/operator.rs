//! Runs the operator against the cluster from the environment
use anyhow::Context;
use clap::Parser;
use http_operator::{config::Settings, controller, KindCustomHttp, KubeStore};
use kube::{
    api::{Api, ListParams},
    Client,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,kube=warn"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();
    init_logging(settings.log_json);

    let client = Client::try_default()
        .await
        .context("failed to create a kubernetes client")?;

    let apps: Api<KindCustomHttp> = match settings.namespace.as_deref() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    apps.list(&ListParams::default().limit(1))
        .await
        .context("KindCustomHttp is not queryable; is the CRD installed? (cargo run --bin crdgen | kubectl apply -f -)")?;

    info!(
        namespace = settings.namespace.as_deref().unwrap_or("<all>"),
        image = %settings.image,
        concurrency = settings.concurrency,
        "starting http-operator"
    );
    let ctx = Arc::new(settings.context(KubeStore::new(client.clone())));
    controller::run(client, settings.namespace.as_deref(), settings.concurrency, ctx).await;
    Ok(())
}
