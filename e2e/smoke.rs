//! Drives a KindCustomHttp through create, update and delete against a running operator
use http_operator::{resources::configmap_name, KindCustomHttp};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Service},
};
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    runtime::wait::{await_condition, conditions},
    Client, Resource,
};
use std::time::Duration;
use tracing::info;

const TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let client = Client::try_default().await?;
    let apps: Api<KindCustomHttp> = Api::default_namespaced(client.clone());
    let deployments: Api<Deployment> = Api::default_namespaced(client.clone());
    let services: Api<Service> = Api::default_namespaced(client.clone());
    let configmaps: Api<ConfigMap> = Api::default_namespaced(client);

    let name = "smoke-http";
    info!("Creating KindCustomHttp {name}");
    let app: KindCustomHttp = serde_json::from_value(serde_json::json!({
        "apiVersion": "http.operator.dev/v1",
        "kind": "KindCustomHttp",
        "metadata": { "name": name },
        "spec": {
            "replicaCount": 2,
            "port": 8080,
            "configMapData": { "GREETING": "hello" },
        }
    }))?;
    apps.create(&PostParams::default(), &app).await?;

    info!("Waiting for the derived objects");
    let replicas = await_condition(deployments.clone(), name, |d: Option<&Deployment>| {
        d.and_then(|d| d.spec.as_ref()?.replicas) == Some(2)
    });
    tokio::time::timeout(TIMEOUT, replicas).await??;
    let port = await_condition(services.clone(), name, service_port_is(8080));
    tokio::time::timeout(TIMEOUT, port).await??;
    let cm_name = configmap_name(name);
    let data = await_condition(configmaps.clone(), &cm_name, |cm: Option<&ConfigMap>| {
        cm.and_then(|cm| cm.data.as_ref()?.get("GREETING").cloned()).as_deref() == Some("hello")
    });
    tokio::time::timeout(TIMEOUT, data).await??;

    info!("Changing the port");
    let patch = serde_json::json!({ "spec": { "port": 9090 } });
    apps.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    let port = await_condition(services.clone(), name, service_port_is(9090));
    tokio::time::timeout(TIMEOUT, port).await??;

    info!("Deleting KindCustomHttp {name}");
    let uid = deployments
        .get(name)
        .await?
        .meta()
        .uid
        .clone()
        .unwrap_or_default();
    apps.delete(name, &DeleteParams::background()).await?;
    let gone = await_condition(deployments, name, conditions::is_deleted(&uid));
    tokio::time::timeout(TIMEOUT, gone).await??;
    info!("Derived objects were cleaned up");
    Ok(())
}

fn service_port_is(port: i32) -> impl Fn(Option<&Service>) -> bool {
    move |svc| {
        svc.and_then(|s| s.spec.as_ref()?.ports.as_ref()?.first().map(|p| p.port)) == Some(port)
    }
}
