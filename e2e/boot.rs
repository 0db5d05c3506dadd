use http_operator::KindCustomHttp;
use kube::{Api, Client, ResourceExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let client = Client::try_default().await?;
    let apps: Api<KindCustomHttp> = Api::all(client);
    for app in apps.list(&Default::default()).await? {
        tracing::info!(
            "Found KindCustomHttp {}/{} (replicas={}, port={})",
            app.namespace().unwrap_or_default(),
            app.name_any(),
            app.spec.replica_count,
            app.spec.port
        );
    }
    Ok(())
}
