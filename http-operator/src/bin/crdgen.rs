//! Prints the `KindCustomHttp` CustomResourceDefinition as YAML
use http_operator::KindCustomHttp;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&KindCustomHttp::crd())?);
    Ok(())
}
