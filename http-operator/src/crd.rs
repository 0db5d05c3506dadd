//! The `KindCustomHttp` custom resource
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desired state of an HTTP server deployment
///
/// Every field is converged into derived objects named after the resource:
/// a `Deployment` (`replicaCount`), a headless `Service` (`port`) and a
/// `ConfigMap` (`configMapData`).
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Eq, Clone, JsonSchema)]
#[kube(
    group = "http.operator.dev",
    version = "v1",
    kind = "KindCustomHttp",
    namespaced,
    shortname = "kch",
    status = "KindCustomHttpStatus",
    derive = "PartialEq",
    derive = "Default"
)]
#[kube(printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicaCount"}"#)]
#[kube(printcolumn = r#"{"name":"Port", "type":"integer", "jsonPath":".spec.port"}"#)]
#[serde(rename_all = "camelCase")]
pub struct KindCustomHttpSpec {
    /// Number of server pods
    #[schemars(range(min = 0))]
    pub replica_count: i32,

    /// Port exposed by the headless service
    #[schemars(range(min = 1, max = 65535))]
    pub port: i32,

    /// Contents of the mounted configuration, replaced wholesale on change
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_map_data: BTreeMap<String, String>,
}

/// Observed state; nothing in here drives reconciliation
#[derive(Serialize, Deserialize, Default, Debug, PartialEq, Eq, Clone, JsonSchema)]
pub struct KindCustomHttpStatus {}

impl KindCustomHttpSpec {
    /// Check the ranges the CRD schema also enforces
    ///
    /// Objects written before the schema was installed (or with validation
    /// disabled) can still carry out of range values.
    pub fn validate(&self) -> Result<(), String> {
        if self.replica_count < 0 {
            return Err(format!("replicaCount must be >= 0, got {}", self.replica_count));
        }
        if !(1..=65535).contains(&self.port) {
            return Err(format!("port must be within 1-65535, got {}", self.port));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{KindCustomHttp, KindCustomHttpSpec};
    use kube::{CustomResourceExt, Resource};
    use serde_json::json;

    #[test]
    fn spec_uses_camel_case_and_defaults_data() {
        let spec: KindCustomHttpSpec = serde_json::from_value(json!({
            "replicaCount": 2,
            "port": 8080,
        }))
        .unwrap();
        assert_eq!(spec.replica_count, 2);
        assert_eq!(spec.port, 8080);
        assert!(spec.config_map_data.is_empty());

        let spec: KindCustomHttpSpec = serde_json::from_value(json!({
            "replicaCount": 1,
            "port": 80,
            "configMapData": {"LOG_LEVEL": "debug"},
        }))
        .unwrap();
        assert_eq!(spec.config_map_data["LOG_LEVEL"], "debug");
    }

    #[test]
    fn empty_data_is_not_serialized() {
        let spec = KindCustomHttpSpec {
            replica_count: 1,
            port: 80,
            ..Default::default()
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value, json!({"replicaCount": 1, "port": 80}));
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let ok = KindCustomHttpSpec {
            replica_count: 0,
            port: 65535,
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let negative = KindCustomHttpSpec {
            replica_count: -1,
            port: 80,
            ..Default::default()
        };
        assert!(negative.validate().unwrap_err().contains("replicaCount"));

        for port in [0, 65536, -80] {
            let bad = KindCustomHttpSpec {
                replica_count: 1,
                port,
                ..Default::default()
            };
            assert!(bad.validate().unwrap_err().contains("port"), "port {port}");
        }
    }

    #[test]
    fn crd_is_namespaced_with_status_and_ranges() {
        let crd = serde_json::to_value(KindCustomHttp::crd()).unwrap();
        assert_eq!(crd["metadata"]["name"], "kindcustomhttps.http.operator.dev");
        assert_eq!(crd["spec"]["scope"], "Namespaced");
        assert_eq!(crd["spec"]["names"]["shortNames"], json!(["kch"]));

        let version = &crd["spec"]["versions"][0];
        assert_eq!(version["name"], "v1");
        assert!(version["subresources"]["status"].is_object());

        let props = &version["schema"]["openAPIV3Schema"]["properties"]["spec"]["properties"];
        assert_eq!(props["port"]["minimum"].as_f64(), Some(1.0));
        assert_eq!(props["port"]["maximum"].as_f64(), Some(65535.0));
        assert_eq!(props["replicaCount"]["minimum"].as_f64(), Some(0.0));
        assert_eq!(props["configMapData"]["additionalProperties"]["type"], "string");
    }

    #[test]
    fn resource_metadata() {
        assert_eq!(KindCustomHttp::kind(&()), "KindCustomHttp");
        assert_eq!(KindCustomHttp::api_version(&()), "http.operator.dev/v1");
    }
}
