//! Desired state of the objects derived from a `KindCustomHttp`
//!
//! Names are pure functions of the parent's key, so nothing here needs a lookup.
use crate::{crd::KindCustomHttpSpec, ObjectKey};
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, PodSpec, PodTemplateSpec, Service,
            ServicePort, ServiceSpec, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString},
};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Image run by the server pods unless overridden
pub const DEFAULT_IMAGE: &str = "measutosh/http-server";
/// Port the server container listens on
pub const CONTAINER_PORT: i32 = 80;
/// Where the derived ConfigMap is mounted
pub const CONFIG_MOUNT_PATH: &str = "/config";
/// Suffix appended to the parent's name for the derived ConfigMap
pub const CONFIGMAP_SUFFIX: &str = "-configmap";

/// Label shared by every server pod, used by both the Deployment and Service selectors
pub const POD_LABEL_KEY: &str = "app";
/// Value of [`POD_LABEL_KEY`]
pub const POD_LABEL_VALUE: &str = "measutosh-http-server";

/// Owner marker: who manages a derived object
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Owner marker: which `KindCustomHttp` a derived object belongs to
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
/// Value of [`MANAGED_BY_LABEL`] on everything this operator creates
pub const MANAGER_NAME: &str = "http-operator";

const CONTAINER_NAME: &str = "http-server";
const CONFIG_VOLUME: &str = "config-volume";
const PORT_NAME: &str = "http";
const PROTOCOL_TCP: &str = "TCP";
const HEADLESS: &str = "None";

/// Name of the ConfigMap derived from the resource called `parent`
#[must_use]
pub fn configmap_name(parent: &str) -> String {
    format!("{parent}{CONFIGMAP_SUFFIX}")
}

/// Label selector matching only objects created by this operator
#[must_use]
pub fn managed_selector() -> String {
    format!("{MANAGED_BY_LABEL}={MANAGER_NAME}")
}

/// Whether an object carries this operator's owner marker
#[must_use]
pub fn is_managed(meta: &ObjectMeta) -> bool {
    meta.labels
        .as_ref()
        .and_then(|labels| labels.get(MANAGED_BY_LABEL))
        .is_some_and(|manager| manager == MANAGER_NAME)
}

/// The parent key recorded in a derived object's owner marker
pub fn owner_key(meta: &ObjectMeta) -> Option<ObjectKey> {
    if !is_managed(meta) {
        return None;
    }
    let parent = meta.labels.as_ref()?.get(INSTANCE_LABEL)?;
    Some(ObjectKey::new(meta.namespace.clone()?, parent.clone()))
}

fn pod_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(POD_LABEL_KEY.to_string(), POD_LABEL_VALUE.to_string())])
}

fn metadata(key: &ObjectKey, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(key.namespace.clone()),
        labels: Some(BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), MANAGER_NAME.to_string()),
            (INSTANCE_LABEL.to_string(), key.name.clone()),
        ])),
        ..ObjectMeta::default()
    }
}

/// The full Deployment for `key`
#[must_use]
pub fn deployment(key: &ObjectKey, spec: &KindCustomHttpSpec, image: &str) -> Deployment {
    Deployment {
        metadata: metadata(key, key.name.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replica_count),
            selector: LabelSelector {
                match_labels: Some(pod_labels()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels()),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(image.to_string()),
                        ports: Some(vec![ContainerPort {
                            container_port: CONTAINER_PORT,
                            name: Some(PORT_NAME.to_string()),
                            protocol: Some(PROTOCOL_TCP.to_string()),
                            ..ContainerPort::default()
                        }]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: CONFIG_VOLUME.to_string(),
                            mount_path: CONFIG_MOUNT_PATH.to_string(),
                            ..VolumeMount::default()
                        }]),
                        ..Container::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: CONFIG_VOLUME.to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: configmap_name(&key.name),
                            ..ConfigMapVolumeSource::default()
                        }),
                        ..Volume::default()
                    }]),
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

/// The port list a derived Service should expose
#[must_use]
pub fn service_ports(port: i32) -> Vec<ServicePort> {
    vec![ServicePort {
        name: Some(PORT_NAME.to_string()),
        protocol: Some(PROTOCOL_TCP.to_string()),
        port,
        target_port: Some(IntOrString::Int(CONTAINER_PORT)),
        ..ServicePort::default()
    }]
}

/// The full headless Service for `key`
#[must_use]
pub fn service(key: &ObjectKey, spec: &KindCustomHttpSpec) -> Service {
    Service {
        metadata: metadata(key, key.name.clone()),
        spec: Some(ServiceSpec {
            selector: Some(pod_labels()),
            ports: Some(service_ports(spec.port)),
            cluster_ip: Some(HEADLESS.to_string()),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

/// The data a derived ConfigMap should hold
///
/// An empty map is represented as no data at all, which is how the API server
/// returns a ConfigMap created without any keys.
#[must_use]
pub fn config_data(spec: &KindCustomHttpSpec) -> Option<BTreeMap<String, String>> {
    (!spec.config_map_data.is_empty()).then(|| spec.config_map_data.clone())
}

/// The full ConfigMap for `key`
#[must_use]
pub fn config_map(key: &ObjectKey, spec: &KindCustomHttpSpec) -> ConfigMap {
    ConfigMap {
        metadata: metadata(key, configmap_name(&key.name)),
        data: config_data(spec),
        ..ConfigMap::default()
    }
}
