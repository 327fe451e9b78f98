//! Pod generation for Aerospike nodes
//!
//! Each node is a bare pod named `<cluster>-<index>`. The operator manages
//! pods directly rather than through a StatefulSet so that every deletion can
//! be gated on the node having finished its migrations.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, ConfigMapVolumeSource, Container, ContainerPort, EnvVar,
    PersistentVolumeClaimVolumeSource, Pod, PodAffinityTerm, PodAntiAffinity, PodSpec, Probe,
    ResourceRequirements, TCPSocketAction, Volume, VolumeDevice, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::aerospike::config::{DEFAULT_MEMORY_SIZE, discovery_service_name};
use crate::aerospike::{
    CONFIG_DIR, DATA_DIR, DEVICE_DIR, EXPORTER_PORT, FABRIC_PORT, HEARTBEAT_PORT, INFO_PORT,
    RenderedConfig, SERVICE_PORT,
};
use crate::crd::{AerospikeCluster, StorageType};
use crate::resources::common::{
    CONFIG_HASH_ANNOTATION, VERSION_LABEL, owner_reference, selector_labels, standard_labels,
};
use crate::resources::configmap::config_map_name;
use crate::resources::pvc::pvc_name;

pub const SERVER_CONTAINER: &str = "aerospike-server";
pub const EXPORTER_CONTAINER: &str = "aerospike-exporter";
const SERVER_IMAGE: &str = "aerospike/aerospike-server";
const EXPORTER_IMAGE: &str = "aerospike/aerospike-prometheus-exporter:1.1.6";
const CONFIG_VOLUME: &str = "config";

pub fn pod_name(cluster_name: &str, index: u32) -> String {
    format!("{cluster_name}-{index}")
}

/// Index embedded in a pod name, if the pod belongs to `cluster_name`
pub fn pod_index(cluster_name: &str, pod_name: &str) -> Option<u32> {
    pod_name
        .strip_prefix(cluster_name)?
        .strip_prefix('-')?
        .parse()
        .ok()
}

pub fn server_image(version: &str) -> String {
    format!("{SERVER_IMAGE}:{version}")
}

fn data_volume_name(namespace_name: &str) -> String {
    format!("data-{namespace_name}")
}

/// Parse a memory size such as `2G` or `512M` into mebibytes
pub fn memory_size_mib(size: &str) -> Option<u64> {
    let size = size.trim();
    let (digits, scale) = if let Some(n) = size.strip_suffix('G') {
        (n, 1024)
    } else if let Some(n) = size.strip_suffix('M') {
        (n, 1)
    } else {
        return None;
    };
    digits.parse::<u64>().ok()?.checked_mul(scale)
}

/// Sum of namespace memory sizes in mebibytes, `None` on overflow
pub fn total_memory_mib(cluster: &AerospikeCluster) -> Option<u64> {
    let default_mib = memory_size_mib(DEFAULT_MEMORY_SIZE).unwrap_or(1024);
    cluster.spec.namespaces.iter().try_fold(0u64, |total, ns| {
        let mib = ns
            .memory_size
            .as_deref()
            .and_then(memory_size_mib)
            .unwrap_or(default_mib);
        total.checked_add(mib)
    })
}

/// Memory request for the server container: the sum of namespace memory sizes
pub fn memory_request(cluster: &AerospikeCluster) -> Quantity {
    // Validation rejects sizes that overflow
    let total = total_memory_mib(cluster).unwrap_or(u64::MAX);
    Quantity(format!("{total}Mi"))
}

fn container_port(name: &str, port: u16) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: i32::from(port),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Keep nodes of one cluster on distinct Kubernetes nodes
fn anti_affinity(cluster_name: &str) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                label_selector: Some(LabelSelector {
                    match_labels: Some(selector_labels(cluster_name)),
                    ..Default::default()
                }),
                topology_key: "kubernetes.io/hostname".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the pod for node `index`.
///
/// `single_node` drops the anti-affinity rule so a whole cluster fits on one
/// Kubernetes node.
pub fn generate_pod(
    cluster: &AerospikeCluster,
    index: u32,
    config: &RenderedConfig,
    single_node: bool,
) -> Pod {
    let cluster_name = cluster.name_any();
    let name = pod_name(&cluster_name, index);

    let mut labels = standard_labels(&cluster_name);
    labels.insert(VERSION_LABEL.to_string(), cluster.spec.version.clone());

    let mut volumes = vec![Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map_name(&cluster_name),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: CONFIG_VOLUME.to_string(),
        mount_path: CONFIG_DIR.to_string(),
        ..Default::default()
    }];
    let mut devices = Vec::new();

    for ns in &cluster.spec.namespaces {
        let volume = data_volume_name(&ns.name);
        volumes.push(Volume {
            name: volume.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: pvc_name(&ns.name, &name),
                read_only: Some(false),
            }),
            ..Default::default()
        });
        match ns.storage.type_ {
            StorageType::File => mounts.push(VolumeMount {
                name: volume,
                mount_path: format!("{DATA_DIR}/{}", ns.name),
                ..Default::default()
            }),
            StorageType::Device => devices.push(VolumeDevice {
                name: volume,
                device_path: format!("{DEVICE_DIR}/{}", ns.name),
            }),
        }
    }

    let server = Container {
        name: SERVER_CONTAINER.to_string(),
        image: Some(server_image(&cluster.spec.version)),
        ports: Some(vec![
            container_port("service", SERVICE_PORT),
            container_port("fabric", FABRIC_PORT),
            container_port("heartbeat", HEARTBEAT_PORT),
            container_port("info", INFO_PORT),
        ]),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(i32::from(SERVICE_PORT)),
                ..Default::default()
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(5),
            ..Default::default()
        }),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([(
                "memory".to_string(),
                memory_request(cluster),
            )])),
            ..Default::default()
        }),
        volume_mounts: Some(mounts),
        volume_devices: (!devices.is_empty()).then_some(devices),
        ..Default::default()
    };

    let exporter = Container {
        name: EXPORTER_CONTAINER.to_string(),
        image: Some(EXPORTER_IMAGE.to_string()),
        env: Some(vec![
            EnvVar {
                name: "AS_HOST".to_string(),
                value: Some("localhost".to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "AS_PORT".to_string(),
                value: Some(SERVICE_PORT.to_string()),
                ..Default::default()
            },
        ]),
        ports: Some(vec![container_port("metrics", EXPORTER_PORT)]),
        ..Default::default()
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: cluster.namespace(),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([(
                CONFIG_HASH_ANNOTATION.to_string(),
                config.fingerprint.clone(),
            )])),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            hostname: Some(name),
            subdomain: Some(discovery_service_name(&cluster_name)),
            containers: vec![server, exporter],
            volumes: Some(volumes),
            affinity: (!single_node).then(|| anti_affinity(&cluster_name)),
            restart_policy: Some("Always".to_string()),
            termination_grace_period_seconds: Some(60),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Config fingerprint a pod was created with
pub fn pod_config_hash(pod: &Pod) -> Option<&str> {
    pod.metadata
        .annotations
        .as_ref()?
        .get(CONFIG_HASH_ANNOTATION)
        .map(String::as_str)
}

/// Aerospike version a pod was created with
pub fn pod_version(pod: &Pod) -> Option<&str> {
    pod.metadata
        .labels
        .as_ref()?
        .get(VERSION_LABEL)
        .map(String::as_str)
}

/// Pod has phase Running and a Ready condition set to True
pub fn is_pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    status.phase.as_deref() == Some("Running")
        && status
            .conditions
            .as_ref()
            .is_some_and(|cs| cs.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

pub fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()?
        .pod_ip
        .as_deref()
        .filter(|ip| !ip.is_empty())
}

pub fn is_pod_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|p| p == "Running")
}
