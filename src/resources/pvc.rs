//! PersistentVolumeClaim generation
//!
//! One claim per (namespace, pod) pair. The name only depends on that pair,
//! so a pod recreated at the same index mounts the same claim again. Claims
//! are labelled with the Aerospike version they were formatted by, which
//! decides whether an upgrade must recreate them.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::{AerospikeCluster, NamespaceSpec, StorageType};
use crate::resources::common::{
    NAMESPACE_LABEL, VERSION_LABEL, owner_reference, standard_labels,
};

pub fn pvc_name(namespace_name: &str, pod_name: &str) -> String {
    format!("{namespace_name}-{pod_name}")
}

/// Convert a storage size such as `8G` into a Kubernetes quantity. Aerospike
/// sizes are binary, so `G` maps to `Gi`.
pub fn storage_quantity(size: &str) -> Quantity {
    match size.strip_suffix('G') {
        Some(n) => Quantity(format!("{n}Gi")),
        None => Quantity(size.to_string()),
    }
}

pub fn generate_pvc(
    cluster: &AerospikeCluster,
    ns: &NamespaceSpec,
    pod_name: &str,
) -> PersistentVolumeClaim {
    let cluster_name = cluster.name_any();
    let mut labels = standard_labels(&cluster_name);
    labels.insert(NAMESPACE_LABEL.to_string(), ns.name.clone());
    labels.insert(VERSION_LABEL.to_string(), cluster.spec.version.clone());

    let volume_mode = match ns.storage.type_ {
        StorageType::File => "Filesystem",
        StorageType::Device => "Block",
    };

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(pvc_name(&ns.name, pod_name)),
            namespace: cluster.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: ns.storage.storage_class_name.clone(),
            volume_mode: Some(volume_mode.to_string()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    storage_quantity(&ns.storage.size),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Aerospike version a claim was created for
pub fn pvc_version(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.metadata
        .labels
        .as_ref()?
        .get(VERSION_LABEL)
        .map(String::as_str)
}
