//! Common utilities for Kubernetes resource generation
//!
//! Shared constants, labels and owner references used by every generator so
//! that all child objects of a cluster are selectable and garbage collected
//! together.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::AerospikeCluster;

/// API version for AerospikeCluster CRD
pub const API_VERSION: &str = "aerospike-operator.io/v1alpha1";

/// Kind for AerospikeCluster CRD
pub const KIND: &str = "AerospikeCluster";

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "aerospike-operator";

/// Label carrying the owning cluster's name
pub const CLUSTER_LABEL: &str = "aerospike-operator.io/cluster";

/// Label carrying the namespace a volume claim belongs to
pub const NAMESPACE_LABEL: &str = "aerospike-operator.io/namespace";

/// Label carrying the Aerospike version a pod runs
pub const VERSION_LABEL: &str = "aerospike-operator.io/version";

/// Annotation carrying the config fingerprint a pod or config map was built from
pub const CONFIG_HASH_ANNOTATION: &str = "aerospike-operator.io/config-hash";

/// Generate an owner reference for an AerospikeCluster
///
/// All child resources are owned by the cluster and garbage collected when
/// it is deleted.
pub fn owner_reference(cluster: &AerospikeCluster) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Generate standard labels for all resources belonging to an AerospikeCluster
pub fn standard_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/name".to_string(),
            cluster_name.to_string(),
        ),
        (
            "app.kubernetes.io/component".to_string(),
            "aerospike".to_string(),
        ),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
        (CLUSTER_LABEL.to_string(), cluster_name.to_string()),
    ])
}

/// Minimal selector matching every pod of a cluster
pub fn selector_labels(cluster_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(CLUSTER_LABEL.to_string(), cluster_name.to_string())])
}

/// Label selector string for list calls
pub fn cluster_selector(cluster_name: &str) -> String {
    format!("{CLUSTER_LABEL}={cluster_name}")
}
