use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Condition, UPGRADE_STATUS_ANNOTATION, UnknownUpgradePhase, UpgradePhase};
use crate::aerospike::Version;

/// AerospikeCluster is the Schema for the aerospikeclusters API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "aerospike-operator.io",
    version = "v1alpha1",
    kind = "AerospikeCluster",
    plural = "aerospikeclusters",
    shortname = "asc",
    namespaced,
    status = "AerospikeClusterStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Nodes", "type":"integer", "jsonPath":".spec.nodeCount"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AerospikeClusterSpec {
    /// Number of Aerospike nodes (1 to 8)
    #[schemars(range(min = 1, max = 8))]
    pub node_count: i32,

    /// Aerospike server version (e.g., "4.2.0.10")
    #[schemars(regex(pattern = r"^\d+\.\d+\.\d+(\.\d+)?$"))]
    pub version: String,

    /// Namespaces served by the cluster (1 or 2)
    #[schemars(length(min = 1, max = 2))]
    pub namespaces: Vec<NamespaceSpec>,

    /// Where pre-upgrade backups are written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_spec: Option<BackupSpec>,
}

/// A single Aerospike namespace
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSpec {
    pub name: String,

    /// Replication factor; clamped to the node count when rendering config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<i32>,

    /// In-memory index size (e.g., "2G"), defaults to 1G
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_size: Option<String>,

    /// Default record TTL (e.g., "30d", "0" for never expire)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ttl: Option<String>,

    pub storage: StorageSpec,
}

/// Storage configuration for a namespace
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(rename = "type")]
    pub type_: StorageType,

    /// Size of the volume (e.g., "8G")
    #[schemars(regex(pattern = r"^\d+G$"))]
    pub size: String,

    /// Storage class name (uses default if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// How long an unmounted claim is kept before being collected
    #[serde(
        default,
        rename = "persistentVolumeClaimTTL",
        skip_serializing_if = "Option::is_none"
    )]
    pub persistent_volume_claim_ttl: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Data file on a filesystem volume
    #[default]
    File,
    /// Raw block device
    Device,
}

/// Backup configuration used for pre-upgrade snapshots
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Retention of the backup artifacts (e.g., "7d")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,

    pub storage: BackupStorageSpec,
}

/// Cloud storage destination for backup artifacts
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStorageSpec {
    #[serde(rename = "type")]
    pub type_: BackupStorageType,

    #[schemars(length(min = 1))]
    pub bucket: String,

    /// Secret holding the storage credentials
    #[schemars(length(min = 1))]
    pub secret: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackupStorageType {
    /// Google Cloud Storage
    #[default]
    Gcs,
}

/// Status of the AerospikeCluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AerospikeClusterStatus {
    /// Node count of the last successfully applied spec
    #[serde(default)]
    pub node_count: i32,

    /// Version of the last successfully applied spec
    #[serde(default)]
    pub version: String,

    /// Namespaces of the last successfully applied spec
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<NamespaceSpec>,

    /// Append-only history of conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl AerospikeCluster {
    /// Current upgrade phase, read from the upgrade annotation
    pub fn upgrade_phase(&self) -> Result<UpgradePhase, UnknownUpgradePhase> {
        let value = self
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(UPGRADE_STATUS_ANNOTATION))
            .map(String::as_str);
        UpgradePhase::from_annotation(value)
    }

    /// Version recorded in status, empty if the cluster was never reconciled
    pub fn status_version(&self) -> &str {
        self.status.as_ref().map(|s| s.version.as_str()).unwrap_or("")
    }

    /// True when a version change is pending against a previously applied version.
    /// `4.2.0` and `4.2.0.0` name the same version.
    pub fn upgrade_requested(&self) -> bool {
        let current = self.status_version();
        if current.is_empty() {
            return false;
        }
        match (current.parse::<Version>(), self.spec.version.parse::<Version>()) {
            (Ok(current), Ok(desired)) => current != desired,
            _ => current != self.spec.version,
        }
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }
}
