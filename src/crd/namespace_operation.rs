use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{BackupStorageSpec, Condition, ConditionType, is_condition_true};

/// Backup of a single namespace of an AerospikeCluster
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "aerospike-operator.io",
    version = "v1alpha1",
    kind = "AerospikeNamespaceBackup",
    plural = "aerospikenamespacebackups",
    shortname = "asnb",
    namespaced,
    status = "NamespaceOperationStatus",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.target.cluster"}"#,
    printcolumn = r#"{"name":"Namespace", "type":"string", "jsonPath":".spec.target.namespace"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AerospikeNamespaceBackupSpec {
    pub target: TargetNamespace,

    /// Destination; defaults to the cluster's backupSpec storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<BackupStorageSpec>,

    /// Retention of the backup artifacts (e.g., "7d")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

/// Restore of a single namespace into an AerospikeCluster
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[kube(
    group = "aerospike-operator.io",
    version = "v1alpha1",
    kind = "AerospikeNamespaceRestore",
    plural = "aerospikenamespacerestores",
    shortname = "asnr",
    namespaced,
    status = "NamespaceOperationStatus",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.target.cluster"}"#,
    printcolumn = r#"{"name":"Namespace", "type":"string", "jsonPath":".spec.target.namespace"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AerospikeNamespaceRestoreSpec {
    pub target: TargetNamespace,

    /// Source; defaults to the cluster's backupSpec storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<BackupStorageSpec>,
}

/// The cluster and namespace an operation acts on
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetNamespace {
    pub cluster: String,
    pub namespace: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceOperationStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Metadata object stored next to a backup payload, used by restore to remap
/// the original namespace name
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BackupMetadata {
    pub namespace: String,
}

/// Object names in the bucket for a backup resource: `(metadata, payload)`
pub fn backup_object_names(name: &str) -> (String, String) {
    (format!("{name}.json"), format!("{name}.asb.gz"))
}

/// A backup or restore resource handled through one code path
#[derive(Clone, Debug)]
pub enum NamespaceOperation {
    Backup(AerospikeNamespaceBackup),
    Restore(AerospikeNamespaceRestore),
}

impl NamespaceOperation {
    pub fn target(&self) -> &TargetNamespace {
        match self {
            NamespaceOperation::Backup(b) => &b.spec.target,
            NamespaceOperation::Restore(r) => &r.spec.target,
        }
    }

    pub fn storage(&self) -> Option<&BackupStorageSpec> {
        match self {
            NamespaceOperation::Backup(b) => b.spec.storage.as_ref(),
            NamespaceOperation::Restore(r) => r.spec.storage.as_ref(),
        }
    }

    pub fn conditions(&self) -> &[Condition] {
        let status = match self {
            NamespaceOperation::Backup(b) => b.status.as_ref(),
            NamespaceOperation::Restore(r) => r.status.as_ref(),
        };
        status.map(|s| s.conditions.as_slice()).unwrap_or(&[])
    }

    fn finished_type(&self) -> ConditionType {
        match self {
            NamespaceOperation::Backup(_) => ConditionType::BackupFinished,
            NamespaceOperation::Restore(_) => ConditionType::RestoreFinished,
        }
    }

    fn failed_type(&self) -> ConditionType {
        match self {
            NamespaceOperation::Backup(_) => ConditionType::BackupFailed,
            NamespaceOperation::Restore(_) => ConditionType::RestoreFailed,
        }
    }

    pub fn is_finished(&self) -> bool {
        is_condition_true(self.conditions(), self.finished_type())
    }

    pub fn is_failed(&self) -> bool {
        is_condition_true(self.conditions(), self.failed_type())
    }

    /// Object names in the bucket, derived from the resource name
    pub fn object_names(&self) -> (String, String) {
        let name = match self {
            NamespaceOperation::Backup(b) => b.metadata.name.as_deref(),
            NamespaceOperation::Restore(r) => r.metadata.name.as_deref(),
        };
        backup_object_names(name.unwrap_or_default())
    }
}

impl From<AerospikeNamespaceBackup> for NamespaceOperation {
    fn from(b: AerospikeNamespaceBackup) -> Self {
        NamespaceOperation::Backup(b)
    }
}

impl From<AerospikeNamespaceRestore> for NamespaceOperation {
    fn from(r: AerospikeNamespaceRestore) -> Self {
        NamespaceOperation::Restore(r)
    }
}
