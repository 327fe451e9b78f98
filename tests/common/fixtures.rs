//! Test fixtures and builders for AerospikeCluster resources
//!
//! # Quick Start
//!
//! For simple unit tests, use the convenience functions:
//! ```rust,ignore
//! let cluster = create_test_cluster("as", "default", 3);
//! ```
//!
//! For more complex configurations, use the builder pattern:
//! ```rust,ignore
//! let cluster = AerospikeClusterBuilder::new("as", "default")
//!     .with_version("4.0.0.4")
//!     .with_status_version("4.0.0.4")
//!     .with_backup_spec()
//!     .build();
//! ```

use std::collections::BTreeMap;

use aerospike_operator::crd::{
    AerospikeCluster, AerospikeClusterSpec, AerospikeClusterStatus, BackupSpec,
    BackupStorageSpec, BackupStorageType, NamespaceSpec, StorageSpec, StorageType,
    UPGRADE_STATUS_ANNOTATION,
};
use kube::core::ObjectMeta;

pub const TEST_UID: &str = "test-uid-12345";
pub const DEFAULT_VERSION: &str = "4.2.0.10";

// =============================================================================
// Convenience Functions for Simple Test Cases
// =============================================================================

/// Create a basic test cluster with one namespace
pub fn create_test_cluster(name: &str, namespace: &str, node_count: i32) -> AerospikeCluster {
    AerospikeClusterBuilder::new(name, namespace)
        .with_node_count(node_count)
        .build()
}

/// A file-backed namespace with the given replication factor
pub fn namespace_spec(name: &str, replication_factor: i32) -> NamespaceSpec {
    NamespaceSpec {
        name: name.to_string(),
        replication_factor: Some(replication_factor),
        memory_size: Some("1G".to_string()),
        default_ttl: Some("30d".to_string()),
        storage: StorageSpec {
            type_: StorageType::File,
            size: "1G".to_string(),
            storage_class_name: None,
            persistent_volume_claim_ttl: None,
        },
    }
}

pub fn gcs_backup_spec() -> BackupSpec {
    BackupSpec {
        ttl: Some("7d".to_string()),
        storage: BackupStorageSpec {
            type_: BackupStorageType::Gcs,
            bucket: "aerospike-backups".to_string(),
            secret: "gcs-credentials".to_string(),
        },
    }
}

// =============================================================================
// AerospikeCluster Builder
// =============================================================================

/// Builder for AerospikeCluster test fixtures
pub struct AerospikeClusterBuilder {
    name: String,
    namespace: String,
    spec: AerospikeClusterSpec,
    status: Option<AerospikeClusterStatus>,
    annotations: BTreeMap<String, String>,
    generation: i64,
}

impl AerospikeClusterBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            spec: AerospikeClusterSpec {
                node_count: 3,
                version: DEFAULT_VERSION.to_string(),
                namespaces: vec![namespace_spec("test", 2)],
                backup_spec: None,
            },
            status: None,
            annotations: BTreeMap::new(),
            generation: 1,
        }
    }

    pub fn with_node_count(mut self, node_count: i32) -> Self {
        self.spec.node_count = node_count;
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.spec.version = version.to_string();
        self
    }

    pub fn with_namespaces(mut self, namespaces: Vec<NamespaceSpec>) -> Self {
        self.spec.namespaces = namespaces;
        self
    }

    pub fn with_storage_class(mut self, class: &str) -> Self {
        for ns in &mut self.spec.namespaces {
            ns.storage.storage_class_name = Some(class.to_string());
        }
        self
    }

    pub fn with_backup_spec(mut self) -> Self {
        self.spec.backup_spec = Some(gcs_backup_spec());
        self
    }

    /// Status as if `version` had been applied with the current spec
    pub fn with_status_version(mut self, version: &str) -> Self {
        self.status = Some(AerospikeClusterStatus {
            node_count: self.spec.node_count,
            version: version.to_string(),
            namespaces: self.spec.namespaces.clone(),
            conditions: vec![],
        });
        self
    }

    /// Raw upgrade annotation value
    pub fn with_upgrade_annotation(mut self, value: &str) -> Self {
        self.annotations
            .insert(UPGRADE_STATUS_ANNOTATION.to_string(), value.to_string());
        self
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = generation;
        self
    }

    pub fn build(self) -> AerospikeCluster {
        AerospikeCluster {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                uid: Some(TEST_UID.to_string()),
                generation: Some(self.generation),
                resource_version: Some("1".to_string()),
                annotations: (!self.annotations.is_empty()).then_some(self.annotations),
                ..Default::default()
            },
            spec: self.spec,
            status: self.status,
        }
    }
}
