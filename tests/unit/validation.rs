//! Unit tests for validation logic

use aerospike_operator::controller::Error;
use aerospike_operator::controller::validation::{
    MAX_NAMESPACES, MAX_NODES, MIN_NODES, validate_rollout, validate_spec,
    validate_storage_classes, validate_upgrade,
};
use aerospike_operator::crd::AerospikeCluster;
use aerospike_operator::dispatcher::ObjectKey;
use aerospike_operator::reconcile;

use crate::common::*;

fn assert_invalid(cluster: &AerospikeCluster, needle: &str) {
    match validate_spec(cluster) {
        Err(Error::ValidationError(message)) => {
            assert!(message.contains(needle), "{message:?} does not mention {needle:?}")
        }
        other => panic!("expected a validation error mentioning {needle:?}, got {other:?}"),
    }
}

mod limits_tests {
    use super::*;

    #[test]
    fn test_node_limits() {
        assert_eq!(MIN_NODES, 1);
        assert_eq!(MAX_NODES, 8);
        assert_eq!(MAX_NAMESPACES, 2);
    }
}

mod validate_spec_tests {
    use super::*;

    #[test]
    fn test_default_cluster_is_valid() {
        assert!(validate_spec(&create_test_cluster("as", "db", 3)).is_ok());
    }

    #[test]
    fn test_node_count_bounds() {
        let single = AerospikeClusterBuilder::new("as", "db")
            .with_node_count(1)
            .with_namespaces(vec![namespace_spec("test", 1)])
            .build();
        assert!(validate_spec(&single).is_ok());
        assert!(validate_spec(&create_test_cluster("as", "db", 8)).is_ok());

        assert_invalid(&create_test_cluster("as", "db", 0), "node count 0");
        assert_invalid(&create_test_cluster("as", "db", 9), "node count 9");
    }

    #[test]
    fn test_unsupported_version() {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_version("5.0.0.0")
            .build();
        assert_invalid(&cluster, "not supported");
    }

    #[test]
    fn test_unparseable_version() {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_version("latest")
            .build();
        assert_invalid(&cluster, "latest");
    }

    #[test]
    fn test_replication_factor_above_node_count() {
        // The default namespace asks for two copies
        assert_invalid(&create_test_cluster("as", "db", 1), "exceeds node count 1");
    }

    #[test]
    fn test_replication_factor_zero() {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![namespace_spec("test", 0)])
            .build();
        assert_invalid(&cluster, "at least 1");
    }

    #[test]
    fn test_namespace_count() {
        let none = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![])
            .build();
        assert_invalid(&none, "got 0");

        let three = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![
                namespace_spec("a", 1),
                namespace_spec("b", 1),
                namespace_spec("c", 1),
            ])
            .build();
        assert_invalid(&three, "got 3");

        let two = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![namespace_spec("a", 1), namespace_spec("b", 1)])
            .build();
        assert!(validate_spec(&two).is_ok());
    }

    #[test]
    fn test_duplicate_namespace() {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![namespace_spec("test", 1), namespace_spec("test", 1)])
            .build();
        assert_invalid(&cluster, "declared twice");
    }

    #[test]
    fn test_memory_size() {
        let mut ns = namespace_spec("test", 1);
        ns.memory_size = Some("2X".to_string());
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![ns.clone()])
            .build();
        assert_invalid(&cluster, "memory size");

        ns.memory_size = Some("0G".to_string());
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![ns.clone()])
            .build();
        assert_invalid(&cluster, "memory size");

        ns.memory_size = Some("512M".to_string());
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![ns])
            .build();
        assert!(validate_spec(&cluster).is_ok());
    }

    #[test]
    fn test_memory_size_overflow() {
        let mut ns = namespace_spec("test", 1);
        ns.memory_size = Some("18014398509481985G".to_string());
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![ns])
            .build();
        assert_invalid(&cluster, "memory size");
    }

    #[test]
    fn test_total_memory_overflow() {
        let mut a = namespace_spec("a", 1);
        a.memory_size = Some("10000000000000000000M".to_string());
        let mut b = namespace_spec("b", 1);
        b.memory_size = Some("10000000000000000000M".to_string());
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![a, b])
            .build();
        assert_invalid(&cluster, "too large");
    }

    #[test]
    fn test_storage_size_must_be_whole_gigabytes() {
        let mut ns = namespace_spec("test", 1);
        ns.storage.size = "10Gi".to_string();
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![ns])
            .build();
        assert_invalid(&cluster, "storage size");
    }

    #[test]
    fn test_ttl_literals() {
        let mut ns = namespace_spec("test", 1);
        ns.default_ttl = Some("5x".to_string());
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![ns])
            .build();
        assert_invalid(&cluster, "5x");

        let mut ns = namespace_spec("test", 1);
        ns.storage.persistent_volume_claim_ttl = Some("1.5d".to_string());
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![ns])
            .build();
        assert!(validate_spec(&cluster).is_ok());
    }

    #[test]
    fn test_backup_ttl() {
        let mut cluster = AerospikeClusterBuilder::new("as", "db")
            .with_backup_spec()
            .build();
        assert!(validate_spec(&cluster).is_ok());

        if let Some(backup) = cluster.spec.backup_spec.as_mut() {
            backup.ttl = Some("forever".to_string());
        }
        assert_invalid(&cluster, "forever");
    }
}

mod validate_upgrade_tests {
    use super::*;

    #[test]
    fn test_never_reconciled_is_not_an_upgrade() {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_version("4.1.0.0")
            .build();
        assert_eq!(validate_upgrade(&cluster).unwrap(), None);
    }

    #[test]
    fn test_same_version_is_not_an_upgrade() {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_status_version(DEFAULT_VERSION)
            .build();
        assert_eq!(validate_upgrade(&cluster).unwrap(), None);
    }

    #[test]
    fn test_three_component_status_matches_four_component_spec() {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_version("4.2.0.0")
            .with_status_version("4.2.0")
            .build();
        assert!(!cluster.upgrade_requested());
    }

    #[test]
    fn test_supported_upgrade() {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_version("4.1.0.0")
            .with_status_version("4.0.0.4")
            .with_backup_spec()
            .build();
        let upgrade = validate_upgrade(&cluster).unwrap().unwrap();
        assert_eq!(upgrade.source.to_string(), "4.0.0.4");
        assert_eq!(upgrade.target.to_string(), "4.1.0.0");
    }

    #[test]
    fn test_upgrade_requires_backup_spec() {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_version("4.1.0.0")
            .with_status_version("4.0.0.4")
            .build();
        let err = validate_upgrade(&cluster).unwrap_err();
        assert!(err.to_string().contains("requires backupSpec"), "{err}");
    }

    #[test]
    fn test_downgrade_rejected() {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_version("4.0.0.4")
            .with_status_version("4.1.0.0")
            .with_backup_spec()
            .build();
        let err = validate_upgrade(&cluster).unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
        assert!(err.to_string().contains("downgrade"), "{err}");
    }

    #[test]
    fn test_unsupported_source_rejected() {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_version("4.1.0.0")
            .with_status_version("3.15.0.1")
            .with_backup_spec()
            .build();
        assert!(validate_upgrade(&cluster).is_err());
    }

    #[test]
    fn test_spec_validation_includes_upgrade() {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_version("4.1.0.0")
            .with_status_version("4.0.0.4")
            .build();
        assert_invalid(&cluster, "requires backupSpec");
    }
}

mod storage_class_tests {
    use super::*;

    #[tokio::test]
    async fn test_known_storage_class() {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_storage_class("standard")
            .build();
        let api = FakeClusterApi::new(cluster.clone(), Journal::default());
        assert!(validate_storage_classes(&cluster, &api).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_storage_class() {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_storage_class("premium")
            .build();
        let api = FakeClusterApi::new(cluster.clone(), Journal::default());
        let err = validate_storage_classes(&cluster, &api).await.unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
        assert!(err.to_string().contains("premium"), "{err}");
    }

    #[tokio::test]
    async fn test_default_storage_class_needs_no_lookup() {
        let cluster = create_test_cluster("as", "db", 3);
        let api = FakeClusterApi::new(cluster.clone(), Journal::default());
        api.state().storage_classes.clear();
        assert!(validate_storage_classes(&cluster, &api).await.is_ok());
    }
}

mod rollout_tests {
    use super::*;

    async fn running(version: &str) -> Harness {
        let cluster = AerospikeClusterBuilder::new("as", "db")
            .with_node_count(2)
            .with_version(version)
            .build();
        let h = Harness::new(cluster);
        reconcile(&ObjectKey::new("db", "as"), &h.ctx).await.unwrap();
        h
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_or_newer_spec_passes() {
        let h = running("4.1.0.0").await;
        assert!(validate_rollout(&h.api.cluster(), &*h.api).await.is_ok());

        h.api.edit_cluster(|c| c.spec.version = "4.2.0.3".to_string());
        assert!(validate_rollout(&h.api.cluster(), &*h.api).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spec_below_recorded_version_is_rejected() {
        let h = running("4.2.0.3").await;
        h.api.edit_cluster(|c| c.spec.version = "4.1.0.0".to_string());

        let err = validate_rollout(&h.api.cluster(), &*h.api)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
        assert!(err.to_string().contains("already on version 4.2.0.3"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_claims_alone_block_a_downgrade() {
        let h = running("4.2.0.3").await;
        h.api.state().pods.clear();
        h.api.edit_cluster(|c| c.spec.version = "4.1.0.0".to_string());

        let err = validate_rollout(&h.api.cluster(), &*h.api)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("volume claim"), "{err}");
    }
}
