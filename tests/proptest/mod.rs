// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for AerospikeCluster validation, rendering and lifecycle helpers
//!
//! These tests use proptest to generate random configurations and verify that:
//! 1. Valid specs always pass validation and render without panicking
//! 2. Invalid specs are always rejected with errors, not panics
//! 3. Rendering is deterministic (same input = same fingerprint)
//! 4. The upgrade state machine never leaves `Failed`
//! 5. Pod indices are always reused from the bottom

use std::collections::BTreeSet;

use proptest::prelude::*;

use aerospike_operator::aerospike::config::effective_replication_factor;
use aerospike_operator::aerospike::version::SUPPORTED_VERSIONS;
use aerospike_operator::aerospike::{Version, VersionUpgrade, parse_duration, render_config};
use aerospike_operator::controller::pod_manager::lowest_free_index;
use aerospike_operator::controller::status::ConditionBuilder;
use aerospike_operator::controller::upgrade_state_machine::{
    UpgradeEvent, UpgradeStateMachine, UpgradeTransitionContext, UpgradeTransitionResult,
};
use aerospike_operator::controller::validation::{MAX_NODES, MIN_NODES, validate_spec};
use aerospike_operator::crd::{
    AerospikeCluster, AerospikeClusterSpec, ConditionStatus, ConditionType, NamespaceSpec,
    StorageSpec, StorageType, UpgradePhase,
};
use aerospike_operator::resources::pod::{pod_index, pod_name};

// =============================================================================
// Helper functions to reduce spec boilerplate
// =============================================================================

fn namespace(name: &str, replication_factor: Option<i32>, memory_gb: u32, storage_gb: u32) -> NamespaceSpec {
    NamespaceSpec {
        name: name.to_string(),
        replication_factor,
        memory_size: Some(format!("{memory_gb}G")),
        default_ttl: None,
        storage: StorageSpec {
            type_: StorageType::File,
            size: format!("{storage_gb}G"),
            storage_class_name: None,
            persistent_volume_claim_ttl: None,
        },
    }
}

fn cluster_from_spec(spec: AerospikeClusterSpec) -> AerospikeCluster {
    let mut cluster = AerospikeCluster::new("as", spec);
    cluster.metadata.namespace = Some("default".to_string());
    cluster.metadata.uid = Some("test-uid".to_string());
    cluster
}

// =============================================================================
// Strategy generators for AerospikeCluster specs
// =============================================================================

fn supported_version() -> impl Strategy<Value = String> {
    prop::sample::select(SUPPORTED_VERSIONS).prop_map(str::to_string)
}

fn valid_node_count() -> impl Strategy<Value = i32> {
    MIN_NODES..=MAX_NODES
}

/// Node counts outside the supported range (shrinks toward the boundaries)
fn invalid_node_count() -> impl Strategy<Value = i32> {
    prop_oneof![(-10..MIN_NODES), ((MAX_NODES + 1)..=64)]
}

/// A valid spec: the replication factor never exceeds the node count
fn valid_spec() -> impl Strategy<Value = AerospikeClusterSpec> {
    (valid_node_count(), supported_version(), 1..=2usize, 1..=64u32, 1..=512u32)
        .prop_flat_map(|(node_count, version, namespaces, memory_gb, storage_gb)| {
            (
                Just(node_count),
                Just(version),
                prop::collection::vec(prop::option::of(1..=node_count), namespaces),
                Just(memory_gb),
                Just(storage_gb),
            )
        })
        .prop_map(|(node_count, version, rfs, memory_gb, storage_gb)| AerospikeClusterSpec {
            node_count,
            version,
            namespaces: rfs
                .into_iter()
                .enumerate()
                .map(|(i, rf)| namespace(&format!("ns{i}"), rf, memory_gb, storage_gb))
                .collect(),
            backup_spec: None,
        })
}

fn version() -> impl Strategy<Value = Version> {
    (0..6u32, 0..6u32, 0..3u32, 0..12u32).prop_map(|(a, b, c, d)| Version::new(a, b, c, d))
}

fn upgrade_event() -> impl Strategy<Value = UpgradeEvent> {
    prop_oneof![
        Just(UpgradeEvent::UpgradeRequested),
        Just(UpgradeEvent::BackupsFinished),
        Just(UpgradeEvent::BackupsFailed),
        Just(UpgradeEvent::UpgradeCancelled),
        Just(UpgradeEvent::VersionMismatch),
        Just(UpgradeEvent::AllPodsUpgraded),
    ]
}

fn transition_context() -> impl Strategy<Value = UpgradeTransitionContext> {
    (any::<bool>(), any::<bool>(), 0..3usize, 0..3usize, 0..3usize, 0..4usize, 0..4usize).prop_map(
        |(requested, backup, total, finished, failed, pods, on_target)| UpgradeTransitionContext {
            upgrade_requested: requested,
            backup_configured: backup,
            backups_total: total,
            backups_finished: finished.min(total),
            backups_failed: failed.min(total),
            pods_total: pods,
            pods_on_target: on_target.min(pods),
            version_mismatch: None,
        },
    )
}

// =============================================================================
// Property-based tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Valid specs always pass validation
    #[test]
    fn prop_valid_spec_passes_validation(spec in valid_spec()) {
        let cluster = cluster_from_spec(spec);
        let result = validate_spec(&cluster);
        prop_assert!(result.is_ok(), "Valid spec should pass validation: {:?}", result);
    }

    /// Property: Node counts out of range are always rejected
    #[test]
    fn prop_invalid_node_count_rejected(spec in valid_spec(), node_count in invalid_node_count()) {
        let cluster = cluster_from_spec(AerospikeClusterSpec { node_count, ..spec });
        prop_assert!(validate_spec(&cluster).is_err());
    }

    /// Property: A replication factor above the node count is always rejected
    #[test]
    fn prop_replication_factor_above_node_count_rejected(node_count in 1..MAX_NODES, extra in 1..=4i32) {
        let spec = AerospikeClusterSpec {
            node_count,
            version: "4.2.0.10".to_string(),
            namespaces: vec![namespace("test", Some(node_count + extra), 1, 1)],
            backup_spec: None,
        };
        prop_assert!(validate_spec(&cluster_from_spec(spec)).is_err());
    }

    /// Property: Rendering is a pure function of name and spec
    #[test]
    fn prop_render_is_deterministic(spec in valid_spec()) {
        let a = render_config("as", &spec);
        let b = render_config("as", &spec.clone());
        prop_assert_eq!(&a.text, &b.text);
        prop_assert_eq!(&a.fingerprint, &b.fingerprint);
        prop_assert_eq!(a.fingerprint.len(), 64);
    }

    /// Property: Scaling changes the fingerprint only through the clamped replication factor
    #[test]
    fn prop_fingerprint_tracks_effective_replication_factor(spec in valid_spec(), node_count in valid_node_count()) {
        let scaled = AerospikeClusterSpec { node_count, ..spec.clone() };
        let same_rfs = spec.namespaces.iter().all(|ns| {
            effective_replication_factor(ns, spec.node_count) == effective_replication_factor(ns, node_count)
        });
        let same_fingerprint = render_config("as", &spec).fingerprint == render_config("as", &scaled).fingerprint;
        prop_assert_eq!(same_rfs, same_fingerprint);
    }

    /// Property: The rendered replication factor never exceeds the node count
    #[test]
    fn prop_effective_replication_factor_clamped(rf in 1..=16i32, node_count in 1..=16i32) {
        let ns = namespace("test", Some(rf), 1, 1);
        let effective = effective_replication_factor(&ns, node_count).unwrap();
        prop_assert!(effective <= node_count);
        prop_assert!(effective <= rf);
    }

    /// Property: The duration parser never panics on arbitrary input
    #[test]
    fn prop_parse_duration_never_panics(input in ".{0,24}") {
        let _ = parse_duration(&input);
    }

    /// Property: Whole numbers with a unit parse to the exact duration
    #[test]
    fn prop_parse_whole_units(n in 0..100_000u64) {
        prop_assert_eq!(parse_duration(&format!("{n}s")).unwrap().as_secs(), n);
        prop_assert_eq!(parse_duration(&format!("{n}m")).unwrap().as_secs(), n * 60);
        prop_assert_eq!(parse_duration(&format!("{n}d")).unwrap().as_secs(), n * 86400);
    }

    /// Property: Errors always carry the original input
    #[test]
    fn prop_duration_errors_name_input(input in "[a-z ]{1,12}") {
        let err = parse_duration(&input).unwrap_err();
        prop_assert!(err.to_string().contains(&format!("{input:?}")), "{}", err);
    }

    /// Property: Storage recreation is needed exactly when crossing 4.2.0.0 upwards
    #[test]
    fn prop_storage_recreation_only_when_crossing(source in version(), target in version()) {
        let boundary = Version::new(4, 2, 0, 0);
        let upgrade = VersionUpgrade::new(source, target);
        prop_assert_eq!(
            upgrade.strategy().recreate_persistent_volume_claims,
            source < boundary && target >= boundary
        );
    }

    /// Property: A downgrade is never valid
    #[test]
    fn prop_downgrade_never_valid(source in version(), target in version()) {
        let upgrade = VersionUpgrade::new(source, target);
        if target < source {
            prop_assert!(upgrade.is_downgrade());
            prop_assert!(upgrade.validate().is_err());
        } else {
            prop_assert!(!upgrade.is_downgrade());
        }
    }

    /// Property: Failed is absorbing under any event sequence
    #[test]
    fn prop_failed_is_absorbing(
        events in prop::collection::vec(upgrade_event(), 0..20),
        ctx in transition_context(),
    ) {
        let sm = UpgradeStateMachine::new();
        let mut phase = UpgradePhase::Failed;
        for event in events {
            if let UpgradeTransitionResult::Success { to, .. } = sm.transition(&phase, event, &ctx) {
                phase = to;
            }
        }
        prop_assert_eq!(phase, UpgradePhase::Failed);
    }

    /// Property: The state machine never panics and only reaches known phases
    #[test]
    fn prop_state_machine_never_panics(
        events in prop::collection::vec(upgrade_event(), 0..30),
        ctx in transition_context(),
    ) {
        let sm = UpgradeStateMachine::new();
        let mut phase = UpgradePhase::None;
        for event in events {
            match sm.transition(&phase, event, &ctx) {
                UpgradeTransitionResult::Success { from, to, .. } => {
                    prop_assert_eq!(from, phase);
                    prop_assert!(sm.can_transition(&phase, &event));
                    phase = to;
                }
                UpgradeTransitionResult::InvalidTransition { .. } => {
                    prop_assert!(!sm.can_transition(&phase, &event));
                }
                UpgradeTransitionResult::GuardFailed { .. } => {}
            }
        }
    }

    /// Property: Appending the same batch twice leaves one copy
    #[test]
    fn prop_condition_batch_idempotent(repeats in 1..5usize) {
        let batch = [ConditionType::AutoBackupFinished, ConditionType::UpgradeStarted];
        let mut conditions = ConditionBuilder::from_existing(vec![])
            .append(ConditionType::AutoBackupStarted, "UpgradeRequested", "")
            .build();
        for _ in 0..repeats {
            conditions = ConditionBuilder::from_existing(conditions)
                .append_batch(&batch, ConditionStatus::True, "BackupsFinished", "")
                .build();
        }
        prop_assert_eq!(conditions.len(), 3);
    }

    /// Property: The lowest free index is free and every index below it is used
    #[test]
    fn prop_lowest_free_index(used in prop::collection::btree_set(0..16u32, 0..16)) {
        let index = lowest_free_index(&used);
        prop_assert!(!used.contains(&index));
        prop_assert!((0..index).all(|i| used.contains(&i)));
    }

    /// Property: Scaling up never allocates past the current pod count
    #[test]
    fn prop_scale_up_fills_gaps(used in prop::collection::btree_set(0..8u32, 0..8), add in 0..8usize) {
        let mut used: BTreeSet<u32> = used;
        for _ in 0..add {
            let index = lowest_free_index(&used);
            prop_assert!(index <= u32::try_from(used.len()).unwrap());
            used.insert(index);
        }
    }

    /// Property: Pod names always map back to their index
    #[test]
    fn prop_pod_index_of_pod_name(name in "[a-z][a-z0-9-]{0,20}[a-z0-9]", index in 0..1000u32) {
        prop_assert_eq!(pod_index(&name, &pod_name(&name, index)), Some(index));
    }
}
