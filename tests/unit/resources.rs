//! Unit tests for resource generators
//!
//! Pods, volume claims, services, the config map, the network policy and
//! pre-upgrade backup requests.

use aerospike_operator::aerospike::{VersionUpgrade, render_config};
use aerospike_operator::crd::{AerospikeCluster, StorageType};
use aerospike_operator::resources::common::{
    CLUSTER_LABEL, CONFIG_HASH_ANNOTATION, NAMESPACE_LABEL, VERSION_LABEL,
};
use aerospike_operator::resources::{backup, configmap, network_policy, pod, pvc, service};
use kube::ResourceExt;

use crate::common::*;

fn cluster() -> AerospikeCluster {
    create_test_cluster("as", "db", 3)
}

mod pod_tests {
    use super::*;

    fn generate(cluster: &AerospikeCluster, index: u32, single_node: bool) -> k8s_openapi::api::core::v1::Pod {
        let config = render_config(&cluster.name_any(), &cluster.spec);
        pod::generate_pod(cluster, index, &config, single_node)
    }

    #[test]
    fn test_pod_name_and_hostname() {
        let p = generate(&cluster(), 2, false);
        assert_eq!(p.name_any(), "as-2");
        assert_eq!(p.namespace().as_deref(), Some("db"));

        let spec = p.spec.as_ref().unwrap();
        assert_eq!(spec.hostname.as_deref(), Some("as-2"));
        assert_eq!(spec.subdomain.as_deref(), Some("as-discovery"));
    }

    #[test]
    fn test_pod_records_version_and_fingerprint() {
        let c = cluster();
        let config = render_config("as", &c.spec);
        let p = pod::generate_pod(&c, 0, &config, false);

        assert_eq!(pod::pod_version(&p), Some(DEFAULT_VERSION));
        assert_eq!(pod::pod_config_hash(&p), Some(config.fingerprint.as_str()));
        assert_eq!(
            p.annotations().get(CONFIG_HASH_ANNOTATION),
            Some(&config.fingerprint)
        );
        assert_eq!(p.labels().get(CLUSTER_LABEL), Some(&"as".to_string()));
    }

    #[test]
    fn test_server_image_tracks_version() {
        let c = AerospikeClusterBuilder::new("as", "db")
            .with_version("4.1.0.0")
            .build();
        let p = generate(&c, 0, false);
        let server = &p.spec.as_ref().unwrap().containers[0];
        assert_eq!(server.name, pod::SERVER_CONTAINER);
        assert_eq!(
            server.image.as_deref(),
            Some("aerospike/aerospike-server:4.1.0.0")
        );
    }

    #[test]
    fn test_exporter_sidecar() {
        let p = generate(&cluster(), 0, false);
        let containers = &p.spec.as_ref().unwrap().containers;
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[1].name, pod::EXPORTER_CONTAINER);
    }

    #[test]
    fn test_claims_mounted_per_namespace() {
        let c = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![namespace_spec("a", 1), namespace_spec("b", 1)])
            .build();
        let p = generate(&c, 1, false);
        let claims: Vec<String> = p
            .spec
            .as_ref()
            .unwrap()
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .filter_map(|v| v.persistent_volume_claim.as_ref())
            .map(|c| c.claim_name.clone())
            .collect();
        assert_eq!(claims, vec!["a-as-1", "b-as-1"]);
    }

    #[test]
    fn test_device_storage_uses_volume_devices() {
        let mut ns = namespace_spec("test", 1);
        ns.storage.type_ = StorageType::Device;
        let c = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![ns])
            .build();
        let p = generate(&c, 0, false);
        let server = &p.spec.as_ref().unwrap().containers[0];
        let devices = server.volume_devices.as_ref().unwrap();
        assert_eq!(devices[0].device_path, "/dev/aerospike/test");
    }

    #[test]
    fn test_anti_affinity_unless_single_node() {
        let spread = generate(&cluster(), 0, false);
        assert!(spread.spec.as_ref().unwrap().affinity.is_some());

        let packed = generate(&cluster(), 0, true);
        assert!(packed.spec.as_ref().unwrap().affinity.is_none());
    }

    #[test]
    fn test_memory_request_sums_namespaces() {
        let mut a = namespace_spec("a", 1);
        a.memory_size = Some("2G".to_string());
        let mut b = namespace_spec("b", 1);
        b.memory_size = Some("512M".to_string());
        let c = AerospikeClusterBuilder::new("as", "db")
            .with_namespaces(vec![a, b])
            .build();
        assert_eq!(pod::memory_request(&c).0, "2560Mi");
    }

    #[test]
    fn test_memory_size_parsing() {
        assert_eq!(pod::memory_size_mib("1G"), Some(1024));
        assert_eq!(pod::memory_size_mib("256M"), Some(256));
        assert_eq!(pod::memory_size_mib("1T"), None);
        assert_eq!(pod::memory_size_mib("G"), None);
    }

    #[test]
    fn test_owner_reference() {
        let p = generate(&cluster(), 0, false);
        let owners = p.owner_references();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "AerospikeCluster");
        assert_eq!(owners[0].uid, TEST_UID);
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn test_fresh_pod_is_not_ready() {
        let p = generate(&cluster(), 0, false);
        assert!(!pod::is_pod_ready(&p));
        assert!(!pod::is_pod_running(&p));
        assert_eq!(pod::pod_ip(&p), None);
    }
}

mod pvc_tests {
    use super::*;

    #[test]
    fn test_pvc_name_is_namespace_then_pod() {
        assert_eq!(pvc::pvc_name("test", "as-0"), "test-as-0");
    }

    #[test]
    fn test_generated_pvc() {
        let c = cluster();
        let claim = pvc::generate_pvc(&c, &c.spec.namespaces[0], "as-1");

        assert_eq!(claim.name_any(), "test-as-1");
        assert_eq!(pvc::pvc_version(&claim), Some(DEFAULT_VERSION));
        assert_eq!(claim.labels().get(NAMESPACE_LABEL), Some(&"test".to_string()));
        assert_eq!(claim.labels().get(VERSION_LABEL), Some(&DEFAULT_VERSION.to_string()));

        let spec = claim.spec.as_ref().unwrap();
        assert_eq!(spec.volume_mode.as_deref(), Some("Filesystem"));
        let requests = spec.resources.as_ref().unwrap().requests.as_ref().unwrap();
        assert_eq!(requests["storage"].0, "1Gi");
    }

    #[test]
    fn test_device_claim_is_block() {
        let mut ns = namespace_spec("test", 1);
        ns.storage.type_ = StorageType::Device;
        ns.storage.storage_class_name = Some("ssd".to_string());
        let claim = pvc::generate_pvc(&cluster(), &ns, "as-0");

        let spec = claim.spec.as_ref().unwrap();
        assert_eq!(spec.volume_mode.as_deref(), Some("Block"));
        assert_eq!(spec.storage_class_name.as_deref(), Some("ssd"));
    }

    #[test]
    fn test_storage_quantity() {
        assert_eq!(pvc::storage_quantity("8G").0, "8Gi");
        assert_eq!(pvc::storage_quantity("100Mi").0, "100Mi");
    }
}

mod service_tests {
    use super::*;

    #[test]
    fn test_discovery_service_is_headless() {
        let svc = service::generate_discovery_service(&cluster());
        assert_eq!(svc.name_any(), "as-discovery");

        let spec = svc.spec.as_ref().unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
        assert_eq!(spec.ports.as_ref().unwrap().len(), 4);
    }

    #[test]
    fn test_client_service() {
        let svc = service::generate_client_service(&cluster());
        assert_eq!(svc.name_any(), "as");

        let spec = svc.spec.as_ref().unwrap();
        let ports = spec.ports.as_ref().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 3000);
        assert_eq!(
            spec.selector.as_ref().unwrap().get(CLUSTER_LABEL),
            Some(&"as".to_string())
        );
    }
}

mod configmap_tests {
    use super::*;

    #[test]
    fn test_config_map_carries_rendered_config() {
        let c = cluster();
        let config = render_config("as", &c.spec);
        let cm = configmap::generate_config_map(&c, &config);

        assert_eq!(cm.name_any(), "as-config");
        assert_eq!(
            cm.data.as_ref().unwrap().get("aerospike.conf"),
            Some(&config.text)
        );
        assert_eq!(
            cm.annotations().get(CONFIG_HASH_ANNOTATION),
            Some(&config.fingerprint)
        );
    }
}

mod network_policy_tests {
    use super::*;

    #[test]
    fn test_policy_selects_cluster_pods() {
        let policy = network_policy::generate_network_policy(&cluster());
        assert_eq!(policy.name_any(), "as-network-policy");

        let spec = policy.spec.as_ref().unwrap();
        assert_eq!(
            spec.pod_selector
                .match_labels
                .as_ref()
                .and_then(|l| l.get(CLUSTER_LABEL)),
            Some(&"as".to_string())
        );
        assert_eq!(spec.ingress.as_ref().unwrap().len(), 2);
    }
}

mod backup_tests {
    use super::*;

    fn upgrade() -> VersionUpgrade {
        VersionUpgrade::parse("4.0.0.4", "4.1.0.0").unwrap()
    }

    #[test]
    fn test_backup_name_is_deterministic() {
        assert_eq!(
            backup::upgrade_backup_name("as", "test", &upgrade()),
            "as-test-upgrade-4-0-0-4-4-1-0-0"
        );
    }

    #[test]
    fn test_backup_request_uses_backup_spec() {
        let c = AerospikeClusterBuilder::new("as", "db")
            .with_backup_spec()
            .build();
        let b = backup::generate_upgrade_backup(&c, "test", &upgrade());

        assert_eq!(b.name_any(), "as-test-upgrade-4-0-0-4-4-1-0-0");
        assert_eq!(b.namespace().as_deref(), Some("db"));
        assert_eq!(b.spec.target.cluster, "as");
        assert_eq!(b.spec.target.namespace, "test");
        assert_eq!(b.spec.storage, Some(gcs_backup_spec().storage));
        assert_eq!(b.spec.ttl.as_deref(), Some("7d"));
        assert_eq!(b.owner_references()[0].name, "as");
    }
}

mod api_group_tests {
    use aerospike_operator::crd::{
        AerospikeNamespaceBackup, AerospikeNamespaceRestore, UPGRADE_STATUS_ANNOTATION,
    };
    use aerospike_operator::resources::common::API_VERSION;
    use kube::Resource;

    use super::*;

    const GROUP: &str = "aerospike-operator.io";

    #[test]
    fn test_resources_share_one_group() {
        assert_eq!(AerospikeCluster::group(&()), GROUP);
        assert_eq!(AerospikeNamespaceBackup::group(&()), GROUP);
        assert_eq!(AerospikeNamespaceRestore::group(&()), GROUP);
        assert_eq!(API_VERSION, AerospikeCluster::api_version(&()));
    }

    #[test]
    fn test_keys_live_under_the_group() {
        for key in [
            CLUSTER_LABEL,
            NAMESPACE_LABEL,
            VERSION_LABEL,
            CONFIG_HASH_ANNOTATION,
            UPGRADE_STATUS_ANNOTATION,
        ] {
            assert_eq!(key.split_once('/').map(|(prefix, _)| prefix), Some(GROUP));
        }
    }
}
