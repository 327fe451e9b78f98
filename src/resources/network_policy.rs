//! NetworkPolicy generation for Aerospike clusters
//!
//! Access rules:
//! - Fabric (3001) and heartbeat (3002): cluster pods only
//! - Service (3000), info (3003) and exporter (9145): any source
//!
//! Egress is left unrestricted; nodes must reach each other and DNS.

use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicyPort,
    NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::aerospike::{EXPORTER_PORT, FABRIC_PORT, HEARTBEAT_PORT, INFO_PORT, SERVICE_PORT};
use crate::crd::AerospikeCluster;
use crate::resources::common::{owner_reference, selector_labels, standard_labels};

fn tcp_ports(ports: &[u16]) -> Vec<NetworkPolicyPort> {
    ports
        .iter()
        .map(|p| NetworkPolicyPort {
            port: Some(IntOrString::Int(i32::from(*p))),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect()
}

/// Name of the cluster's network policy
pub fn network_policy_name(cluster_name: &str) -> String {
    format!("{cluster_name}-network-policy")
}

/// Generate the NetworkPolicy for an Aerospike cluster
pub fn generate_network_policy(cluster: &AerospikeCluster) -> NetworkPolicy {
    let cluster_name = cluster.name_any();

    let pod_selector = LabelSelector {
        match_labels: Some(selector_labels(&cluster_name)),
        ..Default::default()
    };

    let ingress_rules = vec![
        // Intra-cluster traffic
        NetworkPolicyIngressRule {
            from: Some(vec![NetworkPolicyPeer {
                pod_selector: Some(pod_selector.clone()),
                ..Default::default()
            }]),
            ports: Some(tcp_ports(&[FABRIC_PORT, HEARTBEAT_PORT])),
        },
        // Clients, tooling and metrics scrapers
        NetworkPolicyIngressRule {
            from: None,
            ports: Some(tcp_ports(&[SERVICE_PORT, INFO_PORT, EXPORTER_PORT])),
        },
    ];

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(network_policy_name(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector,
            ingress: Some(ingress_rules),
            policy_types: Some(vec!["Ingress".to_string()]),
            ..Default::default()
        }),
    }
}
