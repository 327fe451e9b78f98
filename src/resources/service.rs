//! Service generation for Aerospike clusters
//!
//! Two services per cluster:
//! - `<cluster>-discovery`: headless, publishes not-ready addresses so nodes
//!   can find each other through the heartbeat mesh while starting up. Pods
//!   use it as their subdomain.
//! - `<cluster>`: client entry point on the service port.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::aerospike::config::discovery_service_name;
use crate::aerospike::{FABRIC_PORT, HEARTBEAT_PORT, INFO_PORT, SERVICE_PORT};
use crate::crd::AerospikeCluster;
use crate::resources::common::{owner_reference, selector_labels, standard_labels};

fn tcp_port(name: &str, port: u16) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port: i32::from(port),
        target_port: Some(IntOrString::Int(i32::from(port))),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Generate the headless service used for mesh discovery and pod DNS
pub fn generate_discovery_service(cluster: &AerospikeCluster) -> Service {
    let cluster_name = cluster.name_any();

    Service {
        metadata: ObjectMeta {
            name: Some(discovery_service_name(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(&cluster_name)),
            ports: Some(vec![
                tcp_port("service", SERVICE_PORT),
                tcp_port("fabric", FABRIC_PORT),
                tcp_port("heartbeat", HEARTBEAT_PORT),
                tcp_port("info", INFO_PORT),
            ]),
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the client service
pub fn generate_client_service(cluster: &AerospikeCluster) -> Service {
    let cluster_name = cluster.name_any();

    Service {
        metadata: ObjectMeta {
            name: Some(cluster_name.clone()),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name)),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(&cluster_name)),
            ports: Some(vec![tcp_port("service", SERVICE_PORT)]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
