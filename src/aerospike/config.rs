//! Rendering of `aerospike.conf`.
//!
//! Rendering is a pure function of the cluster name and spec: the same input
//! always produces byte-identical text and therefore the same fingerprint.
//! Pods record the fingerprint they were started with, which is how the pod
//! manager decides whether a restart is needed.

use std::fmt::{self, Write};

use sha2::{Digest, Sha256};

use super::{DATA_DIR, DEVICE_DIR, FABRIC_PORT, HEARTBEAT_PORT, INFO_PORT, SERVICE_PORT};
use super::duration::parse_duration;
use crate::crd::{AerospikeClusterSpec, NamespaceSpec, StorageType};

pub const DEFAULT_MEMORY_SIZE: &str = "1G";

/// Rendered configuration and its content fingerprint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedConfig {
    pub text: String,
    pub fingerprint: String,
}

/// Hex-encoded SHA-256 of the configuration text
pub fn fingerprint(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Name of the headless service used for mesh discovery
pub fn discovery_service_name(cluster_name: &str) -> String {
    format!("{cluster_name}-discovery")
}

/// Replication factor actually rendered: the declared value clamped to the
/// node count
pub fn effective_replication_factor(ns: &NamespaceSpec, node_count: i32) -> Option<i32> {
    ns.replication_factor.map(|rf| rf.min(node_count))
}

pub fn render_config(cluster_name: &str, spec: &AerospikeClusterSpec) -> RenderedConfig {
    let mut out = String::new();
    // Writing into a String never fails
    let _ = write_config(&mut out, cluster_name, spec);
    let fingerprint = fingerprint(&out);
    RenderedConfig {
        text: out,
        fingerprint,
    }
}

fn write_config(out: &mut String, cluster_name: &str, spec: &AerospikeClusterSpec) -> fmt::Result {
    write_service(out)?;
    write_network(out, cluster_name)?;
    for ns in &spec.namespaces {
        write_namespace(out, ns, spec.node_count)?;
    }
    Ok(())
}

fn write_service(out: &mut String) -> fmt::Result {
    writeln!(out, "service {{")?;
    writeln!(out, "    user root")?;
    writeln!(out, "    group root")?;
    writeln!(out, "    paxos-single-replica-limit 1")?;
    writeln!(out, "    pidfile /var/run/aerospike/asd.pid")?;
    writeln!(out, "    proto-fd-max 15000")?;
    writeln!(out, "}}")?;
    writeln!(out)?;
    writeln!(out, "logging {{")?;
    writeln!(out, "    console {{")?;
    writeln!(out, "        context any info")?;
    writeln!(out, "    }}")?;
    writeln!(out, "}}")?;
    writeln!(out)
}

fn write_network(out: &mut String, cluster_name: &str) -> fmt::Result {
    writeln!(out, "network {{")?;
    writeln!(out, "    service {{")?;
    writeln!(out, "        address any")?;
    writeln!(out, "        port {SERVICE_PORT}")?;
    writeln!(out, "    }}")?;
    writeln!(out, "    heartbeat {{")?;
    writeln!(out, "        mode mesh")?;
    writeln!(out, "        address any")?;
    writeln!(out, "        port {HEARTBEAT_PORT}")?;
    writeln!(
        out,
        "        mesh-seed-address-port {} {HEARTBEAT_PORT}",
        discovery_service_name(cluster_name)
    )?;
    writeln!(out, "        interval 150")?;
    writeln!(out, "        timeout 10")?;
    writeln!(out, "    }}")?;
    writeln!(out, "    fabric {{")?;
    writeln!(out, "        address any")?;
    writeln!(out, "        port {FABRIC_PORT}")?;
    writeln!(out, "    }}")?;
    writeln!(out, "    info {{")?;
    writeln!(out, "        address any")?;
    writeln!(out, "        port {INFO_PORT}")?;
    writeln!(out, "    }}")?;
    writeln!(out, "}}")
}

fn write_namespace(out: &mut String, ns: &NamespaceSpec, node_count: i32) -> fmt::Result {
    writeln!(out)?;
    writeln!(out, "namespace {} {{", ns.name)?;
    if let Some(rf) = effective_replication_factor(ns, node_count) {
        writeln!(out, "    replication-factor {rf}")?;
    }
    let memory = ns.memory_size.as_deref().unwrap_or(DEFAULT_MEMORY_SIZE);
    writeln!(out, "    memory-size {memory}")?;
    if let Some(ttl) = &ns.default_ttl {
        // The server does not take fractional units, so pass whole seconds
        let ttl = parse_duration(ttl)
            .map(|d| d.as_secs().to_string())
            .unwrap_or_else(|_| ttl.clone());
        writeln!(out, "    default-ttl {ttl}")?;
    }
    writeln!(out, "    storage-engine device {{")?;
    match ns.storage.type_ {
        StorageType::File => {
            writeln!(out, "        file {DATA_DIR}/{0}/{0}.dat", ns.name)?;
            writeln!(out, "        filesize {}", ns.storage.size)?;
        }
        StorageType::Device => {
            writeln!(out, "        device {DEVICE_DIR}/{}", ns.name)?;
        }
    }
    writeln!(out, "    }}")?;
    writeln!(out, "}}")
}
