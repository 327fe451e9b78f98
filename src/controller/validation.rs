//! Validation of AerospikeCluster resources
//!
//! The CRD schema already bounds most fields. What is checked here either
//! spans several fields (replication factor against node count, upgrades
//! against the applied version) or needs the API server (storage classes,
//! versions already rolled out to pods and volume claims).
//! A resource failing validation is reported and left alone until edited.

use std::collections::HashSet;
use std::sync::LazyLock;

use kube::ResourceExt;
use regex::Regex;

use crate::aerospike::{Version, VersionUpgrade, parse_duration};
use crate::controller::cluster_api::ClusterApi;
use crate::controller::error::{Error, Result};
use crate::crd::{AerospikeCluster, NamespaceSpec};
use crate::resources::pod::{memory_size_mib, pod_version, total_memory_mib};
use crate::resources::pvc::pvc_version;

pub const MIN_NODES: i32 = 1;
pub const MAX_NODES: i32 = 8;
pub const MAX_NAMESPACES: usize = 2;

static STORAGE_SIZE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^\d+G$").expect("valid storage size regex")
});

/// Validate everything that can be checked without the API server
pub fn validate_spec(cluster: &AerospikeCluster) -> Result<()> {
    validate_node_count(cluster.spec.node_count)?;
    validate_version(&cluster.spec.version)?;
    validate_namespaces(cluster)?;
    if let Some(ttl) = cluster.spec.backup_spec.as_ref().and_then(|b| b.ttl.as_deref()) {
        parse_duration(ttl)?;
    }
    validate_upgrade(cluster)?;
    Ok(())
}

fn validate_node_count(node_count: i32) -> Result<()> {
    if !(MIN_NODES..=MAX_NODES).contains(&node_count) {
        return Err(Error::ValidationError(format!(
            "node count {node_count} must be between {MIN_NODES} and {MAX_NODES}"
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    let version: Version = version.parse()?;
    if !version.is_supported() {
        return Err(Error::ValidationError(format!(
            "version {version} is not supported"
        )));
    }
    Ok(())
}

fn validate_namespaces(cluster: &AerospikeCluster) -> Result<()> {
    let namespaces = &cluster.spec.namespaces;
    if namespaces.is_empty() || namespaces.len() > MAX_NAMESPACES {
        return Err(Error::ValidationError(format!(
            "between 1 and {MAX_NAMESPACES} namespaces are required, got {}",
            namespaces.len()
        )));
    }

    let mut seen = HashSet::new();
    for ns in namespaces {
        if !seen.insert(ns.name.as_str()) {
            return Err(Error::ValidationError(format!(
                "namespace {} is declared twice",
                ns.name
            )));
        }
        validate_namespace(ns, cluster.spec.node_count)?;
    }
    if total_memory_mib(cluster).is_none() {
        return Err(Error::ValidationError(
            "total memory size of all namespaces is too large".into(),
        ));
    }
    Ok(())
}

fn validate_namespace(ns: &NamespaceSpec, node_count: i32) -> Result<()> {
    if ns.name.is_empty() {
        return Err(Error::ValidationError("namespace name is empty".into()));
    }

    if let Some(rf) = ns.replication_factor {
        if rf < 1 {
            return Err(Error::ValidationError(format!(
                "replication factor {rf} of namespace {} must be at least 1",
                ns.name
            )));
        }
        if rf > node_count {
            return Err(Error::ValidationError(format!(
                "replication factor {rf} of namespace {} exceeds node count {node_count}",
                ns.name
            )));
        }
    }

    if let Some(size) = ns.memory_size.as_deref() {
        if memory_size_mib(size).is_none_or(|mib| mib == 0) {
            return Err(Error::ValidationError(format!(
                "invalid memory size {size:?} for namespace {}",
                ns.name
            )));
        }
    }

    if let Some(ttl) = ns.default_ttl.as_deref() {
        parse_duration(ttl)?;
    }

    if !STORAGE_SIZE_PATTERN.is_match(&ns.storage.size) {
        return Err(Error::ValidationError(format!(
            "invalid storage size {:?} for namespace {}",
            ns.storage.size, ns.name
        )));
    }

    if let Some(ttl) = ns.storage.persistent_volume_claim_ttl.as_deref() {
        parse_duration(ttl)?;
    }

    Ok(())
}

/// A pending version change must be a supported, non-downgrading transition,
/// and backups must have somewhere to go
pub fn validate_upgrade(cluster: &AerospikeCluster) -> Result<Option<VersionUpgrade>> {
    if !cluster.upgrade_requested() {
        return Ok(None);
    }
    let upgrade = VersionUpgrade::parse(cluster.status_version(), &cluster.spec.version)?;
    upgrade.validate()?;
    if cluster.spec.backup_spec.is_none() {
        return Err(Error::ValidationError(format!(
            "upgrade {upgrade} requires backupSpec"
        )));
    }
    Ok(Some(upgrade))
}

/// Every storage class named by a namespace must exist
pub async fn validate_storage_classes(cluster: &AerospikeCluster, api: &dyn ClusterApi) -> Result<()> {
    let mut checked = HashSet::new();
    for ns in &cluster.spec.namespaces {
        let Some(class) = ns.storage.storage_class_name.as_deref() else {
            continue;
        };
        if !checked.insert(class) {
            continue;
        }
        if !api.storage_class_exists(class).await? {
            return Err(Error::ValidationError(format!(
                "storage class {class} of namespace {} does not exist",
                ns.name
            )));
        }
    }
    Ok(())
}

/// No pod or volume claim may already carry a newer version than the spec.
///
/// Checked while a rollout is in progress: a spec reverted after some nodes
/// were restarted would run the old server over storage the new one wrote.
pub async fn validate_rollout(cluster: &AerospikeCluster, api: &dyn ClusterApi) -> Result<()> {
    let desired: Version = cluster.spec.version.parse()?;
    let ns = cluster
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = cluster.name_any();

    let pods = api.list_pods(&ns, &name).await?;
    let pvcs = api.list_pvcs(&ns, &name).await?;
    let recorded = pods
        .iter()
        .map(|p| (format!("pod {}", p.name_any()), pod_version(p)))
        .chain(
            pvcs.iter()
                .map(|c| (format!("volume claim {}", c.name_any()), pvc_version(c))),
        );

    for (object, version) in recorded {
        let Some(Ok(version)) = version.map(str::parse::<Version>) else {
            continue;
        };
        if version > desired {
            return Err(Error::ValidationError(format!(
                "{object} is already on version {version}; \
                 downgrade to {desired} is not supported"
            )));
        }
    }
    Ok(())
}
