//! Routing of watch events to cluster keys
//!
//! Events on child objects are mapped to the cluster that controls them
//! through their owner references. Events on clusters themselves pass a
//! change filter so that the operator's own status writes do not trigger
//! another pass.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::{AerospikeCluster, UPGRADE_STATUS_ANNOTATION};
use crate::dispatcher::ObjectKey;
use crate::resources::common::{API_VERSION, KIND};

/// Key of the AerospikeCluster controlling the object described by `meta`
pub fn owner_key(meta: &ObjectMeta) -> Option<ObjectKey> {
    let namespace = meta.namespace.as_ref()?;
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true) && r.kind == KIND && r.api_version == API_VERSION)
        .map(|r| ObjectKey::new(namespace, &r.name))
}

pub fn cluster_key(cluster: &AerospikeCluster) -> Option<ObjectKey> {
    Some(ObjectKey::new(&cluster.namespace()?, &cluster.name_any()))
}

/// Hash of the parts of a cluster whose change warrants a pass: the spec
/// (through its generation), the upgrade annotation and deletion.
pub fn change_fingerprint(cluster: &AerospikeCluster) -> u64 {
    let mut hasher = DefaultHasher::new();
    cluster.metadata.generation.hash(&mut hasher);
    cluster
        .annotations()
        .get(UPGRADE_STATUS_ANNOTATION)
        .hash(&mut hasher);
    cluster.metadata.deletion_timestamp.is_some().hash(&mut hasher);
    hasher.finish()
}

/// Remembers the last fingerprint seen per cluster
#[derive(Debug, Default)]
pub struct ChangeFilter {
    seen: HashMap<ObjectKey, u64>,
}

impl ChangeFilter {
    /// Key of the cluster when it changed since it was last seen
    pub fn observe(&mut self, cluster: &AerospikeCluster) -> Option<ObjectKey> {
        let key = cluster_key(cluster)?;
        let fingerprint = change_fingerprint(cluster);
        match self.seen.insert(key.clone(), fingerprint) {
            Some(previous) if previous == fingerprint => None,
            _ => Some(key),
        }
    }

    pub fn forget(&mut self, cluster: &AerospikeCluster) {
        if let Some(key) = cluster_key(cluster) {
            self.seen.remove(&key);
        }
    }
}
