//! Status and conditions management for AerospikeCluster resources
//!
//! Conditions form an append-only audit log. Appends are batched per state
//! transition, and a batch that already forms the tail of the log is not
//! appended again, so a pass retried after a partial failure does not
//! duplicate history.

use chrono::Utc;
use tracing::debug;

use crate::controller::cluster_api::ClusterApi;
use crate::controller::error::Result;
use crate::crd::{
    AerospikeCluster, AerospikeClusterStatus, Condition, ConditionStatus, ConditionType,
    UpgradePhase,
};

/// Builder for appending to a condition log
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Create from existing conditions
    pub fn from_existing(existing: Vec<Condition>) -> Self {
        Self {
            conditions: existing,
        }
    }

    fn ends_with(&self, types: &[ConditionType], status: ConditionStatus) -> bool {
        let n = types.len();
        n <= self.conditions.len()
            && self.conditions[self.conditions.len() - n..]
                .iter()
                .zip(types)
                .all(|(c, t)| c.type_ == *t && c.status == status)
    }

    /// Append one condition per type, all with the same status, reason and
    /// message. Skipped when the log already ends with this batch.
    pub fn append_batch(
        mut self,
        types: &[ConditionType],
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> Self {
        if types.is_empty() || self.ends_with(types, status) {
            return self;
        }
        let now = Utc::now().to_rfc3339();
        self.conditions.extend(types.iter().map(|t| Condition {
            type_: *t,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: now.clone(),
        }));
        self
    }

    /// Append a single condition with status True
    pub fn append(self, type_: ConditionType, reason: &str, message: &str) -> Self {
        self.append_batch(&[type_], ConditionStatus::True, reason, message)
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Status mirroring the applied spec. `version` is passed separately because
/// it only advances once an upgrade has finished.
pub fn applied_status(
    cluster: &AerospikeCluster,
    version: &str,
    conditions: Vec<Condition>,
) -> AerospikeClusterStatus {
    AerospikeClusterStatus {
        node_count: cluster.spec.node_count,
        version: version.to_string(),
        namespaces: cluster.spec.namespaces.clone(),
        conditions,
    }
}

/// Status manager for AerospikeCluster resources
///
/// Each write replaces the caller's copy of the cluster with the one returned
/// by the API server, so later writes in the same pass carry a current
/// resourceVersion.
pub struct StatusManager<'a> {
    api: &'a dyn ClusterApi,
}

impl<'a> StatusManager<'a> {
    pub fn new(api: &'a dyn ClusterApi) -> Self {
        Self { api }
    }

    /// Patch the status if it differs from the observed one. Returns whether
    /// a patch was sent.
    pub async fn update(
        &self,
        cluster: &mut AerospikeCluster,
        status: AerospikeClusterStatus,
    ) -> Result<bool> {
        if cluster.status.as_ref() == Some(&status) {
            debug!("Status unchanged, skipping patch");
            return Ok(false);
        }
        *cluster = self.api.patch_cluster_status(cluster, &status).await?;
        Ok(true)
    }

    /// Move the upgrade annotation to `phase`
    pub async fn set_phase(&self, cluster: &mut AerospikeCluster, phase: UpgradePhase) -> Result<()> {
        if cluster.upgrade_phase().ok() == Some(phase) {
            return Ok(());
        }
        *cluster = self.api.set_upgrade_phase(cluster, phase).await?;
        Ok(())
    }
}
