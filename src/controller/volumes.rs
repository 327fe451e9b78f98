//! Volume claim management
//!
//! Claims are created on demand per (namespace, pod) pair and reused for the
//! life of the slot. The only time a claim is discarded is an upgrade whose
//! strategy requires fresh storage, decided from the version the claim was
//! created for.

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::aerospike::{Version, VersionUpgrade};
use crate::controller::cluster_api::{ClusterEvent, actions, reasons};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::crd::AerospikeCluster;
use crate::resources::pvc::{generate_pvc, pvc_version};

/// Volume manager for one cluster
pub struct VolumeManager<'a> {
    cluster: &'a AerospikeCluster,
    ctx: &'a Context,
}

impl<'a> VolumeManager<'a> {
    pub fn new(cluster: &'a AerospikeCluster, ctx: &'a Context) -> Self {
        Self { cluster, ctx }
    }

    /// Make sure every namespace has a claim for `pod_name`.
    ///
    /// With `upgrade` set, claims created for a version that cannot be moved
    /// to the target in place are deleted and recreated empty. The check is
    /// made against the claim's own label, so a pass interrupted between the
    /// delete and the create still converges.
    pub async fn ensure_for_pod(
        &self,
        pod_name: &str,
        upgrade: Option<&VersionUpgrade>,
    ) -> Result<Vec<PersistentVolumeClaim>> {
        let mut claims = Vec::with_capacity(self.cluster.spec.namespaces.len());
        for ns in &self.cluster.spec.namespaces {
            let desired = generate_pvc(self.cluster, ns, pod_name);
            let existing = self.ctx.api.get_or_create_pvc(&desired).await?;

            let claim = match upgrade {
                Some(upgrade) if self.needs_recreation(&existing, upgrade) => {
                    self.recreate(&existing, &desired, upgrade).await?
                }
                _ => existing,
            };
            debug!(pvc = %claim.name_any(), "Volume claim in place");
            claims.push(claim);
        }
        Ok(claims)
    }

    fn needs_recreation(&self, claim: &PersistentVolumeClaim, upgrade: &VersionUpgrade) -> bool {
        // Claims without a parseable label predate labelling and were
        // formatted by the source version
        let formatted_by = pvc_version(claim)
            .and_then(|v| v.parse::<Version>().ok())
            .unwrap_or(upgrade.source);
        VersionUpgrade::new(formatted_by, upgrade.target)
            .strategy()
            .recreate_persistent_volume_claims
    }

    async fn recreate(
        &self,
        existing: &PersistentVolumeClaim,
        desired: &PersistentVolumeClaim,
        upgrade: &VersionUpgrade,
    ) -> Result<PersistentVolumeClaim> {
        let name = existing.name_any();
        let ns = existing
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        info!(pvc = %name, %upgrade, "Recreating volume claim for storage format change");

        self.ctx
            .api
            .delete_pvc(&ns, &name, self.ctx.settings.pod_deletion_timeout)
            .await?;
        let created = self.ctx.api.get_or_create_pvc(desired).await?;
        if pvc_version(&created) != pvc_version(desired) {
            warn!(pvc = %name, "Volume claim still carries the old version label");
        }

        self.ctx
            .publish_event(
                self.cluster,
                ClusterEvent::normal(
                    reasons::VOLUME_RECREATED,
                    actions::RECREATE_VOLUME,
                    format!("Recreated volume claim {name} for upgrade {upgrade}"),
                ),
            )
            .await;
        Ok(created)
    }
}
