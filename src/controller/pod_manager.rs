//! Pod lifecycle management
//!
//! Converges the pods of a cluster to the desired node count and config:
//!
//! 1. Pods above the node count are deleted, highest index first.
//! 2. Remaining pods built from a different config fingerprint or version
//!    are restarted in index order.
//! 3. Missing pods are created at the lowest free indices.
//!
//! Every deletion waits for the node to report that no migrations are in
//! progress, so data being rebalanced onto or off a node is never cut short.
//! All waits are bounded by [`LifecycleSettings`](crate::controller::LifecycleSettings);
//! a timeout fails the pass and the dispatcher retries it with backoff.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::aerospike::{RenderedConfig, Version, VersionUpgrade};
use crate::controller::cluster_api::{ClusterEvent, actions, reasons};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::volumes::VolumeManager;
use crate::crd::AerospikeCluster;
use crate::resources::pod::{
    generate_pod, is_pod_ready, pod_config_hash, pod_index, pod_ip, pod_name, pod_version,
};

/// Counts of pod operations performed in one pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PodOperations {
    pub created: u32,
    pub deleted: u32,
    pub restarted: u32,
}

impl PodOperations {
    pub fn is_empty(&self) -> bool {
        self.created == 0 && self.deleted == 0 && self.restarted == 0
    }
}

/// A restarted node reporting a build other than the upgrade target
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionMismatch {
    pub pod: String,
    pub reported: String,
}

#[derive(Debug, Default)]
pub struct ConvergeOutcome {
    pub ops: PodOperations,
    /// Set when the rollout stopped at a node running the wrong version
    pub version_mismatch: Option<VersionMismatch>,
    /// Pods of the cluster after this pass, in index order
    pub pods: Vec<Pod>,
}

/// Lowest index not in `used`
pub fn lowest_free_index(used: &BTreeSet<u32>) -> u32 {
    (0..).find(|i| !used.contains(i)).unwrap_or(u32::MAX)
}

/// Pod lifecycle manager for one cluster
pub struct PodManager<'a> {
    cluster: &'a AerospikeCluster,
    ctx: &'a Context,
    config: &'a RenderedConfig,
    /// Set while an upgrade is being rolled out
    upgrade: Option<VersionUpgrade>,
    namespace: String,
    cluster_name: String,
}

impl<'a> PodManager<'a> {
    pub fn new(
        cluster: &'a AerospikeCluster,
        ctx: &'a Context,
        config: &'a RenderedConfig,
        upgrade: Option<VersionUpgrade>,
    ) -> Result<Self> {
        let namespace = cluster
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        Ok(Self {
            cluster,
            ctx,
            config,
            upgrade,
            namespace,
            cluster_name: cluster.name_any(),
        })
    }

    /// Current pods of the cluster keyed by index, in index order
    async fn indexed_pods(&self) -> Result<Vec<(u32, Pod)>> {
        let mut pods: Vec<(u32, Pod)> = self
            .ctx
            .api
            .list_pods(&self.namespace, &self.cluster_name)
            .await?
            .into_iter()
            .filter_map(|pod| {
                let index = pod_index(&self.cluster_name, &pod.name_any())?;
                Some((index, pod))
            })
            .collect();
        pods.sort_by_key(|(index, _)| *index);
        Ok(pods)
    }

    pub async fn converge(&self) -> Result<ConvergeOutcome> {
        let desired = usize::try_from(self.cluster.spec.node_count).unwrap_or_default();
        let mut pods = self.indexed_pods().await?;
        let mut outcome = ConvergeOutcome::default();

        info!(
            current = pods.len(),
            desired,
            fingerprint = %self.config.fingerprint,
            "Converging pods"
        );

        // Scale down from the top
        while pods.len() > desired {
            let Some((index, pod)) = pods.pop() else {
                break;
            };
            info!(pod = %pod.name_any(), index, "Removing node");
            self.safe_delete(&pod).await?;
            outcome.ops.deleted += 1;
            self.event(
                reasons::POD_DELETED,
                actions::DELETE_POD,
                format!("Deleted pod {}", pod.name_any()),
            )
            .await;
        }

        // Restart stale pods in place
        for slot in 0..pods.len() {
            let (index, pod) = &pods[slot];
            if !self.needs_restart(pod) {
                continue;
            }
            let restarted = self.safe_restart(*index, pod).await?;
            outcome.ops.restarted += 1;

            let mismatch = match self.upgrade {
                Some(upgrade) => self.check_version(&restarted, &upgrade.target).await?,
                None => None,
            };
            let restarted_name = restarted.name_any();
            pods[slot].1 = restarted;

            if let Some(reported) = mismatch {
                warn!(pod = %restarted_name, %reported, "Node reports unexpected version, stopping rollout");
                outcome.version_mismatch = Some(VersionMismatch {
                    pod: restarted_name,
                    reported,
                });
                outcome.pods = pods.into_iter().map(|(_, p)| p).collect();
                return Ok(outcome);
            }
        }

        // Scale up into the lowest free slots
        let mut used: BTreeSet<u32> = pods.iter().map(|(index, _)| *index).collect();
        while pods.len() < desired {
            let index = lowest_free_index(&used);
            let pod = self.create_at(index).await?;
            outcome.ops.created += 1;
            self.event(
                reasons::POD_CREATED,
                actions::CREATE_POD,
                format!("Created pod {}", pod.name_any()),
            )
            .await;
            used.insert(index);
            pods.push((index, pod));
        }
        pods.sort_by_key(|(index, _)| *index);

        outcome.pods = pods.into_iter().map(|(_, p)| p).collect();
        Ok(outcome)
    }

    fn needs_restart(&self, pod: &Pod) -> bool {
        let stale_config = pod_config_hash(pod) != Some(self.config.fingerprint.as_str());
        let stale_version = pod_version(pod) != Some(self.cluster.spec.version.as_str());
        if stale_config || stale_version {
            debug!(pod = %pod.name_any(), stale_config, stale_version, "Pod needs restart");
        }
        stale_config || stale_version
    }

    /// Delete then recreate at the same index, keeping its volume claims
    async fn safe_restart(&self, index: u32, pod: &Pod) -> Result<Pod> {
        let name = pod.name_any();
        info!(pod = %name, index, "Restarting node");
        self.safe_delete(pod).await?;
        let restarted = self.create_at(index).await?;
        self.event(
            reasons::POD_RESTARTED,
            actions::RESTART_POD,
            format!("Restarted pod {name}"),
        )
        .await;
        Ok(restarted)
    }

    /// Wait for migrations to drain, delete, and wait for the pod to be gone
    async fn safe_delete(&self, pod: &Pod) -> Result<()> {
        let name = pod.name_any();
        self.wait_for_migrations(pod).await?;
        self.ctx.api.delete_pod(&self.namespace, &name).await?;
        self.ctx
            .api
            .wait_pod_deleted(
                &self.namespace,
                &name,
                pod.uid().as_deref(),
                self.ctx.settings.pod_deletion_timeout,
            )
            .await?;
        debug!(pod = %name, "Pod deleted");
        Ok(())
    }

    async fn wait_for_migrations(&self, pod: &Pod) -> Result<()> {
        let name = pod.name_any();
        // A node that is not serving holds no partitions to hand over
        let Some(ip) = pod_ip(pod).filter(|_| is_pod_ready(pod)) else {
            debug!(pod = %name, "Pod not ready, skipping migration check");
            return Ok(());
        };

        let settings = &self.ctx.settings;
        let start = Instant::now();
        let deadline = start + settings.migrations_timeout;
        let mut last_progress = start;

        loop {
            match self.ctx.info.migrations_in_progress(ip).await {
                Ok(false) => return Ok(()),
                Ok(true) => debug!(pod = %name, "Migrations in progress"),
                Err(e) => warn!(pod = %name, error = %e, "Failed to query migrations"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::timeout(
                    format!("migrations on {name} to finish"),
                    settings.migrations_timeout,
                ));
            }
            if now.duration_since(last_progress) >= settings.progress_interval {
                last_progress = now;
                self.event(
                    reasons::WAITING_FOR_MIGRATIONS,
                    actions::DELETE_POD,
                    format!(
                        "Waiting for migrations on {name} to finish ({}s elapsed)",
                        now.duration_since(start).as_secs()
                    ),
                )
                .await;
            }
            tokio::time::sleep(settings.poll_interval.min(deadline - now)).await;
        }
    }

    async fn create_at(&self, index: u32) -> Result<Pod> {
        let name = pod_name(&self.cluster_name, index);
        VolumeManager::new(self.cluster, self.ctx)
            .ensure_for_pod(&name, self.upgrade.as_ref())
            .await?;
        let pod = generate_pod(
            self.cluster,
            index,
            self.config,
            self.ctx.settings.single_node,
        );
        self.ctx.api.create_pod(&pod).await?;
        self.wait_ready(&name).await
    }

    /// Wait for the pod to become ready, emitting an event every progress interval
    async fn wait_ready(&self, name: &str) -> Result<Pod> {
        let settings = &self.ctx.settings;
        let wait = self
            .ctx
            .api
            .wait_pod_ready(&self.namespace, name, settings.pod_ready_timeout);
        tokio::pin!(wait);

        let start = Instant::now();
        let mut ticker = tokio::time::interval_at(
            start + settings.progress_interval,
            settings.progress_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut wait => return result,
                _ = ticker.tick() => {
                    self.event(
                        reasons::WAITING_FOR_POD,
                        actions::CREATE_POD,
                        format!(
                            "Waiting for pod {name} to become ready ({}s elapsed)",
                            start.elapsed().as_secs()
                        ),
                    )
                    .await;
                }
            }
        }
    }

    /// Build reported by a restarted node, when it is not `target`
    async fn check_version(&self, pod: &Pod, target: &Version) -> Result<Option<String>> {
        let ip = pod_ip(pod).ok_or_else(|| {
            Error::TransientError(format!("pod {} has no IP yet", pod.name_any()))
        })?;
        let build = self.ctx.info.build(ip).await?;
        match build.parse::<Version>() {
            Ok(v) if v == *target => Ok(None),
            _ => Ok(Some(build)),
        }
    }

    async fn event(&self, reason: &str, action: &str, note: String) {
        self.ctx
            .publish_event(self.cluster, ClusterEvent::normal(reason, action, note))
            .await;
    }
}
