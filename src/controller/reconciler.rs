//! Reconciliation logic for AerospikeCluster resources
//!
//! One pass per dequeued key, strictly sequential:
//!
//! 1. A cluster whose upgrade failed is left alone.
//! 2. The spec is validated; an invalid cluster is reported and skipped.
//! 3. The upgrade state machine runs and may hold the pass.
//! 4. Services, config map and network policy are applied.
//! 5. Pods are converged.
//! 6. Status is written, then a finished or failed upgrade is recorded.

use std::time::{Duration, Instant};

use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use crate::aerospike::{VersionUpgrade, render_config};
use crate::controller::cluster_api::{ClusterEvent, actions, reasons};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::pod_manager::{ConvergeOutcome, PodManager};
use crate::controller::status::{StatusManager, applied_status};
use crate::controller::upgrade_reconciler::{
    UpgradeGate, UpgradeProgress, advance_upgrade, finish_upgrade,
};
use crate::controller::validation::{
    validate_rollout, validate_spec, validate_storage_classes, validate_upgrade,
};
use crate::crd::{AerospikeCluster, UpgradePhase};
use crate::dispatcher::{Action, ObjectKey};
use crate::resources::pod::{is_pod_ready, pod_ip};
use crate::resources::{configmap, network_policy, service};

/// Resync period for a converged cluster
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Poll period while pre-upgrade backups run
pub const BACKUP_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Poll period while nodes are still moving to a new version
pub const UPGRADE_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Main reconciliation function
#[instrument(skip(ctx), fields(namespace = %key.namespace, name = %key.name))]
pub async fn reconcile(key: &ObjectKey, ctx: &Context) -> Result<Action> {
    let Some(mut cluster) = ctx.api.get_cluster(&key.namespace, &key.name).await? else {
        debug!("Cluster no longer exists");
        return Ok(Action::AwaitChange);
    };

    // Children are owned by the cluster and collected with it
    if cluster.metadata.deletion_timestamp.is_some() {
        debug!("Cluster is being deleted");
        return Ok(Action::AwaitChange);
    }

    info!("Reconciling AerospikeCluster");
    let start = Instant::now();
    let result = reconcile_cluster(&mut cluster, ctx).await;

    if let Some(health) = &ctx.health_state {
        match &result {
            Ok(_) => {
                health.metrics.record_reconcile(
                    &key.namespace,
                    &key.name,
                    start.elapsed().as_secs_f64(),
                );
                health.touch_reconcile();
            }
            Err(_) => health.metrics.record_error(&key.namespace, &key.name),
        }
    }

    match result {
        Ok(action) => {
            info!(?action, "Reconciliation completed successfully");
            Ok(action)
        }
        Err(e) => {
            error!("Reconciliation failed: {}", e);
            Err(e)
        }
    }
}

/// Log a failed pass and return the delay before the key is retried
pub fn error_policy(key: &ObjectKey, error: &Error, attempt: u32, ctx: &Context) -> Duration {
    let delay = ctx.backoff.delay_for_error(error, attempt);
    if error.is_retryable() {
        warn!(key = %key, attempt, "Retryable error: {}, requeuing in {:?}", error, delay);
    } else {
        error!(key = %key, attempt, "Non-retryable error: {}, requeuing in {:?}", error, delay);
    }
    delay
}

async fn reconcile_cluster(cluster: &mut AerospikeCluster, ctx: &Context) -> Result<Action> {
    let ns = cluster
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = cluster.name_any();

    let phase = match cluster.upgrade_phase() {
        Ok(phase) => phase,
        Err(e) => {
            warn!("{}", e);
            ctx.publish_event(
                cluster,
                ClusterEvent::warning(
                    reasons::UNKNOWN_UPGRADE_PHASE,
                    actions::RECONCILE,
                    format!("{e}; remove the annotation to resume"),
                ),
            )
            .await;
            return Ok(Action::AwaitChange);
        }
    };
    record_phase(ctx, &ns, &name, phase);

    if phase.is_terminal() {
        info!("Upgrade failed previously, skipping until the upgrade annotation is cleared");
        return Ok(Action::AwaitChange);
    }

    let upgrade = match validate(cluster, ctx, phase).await {
        Ok(upgrade) => upgrade,
        Err(Error::ValidationError(message)) => {
            warn!(%message, "Cluster spec is invalid");
            ctx.publish_event(
                cluster,
                ClusterEvent::warning(reasons::VALIDATION_ERROR, actions::VALIDATE, message),
            )
            .await;
            return Ok(Action::AwaitChange);
        }
        Err(e) => return Err(e),
    };

    let rollout = match advance_upgrade(cluster, ctx, phase, upgrade).await? {
        UpgradeGate::Proceed(rollout) => rollout,
        UpgradeGate::Wait => {
            record_phase(ctx, &ns, &name, current_phase(cluster));
            return Ok(Action::Requeue(BACKUP_POLL_INTERVAL));
        }
        UpgradeGate::Halted => {
            record_phase(ctx, &ns, &name, current_phase(cluster));
            return Ok(Action::AwaitChange);
        }
    };
    let phase = current_phase(cluster);

    let config = render_config(&name, &cluster.spec);
    ctx.api
        .apply_service(&service::generate_discovery_service(cluster))
        .await?;
    ctx.api
        .apply_service(&service::generate_client_service(cluster))
        .await?;
    ctx.api
        .apply_config_map(&configmap::generate_config_map(cluster, &config))
        .await?;
    ctx.api
        .apply_network_policy(&network_policy::generate_network_policy(cluster))
        .await?;

    let outcome = PodManager::new(cluster, ctx, &config, rollout)?
        .converge()
        .await?;
    record_pods(ctx, &ns, &name, cluster, &outcome);

    // The applied version only moves once every node runs it
    let version = if phase == UpgradePhase::None {
        cluster.spec.version.clone()
    } else {
        cluster.status_version().to_string()
    };
    let status = applied_status(cluster, &version, cluster.conditions().to_vec());
    StatusManager::new(ctx.api.as_ref())
        .update(cluster, status)
        .await?;

    let progress = finish_upgrade(cluster, ctx, phase, &outcome).await?;
    record_phase(ctx, &ns, &name, current_phase(cluster));

    match progress {
        UpgradeProgress::Failed => Ok(Action::AwaitChange),
        UpgradeProgress::InProgress => Ok(Action::Requeue(UPGRADE_POLL_INTERVAL)),
        UpgradeProgress::Idle | UpgradeProgress::Finished => {
            check_cluster_size(cluster, ctx, &outcome).await;
            Ok(Action::Requeue(RESYNC_INTERVAL))
        }
    }
}

/// Static checks, storage classes, and the pending version change if any
async fn validate(
    cluster: &AerospikeCluster,
    ctx: &Context,
    phase: UpgradePhase,
) -> Result<Option<VersionUpgrade>> {
    validate_spec(cluster)?;
    validate_storage_classes(cluster, ctx.api.as_ref()).await?;
    if phase == UpgradePhase::Started {
        validate_rollout(cluster, ctx.api.as_ref()).await?;
    }
    validate_upgrade(cluster)
}

fn current_phase(cluster: &AerospikeCluster) -> UpgradePhase {
    cluster.upgrade_phase().unwrap_or_default()
}

/// Warn when the nodes disagree with the node count about the cluster size
async fn check_cluster_size(cluster: &AerospikeCluster, ctx: &Context, outcome: &ConvergeOutcome) {
    if outcome.pods.is_empty() || !outcome.pods.iter().all(is_pod_ready) {
        return;
    }
    let Some(ip) = outcome.pods.iter().find_map(pod_ip) else {
        return;
    };
    match ctx.info.cluster_size(ip).await {
        Ok(size) if size == u64::try_from(cluster.spec.node_count).unwrap_or_default() => {
            debug!(size, "Cluster size matches node count");
        }
        Ok(size) => {
            warn!(size, node_count = cluster.spec.node_count, "Cluster size mismatch");
            ctx.publish_event(
                cluster,
                ClusterEvent::warning(
                    reasons::CLUSTER_SIZE_MISMATCH,
                    actions::RECONCILE,
                    format!(
                        "Nodes report a cluster size of {size}, expected {}",
                        cluster.spec.node_count
                    ),
                ),
            )
            .await;
        }
        Err(e) => warn!(error = %e, "Failed to query cluster size"),
    }
}

fn record_phase(ctx: &Context, ns: &str, name: &str, phase: UpgradePhase) {
    if let Some(health) = &ctx.health_state {
        health.metrics.set_upgrade_phase(ns, name, phase);
    }
}

fn record_pods(
    ctx: &Context,
    ns: &str,
    name: &str,
    cluster: &AerospikeCluster,
    outcome: &ConvergeOutcome,
) {
    let Some(health) = &ctx.health_state else {
        return;
    };
    let ready = outcome.pods.iter().filter(|p| is_pod_ready(p)).count();
    health.metrics.set_cluster_nodes(
        ns,
        name,
        i64::from(cluster.spec.node_count),
        i64::try_from(ready).unwrap_or(i64::MAX),
    );
    health.metrics.record_pod_operations(
        ns,
        name,
        u64::from(outcome.ops.created),
        u64::from(outcome.ops.deleted),
        u64::from(outcome.ops.restarted),
    );
}

