//! Version upgrade orchestration for AerospikeCluster resources
//!
//! An upgrade never touches a node before every namespace has been backed
//! up. The phase is tracked in the upgrade annotation and every transition
//! appends conditions to the cluster status:
//!
//! - `None`: a version change creates one backup request per namespace and
//!   moves to `Backup`.
//! - `Backup`: waits for the requests. Any failure moves to `Failed`; all
//!   finished moves to `Started` and the rollout begins in the same pass.
//! - `Started`: the pod lifecycle manager restarts nodes onto the new image.
//!   Once every node reports the target build the annotation is removed. A
//!   node that was restarted but reports another build fails the upgrade.
//!   Reverting the spec cancels only while no node runs the newer version.
//! - `Failed`: nothing happens until the annotation is removed by hand.
//!
//! Each step is safe to repeat: backup names are deterministic, condition
//! batches already at the tail of the log are not appended again, and the
//! annotation is written last.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::aerospike::{Version, VersionUpgrade};
use crate::controller::cluster_api::{ClusterEvent, actions, reasons};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::pod_manager::ConvergeOutcome;
use crate::controller::status::{ConditionBuilder, StatusManager};
use crate::controller::upgrade_state_machine::{
    UpgradeEvent, UpgradeStateMachine, UpgradeTransitionContext, UpgradeTransitionResult,
    determine_upgrade_event,
};
use crate::crd::{AerospikeCluster, ConditionStatus, NamespaceOperation, UpgradePhase};
use crate::resources::backup::{generate_upgrade_backup, upgrade_backup_name};
use crate::resources::pod::pod_ip;

/// What the rest of the reconcile pass may do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeGate {
    /// Converge the cluster; `Some` while rolling out a new version
    Proceed(Option<VersionUpgrade>),
    /// Backups are still running
    Wait,
    /// The upgrade failed; leave the cluster alone
    Halted,
}

/// Result of checking an upgrade after the pods converged
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeProgress {
    /// No upgrade in flight
    Idle,
    /// Some nodes still report the old build
    InProgress,
    Finished,
    Failed,
}

fn events_for(upgrade_event: UpgradeEvent, note: String) -> Vec<ClusterEvent> {
    match upgrade_event {
        UpgradeEvent::UpgradeRequested => vec![ClusterEvent::normal(
            reasons::BACKUP_STARTED,
            actions::UPGRADE,
            note,
        )],
        UpgradeEvent::BackupsFinished => vec![
            ClusterEvent::normal(
                reasons::BACKUP_FINISHED,
                actions::UPGRADE,
                "Every namespace backup finished",
            ),
            ClusterEvent::normal(reasons::UPGRADE_STARTED, actions::UPGRADE, note),
        ],
        UpgradeEvent::BackupsFailed => vec![ClusterEvent::warning(
            reasons::BACKUP_FAILED,
            actions::UPGRADE,
            note,
        )],
        UpgradeEvent::UpgradeCancelled => vec![ClusterEvent::normal(
            reasons::UPGRADE_CANCELLED,
            actions::UPGRADE,
            note,
        )],
        UpgradeEvent::VersionMismatch => vec![ClusterEvent::warning(
            reasons::UPGRADE_FAILED,
            actions::UPGRADE,
            note,
        )],
        UpgradeEvent::AllPodsUpgraded => vec![ClusterEvent::normal(
            reasons::UPGRADE_FINISHED,
            actions::UPGRADE,
            note,
        )],
    }
}

/// Apply a transition: append its conditions, move the annotation, and
/// record an event. Returns the new phase.
async fn apply_transition(
    cluster: &mut AerospikeCluster,
    ctx: &Context,
    phase: UpgradePhase,
    event: UpgradeEvent,
    tctx: &UpgradeTransitionContext,
    message: String,
) -> Result<UpgradePhase> {
    let to = match UpgradeStateMachine::new().transition(&phase, event, tctx) {
        UpgradeTransitionResult::Success {
            to, description, ..
        } => {
            info!(from = %phase, to = %to, %event, "{}", description);
            to
        }
        UpgradeTransitionResult::InvalidTransition { current, event } => {
            return Err(Error::PermanentError(format!(
                "upgrade event {event} is not valid in phase {current}"
            )));
        }
        UpgradeTransitionResult::GuardFailed { event, reason, .. } => {
            return Err(Error::ValidationError(format!(
                "upgrade event {event} blocked: {reason}"
            )));
        }
    };

    let status_manager = StatusManager::new(ctx.api.as_ref());
    let mut status = cluster.status.clone().unwrap_or_default();
    status.conditions = ConditionBuilder::from_existing(status.conditions)
        .append_batch(
            event.conditions(),
            ConditionStatus::True,
            &event.to_string(),
            &message,
        )
        .build();
    if event == UpgradeEvent::AllPodsUpgraded {
        status.version = cluster.spec.version.clone();
    }
    status_manager.update(cluster, status).await?;
    status_manager.set_phase(cluster, to).await?;

    for cluster_event in events_for(event, message) {
        ctx.publish_event(cluster, cluster_event).await;
    }
    Ok(to)
}

/// Advance the upgrade state machine before any convergence work.
///
/// `upgrade` is the validated transition from the applied version to the
/// spec version, `None` when they are equal.
pub async fn advance_upgrade(
    cluster: &mut AerospikeCluster,
    ctx: &Context,
    phase: UpgradePhase,
    upgrade: Option<VersionUpgrade>,
) -> Result<UpgradeGate> {
    match phase {
        UpgradePhase::Failed => Ok(UpgradeGate::Halted),
        UpgradePhase::None => match upgrade {
            None => Ok(UpgradeGate::Proceed(None)),
            Some(upgrade) => {
                start_backups(cluster, ctx, &upgrade).await?;
                Ok(UpgradeGate::Wait)
            }
        },
        UpgradePhase::Backup => check_backups(cluster, ctx, upgrade).await,
        UpgradePhase::Started => match upgrade {
            Some(upgrade) => Ok(UpgradeGate::Proceed(Some(upgrade))),
            None => {
                // Validation already rejected the spec if a node moved past it
                let message = format!(
                    "Version reverted to {} before any node was restarted",
                    cluster.spec.version
                );
                cancel(cluster, ctx, UpgradePhase::Started, message).await?;
                Ok(UpgradeGate::Proceed(None))
            }
        },
    }
}

async fn cancel(
    cluster: &mut AerospikeCluster,
    ctx: &Context,
    phase: UpgradePhase,
    message: String,
) -> Result<()> {
    apply_transition(
        cluster,
        ctx,
        phase,
        UpgradeEvent::UpgradeCancelled,
        &UpgradeTransitionContext::default(),
        message,
    )
    .await?;
    Ok(())
}

async fn start_backups(
    cluster: &mut AerospikeCluster,
    ctx: &Context,
    upgrade: &VersionUpgrade,
) -> Result<()> {
    let tctx = UpgradeTransitionContext {
        upgrade_requested: true,
        backup_configured: cluster.spec.backup_spec.is_some(),
        backups_total: cluster.spec.namespaces.len(),
        ..Default::default()
    };

    for ns in &cluster.spec.namespaces {
        let backup = generate_upgrade_backup(cluster, &ns.name, upgrade);
        debug!(backup = %backup.name_any(), "Creating pre-upgrade backup");
        ctx.api.create_backup(&backup).await?;
    }

    let namespaces: Vec<&str> = cluster
        .spec
        .namespaces
        .iter()
        .map(|ns| ns.name.as_str())
        .collect();
    let message = format!(
        "Backing up namespaces {} before upgrade {upgrade}",
        namespaces.join(", ")
    );
    apply_transition(
        cluster,
        ctx,
        UpgradePhase::None,
        UpgradeEvent::UpgradeRequested,
        &tctx,
        message,
    )
    .await?;
    Ok(())
}

async fn check_backups(
    cluster: &mut AerospikeCluster,
    ctx: &Context,
    upgrade: Option<VersionUpgrade>,
) -> Result<UpgradeGate> {
    let Some(upgrade) = upgrade else {
        let message = format!(
            "Version reverted to {} before any node was upgraded",
            cluster.spec.version
        );
        cancel(cluster, ctx, UpgradePhase::Backup, message).await?;
        return Ok(UpgradeGate::Proceed(None));
    };

    let ns = cluster
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let cluster_name = cluster.name_any();

    let mut tctx = UpgradeTransitionContext {
        upgrade_requested: true,
        backup_configured: cluster.spec.backup_spec.is_some(),
        backups_total: cluster.spec.namespaces.len(),
        ..Default::default()
    };
    let mut failed = Vec::new();

    for namespace in &cluster.spec.namespaces {
        let name = upgrade_backup_name(&cluster_name, &namespace.name, &upgrade);
        let Some(backup) = ctx.api.get_backup(&ns, &name).await? else {
            // Lost between passes; ask again
            warn!(backup = %name, "Pre-upgrade backup missing, recreating");
            let backup = generate_upgrade_backup(cluster, &namespace.name, &upgrade);
            ctx.api.create_backup(&backup).await?;
            continue;
        };
        let operation = NamespaceOperation::from(backup);
        if operation.is_failed() {
            tctx.backups_failed += 1;
            failed.push(operation.target().namespace.clone());
        } else if operation.is_finished() {
            tctx.backups_finished += 1;
        }
    }

    match determine_upgrade_event(&UpgradePhase::Backup, &tctx) {
        Some(event @ UpgradeEvent::BackupsFailed) => {
            apply_transition(
                cluster,
                ctx,
                UpgradePhase::Backup,
                event,
                &tctx,
                format!(
                    "Backup of namespaces {} failed, upgrade {upgrade} aborted",
                    failed.join(", ")
                ),
            )
            .await?;
            Ok(UpgradeGate::Halted)
        }
        Some(event @ UpgradeEvent::BackupsFinished) => {
            apply_transition(
                cluster,
                ctx,
                UpgradePhase::Backup,
                event,
                &tctx,
                format!("All namespaces backed up, starting upgrade {upgrade}"),
            )
            .await?;
            Ok(UpgradeGate::Proceed(Some(upgrade)))
        }
        _ => {
            info!(
                finished = tctx.backups_finished,
                total = tctx.backups_total,
                "Waiting for pre-upgrade backups"
            );
            Ok(UpgradeGate::Wait)
        }
    }
}

/// After the pods converged, record a failed rollout or a completed one.
pub async fn finish_upgrade(
    cluster: &mut AerospikeCluster,
    ctx: &Context,
    phase: UpgradePhase,
    outcome: &ConvergeOutcome,
) -> Result<UpgradeProgress> {
    if phase != UpgradePhase::Started {
        return Ok(UpgradeProgress::Idle);
    }
    let target: Version = cluster.spec.version.parse()?;

    let mut tctx = UpgradeTransitionContext {
        upgrade_requested: cluster.upgrade_requested(),
        backup_configured: cluster.spec.backup_spec.is_some(),
        pods_total: outcome.pods.len(),
        ..Default::default()
    };

    if let Some(mismatch) = &outcome.version_mismatch {
        tctx.version_mismatch = Some((mismatch.pod.clone(), mismatch.reported.clone()));
    } else {
        // Every pod left after convergence was created for the target, so a
        // node reporting another build was restarted onto the wrong image
        for pod in &outcome.pods {
            let name = pod.name_any();
            let ip = pod_ip(pod)
                .ok_or_else(|| Error::TransientError(format!("pod {name} has no IP yet")))?;
            let build = ctx.info.build(ip).await?;
            if build.parse::<Version>().is_ok_and(|v| v == target) {
                tctx.pods_on_target += 1;
            } else {
                warn!(pod = %name, %build, "Restarted node reports unexpected version");
                tctx.version_mismatch = Some((name, build));
                break;
            }
        }
    }

    match determine_upgrade_event(&UpgradePhase::Started, &tctx) {
        Some(event @ UpgradeEvent::VersionMismatch) => {
            let (pod, reported) = tctx.version_mismatch.clone().unwrap_or_default();
            apply_transition(
                cluster,
                ctx,
                UpgradePhase::Started,
                event,
                &tctx,
                format!("Node {pod} reports version {reported}, expected {target}"),
            )
            .await?;
            Ok(UpgradeProgress::Failed)
        }
        Some(event @ UpgradeEvent::AllPodsUpgraded) => {
            apply_transition(
                cluster,
                ctx,
                UpgradePhase::Started,
                event,
                &tctx,
                format!("All {} nodes run version {target}", tctx.pods_total),
            )
            .await?;
            Ok(UpgradeProgress::Finished)
        }
        _ => Ok(UpgradeProgress::InProgress),
    }
}
