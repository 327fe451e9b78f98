//! Finite state machine for AerospikeCluster version upgrades
//!
//! The current phase lives in the upgrade annotation; conditions appended on
//! each transition are the durable history.
//!
//! ## Phase Flow
//!
//! ```text
//! None --UpgradeRequested--> Backup --BackupsFinished--> Started --AllPodsUpgraded--> None
//!                              |                           |
//!                        BackupsFailed               VersionMismatch
//!                              v                           v
//!                            Failed <----------------------+
//! ```
//!
//! `UpgradeCancelled` returns `Backup` or `Started` to `None` when the spec
//! goes back to the applied version. From `Started` this is only reached
//! while no node runs a newer version than the spec; validation rejects the
//! spec otherwise.
//!
//! `Failed` has no outgoing transitions; it is cleared by removing the
//! annotation by hand.

use std::fmt;

use crate::crd::{ConditionType, UpgradePhase};

/// Events that trigger state transitions in the upgrade lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpgradeEvent {
    /// Spec version differs from the applied version
    UpgradeRequested,
    /// Every namespace backup reports finished
    BackupsFinished,
    /// At least one namespace backup reports failed
    BackupsFailed,
    /// Spec version was reverted before any node moved to the target
    UpgradeCancelled,
    /// A restarted node reports a version other than the target
    VersionMismatch,
    /// Every node reports the target version
    AllPodsUpgraded,
}

impl fmt::Display for UpgradeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeEvent::UpgradeRequested => write!(f, "UpgradeRequested"),
            UpgradeEvent::BackupsFinished => write!(f, "BackupsFinished"),
            UpgradeEvent::BackupsFailed => write!(f, "BackupsFailed"),
            UpgradeEvent::UpgradeCancelled => write!(f, "UpgradeCancelled"),
            UpgradeEvent::VersionMismatch => write!(f, "VersionMismatch"),
            UpgradeEvent::AllPodsUpgraded => write!(f, "AllPodsUpgraded"),
        }
    }
}

impl UpgradeEvent {
    /// Conditions appended to the cluster status when this event fires
    pub fn conditions(&self) -> &'static [ConditionType] {
        match self {
            UpgradeEvent::UpgradeRequested => &[ConditionType::AutoBackupStarted],
            UpgradeEvent::BackupsFinished => &[
                ConditionType::AutoBackupFinished,
                ConditionType::UpgradeStarted,
            ],
            UpgradeEvent::BackupsFailed => {
                &[ConditionType::AutoBackupFailed, ConditionType::UpgradeFailed]
            }
            UpgradeEvent::UpgradeCancelled => &[],
            UpgradeEvent::VersionMismatch => &[ConditionType::UpgradeFailed],
            UpgradeEvent::AllPodsUpgraded => &[ConditionType::UpgradeFinished],
        }
    }
}

/// Observations available when deciding the next upgrade event
#[derive(Debug, Clone, Default)]
pub struct UpgradeTransitionContext {
    /// Spec version differs from the version recorded in status
    pub upgrade_requested: bool,
    /// Cluster declares where backups are written
    pub backup_configured: bool,
    /// Number of namespaces that need a backup
    pub backups_total: usize,
    /// Backups reporting finished
    pub backups_finished: usize,
    /// Backups reporting failed
    pub backups_failed: usize,
    /// Number of nodes expected to run the target version
    pub pods_total: usize,
    /// Nodes reporting the target version
    pub pods_on_target: usize,
    /// Node and version reported, when a restarted node runs the wrong version
    pub version_mismatch: Option<(String, String)>,
}

impl UpgradeTransitionContext {
    pub fn all_backups_finished(&self) -> bool {
        self.backups_total > 0 && self.backups_finished == self.backups_total
    }

    pub fn all_pods_upgraded(&self) -> bool {
        self.pods_total > 0 && self.pods_on_target == self.pods_total
    }
}

/// A state transition definition for upgrade phases
#[derive(Debug)]
pub struct UpgradeTransition {
    pub from: UpgradePhase,
    pub to: UpgradePhase,
    pub event: UpgradeEvent,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl UpgradeTransition {
    const fn new(
        from: UpgradePhase,
        to: UpgradePhase,
        event: UpgradeEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting an upgrade state transition
#[derive(Debug, PartialEq, Eq)]
pub enum UpgradeTransitionResult {
    Success {
        from: UpgradePhase,
        to: UpgradePhase,
        event: UpgradeEvent,
        description: &'static str,
    },
    /// Transition was not valid for current phase
    InvalidTransition {
        current: UpgradePhase,
        event: UpgradeEvent,
    },
    /// Guard condition prevented the transition
    GuardFailed {
        from: UpgradePhase,
        to: UpgradePhase,
        event: UpgradeEvent,
        reason: String,
    },
}

/// Formal state machine for the upgrade lifecycle
pub struct UpgradeStateMachine {
    transitions: Vec<UpgradeTransition>,
}

impl Default for UpgradeStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl UpgradeStateMachine {
    pub fn new() -> Self {
        Self {
            transitions: vec![
                UpgradeTransition::new(
                    UpgradePhase::None,
                    UpgradePhase::Backup,
                    UpgradeEvent::UpgradeRequested,
                    "Version change requested, backing up namespaces",
                ),
                UpgradeTransition::new(
                    UpgradePhase::Backup,
                    UpgradePhase::Started,
                    UpgradeEvent::BackupsFinished,
                    "Backups finished, rolling out new version",
                ),
                UpgradeTransition::new(
                    UpgradePhase::Backup,
                    UpgradePhase::Failed,
                    UpgradeEvent::BackupsFailed,
                    "Backup failed, upgrade aborted",
                ),
                UpgradeTransition::new(
                    UpgradePhase::Backup,
                    UpgradePhase::None,
                    UpgradeEvent::UpgradeCancelled,
                    "Version change reverted before rollout",
                ),
                UpgradeTransition::new(
                    UpgradePhase::Started,
                    UpgradePhase::None,
                    UpgradeEvent::UpgradeCancelled,
                    "Version change reverted before any node was restarted",
                ),
                UpgradeTransition::new(
                    UpgradePhase::Started,
                    UpgradePhase::Failed,
                    UpgradeEvent::VersionMismatch,
                    "Node failed to report the target version",
                ),
                UpgradeTransition::new(
                    UpgradePhase::Started,
                    UpgradePhase::None,
                    UpgradeEvent::AllPodsUpgraded,
                    "All nodes run the target version",
                ),
            ],
        }
    }

    /// Attempt a transition from `current` on `event`
    pub fn transition(
        &self,
        current: &UpgradePhase,
        event: UpgradeEvent,
        ctx: &UpgradeTransitionContext,
    ) -> UpgradeTransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event);

        match transition {
            Some(t) => match self.check_guard(t, ctx) {
                Some(reason) => UpgradeTransitionResult::GuardFailed {
                    from: t.from,
                    to: t.to,
                    event,
                    reason,
                },
                None => UpgradeTransitionResult::Success {
                    from: t.from,
                    to: t.to,
                    event,
                    description: t.description,
                },
            },
            None => UpgradeTransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: &UpgradePhase, event: &UpgradeEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Get all valid events for a given phase
    pub fn valid_events(&self, phase: &UpgradePhase) -> Vec<&UpgradeEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == *phase)
            .map(|t| &t.event)
            .collect()
    }

    fn check_guard(
        &self,
        transition: &UpgradeTransition,
        ctx: &UpgradeTransitionContext,
    ) -> Option<String> {
        match transition.event {
            UpgradeEvent::UpgradeRequested if !ctx.backup_configured => {
                Some("Cluster has no backupSpec".to_string())
            }
            UpgradeEvent::BackupsFinished if !ctx.all_backups_finished() => Some(format!(
                "{}/{} backups finished",
                ctx.backups_finished, ctx.backups_total
            )),
            UpgradeEvent::BackupsFailed if ctx.backups_failed == 0 => {
                Some("No backup has failed".to_string())
            }
            UpgradeEvent::UpgradeCancelled if ctx.upgrade_requested => {
                Some("Spec still requests a new version".to_string())
            }
            UpgradeEvent::AllPodsUpgraded if !ctx.all_pods_upgraded() => Some(format!(
                "{}/{} nodes on target version",
                ctx.pods_on_target, ctx.pods_total
            )),
            _ => None,
        }
    }
}

/// Determine the next event for the current phase, if any
pub fn determine_upgrade_event(
    current_phase: &UpgradePhase,
    ctx: &UpgradeTransitionContext,
) -> Option<UpgradeEvent> {
    match current_phase {
        UpgradePhase::None => ctx
            .upgrade_requested
            .then_some(UpgradeEvent::UpgradeRequested),
        UpgradePhase::Backup => {
            if !ctx.upgrade_requested {
                Some(UpgradeEvent::UpgradeCancelled)
            } else if ctx.backups_failed > 0 {
                // A failure wins over partial completion
                Some(UpgradeEvent::BackupsFailed)
            } else if ctx.all_backups_finished() {
                Some(UpgradeEvent::BackupsFinished)
            } else {
                None
            }
        }
        UpgradePhase::Started => {
            if !ctx.upgrade_requested {
                Some(UpgradeEvent::UpgradeCancelled)
            } else if ctx.version_mismatch.is_some() {
                Some(UpgradeEvent::VersionMismatch)
            } else if ctx.all_pods_upgraded() {
                Some(UpgradeEvent::AllPodsUpgraded)
            } else {
                None
            }
        }
        UpgradePhase::Failed => None,
    }
}
