use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition types recorded on clusters and on namespace backup/restore resources
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash)]
pub enum ConditionType {
    AutoBackupStarted,
    AutoBackupFinished,
    AutoBackupFailed,
    UpgradeStarted,
    UpgradeFinished,
    UpgradeFailed,
    BackupStarted,
    BackupFinished,
    BackupFailed,
    RestoreStarted,
    RestoreFinished,
    RestoreFailed,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConditionType::AutoBackupStarted => "AutoBackupStarted",
            ConditionType::AutoBackupFinished => "AutoBackupFinished",
            ConditionType::AutoBackupFailed => "AutoBackupFailed",
            ConditionType::UpgradeStarted => "UpgradeStarted",
            ConditionType::UpgradeFinished => "UpgradeFinished",
            ConditionType::UpgradeFailed => "UpgradeFailed",
            ConditionType::BackupStarted => "BackupStarted",
            ConditionType::BackupFinished => "BackupFinished",
            ConditionType::BackupFailed => "BackupFailed",
            ConditionType::RestoreStarted => "RestoreStarted",
            ConditionType::RestoreFinished => "RestoreFinished",
            ConditionType::RestoreFailed => "RestoreFailed",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// Append-only status record
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,

    pub status: ConditionStatus,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,

    /// RFC 3339 timestamp of when the condition was appended
    pub last_transition_time: String,
}

/// True when the history contains `type_` with status True
pub fn is_condition_true(conditions: &[Condition], type_: ConditionType) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == type_ && c.status == ConditionStatus::True)
}
