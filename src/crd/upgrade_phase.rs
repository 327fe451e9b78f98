use std::fmt;

use thiserror::Error;

/// Annotation on the cluster resource pointing at the current upgrade phase
pub const UPGRADE_STATUS_ANNOTATION: &str = "aerospike-operator.io/upgrade-status";

/// Phase of a version upgrade.
///
/// Serialized as the value of [`UPGRADE_STATUS_ANNOTATION`]; `None` is the
/// absence of the annotation. `Failed` is terminal until the annotation is
/// removed by hand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum UpgradePhase {
    #[default]
    None,
    Backup,
    Started,
    Failed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown upgrade phase {0:?}")]
pub struct UnknownUpgradePhase(pub String);

impl UpgradePhase {
    pub fn from_annotation(value: Option<&str>) -> Result<Self, UnknownUpgradePhase> {
        match value {
            None => Ok(UpgradePhase::None),
            Some("backup") => Ok(UpgradePhase::Backup),
            Some("started") => Ok(UpgradePhase::Started),
            Some("failed") => Ok(UpgradePhase::Failed),
            Some(other) => Err(UnknownUpgradePhase(other.to_string())),
        }
    }

    /// Annotation value for this phase, `None` meaning the annotation is removed
    pub fn annotation_value(&self) -> Option<&'static str> {
        match self {
            UpgradePhase::None => None,
            UpgradePhase::Backup => Some("backup"),
            UpgradePhase::Started => Some("started"),
            UpgradePhase::Failed => Some("failed"),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UpgradePhase::Failed)
    }
}

impl fmt::Display for UpgradePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradePhase::None => write!(f, "None"),
            UpgradePhase::Backup => write!(f, "Backup"),
            UpgradePhase::Started => write!(f, "Started"),
            UpgradePhase::Failed => write!(f, "Failed"),
        }
    }
}
