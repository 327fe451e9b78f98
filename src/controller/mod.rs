pub mod cluster_api;
pub mod context;
pub mod error;
pub mod pod_manager;
pub mod reconciler;
pub mod status;
pub mod upgrade_reconciler;
pub mod upgrade_state_machine;
pub mod validation;
pub mod volumes;

pub use cluster_api::{ClusterApi, ClusterEvent, EventSeverity, KubeClusterApi};
pub use context::{Context, LifecycleSettings};
pub use error::{BackoffConfig, Error, Result};
pub use pod_manager::{ConvergeOutcome, PodManager, PodOperations};
pub use reconciler::{error_policy, reconcile};
pub use status::{ConditionBuilder, StatusManager};
pub use upgrade_state_machine::{UpgradeEvent, UpgradeStateMachine};
pub use validation::{MAX_NODES, MIN_NODES, validate_spec, validate_upgrade};
