use std::sync::Arc;
use std::time::Duration;

use crate::aerospike::InfoClient;
use crate::controller::cluster_api::{ClusterApi, ClusterEvent};
use crate::controller::error::BackoffConfig;
use crate::crd::AerospikeCluster;
use crate::health::HealthState;

/// Knobs of the pod lifecycle manager
#[derive(Clone, Debug)]
pub struct LifecycleSettings {
    /// Skip pod anti-affinity so every node can land on one host
    pub single_node: bool,
    pub pod_ready_timeout: Duration,
    pub pod_deletion_timeout: Duration,
    /// Upper bound on waiting for migrations to drain before a delete
    pub migrations_timeout: Duration,
    /// Delay between migration status queries
    pub poll_interval: Duration,
    /// Delay between progress events while waiting
    pub progress_interval: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            single_node: false,
            pod_ready_timeout: Duration::from_secs(300),
            pod_deletion_timeout: Duration::from_secs(300),
            migrations_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
            progress_interval: Duration::from_secs(30),
        }
    }
}

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    pub api: Arc<dyn ClusterApi>,
    /// Client for the Aerospike info protocol
    pub info: Arc<dyn InfoClient>,
    pub settings: LifecycleSettings,
    pub backoff: BackoffConfig,
    /// Health state for recording metrics (optional)
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(
        api: Arc<dyn ClusterApi>,
        info: Arc<dyn InfoClient>,
        settings: LifecycleSettings,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            api,
            info,
            settings,
            backoff: BackoffConfig::default(),
            health_state,
        }
    }

    pub async fn publish_event(&self, cluster: &AerospikeCluster, event: ClusterEvent) {
        self.api.publish_event(cluster, event).await;
    }
}
