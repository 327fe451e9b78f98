//! Seam between the reconciler and the Kubernetes API.
//!
//! Everything the reconciler does to the outside world goes through
//! [`ClusterApi`], which keeps the convergence logic testable against an
//! in-memory implementation. [`KubeClusterApi`] is the production
//! implementation backed by a `kube::Client`.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::runtime::wait::{Condition, await_condition};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::controller::error::{Error, Result};
use crate::crd::{
    AerospikeCluster, AerospikeClusterStatus, AerospikeNamespaceBackup,
    UPGRADE_STATUS_ANNOTATION, UpgradePhase,
};
use crate::resources::common::{FIELD_MANAGER, cluster_selector};
use crate::resources::pod::is_pod_ready;

/// Delay before re-establishing a watch that ended early
const REWATCH_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// A Kubernetes event to record against a cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterEvent {
    pub severity: EventSeverity,
    pub reason: String,
    pub action: String,
    pub note: String,
}

impl ClusterEvent {
    pub fn normal(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Normal,
            reason: reason.to_string(),
            action: action.to_string(),
            note: note.into(),
        }
    }

    pub fn warning(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Warning,
            reason: reason.to_string(),
            action: action.to_string(),
            note: note.into(),
        }
    }
}

/// Event reasons
pub mod reasons {
    pub const VALIDATION_ERROR: &str = "ValidationError";
    pub const UNKNOWN_UPGRADE_PHASE: &str = "UnknownUpgradePhase";
    pub const UPGRADE_FAILED: &str = "UpgradeFailed";
    pub const UPGRADE_CANCELLED: &str = "UpgradeCancelled";
    pub const UPGRADE_STARTED: &str = "UpgradeStarted";
    pub const UPGRADE_FINISHED: &str = "UpgradeFinished";
    pub const BACKUP_STARTED: &str = "AutoBackupStarted";
    pub const BACKUP_FINISHED: &str = "AutoBackupFinished";
    pub const BACKUP_FAILED: &str = "AutoBackupFailed";
    pub const WAITING_FOR_POD: &str = "WaitingForPod";
    pub const WAITING_FOR_MIGRATIONS: &str = "WaitingForMigrations";
    pub const POD_CREATED: &str = "PodCreated";
    pub const POD_DELETED: &str = "PodDeleted";
    pub const POD_RESTARTED: &str = "PodRestarted";
    pub const VOLUME_RECREATED: &str = "VolumeRecreated";
    pub const CLUSTER_SIZE_MISMATCH: &str = "ClusterSizeMismatch";
}

/// Event actions
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const VALIDATE: &str = "Validate";
    pub const UPGRADE: &str = "Upgrade";
    pub const CREATE_POD: &str = "CreatePod";
    pub const DELETE_POD: &str = "DeletePod";
    pub const RESTART_POD: &str = "RestartPod";
    pub const RECREATE_VOLUME: &str = "RecreateVolume";
}

/// Operations the reconciler performs against the cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Pods labelled as belonging to the cluster
    async fn list_pods(&self, namespace: &str, cluster_name: &str) -> Result<Vec<Pod>>;

    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;

    /// Delete a pod; a pod that is already gone is not an error
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// Block until the pod is running and ready
    async fn wait_pod_ready(&self, namespace: &str, name: &str, timeout: Duration) -> Result<Pod>;

    /// Block until the pod (with `uid`, when known) no longer exists
    async fn wait_pod_deleted(
        &self,
        namespace: &str,
        name: &str,
        uid: Option<&str>,
        timeout: Duration,
    ) -> Result<()>;

    /// Volume claims labelled as belonging to the cluster
    async fn list_pvcs(&self, namespace: &str, cluster_name: &str)
    -> Result<Vec<PersistentVolumeClaim>>;

    /// Create the claim, or fetch it if it already exists
    async fn get_or_create_pvc(&self, pvc: &PersistentVolumeClaim)
    -> Result<PersistentVolumeClaim>;

    /// Delete a claim and block until it is gone
    async fn delete_pvc(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()>;

    async fn storage_class_exists(&self, name: &str) -> Result<bool>;

    async fn apply_service(&self, service: &Service) -> Result<()>;

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    async fn apply_network_policy(&self, policy: &NetworkPolicy) -> Result<()>;

    /// Create a backup request; one that already exists is left untouched
    async fn create_backup(&self, backup: &AerospikeNamespaceBackup) -> Result<()>;

    async fn get_backup(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AerospikeNamespaceBackup>>;

    /// Read the cluster from the API server, bypassing any cache
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<AerospikeCluster>>;

    /// Replace the status, guarded by the cluster's resourceVersion. Returns
    /// the updated cluster.
    async fn patch_cluster_status(
        &self,
        cluster: &AerospikeCluster,
        status: &AerospikeClusterStatus,
    ) -> Result<AerospikeCluster>;

    /// Set or remove the upgrade annotation. Returns the updated cluster.
    async fn set_upgrade_phase(
        &self,
        cluster: &AerospikeCluster,
        phase: UpgradePhase,
    ) -> Result<AerospikeCluster>;

    /// Record an event; failures are logged, not returned
    async fn publish_event(&self, cluster: &AerospikeCluster, event: ClusterEvent);
}

/// [`ClusterApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
    reporter: Reporter,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }

    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    async fn apply<K>(&self, resource: &K) -> Result<()>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + std::fmt::Debug
            + Serialize
            + DeserializeOwned,
        <K as Resource>::DynamicType: Default,
    {
        let ns = resource
            .meta()
            .namespace
            .as_deref()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let name = resource
            .meta()
            .name
            .as_deref()
            .ok_or(Error::MissingObjectKey(".metadata.name"))?;
        let api: Api<K> = Api::namespaced(self.client.clone(), ns);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(resource),
        )
        .await?;
        Ok(())
    }
}

/// Wait for `condition` on a named object, re-establishing the watch with the
/// remaining budget if it ends before the deadline
async fn wait_for<K>(
    api: Api<K>,
    name: &str,
    condition: impl Condition<K> + Clone,
    operation: String,
    timeout: Duration,
) -> Result<Option<K>>
where
    K: Resource + Clone + std::fmt::Debug + DeserializeOwned + Send + 'static,
{
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::timeout(operation, timeout));
        }
        match tokio::time::timeout(
            remaining,
            await_condition(api.clone(), name, condition.clone()),
        )
        .await
        {
            Ok(Ok(obj)) => return Ok(obj),
            Ok(Err(e)) => {
                debug!(name = %name, error = %e, "Watch ended early, re-establishing");
                tokio::time::sleep(REWATCH_DELAY.min(remaining)).await;
            }
            Err(_) => return Err(Error::timeout(operation, timeout)),
        }
    }
}

/// Object is gone, or has been replaced by one with a different uid
fn deleted<K: Resource>(uid: Option<&str>) -> impl Fn(Option<&K>) -> bool + Clone + use<K> {
    let uid = uid.map(str::to_string);
    move |obj: Option<&K>| match (obj, &uid) {
        (None, _) => true,
        (Some(obj), Some(uid)) => obj.meta().uid.as_deref() != Some(uid.as_str()),
        (Some(_), None) => false,
    }
}

fn ignore_not_found(result: std::result::Result<(), kube::Error>) -> Result<()> {
    match result {
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        other => other.map_err(Error::from),
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_pods(&self, namespace: &str, cluster_name: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(&cluster_selector(cluster_name)))
            .await?;
        Ok(pods.items)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let ns = pod
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &ns);
        Ok(api.create(&PostParams::default(), pod).await?)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await.map(|_| ()))
    }

    async fn wait_pod_ready(&self, namespace: &str, name: &str, timeout: Duration) -> Result<Pod> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let ready = |pod: Option<&Pod>| pod.is_some_and(is_pod_ready);
        wait_for(api, name, ready, format!("pod {name} to become ready"), timeout)
            .await?
            .ok_or_else(|| Error::TransientError(format!("pod {name} disappeared")))
    }

    async fn wait_pod_deleted(
        &self,
        namespace: &str,
        name: &str,
        uid: Option<&str>,
        timeout: Duration,
    ) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let operation = format!("pod {name} to be deleted");
        wait_for(api, name, deleted::<Pod>(uid), operation, timeout).await?;
        Ok(())
    }

    async fn list_pvcs(
        &self,
        namespace: &str,
        cluster_name: &str,
    ) -> Result<Vec<PersistentVolumeClaim>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let pvcs = api
            .list(&ListParams::default().labels(&cluster_selector(cluster_name)))
            .await?;
        Ok(pvcs.items)
    }

    async fn get_or_create_pvc(
        &self,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let ns = pvc
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &ns);
        match api.create(&PostParams::default(), pvc).await {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(api.get(&pvc.name_any()).await?),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_pvc(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let Some(existing) = api.get_opt(name).await? else {
            return Ok(());
        };
        ignore_not_found(api.delete(name, &DeleteParams::default()).await.map(|_| ()))?;
        let operation = format!("volume claim {name} to be deleted");
        let uid = existing.uid();
        wait_for(
            api,
            name,
            deleted::<PersistentVolumeClaim>(uid.as_deref()),
            operation,
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn storage_class_exists(&self, name: &str) -> Result<bool> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn apply_service(&self, service: &Service) -> Result<()> {
        self.apply(service).await
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        self.apply(config_map).await
    }

    async fn apply_network_policy(&self, policy: &NetworkPolicy) -> Result<()> {
        self.apply(policy).await
    }

    async fn create_backup(&self, backup: &AerospikeNamespaceBackup) -> Result<()> {
        let ns = backup
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let api: Api<AerospikeNamespaceBackup> = Api::namespaced(self.client.clone(), &ns);
        match api.create(&PostParams::default(), backup).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_backup(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AerospikeNamespaceBackup>> {
        let api: Api<AerospikeNamespaceBackup> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<AerospikeCluster>> {
        let api: Api<AerospikeCluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_cluster_status(
        &self,
        cluster: &AerospikeCluster,
        status: &AerospikeClusterStatus,
    ) -> Result<AerospikeCluster> {
        let ns = cluster
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let api: Api<AerospikeCluster> = Api::namespaced(self.client.clone(), &ns);
        // resourceVersion makes the merge patch fail with 409 on a stale read
        let patch = json!({
            "metadata": { "resourceVersion": cluster.resource_version() },
            "status": status,
        });
        let updated = api
            .patch_status(
                &cluster.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(updated)
    }

    async fn set_upgrade_phase(
        &self,
        cluster: &AerospikeCluster,
        phase: UpgradePhase,
    ) -> Result<AerospikeCluster> {
        let ns = cluster
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let api: Api<AerospikeCluster> = Api::namespaced(self.client.clone(), &ns);
        // A null value removes the annotation
        let patch = json!({
            "metadata": {
                "annotations": { UPGRADE_STATUS_ANNOTATION: phase.annotation_value() }
            }
        });
        let updated = api
            .patch(
                &cluster.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(updated)
    }

    async fn publish_event(&self, cluster: &AerospikeCluster, event: ClusterEvent) {
        let type_ = match event.severity {
            EventSeverity::Normal => EventType::Normal,
            EventSeverity::Warning => EventType::Warning,
        };
        let object_ref = cluster.object_ref(&());
        if let Err(e) = self
            .recorder()
            .publish(
                &Event {
                    type_,
                    reason: event.reason.clone(),
                    note: Some(event.note),
                    action: event.action,
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            warn!(reason = %event.reason, error = %e, "Failed to publish event");
        }
    }
}
