pub mod aerospike;
pub mod config;
pub mod controller;
pub mod crd;
pub mod dispatcher;
pub mod health;
pub mod resources;

pub use config::{LogFormat, OperatorConfig};
pub use controller::{
    BackoffConfig, ClusterApi, Context, Error, KubeClusterApi, LifecycleSettings, Result,
    error_policy, reconcile,
};
pub use crd::{AerospikeCluster, AerospikeNamespaceBackup, AerospikeNamespaceRestore};
pub use dispatcher::{Action, Dispatcher, Handler, ObjectKey, WorkQueue};
pub use health::{HealthState, Metrics};

use std::fmt::Debug;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::runtime::watcher::{self, Event};
use kube::runtime::{WatchStreamExt, metadata_watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use aerospike::AerospikeInfoClient;
use dispatcher::{ChangeFilter, owner_key};

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Reconciles the AerospikeCluster named by each dequeued key
pub struct ClusterHandler {
    ctx: Arc<Context>,
}

impl ClusterHandler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Handler for ClusterHandler {
    type Key = ObjectKey;
    type Error = Error;

    async fn handle(&self, key: &ObjectKey) -> Result<Action> {
        reconcile(key, &self.ctx).await
    }

    fn retry_delay(&self, key: &ObjectKey, error: &Error, attempt: u32) -> Option<Duration> {
        Some(error_policy(key, error, attempt, &self.ctx))
    }
}

/// Run the operator controller (cluster-wide) until `shutdown` resolves.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controller(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    settings: LifecycleSettings,
    workers: usize,
    shutdown: impl Future<Output = ()>,
) {
    run_controller_scoped(client, health_state, None, settings, workers, shutdown).await
}

/// Run the operator controller with optional namespace scoping.
///
/// When `namespace` is `Some(ns)`, only watches resources in that namespace.
/// When `namespace` is `None`, watches resources cluster-wide.
///
/// Once `shutdown` resolves the queue stops admitting keys and the call
/// returns when every in-flight reconciliation has finished.
pub async fn run_controller_scoped(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    namespace: Option<&str>,
    settings: LifecycleSettings,
    workers: usize,
    shutdown: impl Future<Output = ()>,
) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    info!(
        workers,
        "Starting controller for AerospikeCluster resources (scope: {})", scope_msg
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(
        Arc::new(KubeClusterApi::new(client.clone())),
        Arc::new(AerospikeInfoClient::default()),
        settings,
        health_state,
    ));
    let queue = Arc::new(WorkQueue::new(ctx.backoff.clone()));
    let dispatcher = Dispatcher::new(
        Arc::clone(&queue),
        Arc::new(ClusterHandler::new(ctx)),
        workers,
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    let clusters: Api<AerospikeCluster> = scoped_api(client.clone(), namespace);
    let pods: Api<Pod> = scoped_api(client.clone(), namespace);
    let pvcs: Api<PersistentVolumeClaim> = scoped_api(client.clone(), namespace);
    let backups: Api<AerospikeNamespaceBackup> = scoped_api(client, namespace);

    let watches = async {
        tokio::join!(
            watch_clusters(clusters, Arc::clone(&queue)),
            watch_owned(pods, Arc::clone(&queue)),
            watch_owned(pvcs, Arc::clone(&queue)),
            watch_owned(backups, Arc::clone(&queue)),
        );
    };

    tokio::select! {
        _ = watches => error!("Watch streams ended unexpectedly"),
        _ = shutdown => info!("Stopping controller"),
    }

    queue.shut_down();
    if let Err(e) = dispatcher_handle.await {
        error!("Dispatcher task panicked: {}", e);
    }
    info!("Controller stopped");
}

fn watcher_config() -> watcher::Config {
    // Use any_semantic() for more reliable resource discovery in test environments
    watcher::Config::default().any_semantic()
}

/// Enqueue clusters whose spec, upgrade annotation or deletion state changed
async fn watch_clusters(api: Api<AerospikeCluster>, queue: Arc<WorkQueue<ObjectKey>>) {
    let mut filter = ChangeFilter::default();
    let mut stream = pin!(watcher::watcher(api, watcher_config()).default_backoff());

    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Apply(cluster) | Event::InitApply(cluster)) => {
                if let Some(key) = filter.observe(&cluster) {
                    debug!(key = %key, "Cluster changed");
                    queue.add(key);
                }
            }
            Ok(Event::Delete(cluster)) => filter.forget(&cluster),
            Ok(Event::Init | Event::InitDone) => {}
            Err(e) => warn!("AerospikeCluster watch error: {}", e),
        }
    }
}

/// Enqueue the controlling cluster of every touched child object
async fn watch_owned<K>(api: Api<K>, queue: Arc<WorkQueue<ObjectKey>>)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let mut stream = pin!(
        metadata_watcher(api, watcher_config())
            .default_backoff()
            .touched_objects()
    );

    while let Some(result) = stream.next().await {
        match result {
            Ok(object) => {
                if let Some(key) = owner_key(&object.metadata) {
                    debug!(key = %key, %kind, "Owned object changed");
                    queue.add(key);
                }
            }
            Err(e) => warn!(%kind, "Watch error: {}", e),
        }
    }
}
