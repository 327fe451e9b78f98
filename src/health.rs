//! Health server for Kubernetes probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe
//! - `/readyz` - Readiness probe
//! - `/metrics` - Prometheus metrics

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use crate::crd::UpgradePhase;

/// Default bind address of the health server
pub const HEALTH_ADDR: &str = "0.0.0.0:8080";

/// Labels identifying a cluster
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ClusterLabels {
    pub namespace: String,
    pub name: String,
}

impl ClusterLabels {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl EncodeLabelSet for ClusterLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for pod operation counters
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PodOperationLabels {
    pub namespace: String,
    pub name: String,
    pub operation: &'static str,
}

impl EncodeLabelSet for PodOperationLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        ("operation", self.operation).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for the upgrade phase gauge
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PhaseLabels {
    pub namespace: String,
    pub name: String,
    pub phase: &'static str,
}

impl EncodeLabelSet for PhaseLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        ("phase", self.phase).encode(encoder.encode_label())?;
        Ok(())
    }
}

const PHASES: [UpgradePhase; 4] = [
    UpgradePhase::None,
    UpgradePhase::Backup,
    UpgradePhase::Started,
    UpgradePhase::Failed,
];

fn phase_label(phase: UpgradePhase) -> &'static str {
    phase.annotation_value().unwrap_or("none")
}

/// Shared metrics state
pub struct Metrics {
    pub reconciliations_total: Family<ClusterLabels, Counter>,
    pub reconciliation_errors_total: Family<ClusterLabels, Counter>,
    pub reconcile_duration_seconds: Family<ClusterLabels, Histogram>,
    /// Pods created, deleted and restarted
    pub pod_operations_total: Family<PodOperationLabels, Counter>,
    pub cluster_nodes_desired: Family<ClusterLabels, Gauge>,
    pub cluster_nodes_ready: Family<ClusterLabels, Gauge>,
    /// 1 for the phase a cluster is in, 0 for the others
    pub cluster_upgrade_phase: Family<PhaseLabels, Gauge>,

    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "aerospike_operator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "aerospike_operator_reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        // Passes include pod readiness waits, so buckets reach into minutes
        let reconcile_duration_seconds =
            Family::<ClusterLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.01, 2.0, 16))
            });
        registry.register(
            "aerospike_operator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let pod_operations_total = Family::<PodOperationLabels, Counter>::default();
        registry.register(
            "aerospike_operator_pod_operations",
            "Pods created, deleted and restarted by the operator",
            pod_operations_total.clone(),
        );

        let cluster_nodes_desired = Family::<ClusterLabels, Gauge>::default();
        registry.register(
            "aerospike_operator_cluster_nodes_desired",
            "Desired number of Aerospike nodes for each cluster",
            cluster_nodes_desired.clone(),
        );

        let cluster_nodes_ready = Family::<ClusterLabels, Gauge>::default();
        registry.register(
            "aerospike_operator_cluster_nodes_ready",
            "Number of ready Aerospike nodes for each cluster",
            cluster_nodes_ready.clone(),
        );

        let cluster_upgrade_phase = Family::<PhaseLabels, Gauge>::default();
        registry.register(
            "aerospike_operator_cluster_upgrade_phase",
            "Current upgrade phase of each cluster",
            cluster_upgrade_phase.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            pod_operations_total,
            cluster_nodes_desired,
            cluster_nodes_ready,
            cluster_upgrade_phase,
            registry,
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ClusterLabels::new(namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        let labels = ClusterLabels::new(namespace, name);
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
    }

    pub fn record_pod_operations(
        &self,
        namespace: &str,
        name: &str,
        created: u64,
        deleted: u64,
        restarted: u64,
    ) {
        for (operation, count) in [
            ("created", created),
            ("deleted", deleted),
            ("restarted", restarted),
        ] {
            if count == 0 {
                continue;
            }
            self.pod_operations_total
                .get_or_create(&PodOperationLabels {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    operation,
                })
                .inc_by(count);
        }
    }

    pub fn set_cluster_nodes(&self, namespace: &str, name: &str, desired: i64, ready: i64) {
        let labels = ClusterLabels::new(namespace, name);
        self.cluster_nodes_desired
            .get_or_create(&labels)
            .set(desired);
        self.cluster_nodes_ready.get_or_create(&labels).set(ready);
    }

    pub fn set_upgrade_phase(&self, namespace: &str, name: &str, current: UpgradePhase) {
        for phase in PHASES {
            self.cluster_upgrade_phase
                .get_or_create(&PhaseLabels {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    phase: phase_label(phase),
                })
                .set(i64::from(phase == current));
        }
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails.
    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready to process work
    pub ready: RwLock<bool>,
    pub metrics: Metrics,
    /// Unix timestamp of the last successful reconcile
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    pub fn touch_reconcile(&self) {
        let now = chrono::Utc::now().timestamp();
        self.last_reconcile
            .store(u64::try_from(now).unwrap_or_default(), Ordering::Relaxed);
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Returns 503 until the controller has started, and again once shutdown begins
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server on `addr`
pub async fn run_health_server(
    state: Arc<HealthState>,
    addr: SocketAddr,
) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Health server listening on {}", addr);

    axum::serve(listener, app).await
}
