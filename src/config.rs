//! Operator configuration
//!
//! Command-line flags with environment fallbacks, converted into the explicit
//! settings values the controller is built from.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::controller::LifecycleSettings;
use crate::health::HEALTH_ADDR;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "aerospike-operator",
    about = "Kubernetes operator for Aerospike clusters",
    version
)]
pub struct OperatorConfig {
    /// Debug logging, and allow several nodes of a cluster on one host
    #[arg(long, env = "AEROSPIKE_OPERATOR_DEBUG")]
    pub debug: bool,

    /// Path to a kubeconfig file; in-cluster config is used otherwise
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Number of clusters reconciled concurrently
    #[arg(long, env = "AEROSPIKE_OPERATOR_WORKERS", default_value_t = 2,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,

    /// Only watch resources in this namespace
    #[arg(long, env = "AEROSPIKE_OPERATOR_NAMESPACE")]
    pub namespace: Option<String>,

    #[arg(long, default_value_t = 300)]
    pub pod_ready_timeout_secs: u64,

    #[arg(long, default_value_t = 300)]
    pub pod_deletion_timeout_secs: u64,

    /// Upper bound on waiting for a node to finish migrations before deleting it
    #[arg(long, default_value_t = 600)]
    pub migrations_timeout_secs: u64,

    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Address of the health and metrics server
    #[arg(long, default_value = HEALTH_ADDR)]
    pub health_addr: SocketAddr,

    /// Accepted for compatibility; admission is served by a separate deployment
    #[arg(long)]
    pub admission_enabled: bool,

    #[arg(long, default_value = "aerospike-operator")]
    pub admission_service_name: String,
}

impl OperatorConfig {
    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            single_node: self.debug,
            pod_ready_timeout: Duration::from_secs(self.pod_ready_timeout_secs),
            pod_deletion_timeout: Duration::from_secs(self.pod_deletion_timeout_secs),
            migrations_timeout: Duration::from_secs(self.migrations_timeout_secs),
            ..LifecycleSettings::default()
        }
    }

    /// Log directive for this crate
    pub fn log_directive(&self) -> &'static str {
        if self.debug {
            "aerospike_operator=debug"
        } else {
            "aerospike_operator=info"
        }
    }
}
