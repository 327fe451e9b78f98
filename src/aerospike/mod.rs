//! Aerospike server domain: configuration rendering, the info protocol,
//! versions and TTL literals.

pub mod config;
pub mod duration;
pub mod info;
pub mod version;

/// Client and info traffic
pub const SERVICE_PORT: u16 = 3000;
/// Intra-cluster data fabric
pub const FABRIC_PORT: u16 = 3001;
/// Mesh heartbeat
pub const HEARTBEAT_PORT: u16 = 3002;
/// Dedicated info listener
pub const INFO_PORT: u16 = 3003;
/// Prometheus exporter sidecar
pub const EXPORTER_PORT: u16 = 9145;

/// Directory holding one sub-directory per file-backed namespace
pub const DATA_DIR: &str = "/opt/aerospike/data";
/// Directory holding one block device per device-backed namespace
pub const DEVICE_DIR: &str = "/dev/aerospike";
/// Directory the configuration file is mounted into
pub const CONFIG_DIR: &str = "/etc/aerospike";
pub const CONFIG_FILE_NAME: &str = "aerospike.conf";

pub use config::{RenderedConfig, render_config};
pub use duration::{DurationError, parse_duration};
pub use info::{AerospikeInfoClient, InfoClient, InfoError};
pub use version::{UpgradeKind, UpgradeStrategy, Version, VersionError, VersionUpgrade};
