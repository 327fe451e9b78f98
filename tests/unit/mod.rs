// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for the Aerospike Operator
//!
//! This module contains unit tests for:
//! - Resource generators (Pod, PVC, Service, ConfigMap, NetworkPolicy, backups)
//! - Configuration rendering and TTL literals
//! - Version parsing and upgrade strategies
//! - Validation logic
//! - Namespace backup and restore resources
//! - Status and condition management
//! - Upgrade state machine transitions

#[path = "../common/mod.rs"]
mod common;

mod resources;
mod validation;
