// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for the reconciler, pod lifecycle and dispatcher
//!
//! Every scenario runs against the in-memory fakes in `tests/common`, on
//! paused tokio time so that polling and progress waits finish instantly.

#[path = "../common/mod.rs"]
mod common;
