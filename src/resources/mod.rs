pub mod backup;
pub mod common;
pub mod configmap;
pub mod network_policy;
pub mod pod;
pub mod pvc;
pub mod service;
