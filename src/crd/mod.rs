mod aerospike_cluster;
mod conditions;
mod namespace_operation;
mod upgrade_phase;

pub use aerospike_cluster::*;
pub use conditions::*;
pub use namespace_operation::*;
pub use upgrade_phase::*;
