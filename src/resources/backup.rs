//! Backup requests created before an upgrade touches any node

use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::aerospike::VersionUpgrade;
use crate::crd::{
    AerospikeCluster, AerospikeNamespaceBackup, AerospikeNamespaceBackupSpec, TargetNamespace,
};
use crate::resources::common::{NAMESPACE_LABEL, owner_reference, standard_labels};

/// Deterministic name of the backup taken for `namespace` before `upgrade`,
/// so a retried pass finds the request it created earlier
pub fn upgrade_backup_name(cluster_name: &str, namespace: &str, upgrade: &VersionUpgrade) -> String {
    let dashed = |v: String| v.replace('.', "-");
    format!(
        "{cluster_name}-{namespace}-upgrade-{}-{}",
        dashed(upgrade.source.to_string()),
        dashed(upgrade.target.to_string())
    )
}

/// Generate the backup request for one namespace. Storage and TTL come from
/// the cluster's backupSpec.
pub fn generate_upgrade_backup(
    cluster: &AerospikeCluster,
    namespace: &str,
    upgrade: &VersionUpgrade,
) -> AerospikeNamespaceBackup {
    let cluster_name = cluster.name_any();
    let mut labels = standard_labels(&cluster_name);
    labels.insert(NAMESPACE_LABEL.to_string(), namespace.to_string());

    let backup_spec = cluster.spec.backup_spec.as_ref();
    let mut backup = AerospikeNamespaceBackup::new(
        &upgrade_backup_name(&cluster_name, namespace, upgrade),
        AerospikeNamespaceBackupSpec {
            target: TargetNamespace {
                cluster: cluster_name.clone(),
                namespace: namespace.to_string(),
            },
            storage: backup_spec.map(|b| b.storage.clone()),
            ttl: backup_spec.and_then(|b| b.ttl.clone()),
        },
    );
    backup.metadata = ObjectMeta {
        name: backup.metadata.name.take(),
        namespace: cluster.namespace(),
        labels: Some(labels),
        owner_references: Some(vec![owner_reference(cluster)]),
        ..Default::default()
    };
    backup
}
