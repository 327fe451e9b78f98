//! ConfigMap holding the rendered `aerospike.conf`

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::aerospike::{CONFIG_FILE_NAME, RenderedConfig};
use crate::crd::AerospikeCluster;
use crate::resources::common::{CONFIG_HASH_ANNOTATION, owner_reference, standard_labels};

pub fn config_map_name(cluster_name: &str) -> String {
    format!("{cluster_name}-config")
}

/// Generate the config map; its annotation carries the config fingerprint
pub fn generate_config_map(cluster: &AerospikeCluster, config: &RenderedConfig) -> ConfigMap {
    let cluster_name = cluster.name_any();

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name(&cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(standard_labels(&cluster_name)),
            annotations: Some(BTreeMap::from([(
                CONFIG_HASH_ANNOTATION.to_string(),
                config.fingerprint.clone(),
            )])),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CONFIG_FILE_NAME.to_string(),
            config.text.clone(),
        )])),
        ..Default::default()
    }
}
