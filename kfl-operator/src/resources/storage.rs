//! Shared StorageClass for node-local central server volumes.

use super::{ChildObject, LABEL_MANAGED_BY, MANAGER_NAME};
use crate::config::OperatorConfig;
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

const NO_PROVISIONER: &str = "kubernetes.io/no-provisioner";

/// The StorageClass every FLCluster's hostPath volume binds through.
///
/// Returns `None` unless node-local storage is configured. The class is
/// cluster-scoped and shared, so it carries no owner reference.
pub fn desired(config: &OperatorConfig) -> Option<StorageClass> {
    config.local_storage_root.as_ref()?;

    Some(StorageClass {
        metadata: ObjectMeta {
            name: Some(config.local_storage_class.clone()),
            labels: Some(BTreeMap::from([(
                LABEL_MANAGED_BY.to_string(),
                MANAGER_NAME.to_string(),
            )])),
            ..Default::default()
        },
        provisioner: NO_PROVISIONER.to_string(),
        volume_binding_mode: Some("WaitForFirstConsumer".to_string()),
        reclaim_policy: Some("Retain".to_string()),
        ..Default::default()
    })
}

/// [`desired`] wrapped for the apply loop.
pub fn desired_children(config: &OperatorConfig) -> Vec<ChildObject> {
    desired(config)
        .map(ChildObject::StorageClass)
        .into_iter()
        .collect()
}
