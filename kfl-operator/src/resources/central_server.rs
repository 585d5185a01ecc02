//! Central server objects: results volume, Deployment and Service.

use super::{ChildObject, ClusterRef, Role, labels, object_name, training_env};
use crate::config::OperatorConfig;
use crate::crd::FLCluster;
use crate::error::{OperatorError, OperatorResult};
use crate::quantity::resource_requirements;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, HostPathVolumeSource, NodeAffinity, NodeSelector,
    NodeSelectorRequirement, NodeSelectorTerm, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PersistentVolumeSpec,
    PodSpec, PodTemplateSpec, PreferredSchedulingTerm, Service, ServicePort, ServiceSpec,
    Volume, VolumeMount, VolumeNodeAffinity, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

const PORT_NAME: &str = "http";
const ACCESS_MODE: &str = "ReadWriteOnce";

/// Everything the central server role needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CentralServerObjects {
    /// Node-local volume, present only when node-local storage is configured.
    pub volume: Option<PersistentVolume>,
    /// Results claim.
    pub claim: PersistentVolumeClaim,
    /// Single-replica Deployment.
    pub deployment: Deployment,
    /// Service on the central server port.
    pub service: Service,
}

impl CentralServerObjects {
    /// Objects in apply order: storage before the workload that mounts it.
    pub fn into_children(self) -> Vec<ChildObject> {
        let mut children = Vec::with_capacity(4);
        if let Some(pv) = self.volume {
            children.push(ChildObject::PersistentVolume(pv));
        }
        children.push(ChildObject::PersistentVolumeClaim(self.claim));
        children.push(ChildObject::Deployment(self.deployment));
        children.push(ChildObject::Service(self.service));
        children
    }
}

/// Name of the node-local PersistentVolume. PersistentVolumes are
/// cluster-scoped, so the namespace is part of the name.
pub fn host_volume_name(namespace: &str, cluster: &str) -> String {
    format!("{namespace}-{}", object_name(cluster, Role::CentralServer, None))
}

/// Name of the results volume inside the pod.
pub fn data_volume_name(cluster: &str) -> String {
    format!("{cluster}-data")
}

/// Generate the central server objects for `cluster`.
pub fn desired(cluster: &FLCluster, config: &OperatorConfig) -> OperatorResult<CentralServerObjects> {
    let cref = ClusterRef::from_cluster(cluster)?;
    let device = cluster.spec.central_server.as_ref().ok_or_else(|| {
        OperatorError::ValidationError(crate::validation::ValidationError::EmptyCentralServer)
    })?;
    let name = object_name(&cref.name, Role::CentralServer, None);
    let labels = labels(&cref.name, Role::CentralServer, None);
    let resources = resource_requirements(&device.resources)?;

    let volume = config
        .local_storage_root
        .as_deref()
        .map(|root| host_path_volume(&cref, root, config))
        .transpose()?;

    let claim = PersistentVolumeClaim {
        metadata: cref.child_meta(name.clone(), labels.clone()),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![ACCESS_MODE.to_string()]),
            storage_class_name: config.claim_storage_class().map(str::to_string),
            volume_name: volume.as_ref().and_then(|pv| pv.metadata.name.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(config.central_storage_size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let volume_name = data_volume_name(&cref.name);
    let deployment = Deployment {
        metadata: cref.child_meta(name.clone(), labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(device.replica),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    affinity: Some(node_preference(config)),
                    containers: vec![Container {
                        name: name.clone(),
                        image: Some(config.central_server_image.clone()),
                        image_pull_policy: Some(config.image_pull_policy.clone()),
                        ports: Some(vec![ContainerPort {
                            name: Some(PORT_NAME.to_string()),
                            container_port: config.central_server_port,
                            ..Default::default()
                        }]),
                        env: Some(training_env(&cluster.spec)),
                        resources: Some(resources),
                        volume_mounts: Some(vec![VolumeMount {
                            name: volume_name.clone(),
                            mount_path: config.results_path.clone(),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: volume_name,
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: name.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    let service = Service {
        metadata: cref.child_meta(name, labels.clone()),
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                port: config.central_server_port,
                target_port: Some(IntOrString::String(PORT_NAME.to_string())),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(CentralServerObjects {
        volume,
        claim,
        deployment,
        service,
    })
}

/// Soft preference for nodes labeled for the central server role.
fn node_preference(config: &OperatorConfig) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                PreferredSchedulingTerm {
                    weight: super::PREFERENCE_WEIGHT,
                    preference: NodeSelectorTerm {
                        match_expressions: Some(vec![role_requirement(config)]),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn role_requirement(config: &OperatorConfig) -> NodeSelectorRequirement {
    NodeSelectorRequirement {
        key: config.node_role_label.clone(),
        operator: "In".to_string(),
        values: Some(vec![Role::CentralServer.token().to_string()]),
    }
}

/// hostPath volume under `root`, pinned to central-server nodes.
///
/// PersistentVolumes are cluster-scoped and cannot carry the FLCluster as
/// owner; they are labeled so cleanup can find them.
fn host_path_volume(
    cref: &ClusterRef,
    root: &str,
    config: &OperatorConfig,
) -> OperatorResult<PersistentVolume> {
    crate::quantity::validate("storage", &config.central_storage_size)?;

    let mut labels = labels(&cref.name, Role::CentralServer, None);
    labels.insert(
        super::LABEL_MANAGED_BY.to_string(),
        super::MANAGER_NAME.to_string(),
    );

    Ok(PersistentVolume {
        metadata: ObjectMeta {
            name: Some(host_volume_name(&cref.namespace, &cref.name)),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            capacity: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(config.central_storage_size.clone()),
            )])),
            access_modes: Some(vec![ACCESS_MODE.to_string()]),
            persistent_volume_reclaim_policy: Some("Retain".to_string()),
            storage_class_name: Some(config.local_storage_class.clone()),
            host_path: Some(HostPathVolumeSource {
                path: format!(
                    "{}/{}/{}",
                    root.trim_end_matches('/'),
                    cref.namespace,
                    cref.name
                ),
                type_: Some("DirectoryOrCreate".to_string()),
            }),
            node_affinity: Some(VolumeNodeAffinity {
                required: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: Some(vec![role_requirement(config)]),
                        ..Default::default()
                    }],
                }),
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}
