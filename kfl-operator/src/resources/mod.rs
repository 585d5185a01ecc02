//! Desired-state generators for FLCluster child objects.
//!
//! Each role has a generator that turns an FLCluster (and, for edge roles, an
//! index) into the objects the platform should hold. Generators are pure and
//! deterministic: the same declaration and config always yield the same objects.
//!
//! Naming and labels follow one contract across roles:
//!
//! - name: `<cluster>-<role>[index]`, e.g. `demo-central-server`, `demo-edge-server0`
//! - labels: `cluster`, `app` (the role token) and, for indexed roles, `device`
//! - Service selector, pod template labels and Deployment selector are the same map

pub mod central_server;
pub mod edge_client;
pub mod edge_server;
pub mod storage;

use crate::config::OperatorConfig;
use crate::crd::{Device, FLCluster, FLClusterSpec};
use crate::error::{OperatorError, OperatorResult};
use crate::quantity::resource_requirements;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, EnvVar, PersistentVolume, PersistentVolumeClaim,
    PodAffinityTerm, PodAntiAffinity, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
    WeightedPodAffinityTerm,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Label carrying the owning FLCluster's name.
pub const LABEL_CLUSTER: &str = "cluster";
/// Label carrying the role token.
pub const LABEL_APP: &str = "app";
/// Label carrying the role token plus index.
pub const LABEL_DEVICE: &str = "device";
/// Label marking objects this operator manages outside any namespace.
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
/// Value of [`LABEL_MANAGED_BY`].
pub const MANAGER_NAME: &str = "kfl-operator";

/// Topology key used for pod anti-affinity.
const HOSTNAME_TOPOLOGY: &str = "kubernetes.io/hostname";
/// Weight of soft scheduling preferences.
const PREFERENCE_WEIGHT: i32 = 100;

/// A workload role in a federated learning cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The single aggregation server.
    CentralServer,
    /// An intermediate aggregation server.
    EdgeServer,
    /// A training client.
    EdgeClient,
}

impl Role {
    /// Token used in names and the `app` label.
    pub fn token(&self) -> &'static str {
        match self {
            Role::CentralServer => "central-server",
            Role::EdgeServer => "edge-server",
            Role::EdgeClient => "edge-client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Name of a role's object: `<cluster>-<token>` or `<cluster>-<token><index>`.
pub fn object_name(cluster: &str, role: Role, index: Option<usize>) -> String {
    match index {
        Some(i) => format!("{cluster}-{}{i}", role.token()),
        None => format!("{cluster}-{}", role.token()),
    }
}

/// Labels shared by every object of one role within a cluster.
pub fn role_labels(cluster: &str, role: Role) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_CLUSTER.to_string(), cluster.to_string()),
        (LABEL_APP.to_string(), role.token().to_string()),
    ])
}

/// Labels of one role instance. Also used as the selector.
pub fn labels(cluster: &str, role: Role, index: Option<usize>) -> BTreeMap<String, String> {
    let mut labels = role_labels(cluster, role);
    if let Some(i) = index {
        labels.insert(LABEL_DEVICE.to_string(), format!("{}{i}", role.token()));
    }
    labels
}

/// Render a label map as a `key=value,...` selector string.
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Identity of the FLCluster being generated for.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRef {
    /// FLCluster name.
    pub name: String,
    /// FLCluster namespace.
    pub namespace: String,
    /// Controller owner reference pointing back at the FLCluster.
    pub owner: OwnerReference,
}

impl ClusterRef {
    /// Extract the identity, failing if the FLCluster lacks a namespace or uid.
    pub fn from_cluster(cluster: &FLCluster) -> OperatorResult<Self> {
        let name = cluster.name_any();
        let namespace = cluster
            .namespace()
            .ok_or_else(|| OperatorError::InvalidConfig("FLCluster must be namespaced".into()))?;
        let owner = cluster
            .controller_owner_ref(&())
            .ok_or_else(|| OperatorError::MissingOwner { name: name.clone() })?;
        Ok(Self {
            name,
            namespace,
            owner,
        })
    }

    /// Metadata for a namespaced child with the given name and labels.
    pub fn child_meta(&self, name: String, labels: BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(labels),
            owner_references: Some(vec![self.owner.clone()]),
            ..Default::default()
        }
    }

    /// UID of the owning FLCluster.
    pub fn uid(&self) -> &str {
        &self.owner.uid
    }
}

/// Soft anti-affinity away from pods of the given roles in the same cluster.
pub fn anti_affinity(cluster: &str, avoid: &[Role]) -> Affinity {
    let terms = avoid
        .iter()
        .map(|role| WeightedPodAffinityTerm {
            weight: PREFERENCE_WEIGHT,
            pod_affinity_term: PodAffinityTerm {
                label_selector: Some(LabelSelector {
                    match_labels: Some(role_labels(cluster, *role)),
                    ..Default::default()
                }),
                topology_key: HOSTNAME_TOPOLOGY.to_string(),
                ..Default::default()
            },
        })
        .collect();

    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(terms),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Training parameters handed to every workload container.
pub fn training_env(spec: &FLClusterSpec) -> Vec<EnvVar> {
    [
        ("DATASET", spec.dataset()),
        ("MODEL_NAME", spec.model_name()),
        ("AGGREGATION", spec.aggregation()),
        ("SPLITTING", spec.splitting()),
        ("CLUSTERING", spec.clustering()),
        ("OFFLOAD", spec.offload().as_str()),
        ("EDGE_BASED", spec.edge_based().as_str()),
        ("INDEX", spec.index()),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    })
    .collect()
}

/// Kinds of object the operator manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildKind {
    /// Cluster-scoped StorageClass.
    StorageClass,
    /// Cluster-scoped PersistentVolume.
    PersistentVolume,
    /// PersistentVolumeClaim.
    PersistentVolumeClaim,
    /// Deployment.
    Deployment,
    /// Service.
    Service,
}

impl ChildKind {
    /// Kind name as the platform spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildKind::StorageClass => "StorageClass",
            ChildKind::PersistentVolume => "PersistentVolume",
            ChildKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ChildKind::Deployment => "Deployment",
            ChildKind::Service => "Service",
        }
    }

    /// Whether objects of this kind live in a namespace.
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ChildKind::StorageClass | ChildKind::PersistentVolume)
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable key of a managed object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Object kind.
    pub kind: ChildKind,
    /// Namespace; `None` for cluster-scoped kinds.
    pub namespace: Option<String>,
    /// Object name.
    pub name: String,
}

impl ObjectKey {
    /// Key of a namespaced object.
    pub fn namespaced(kind: ChildKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    /// Key of a cluster-scoped object.
    pub fn cluster_scoped(kind: ChildKind, name: &str) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {ns}/{}", self.kind, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// One managed object of any supported kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildObject {
    /// Shared node-local StorageClass.
    StorageClass(StorageClass),
    /// Node-local volume backing the central server claim.
    PersistentVolume(PersistentVolume),
    /// Central server results claim.
    PersistentVolumeClaim(PersistentVolumeClaim),
    /// Role workload.
    Deployment(Deployment),
    /// Role endpoint.
    Service(Service),
}

impl ChildObject {
    /// Kind of the wrapped object.
    pub fn kind(&self) -> ChildKind {
        match self {
            ChildObject::StorageClass(_) => ChildKind::StorageClass,
            ChildObject::PersistentVolume(_) => ChildKind::PersistentVolume,
            ChildObject::PersistentVolumeClaim(_) => ChildKind::PersistentVolumeClaim,
            ChildObject::Deployment(_) => ChildKind::Deployment,
            ChildObject::Service(_) => ChildKind::Service,
        }
    }

    /// Object metadata.
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ChildObject::StorageClass(o) => o.meta(),
            ChildObject::PersistentVolume(o) => o.meta(),
            ChildObject::PersistentVolumeClaim(o) => o.meta(),
            ChildObject::Deployment(o) => o.meta(),
            ChildObject::Service(o) => o.meta(),
        }
    }

    /// Mutable object metadata.
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ChildObject::StorageClass(o) => o.meta_mut(),
            ChildObject::PersistentVolume(o) => o.meta_mut(),
            ChildObject::PersistentVolumeClaim(o) => o.meta_mut(),
            ChildObject::Deployment(o) => o.meta_mut(),
            ChildObject::Service(o) => o.meta_mut(),
        }
    }

    /// Object name, empty if unset.
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// Stable key.
    pub fn key(&self) -> ObjectKey {
        let kind = self.kind();
        ObjectKey {
            kind,
            namespace: if kind.is_namespaced() {
                self.meta().namespace.clone()
            } else {
                None
            },
            name: self.name().to_string(),
        }
    }

    /// Whether the object names `uid` among its owners.
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.meta()
            .owner_references
            .as_ref()
            .is_some_and(|refs| refs.iter().any(|r| r.uid == uid))
    }

    /// Serialize to JSON.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            ChildObject::StorageClass(o) => serde_json::to_value(o),
            ChildObject::PersistentVolume(o) => serde_json::to_value(o),
            ChildObject::PersistentVolumeClaim(o) => serde_json::to_value(o),
            ChildObject::Deployment(o) => serde_json::to_value(o),
            ChildObject::Service(o) => serde_json::to_value(o),
        }
    }

    /// Deserialize an object of the given kind from JSON.
    pub fn from_value(kind: ChildKind, value: Value) -> serde_json::Result<Self> {
        Ok(match kind {
            ChildKind::StorageClass => ChildObject::StorageClass(serde_json::from_value(value)?),
            ChildKind::PersistentVolume => {
                ChildObject::PersistentVolume(serde_json::from_value(value)?)
            }
            ChildKind::PersistentVolumeClaim => {
                ChildObject::PersistentVolumeClaim(serde_json::from_value(value)?)
            }
            ChildKind::Deployment => ChildObject::Deployment(serde_json::from_value(value)?),
            ChildKind::Service => ChildObject::Service(serde_json::from_value(value)?),
        })
    }
}

/// Deployment and Service of one edge role instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    /// The role's Deployment.
    pub deployment: Deployment,
    /// The role's Service.
    pub service: Service,
}

impl Workload {
    /// Objects in apply order.
    pub fn into_children(self) -> Vec<ChildObject> {
        vec![
            ChildObject::Deployment(self.deployment),
            ChildObject::Service(self.service),
        ]
    }
}

/// Shape of one indexed edge workload.
pub(crate) struct EdgeWorkload<'a> {
    pub role: Role,
    pub index: usize,
    pub device: &'a Device,
    pub image: &'a str,
    pub port: i32,
    pub port_name: &'static str,
    pub script: &'static str,
    pub avoid: &'a [Role],
}

impl EdgeWorkload<'_> {
    /// Build the Deployment and Service for this instance.
    pub fn build(
        self,
        cref: &ClusterRef,
        spec: &FLClusterSpec,
        config: &OperatorConfig,
    ) -> OperatorResult<Workload> {
        let name = object_name(&cref.name, self.role, Some(self.index));
        let labels = labels(&cref.name, self.role, Some(self.index));
        let resources = resource_requirements(&self.device.resources)?;

        let command = vec![
            "python3".to_string(),
            self.script.to_string(),
            "-i".to_string(),
            self.index.to_string(),
            "-ns".to_string(),
            cref.namespace.clone(),
            "-cn".to_string(),
            cref.name.clone(),
        ];

        let deployment = Deployment {
            metadata: cref.child_meta(name.clone(), labels.clone()),
            spec: Some(DeploymentSpec {
                replicas: Some(self.device.replica),
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
                        affinity: Some(anti_affinity(&cref.name, self.avoid)),
                        containers: vec![Container {
                            name: name.clone(),
                            image: Some(self.image.to_string()),
                            image_pull_policy: Some(config.image_pull_policy.clone()),
                            command: Some(command),
                            ports: Some(vec![ContainerPort {
                                name: Some(self.port_name.to_string()),
                                container_port: self.port,
                                ..Default::default()
                            }]),
                            env: Some(training_env(spec)),
                            resources: Some(resources),
                            ..Default::default()
                        }],
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
                    name: Some(self.port_name.to_string()),
                    port: self.port,
                    target_port: Some(IntOrString::String(self.port_name.to_string())),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        Ok(Workload {
            deployment,
            service,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::crd::{Device, FLCluster, FLClusterSpec, Resources};

    pub fn device(cpu: &str, memory: &str) -> Device {
        Device {
            replica: 1,
            resources: Resources {
                cpu: cpu.into(),
                memory: memory.into(),
            },
        }
    }

    pub fn cluster(name: &str, spec: FLClusterSpec) -> FLCluster {
        let mut cluster = FLCluster::new(name, spec);
        cluster.metadata.namespace = Some("sample".into());
        cluster.metadata.uid = Some(format!("{name}-uid"));
        cluster
    }

    pub fn demo() -> FLCluster {
        cluster(
            "demo",
            FLClusterSpec {
                central_server: Some(device("1000m", "5Gi")),
                edge_server: Some(vec![device("500m", "1Gi"), device("", "")]),
                edge_client: vec![device("250m", "512Mi")],
                dataset: Some("mnist".into()),
                ..Default::default()
            },
        )
    }
}
