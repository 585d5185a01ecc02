//! In-memory platform shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use kfl_operator::config::OperatorConfig;
use kfl_operator::controller::{ControllerContext, FLClusterController, PlatformClient};
use kfl_operator::crd::{Device, FLCluster, FLClusterSpec, FLClusterStatus, Resources};
use kfl_operator::resources::{ChildKind, ChildObject, ObjectKey};
use kfl_operator::OperatorResult;
use kube::core::ErrorResponse;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const NAMESPACE: &str = "sample";

/// Object store that behaves like the API server where the engine can tell.
///
/// Writes bump `resourceVersion`, Services get a cluster IP, replaces and
/// status writes with a stale version conflict.
#[derive(Default)]
pub struct MemoryPlatform {
    clusters: Mutex<BTreeMap<(String, String), FLCluster>>,
    objects: Mutex<BTreeMap<ObjectKey, ChildObject>>,
    statuses: Mutex<BTreeMap<(String, String), FLClusterStatus>>,
    progress: Mutex<Option<((String, String), FLClusterStatus)>>,
    version: AtomicUsize,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
}

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message,
        reason: reason.into(),
        code,
    })
}

fn matches_selector(object: &ChildObject, selector: &str) -> bool {
    let labels = object.meta().labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => false,
        })
}

impl MemoryPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_cluster(&self, mut cluster: FLCluster) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        cluster.metadata.resource_version = Some(version.to_string());
        let key = (
            cluster.metadata.namespace.clone().unwrap_or_default(),
            cluster.metadata.name.clone().unwrap_or_default(),
        );
        self.clusters.lock().unwrap().insert(key, cluster);
    }

    pub fn remove_cluster(&self, namespace: &str, name: &str) {
        self.clusters
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// Publish `status` for `namespace/name` as an outside reporter would,
    /// right before the next object create.
    pub fn report_progress_on_next_create(
        &self,
        namespace: &str,
        name: &str,
        status: FLClusterStatus,
    ) {
        let key = (namespace.to_string(), name.to_string());
        *self.progress.lock().unwrap() = Some((key, status));
    }

    fn write_status(
        &self,
        key: (String, String),
        resource_version: Option<String>,
        status: &FLClusterStatus,
    ) -> OperatorResult<()> {
        let mut clusters = self.clusters.lock().unwrap();
        let Some(cluster) = clusters.get_mut(&key) else {
            let message = format!("FLCluster {}/{} not found", key.0, key.1);
            return Err(api_error(404, "NotFound", message).into());
        };
        if resource_version.is_some() && resource_version != cluster.metadata.resource_version {
            let message = format!("FLCluster {}/{} was modified", key.0, key.1);
            return Err(api_error(409, "Conflict", message).into());
        }
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        cluster.metadata.resource_version = Some(version.to_string());
        cluster.status = Some(status.clone());
        self.statuses.lock().unwrap().insert(key, status.clone());
        Ok(())
    }

    /// Insert an object as if some other actor created it.
    pub fn seed(&self, mut object: ChildObject) {
        self.stamp(&mut object);
        self.objects.lock().unwrap().insert(object.key(), object);
    }

    pub fn object(&self, key: &ObjectKey) -> Option<ChildObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn edit(&self, key: &ObjectKey, f: impl FnOnce(&mut ChildObject)) {
        let mut objects = self.objects.lock().unwrap();
        let object = objects.get_mut(key).expect("object exists");
        f(object);
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn status(&self, namespace: &str, name: &str) -> Option<FLClusterStatus> {
        self.statuses
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn writes(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
            + self.updates.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.creates.store(0, Ordering::SeqCst);
        self.updates.store(0, Ordering::SeqCst);
        self.deletes.store(0, Ordering::SeqCst);
    }

    fn stamp(&self, object: &mut ChildObject) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        object.meta_mut().resource_version = Some(version.to_string());
        if let ChildObject::Service(svc) = object {
            if let Some(spec) = svc.spec.as_mut() {
                if spec.cluster_ip.is_none() {
                    let ip = format!("10.96.0.{version}");
                    spec.cluster_ip = Some(ip.clone());
                    spec.cluster_ips = Some(vec![ip]);
                }
                spec.type_.get_or_insert_with(|| "ClusterIP".into());
            }
        }
    }
}

#[async_trait]
impl PlatformClient for MemoryPlatform {
    async fn get_cluster(&self, namespace: &str, name: &str) -> OperatorResult<Option<FLCluster>> {
        Ok(self
            .clusters
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get(&self, key: &ObjectKey) -> OperatorResult<Option<ChildObject>> {
        Ok(self.object(key))
    }

    async fn create(&self, object: &ChildObject) -> OperatorResult<()> {
        let progress = self.progress.lock().unwrap().take();
        if let Some((cluster, status)) = progress {
            self.write_status(cluster, None, &status)?;
        }
        let key = object.key();
        if self.objects.lock().unwrap().contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{key} already exists")).into());
        }
        let mut object = object.clone();
        self.stamp(&mut object);
        self.objects.lock().unwrap().insert(key, object);
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, object: &ChildObject) -> OperatorResult<()> {
        let key = object.key();
        let current = self
            .object(&key)
            .ok_or_else(|| api_error(404, "NotFound", format!("{key} not found")))?;
        if current.meta().resource_version != object.meta().resource_version {
            return Err(api_error(409, "Conflict", format!("{key} was modified")).into());
        }
        let mut object = object.clone();
        self.stamp(&mut object);
        self.objects.lock().unwrap().insert(key, object);
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> OperatorResult<bool> {
        let existed = self.objects.lock().unwrap().remove(key).is_some();
        if existed {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(existed)
    }

    async fn list(
        &self,
        kind: ChildKind,
        namespace: &str,
        selector: &str,
    ) -> OperatorResult<Vec<ChildObject>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .filter(|(key, _)| !kind.is_namespaced() || key.namespace.as_deref() == Some(namespace))
            .filter(|(_, object)| matches_selector(object, selector))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &FLClusterStatus,
    ) -> OperatorResult<()> {
        self.write_status(
            (namespace.to_string(), name.to_string()),
            resource_version,
            status,
        )
    }
}

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
    cluster.metadata.namespace = Some(NAMESPACE.into());
    cluster.metadata.uid = Some(format!("{name}-uid"));
    cluster
}

/// One central server and `clients` edge clients, no edge servers.
pub fn simple(name: &str, clients: usize) -> FLCluster {
    cluster(
        name,
        FLClusterSpec {
            central_server: Some(device("1000m", "5Gi")),
            edge_client: (0..clients).map(|_| device("250m", "512Mi")).collect(),
            ..Default::default()
        },
    )
}

pub fn controller(platform: Arc<MemoryPlatform>, config: OperatorConfig) -> FLClusterController {
    FLClusterController::new(Arc::new(ControllerContext::new(platform, config)))
}

pub fn key(kind: ChildKind, name: &str) -> ObjectKey {
    ObjectKey::namespaced(kind, NAMESPACE, name)
}
