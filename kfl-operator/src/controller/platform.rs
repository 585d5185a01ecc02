//! Platform client seam.
//!
//! The engine talks to the cluster only through [`PlatformClient`], so tests
//! can substitute a mock or an in-memory store.

use crate::crd::{FLCluster, FLClusterStatus};
use crate::error::OperatorResult;
use crate::resources::{ChildKind, ChildObject, ObjectKey};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Service};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;

#[cfg(test)]
use mockall::automock;

/// Operations the engine needs from the platform object store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetch an FLCluster. `Ok(None)` when it does not exist.
    async fn get_cluster(&self, namespace: &str, name: &str) -> OperatorResult<Option<FLCluster>>;

    /// Fetch a managed object. `Ok(None)` when it does not exist.
    async fn get(&self, key: &ObjectKey) -> OperatorResult<Option<ChildObject>>;

    /// Create an object.
    async fn create(&self, object: &ChildObject) -> OperatorResult<()>;

    /// Replace an object. The object must carry the observed `resourceVersion`.
    async fn update(&self, object: &ChildObject) -> OperatorResult<()>;

    /// Delete an object. Returns `false` if it was already gone.
    async fn delete(&self, key: &ObjectKey) -> OperatorResult<bool>;

    /// List objects of `kind` matching a label selector.
    ///
    /// `namespace` is ignored for cluster-scoped kinds.
    async fn list(
        &self,
        kind: ChildKind,
        namespace: &str,
        selector: &str,
    ) -> OperatorResult<Vec<ChildObject>>;

    /// Merge-patch an FLCluster's status subresource.
    ///
    /// With `resource_version` set, the write fails with a conflict if the
    /// FLCluster changed since that version was read.
    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &FLClusterStatus,
    ) -> OperatorResult<()>;
}

/// [`PlatformClient`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubePlatformClient {
    client: Client,
}

impl KubePlatformClient {
    /// Wrap a Kubernetes client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn all<K>(&self) -> Api<K>
    where
        K: Resource,
        K::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }
}

fn namespace_of(object: &ChildObject) -> &str {
    object.meta().namespace.as_deref().unwrap_or_default()
}

async fn delete_by_name<K>(api: Api<K>, name: &str) -> OperatorResult<bool>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn list_by_selector<K>(api: Api<K>, selector: &str) -> OperatorResult<Vec<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    Ok(api.list(&ListParams::default().labels(selector)).await?.items)
}

#[async_trait]
impl PlatformClient for KubePlatformClient {
    async fn get_cluster(&self, namespace: &str, name: &str) -> OperatorResult<Option<FLCluster>> {
        Ok(self.namespaced::<FLCluster>(namespace).get_opt(name).await?)
    }

    async fn get(&self, key: &ObjectKey) -> OperatorResult<Option<ChildObject>> {
        let ns = key.namespace.as_deref().unwrap_or_default();
        let name = key.name.as_str();

        let found = match key.kind {
            ChildKind::StorageClass => self
                .all::<StorageClass>()
                .get_opt(name)
                .await?
                .map(ChildObject::StorageClass),
            ChildKind::PersistentVolume => self
                .all::<PersistentVolume>()
                .get_opt(name)
                .await?
                .map(ChildObject::PersistentVolume),
            ChildKind::PersistentVolumeClaim => self
                .namespaced::<PersistentVolumeClaim>(ns)
                .get_opt(name)
                .await?
                .map(ChildObject::PersistentVolumeClaim),
            ChildKind::Deployment => self
                .namespaced::<Deployment>(ns)
                .get_opt(name)
                .await?
                .map(ChildObject::Deployment),
            ChildKind::Service => self
                .namespaced::<Service>(ns)
                .get_opt(name)
                .await?
                .map(ChildObject::Service),
        };
        Ok(found)
    }

    async fn create(&self, object: &ChildObject) -> OperatorResult<()> {
        let pp = PostParams::default();
        let ns = namespace_of(object);
        match object {
            ChildObject::StorageClass(o) => {
                self.all::<StorageClass>().create(&pp, o).await?;
            }
            ChildObject::PersistentVolume(o) => {
                self.all::<PersistentVolume>().create(&pp, o).await?;
            }
            ChildObject::PersistentVolumeClaim(o) => {
                self.namespaced::<PersistentVolumeClaim>(ns)
                    .create(&pp, o)
                    .await?;
            }
            ChildObject::Deployment(o) => {
                self.namespaced::<Deployment>(ns).create(&pp, o).await?;
            }
            ChildObject::Service(o) => {
                self.namespaced::<Service>(ns).create(&pp, o).await?;
            }
        }
        Ok(())
    }

    async fn update(&self, object: &ChildObject) -> OperatorResult<()> {
        let pp = PostParams::default();
        let ns = namespace_of(object);
        let name = object.name();
        match object {
            ChildObject::StorageClass(o) => {
                self.all::<StorageClass>().replace(name, &pp, o).await?;
            }
            ChildObject::PersistentVolume(o) => {
                self.all::<PersistentVolume>().replace(name, &pp, o).await?;
            }
            ChildObject::PersistentVolumeClaim(o) => {
                self.namespaced::<PersistentVolumeClaim>(ns)
                    .replace(name, &pp, o)
                    .await?;
            }
            ChildObject::Deployment(o) => {
                self.namespaced::<Deployment>(ns)
                    .replace(name, &pp, o)
                    .await?;
            }
            ChildObject::Service(o) => {
                self.namespaced::<Service>(ns).replace(name, &pp, o).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> OperatorResult<bool> {
        let ns = key.namespace.as_deref().unwrap_or_default();
        let name = key.name.as_str();
        match key.kind {
            ChildKind::StorageClass => delete_by_name(self.all::<StorageClass>(), name).await,
            ChildKind::PersistentVolume => {
                delete_by_name(self.all::<PersistentVolume>(), name).await
            }
            ChildKind::PersistentVolumeClaim => {
                delete_by_name(self.namespaced::<PersistentVolumeClaim>(ns), name).await
            }
            ChildKind::Deployment => {
                delete_by_name(self.namespaced::<Deployment>(ns), name).await
            }
            ChildKind::Service => delete_by_name(self.namespaced::<Service>(ns), name).await,
        }
    }

    async fn list(
        &self,
        kind: ChildKind,
        namespace: &str,
        selector: &str,
    ) -> OperatorResult<Vec<ChildObject>> {
        let objects = match kind {
            ChildKind::StorageClass => list_by_selector(self.all::<StorageClass>(), selector)
                .await?
                .into_iter()
                .map(ChildObject::StorageClass)
                .collect(),
            ChildKind::PersistentVolume => {
                list_by_selector(self.all::<PersistentVolume>(), selector)
                    .await?
                    .into_iter()
                    .map(ChildObject::PersistentVolume)
                    .collect()
            }
            ChildKind::PersistentVolumeClaim => list_by_selector(
                self.namespaced::<PersistentVolumeClaim>(namespace),
                selector,
            )
            .await?
            .into_iter()
            .map(ChildObject::PersistentVolumeClaim)
            .collect(),
            ChildKind::Deployment => {
                list_by_selector(self.namespaced::<Deployment>(namespace), selector)
                    .await?
                    .into_iter()
                    .map(ChildObject::Deployment)
                    .collect()
            }
            ChildKind::Service => list_by_selector(self.namespaced::<Service>(namespace), selector)
                .await?
                .into_iter()
                .map(ChildObject::Service)
                .collect(),
        };
        Ok(objects)
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &FLClusterStatus,
    ) -> OperatorResult<()> {
        let patch = match resource_version {
            Some(rv) => serde_json::json!({
                "metadata": { "resourceVersion": rv },
                "status": status,
            }),
            None => serde_json::json!({ "status": status }),
        };
        self.namespaced::<FLCluster>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
