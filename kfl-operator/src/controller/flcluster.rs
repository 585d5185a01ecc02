//! FLCluster controller.
//!
//! One pass: fetch the FLCluster, generate every role's objects, create what
//! is missing, replace what drifted, prune scaled-down edge instances and
//! write the status back. The first failure aborts the pass; the dispatcher
//! retries it.

use super::{ControllerContext, ReconcileAction, diff};
use crate::crd::{FLCluster, FLClusterStatus};
use crate::error::{OperatorError, OperatorResult};
use crate::resources::{
    self, ChildKind, ChildObject, ClusterRef, ObjectKey, Role, central_server, edge_client,
    edge_server, storage,
};
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Kinds pruned when an edge role shrinks.
const PRUNED_KINDS: [ChildKind; 2] = [ChildKind::Deployment, ChildKind::Service];

/// What applying one object did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object did not exist and was created.
    Created,
    /// The object had drifted and was replaced.
    Updated,
    /// The object already matched.
    Unchanged,
}

/// Objects of one role, in apply order.
struct RolePlan {
    role: Role,
    objects: Vec<ChildObject>,
    prune: bool,
}

/// Controller for FLCluster resources.
#[derive(Clone)]
pub struct FLClusterController {
    ctx: Arc<ControllerContext>,
}

impl FLClusterController {
    /// Create a new controller.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    /// Reconcile the FLCluster delivered by the watcher.
    pub async fn reconcile_object(&self, cluster: &FLCluster) -> OperatorResult<ReconcileAction> {
        let namespace = cluster
            .namespace()
            .ok_or_else(|| OperatorError::InvalidConfig("FLCluster must be namespaced".into()))?;
        self.reconcile(&namespace, &cluster.name_any()).await
    }

    /// Reconcile the FLCluster `namespace/name`.
    ///
    /// A missing FLCluster is not an error: it was deleted and its children
    /// go with it through their owner references.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> OperatorResult<ReconcileAction> {
        tracing::info!(name = %name, namespace = %namespace, "Reconciling FLCluster");

        let Some(cluster) = self.ctx.platform.get_cluster(namespace, name).await? else {
            tracing::info!(
                name = %name,
                namespace = %namespace,
                "FLCluster not found, it may have been deleted"
            );
            return Ok(ReconcileAction::Done);
        };

        let plan = self.plan(&cluster)?;
        let cref = ClusterRef::from_cluster(&cluster)?;

        for step in plan {
            self.apply_role(&cref, step).await?;
        }

        self.write_status(&cluster, namespace, name).await?;

        tracing::info!(name = %name, namespace = %namespace, "FLCluster reconciled");
        Ok(ReconcileAction::Done)
    }

    /// Generate every role's desired objects before touching the platform.
    fn plan(&self, cluster: &FLCluster) -> OperatorResult<Vec<RolePlan>> {
        let config = &self.ctx.config;
        let name = cluster.name_any();

        let mut central = storage::desired_children(config);
        central.extend(
            central_server::desired(cluster, config)
                .map_err(|e| e.for_role(Role::CentralServer, &name))?
                .into_children(),
        );

        let servers = edge_server::desired_all(cluster, config)
            .map_err(|e| e.for_role(Role::EdgeServer, &name))?
            .into_iter()
            .flat_map(|w| w.into_children())
            .collect();

        let clients = edge_client::desired_all(cluster, config)
            .map_err(|e| e.for_role(Role::EdgeClient, &name))?
            .into_iter()
            .flat_map(|w| w.into_children())
            .collect();

        Ok(vec![
            RolePlan {
                role: Role::CentralServer,
                objects: central,
                prune: false,
            },
            RolePlan {
                role: Role::EdgeServer,
                objects: servers,
                prune: true,
            },
            RolePlan {
                role: Role::EdgeClient,
                objects: clients,
                prune: true,
            },
        ])
    }

    async fn apply_role(&self, cref: &ClusterRef, step: RolePlan) -> OperatorResult<()> {
        let RolePlan {
            role,
            objects,
            prune,
        } = step;

        let keep: BTreeSet<ObjectKey> = objects.iter().map(ChildObject::key).collect();

        for object in objects {
            let key = object.key();
            let outcome = self
                .apply(object)
                .await
                .map_err(|e| e.for_role(role, key.to_string()))?;
            tracing::debug!(
                name = %cref.name,
                namespace = %cref.namespace,
                role = %role,
                object = %key,
                ?outcome,
                "Applied object"
            );
        }

        if prune {
            self.prune(cref, role, &keep).await?;
        }
        Ok(())
    }

    /// Create `desired` if absent, replace it if it drifted.
    pub async fn apply(&self, mut desired: ChildObject) -> OperatorResult<ApplyOutcome> {
        let key = desired.key();

        match self.ctx.platform.get(&key).await? {
            None => {
                tracing::info!(object = %key, kind = %key.kind, "Creating object");
                self.ctx.platform.create(&desired).await?;
                Ok(ApplyOutcome::Created)
            }
            Some(observed) => {
                if !diff::needs_update(&desired, &observed)? {
                    return Ok(ApplyOutcome::Unchanged);
                }
                tracing::info!(object = %key, kind = %key.kind, "Updating drifted object");
                diff::adopt_server_fields(&mut desired, &observed);
                self.ctx.platform.update(&desired).await?;
                Ok(ApplyOutcome::Updated)
            }
        }
    }

    /// Delete owned objects of `role` that are no longer desired.
    async fn prune(
        &self,
        cref: &ClusterRef,
        role: Role,
        keep: &BTreeSet<ObjectKey>,
    ) -> OperatorResult<usize> {
        let stale: Vec<ObjectKey> = self
            .owned(cref, role)
            .await?
            .into_iter()
            .filter(|key| !keep.contains(key))
            .collect();

        for key in &stale {
            tracing::info!(
                name = %cref.name,
                role = %role,
                object = %key,
                "Pruning scaled-down object"
            );
            self.ctx
                .platform
                .delete(key)
                .await
                .map_err(|e| e.for_role(role, key.to_string()))?;
        }
        Ok(stale.len())
    }

    /// Keys of every Deployment and Service of `role` owned by the FLCluster.
    async fn owned(&self, cref: &ClusterRef, role: Role) -> OperatorResult<Vec<ObjectKey>> {
        let selector = resources::selector_string(&resources::role_labels(&cref.name, role));
        let mut keys = Vec::new();
        for kind in PRUNED_KINDS {
            let listed = self
                .ctx
                .platform
                .list(kind, &cref.namespace, &selector)
                .await
                .map_err(|e| e.for_role(role, format!("{kind} {}/{selector}", cref.namespace)))?;
            keys.extend(
                listed
                    .iter()
                    .filter(|o| o.is_owned_by(cref.uid()))
                    .map(ChildObject::key),
            );
        }
        Ok(keys)
    }

    /// Write the status back, stamping the zero status on first sight.
    ///
    /// The write is conditional on the version fetched at the start of the
    /// pass, so progress reported meanwhile is never overwritten.
    async fn write_status(
        &self,
        cluster: &FLCluster,
        namespace: &str,
        name: &str,
    ) -> OperatorResult<()> {
        let status = match &cluster.status {
            Some(status) => status.clone(),
            None => {
                tracing::info!(name = %name, namespace = %namespace, "Stamping initial status");
                FLClusterStatus::default()
            }
        };
        self.ctx
            .platform
            .update_status(
                namespace,
                name,
                cluster.metadata.resource_version.clone(),
                &status,
            )
            .await
    }

    /// Remove the central server's objects, including its node-local volume.
    ///
    /// Returns how many objects existed. The shared StorageClass is kept.
    pub async fn delete_central_server(&self, cluster: &FLCluster) -> OperatorResult<usize> {
        let cref = ClusterRef::from_cluster(cluster)?;
        let name = resources::object_name(&cref.name, Role::CentralServer, None);

        let mut keys = vec![
            ObjectKey::namespaced(ChildKind::Deployment, &cref.namespace, &name),
            ObjectKey::namespaced(ChildKind::Service, &cref.namespace, &name),
            ObjectKey::namespaced(ChildKind::PersistentVolumeClaim, &cref.namespace, &name),
        ];
        if self.ctx.config.uses_local_storage() {
            keys.push(ObjectKey::cluster_scoped(
                ChildKind::PersistentVolume,
                &central_server::host_volume_name(&cref.namespace, &cref.name),
            ));
        }

        self.delete_keys(Role::CentralServer, &keys).await
    }

    /// Remove every edge server object owned by the FLCluster.
    pub async fn delete_edge_servers(&self, cluster: &FLCluster) -> OperatorResult<usize> {
        self.delete_role(cluster, Role::EdgeServer).await
    }

    /// Remove every edge client object owned by the FLCluster.
    pub async fn delete_edge_clients(&self, cluster: &FLCluster) -> OperatorResult<usize> {
        self.delete_role(cluster, Role::EdgeClient).await
    }

    async fn delete_role(&self, cluster: &FLCluster, role: Role) -> OperatorResult<usize> {
        let cref = ClusterRef::from_cluster(cluster)?;
        let keys = self.owned(&cref, role).await?;
        self.delete_keys(role, &keys).await
    }

    async fn delete_keys(&self, role: Role, keys: &[ObjectKey]) -> OperatorResult<usize> {
        let mut deleted = 0;
        for key in keys {
            let existed = self
                .ctx
                .platform
                .delete(key)
                .await
                .map_err(|e| e.for_role(role, key.to_string()))?;
            if existed {
                tracing::info!(role = %role, object = %key, "Deleted object");
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Error policy for the kube-runtime controller.
pub fn error_policy(
    cluster: Arc<FLCluster>,
    error: &OperatorError,
    ctx: Arc<ControllerContext>,
) -> kube::runtime::controller::Action {
    tracing::error!(
        name = %cluster.name_any(),
        namespace = %cluster.namespace().unwrap_or_default(),
        error = %error,
        "Reconciliation error"
    );
    kube::runtime::controller::Action::requeue(ctx.config.error_requeue)
}
