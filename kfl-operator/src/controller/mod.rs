//! Reconciliation of FLCluster resources.
//!
//! - [`FLClusterController`]: the reconciliation engine
//! - [`PlatformClient`]: the seam to the object store, with
//!   [`KubePlatformClient`] as the Kubernetes implementation
//! - [`diff`]: semantic drift detection between desired and observed objects
//!
//! # Usage with kube-runtime
//!
//! ```ignore
//! use kfl_operator::controller::{FLClusterController, error_policy};
//!
//! Controller::new(clusters, watcher_config)
//!     .run(|cluster, ctx| async move {
//!         let controller = FLClusterController::new(ctx.clone());
//!         controller.reconcile_object(&cluster).await
//!     }, error_policy, context)
//!     .for_each(|_| futures::future::ready(()))
//!     .await;
//! ```

pub mod diff;
mod flcluster;
mod platform;

pub use flcluster::{ApplyOutcome, FLClusterController, error_policy};
pub use platform::{KubePlatformClient, PlatformClient};

#[cfg(test)]
pub use platform::MockPlatformClient;

use crate::config::OperatorConfig;
use std::sync::Arc;

/// Shared context for the controller.
pub struct ControllerContext {
    /// Object store access.
    pub platform: Arc<dyn PlatformClient>,
    /// Operator settings.
    pub config: OperatorConfig,
}

impl ControllerContext {
    /// Create a new controller context.
    pub fn new(platform: Arc<dyn PlatformClient>, config: OperatorConfig) -> Self {
        Self { platform, config }
    }

    /// Context backed by a Kubernetes client.
    pub fn for_client(client: kube::Client, config: OperatorConfig) -> Self {
        Self::new(Arc::new(KubePlatformClient::new(client)), config)
    }
}

/// Result type for reconciliation actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Don't requeue; the next change to the FLCluster or its children triggers a pass.
    Done,
}
