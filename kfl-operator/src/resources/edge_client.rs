//! Edge client objects.

use super::{ClusterRef, EdgeWorkload, Role, Workload};
use crate::config::OperatorConfig;
use crate::crd::FLCluster;
use crate::error::{OperatorError, OperatorResult};

const PORT_NAME: &str = "http";
const SCRIPT: &str = "edge-client.py";
const AVOID: [Role; 2] = [Role::CentralServer, Role::EdgeServer];

/// Generate the Deployment and Service of edge client `index`.
///
/// Every client listens on the same port; each has its own Service selecting
/// only its pods through the `device` label.
pub fn desired(cluster: &FLCluster, config: &OperatorConfig, index: usize) -> OperatorResult<Workload> {
    let cref = ClusterRef::from_cluster(cluster)?;
    let device = cluster.spec.edge_client.get(index).ok_or_else(|| {
        OperatorError::InvalidConfig(format!("FLCluster {} has no edge client {index}", cref.name))
    })?;

    EdgeWorkload {
        role: Role::EdgeClient,
        index,
        device,
        image: &config.edge_client_image,
        port: config.edge_client_port,
        port_name: PORT_NAME,
        script: SCRIPT,
        avoid: &AVOID,
    }
    .build(&cref, &cluster.spec, config)
}

/// Generate every declared edge client.
pub fn desired_all(cluster: &FLCluster, config: &OperatorConfig) -> OperatorResult<Vec<Workload>> {
    (0..cluster.spec.edge_client.len())
        .map(|i| desired(cluster, config, i))
        .collect()
}
