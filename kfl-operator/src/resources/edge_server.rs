//! Edge server objects.
//!
//! Edge server `i` listens on `edge_server_base_port + i` and prefers nodes
//! without central-server or edge-client pods of the same cluster.

use super::{ClusterRef, EdgeWorkload, Role, Workload};
use crate::config::OperatorConfig;
use crate::crd::FLCluster;
use crate::error::{OperatorError, OperatorResult};

const PORT_NAME: &str = "httpbin";
const SCRIPT: &str = "edge-server.py";
const AVOID: [Role; 2] = [Role::CentralServer, Role::EdgeClient];

/// Generate the Deployment and Service of edge server `index`.
pub fn desired(cluster: &FLCluster, config: &OperatorConfig, index: usize) -> OperatorResult<Workload> {
    let cref = ClusterRef::from_cluster(cluster)?;
    let device = cluster.spec.edge_servers().get(index).ok_or_else(|| {
        OperatorError::InvalidConfig(format!("FLCluster {} has no edge server {index}", cref.name))
    })?;

    EdgeWorkload {
        role: Role::EdgeServer,
        index,
        device,
        image: &config.edge_server_image,
        port: config.edge_server_port(index)?,
        port_name: PORT_NAME,
        script: SCRIPT,
        avoid: &AVOID,
    }
    .build(&cref, &cluster.spec, config)
}

/// Generate every declared edge server.
pub fn desired_all(cluster: &FLCluster, config: &OperatorConfig) -> OperatorResult<Vec<Workload>> {
    (0..cluster.spec.edge_servers().len())
        .map(|i| desired(cluster, config, i))
        .collect()
}
