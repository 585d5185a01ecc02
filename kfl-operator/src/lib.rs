//! KFL Kubernetes Operator
//!
//! This crate converges `FLCluster` declarations into running federated
//! learning topologies: one central server with persistent storage, any
//! number of edge servers and edge clients, each a Deployment fronted by a
//! Service.
//!
//! # Custom Resource Definitions
//!
//! - **FLCluster**: a federated learning topology plus its training parameters
//!
//! # Example
//!
//! ```yaml
//! apiVersion: kfl.aut.tech/v1alpha1
//! kind: FLCluster
//! metadata:
//!   name: demo
//!   namespace: sample
//! spec:
//!   centralServer:
//!     replica: 1
//!     resources: {cpu: 1000m, memory: 5Gi}
//!   edgeServer:
//!     - replica: 1
//!       resources: {cpu: 500m, memory: 1Gi}
//!   edgeClient:
//!     - replica: 1
//!       resources: {cpu: 250m, memory: 512Mi}
//!   dataset: mnist
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admission;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod quantity;
pub mod resources;
pub mod telemetry;
pub mod validation;

pub use crd::{FLCluster, FLClusterSpec};
pub use error::{OperatorError, OperatorResult};
