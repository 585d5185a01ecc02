//! Custom Resource Definitions for the KFL operator.
//!
//! - [`FLCluster`]: a federated learning cluster deployment
//!
//! [`conversion`] handles specs stored in the older single-device shape.

pub mod conversion;
mod flcluster;

pub use conversion::{DecodedSpec, decode_spec};
pub use flcluster::{
    Accuracy, DEFAULT_AGGREGATION, DEFAULT_CLUSTERING, DEFAULT_DATASET, DEFAULT_INDEX,
    DEFAULT_MODEL_NAME, DEFAULT_SPLITTING, Device, FLCluster, FLClusterSpec, FLClusterStatus, Flag,
    LocalTrainingData, Resources,
};
