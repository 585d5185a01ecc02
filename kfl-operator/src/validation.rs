//! Defaulting and validation of FLCluster declarations.
//!
//! Pure functions shared by the admission webhook and by tests. Validation
//! stops at the first failing rule:
//!
//! 1. central server present
//! 2. edge client list present and non-empty
//! 3. central server device valid
//! 4. every edge client valid
//! 5. edge server list, if declared, non-empty and every entry valid
//! 6. `edgeBased` spelled `True`/`False`
//! 7. `offload` spelled `True`/`False`
//!
//! Rules 6 and 7 are enforced by [`Flag`] when a spec is decoded. Raw
//! admission payloads go through [`check_flag`] after rules 1 to 5 so the
//! order above holds there too.

use crate::crd::{
    DEFAULT_AGGREGATION, DEFAULT_CLUSTERING, DEFAULT_DATASET, DEFAULT_INDEX, DEFAULT_MODEL_NAME,
    DEFAULT_SPLITTING, Device, FLClusterSpec, Flag,
};
use crate::quantity::{self, QuantityError};
use crate::resources::Role;
use serde_json::Value;
use thiserror::Error;

/// Why a single device entry is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Replica count other than exactly one.
    #[error("invalid replica")]
    InvalidReplica(i32),

    /// A resource string failed the quantity grammar.
    #[error(transparent)]
    InvalidResource(#[from] QuantityError),
}

/// A rejected declaration. Messages are what admission reports to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// No central server declared.
    #[error("empty central server")]
    EmptyCentralServer,

    /// No edge clients declared.
    #[error("empty edge client")]
    EmptyEdgeClient,

    /// Edge server list declared but empty.
    #[error("empty edge server")]
    EmptyEdgeServer,

    /// The central server device is invalid.
    #[error("central server: {0}")]
    CentralServer(DeviceError),

    /// An edge client device is invalid.
    #[error("edge client[{index}]: {source}")]
    EdgeClient {
        /// Position in the edge client list.
        index: usize,
        /// What is wrong with it.
        source: DeviceError,
    },

    /// An edge server device is invalid.
    #[error("edge server[{index}]: {source}")]
    EdgeServer {
        /// Position in the edge server list.
        index: usize,
        /// What is wrong with it.
        source: DeviceError,
    },

    /// A flag field holds something other than `True`/`False`.
    #[error("{field}: {value} must be True or False")]
    InvalidFlag {
        /// JSON field name.
        field: &'static str,
        /// Offending value, as JSON.
        value: String,
    },
}

/// Fill unset fields with their defaults. Set fields are left alone.
pub fn apply_defaults(spec: &mut FLClusterSpec) {
    if spec.edge_based.is_none() {
        spec.edge_based = Some(Flag::from(!spec.edge_servers().is_empty()));
    }
    if spec.splitting.is_none() {
        spec.splitting = Some(DEFAULT_SPLITTING.to_string());
    }
    if spec.offload.is_none() {
        spec.offload = Some(Flag::from(spec.splitting() != DEFAULT_SPLITTING));
    }
    if spec.aggregation.is_none() {
        spec.aggregation = Some(DEFAULT_AGGREGATION.to_string());
    }
    if spec.clustering.is_none() {
        spec.clustering = Some(DEFAULT_CLUSTERING.to_string());
    }
    if spec.model_name.is_none() {
        spec.model_name = Some(DEFAULT_MODEL_NAME.to_string());
    }
    if spec.dataset.is_none() {
        spec.dataset = Some(DEFAULT_DATASET.to_string());
    }
    if spec.index.is_none() {
        spec.index = Some(DEFAULT_INDEX.to_string());
    }
}

/// Check one device: replica pinned to 1, well-formed resources.
pub fn validate_device(device: &Device) -> Result<(), DeviceError> {
    if device.replica != 1 {
        return Err(DeviceError::InvalidReplica(device.replica));
    }
    quantity::validate("cpu", &device.resources.cpu)?;
    quantity::validate("memory", &device.resources.memory)?;
    Ok(())
}

/// Validate a new declaration.
pub fn validate_create(spec: &FLClusterSpec) -> Result<(), ValidationError> {
    let central = spec
        .central_server
        .as_ref()
        .ok_or(ValidationError::EmptyCentralServer)?;
    if spec.edge_client.is_empty() {
        return Err(ValidationError::EmptyEdgeClient);
    }

    validate_device(central).map_err(ValidationError::CentralServer)?;

    for (index, client) in spec.edge_client.iter().enumerate() {
        validate_device(client).map_err(|source| ValidationError::EdgeClient { index, source })?;
    }

    if let Some(servers) = &spec.edge_server {
        if servers.is_empty() {
            return Err(ValidationError::EmptyEdgeServer);
        }
        for (index, server) in servers.iter().enumerate() {
            validate_device(server)
                .map_err(|source| ValidationError::EdgeServer { index, source })?;
        }
    }

    Ok(())
}

/// Validate an update: all create rules on the new declaration, then the
/// per-role resource compatibility rule against the previous one.
pub fn validate_update(old: &FLClusterSpec, new: &FLClusterSpec) -> Result<(), ValidationError> {
    validate_create(new)?;

    if let (Some(old_central), Some(new_central)) = (&old.central_server, &new.central_server) {
        check_resource_update(Role::CentralServer, old_central, new_central)?;
    }
    for (old_server, new_server) in old.edge_servers().iter().zip(new.edge_servers()) {
        check_resource_update(Role::EdgeServer, old_server, new_server)?;
    }
    for (old_client, new_client) in old.edge_client.iter().zip(&new.edge_client) {
        check_resource_update(Role::EdgeClient, old_client, new_client)?;
    }
    Ok(())
}

/// Deletion is always accepted.
pub fn validate_delete(_spec: &FLClusterSpec) -> Result<(), ValidationError> {
    Ok(())
}

/// Resource changes between two versions of a role's device.
///
/// Every change is accepted today; workloads pick up new shapes on rollout.
pub fn check_resource_update(
    _role: Role,
    _old: &Device,
    _new: &Device,
) -> Result<(), ValidationError> {
    Ok(())
}

/// Check a raw flag value from an admission payload.
///
/// Absent or null is `Ok(None)`. Anything other than the strings `True` and
/// `False` is rejected.
pub fn check_flag(field: &'static str, raw: Option<&Value>) -> Result<Option<Flag>, ValidationError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => s.parse().map(Some).map_err(|_| ValidationError::InvalidFlag {
            field,
            value: format!("{s:?}"),
        }),
        Some(other) => Err(ValidationError::InvalidFlag {
            field,
            value: other.to_string(),
        }),
    }
}
