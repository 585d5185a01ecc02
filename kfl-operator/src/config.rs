//! Operator configuration.
//!
//! Everything the generators and the controller need beyond the FLCluster
//! itself: images, ports, storage layout and requeue timing. Loaded once from
//! `KFL_*` environment variables and passed through
//! [`ControllerContext`](crate::controller::ControllerContext).

use crate::error::{OperatorError, OperatorResult};
use std::env;
use std::time::Duration;

/// Default workload image for every role.
pub const DEFAULT_IMAGE: &str = "negaranabestani/fake-fed-flow:v1";

/// Operator-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// Central server image.
    pub central_server_image: String,
    /// Edge server image.
    pub edge_server_image: String,
    /// Edge client image.
    pub edge_client_image: String,
    /// Pull policy for all workload containers.
    pub image_pull_policy: String,

    /// Central server container and service port.
    pub central_server_port: i32,
    /// Port of edge server 0; edge server `i` listens on `base + i`.
    pub edge_server_base_port: i32,
    /// Edge client container and service port.
    pub edge_client_port: i32,

    /// Requested size of the central server claim.
    pub central_storage_size: String,
    /// Storage class for the central server claim when node-local storage is off.
    pub storage_class: Option<String>,
    /// Mount path of the results volume in the central server container.
    pub results_path: String,
    /// Host directory root for node-local storage; enables the shared
    /// StorageClass and a hostPath PersistentVolume per cluster.
    pub local_storage_root: Option<String>,
    /// Name of the shared StorageClass used with node-local storage.
    pub local_storage_class: String,

    /// Node label key that marks a node's federated learning role.
    pub node_role_label: String,

    /// Requeue delay after a failed reconciliation.
    pub error_requeue: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            central_server_image: DEFAULT_IMAGE.to_string(),
            edge_server_image: DEFAULT_IMAGE.to_string(),
            edge_client_image: DEFAULT_IMAGE.to_string(),
            image_pull_policy: "Always".to_string(),
            central_server_port: 8000,
            edge_server_base_port: 9000,
            edge_client_port: 9001,
            central_storage_size: "1Gi".to_string(),
            storage_class: None,
            results_path: "/fed-flow/results".to_string(),
            local_storage_root: None,
            local_storage_class: "kfl-local-storage".to_string(),
            node_role_label: "kfl.aut.tech/role".to_string(),
            error_requeue: Duration::from_secs(30),
        }
    }
}

impl OperatorConfig {
    /// Load from the process environment.
    ///
    /// Environment variables (all optional):
    /// - `KFL_CENTRAL_SERVER_IMAGE`, `KFL_EDGE_SERVER_IMAGE`, `KFL_EDGE_CLIENT_IMAGE`
    /// - `KFL_IMAGE_PULL_POLICY`: `Always`, `IfNotPresent` or `Never`
    /// - `KFL_CENTRAL_SERVER_PORT`, `KFL_EDGE_SERVER_BASE_PORT`, `KFL_EDGE_CLIENT_PORT`
    /// - `KFL_CENTRAL_STORAGE_SIZE`, `KFL_STORAGE_CLASS`, `KFL_RESULTS_PATH`
    /// - `KFL_LOCAL_STORAGE_ROOT`, `KFL_LOCAL_STORAGE_CLASS`
    /// - `KFL_NODE_ROLE_LABEL`
    /// - `KFL_ERROR_REQUEUE_SECS`
    pub fn from_env() -> OperatorResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> OperatorResult<Self> {
        let defaults = Self::default();
        let string = |key: &str, default: String| {
            lookup(key).filter(|v| !v.is_empty()).unwrap_or(default)
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let config = Self {
            central_server_image: string("KFL_CENTRAL_SERVER_IMAGE", defaults.central_server_image),
            edge_server_image: string("KFL_EDGE_SERVER_IMAGE", defaults.edge_server_image),
            edge_client_image: string("KFL_EDGE_CLIENT_IMAGE", defaults.edge_client_image),
            image_pull_policy: string("KFL_IMAGE_PULL_POLICY", defaults.image_pull_policy),
            central_server_port: parse_var(
                &lookup,
                "KFL_CENTRAL_SERVER_PORT",
                defaults.central_server_port,
            )?,
            edge_server_base_port: parse_var(
                &lookup,
                "KFL_EDGE_SERVER_BASE_PORT",
                defaults.edge_server_base_port,
            )?,
            edge_client_port: parse_var(&lookup, "KFL_EDGE_CLIENT_PORT", defaults.edge_client_port)?,
            central_storage_size: string("KFL_CENTRAL_STORAGE_SIZE", defaults.central_storage_size),
            storage_class: optional("KFL_STORAGE_CLASS"),
            results_path: string("KFL_RESULTS_PATH", defaults.results_path),
            local_storage_root: optional("KFL_LOCAL_STORAGE_ROOT"),
            local_storage_class: string("KFL_LOCAL_STORAGE_CLASS", defaults.local_storage_class),
            node_role_label: string("KFL_NODE_ROLE_LABEL", defaults.node_role_label),
            error_requeue: Duration::from_secs(parse_var(
                &lookup,
                "KFL_ERROR_REQUEUE_SECS",
                defaults.error_requeue.as_secs(),
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> OperatorResult<()> {
        if !matches!(
            self.image_pull_policy.as_str(),
            "Always" | "IfNotPresent" | "Never"
        ) {
            return Err(OperatorError::InvalidConfig(format!(
                "image pull policy {:?} must be Always, IfNotPresent or Never",
                self.image_pull_policy
            )));
        }
        for (name, port) in [
            ("central server port", self.central_server_port),
            ("edge server base port", self.edge_server_base_port),
            ("edge client port", self.edge_client_port),
        ] {
            if !(1..=65535).contains(&port) {
                return Err(OperatorError::InvalidConfig(format!(
                    "{name} {port} is out of range"
                )));
            }
        }
        crate::quantity::ParsedQuantity::parse("storage", &self.central_storage_size)?;
        if !self.results_path.starts_with('/') {
            return Err(OperatorError::InvalidConfig(format!(
                "results path {:?} must be absolute",
                self.results_path
            )));
        }
        Ok(())
    }

    /// Whether node-local storage (shared StorageClass plus hostPath volume) is enabled.
    pub fn uses_local_storage(&self) -> bool {
        self.local_storage_root.is_some()
    }

    /// Storage class the central server claim asks for.
    pub fn claim_storage_class(&self) -> Option<&str> {
        if self.uses_local_storage() {
            Some(self.local_storage_class.as_str())
        } else {
            self.storage_class.as_deref()
        }
    }

    /// Port of edge server `index`. Fails when the port leaves 1..=65535.
    pub fn edge_server_port(&self, index: usize) -> OperatorResult<i32> {
        i32::try_from(index)
            .ok()
            .and_then(|offset| self.edge_server_base_port.checked_add(offset))
            .filter(|port| (1..=65535).contains(port))
            .ok_or_else(|| {
                OperatorError::InvalidConfig(format!(
                    "edge server {index} port is out of range (base {})",
                    self.edge_server_base_port
                ))
            })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> OperatorResult<T> {
    match lookup(key).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| OperatorError::InvalidConfig(format!("{key}={raw:?} is not valid"))),
    }
}
