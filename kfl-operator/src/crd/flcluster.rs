//! FLCluster Custom Resource Definition.
//!
//! Declares a federated learning cluster: one central aggregation server,
//! optional edge aggregation servers and one or more edge training clients.

use kube::CustomResource;
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::{Schema, SchemaObject};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default splitting mode.
pub const DEFAULT_SPLITTING: &str = "none_splitting";
/// Default aggregation strategy.
pub const DEFAULT_AGGREGATION: &str = "fed_avg";
/// Default clustering mode.
pub const DEFAULT_CLUSTERING: &str = "none_clustering";
/// Default model identifier.
pub const DEFAULT_MODEL_NAME: &str = "vgg";
/// Default dataset identifier.
pub const DEFAULT_DATASET: &str = "cifar10";
/// Default shard index.
pub const DEFAULT_INDEX: &str = "0";

/// FLCluster is the Schema for the flclusters API.
///
/// The operator turns each FLCluster into Deployments, Services and storage
/// for the central server, every edge server and every edge client, all owned
/// by the FLCluster so that deleting it cascades to its children.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kfl.aut.tech",
    version = "v1alpha1",
    kind = "FLCluster",
    plural = "flclusters",
    shortname = "flc",
    namespaced,
    status = "FLClusterStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Dataset", "type":"string", "jsonPath":".spec.dataset"}"#,
    printcolumn = r#"{"name":"Model", "type":"string", "jsonPath":".spec.modelName"}"#,
    printcolumn = r#"{"name":"Rounds", "type":"integer", "jsonPath":".status.globalRounds"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FLClusterSpec {
    /// The central aggregation server. Required; admission rejects a missing one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub central_server: Option<Device>,

    /// Edge aggregation servers, one Deployment each.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_server: Option<Vec<Device>>,

    /// Edge training clients, one Deployment each. Must not be empty.
    #[serde(default)]
    pub edge_client: Vec<Device>,

    /// Dataset identifier handed to every workload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,

    /// Model identifier handed to every workload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    /// Whether training goes through edge servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_based: Option<Flag>,

    /// Whether clients offload part of the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offload: Option<Flag>,

    /// Model splitting mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub splitting: Option<String>,

    /// Aggregation strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<String>,

    /// Client clustering mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clustering: Option<String>,

    /// Dataset shard index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
}

impl FLClusterSpec {
    /// Declared edge servers, empty when none are declared.
    pub fn edge_servers(&self) -> &[Device] {
        self.edge_server.as_deref().unwrap_or_default()
    }

    /// Dataset, falling back to the default.
    pub fn dataset(&self) -> &str {
        self.dataset.as_deref().unwrap_or(DEFAULT_DATASET)
    }

    /// Model name, falling back to the default.
    pub fn model_name(&self) -> &str {
        self.model_name.as_deref().unwrap_or(DEFAULT_MODEL_NAME)
    }

    /// Splitting mode, falling back to the default.
    pub fn splitting(&self) -> &str {
        self.splitting.as_deref().unwrap_or(DEFAULT_SPLITTING)
    }

    /// Aggregation strategy, falling back to the default.
    pub fn aggregation(&self) -> &str {
        self.aggregation.as_deref().unwrap_or(DEFAULT_AGGREGATION)
    }

    /// Clustering mode, falling back to the default.
    pub fn clustering(&self) -> &str {
        self.clustering.as_deref().unwrap_or(DEFAULT_CLUSTERING)
    }

    /// Shard index, falling back to the default.
    pub fn index(&self) -> &str {
        self.index.as_deref().unwrap_or(DEFAULT_INDEX)
    }

    /// Edge-based flag; unset means edge servers decide.
    pub fn edge_based(&self) -> Flag {
        self.edge_based
            .unwrap_or_else(|| Flag::from(!self.edge_servers().is_empty()))
    }

    /// Offload flag; unset means splitting decides.
    pub fn offload(&self) -> Flag {
        self.offload
            .unwrap_or_else(|| Flag::from(self.splitting() != DEFAULT_SPLITTING))
    }
}

/// Two-valued switch, spelled `True`/`False` on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Flag {
    /// Enabled.
    True,
    /// Disabled.
    #[default]
    False,
}

impl Flag {
    /// Wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::True => "True",
            Flag::False => "False",
        }
    }
}

impl From<bool> for Flag {
    fn from(value: bool) -> Self {
        if value { Flag::True } else { Flag::False }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "True" => Ok(Flag::True),
            "False" => Ok(Flag::False),
            other => Err(format!("{other:?} must be True or False")),
        }
    }
}

/// Replica count and resource shape of one role's workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Number of pod replicas. Admission currently pins this to 1, so an
    /// absent value (0) is rejected.
    #[serde(default)]
    pub replica: i32,

    /// CPU and memory for each pod.
    #[serde(default)]
    pub resources: Resources,
}

/// CPU and memory quantity strings. Empty means unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    /// Memory (e.g., "512Mi", "1Gi").
    #[serde(default)]
    pub memory: String,

    /// CPU (e.g., "1", "500m").
    #[serde(default)]
    pub cpu: String,
}

/// FLCluster status, written by the training-progress reporter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FLClusterStatus {
    /// Total training time in seconds.
    #[serde(default)]
    pub global_training_time: i64,

    /// Completed global rounds.
    #[serde(default)]
    pub global_rounds: i32,

    /// Latest global accuracy.
    #[serde(default)]
    #[schemars(schema_with = "number_or_string")]
    pub global_accuracy: Accuracy,

    /// Per-round local training records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub local_trainings: Vec<LocalTrainingData>,
}

/// One local training round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalTrainingData {
    /// Edge client shape active in this round.
    #[serde(default)]
    pub edge_client: Device,

    /// Edge server shape active in this round.
    #[serde(default)]
    pub edge_server: Device,

    /// Local training time in seconds.
    #[serde(default)]
    pub local_training_time: i64,

    /// Local rounds run.
    #[serde(default)]
    pub local_rounds: i32,
}

/// Accuracy as reported: either a number or a free-form string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Accuracy {
    /// Numeric accuracy.
    Number(f64),
    /// Textual accuracy (e.g. "0.91" or "n/a").
    Text(String),
}

impl Default for Accuracy {
    fn default() -> Self {
        Accuracy::Text(String::new())
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accuracy::Number(n) => write!(f, "{n}"),
            Accuracy::Text(s) => f.write_str(s),
        }
    }
}

/// Structural schema for a number-or-string field.
fn number_or_string(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject::default();
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn device(cpu: &str, memory: &str) -> Device {
        Device {
            replica: 1,
            resources: Resources {
                cpu: cpu.into(),
                memory: memory.into(),
            },
        }
    }

    #[test]
    fn spec_uses_declared_json_tags() {
        let spec = FLClusterSpec {
            central_server: Some(device("500m", "1Gi")),
            edge_server: Some(vec![device("1", "2Gi")]),
            edge_client: vec![device("250m", "512Mi")],
            dataset: Some("mnist".into()),
            model_name: Some("resnet".into()),
            edge_based: Some(Flag::True),
            ..Default::default()
        };

        let json = serde_json::to_value(&spec).expect("Failed to serialize FLClusterSpec");
        assert_eq!(json["centralServer"]["resources"]["cpu"], "500m");
        assert_eq!(json["edgeServer"][0]["replica"], 1);
        assert_eq!(json["edgeClient"][0]["resources"]["memory"], "512Mi");
        assert_eq!(json["modelName"], "resnet");
        assert_eq!(json["edgeBased"], "True");
        assert!(json.get("offload").is_none());
    }

    #[test]
    fn flag_rejects_other_spellings() {
        let err = serde_json::from_value::<FLClusterSpec>(serde_json::json!({
            "edgeClient": [],
            "offload": "yes"
        }));
        assert!(err.is_err());
        assert_eq!("True".parse::<Flag>(), Ok(Flag::True));
        assert!("true".parse::<Flag>().is_err());
    }

    #[test]
    fn effective_values_fall_back_to_defaults() {
        let spec = FLClusterSpec::default();
        assert_eq!(spec.dataset(), "cifar10");
        assert_eq!(spec.model_name(), "vgg");
        assert_eq!(spec.splitting(), "none_splitting");
        assert_eq!(spec.aggregation(), "fed_avg");
        assert_eq!(spec.clustering(), "none_clustering");
        assert_eq!(spec.index(), "0");
        assert_eq!(spec.edge_based(), Flag::False);
        assert_eq!(spec.offload(), Flag::False);

        let split = FLClusterSpec {
            splitting: Some("layer_splitting".into()),
            edge_server: Some(vec![Device::default()]),
            ..Default::default()
        };
        assert_eq!(split.offload(), Flag::True);
        assert_eq!(split.edge_based(), Flag::True);
    }

    #[test]
    fn accuracy_accepts_number_or_string() {
        let status: FLClusterStatus = serde_json::from_value(serde_json::json!({
            "globalTrainingTime": 12,
            "globalRounds": 3,
            "globalAccuracy": 0.87
        }))
        .unwrap();
        assert_eq!(status.global_accuracy, Accuracy::Number(0.87));

        let status: FLClusterStatus = serde_json::from_value(serde_json::json!({
            "globalAccuracy": "87%"
        }))
        .unwrap();
        assert_eq!(status.global_accuracy, Accuracy::Text("87%".into()));
        assert_eq!(status.global_rounds, 0);
    }

    #[test]
    fn crd_has_status_subresource() {
        let crd = FLCluster::crd();
        assert_eq!(crd.spec.group, "kfl.aut.tech");
        assert_eq!(crd.spec.names.kind, "FLCluster");
        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1alpha1");
        assert!(version.subresources.as_ref().unwrap().status.is_some());
    }
}
