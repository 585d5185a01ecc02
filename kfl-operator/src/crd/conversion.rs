//! Decoding of stored FLCluster specs, including the legacy shape.
//!
//! Early FLCluster objects declared `edgeServer` and `edgeClient` as a single
//! device object instead of a list. Such objects may still be stored, so the
//! admission hooks decode through [`decode_spec`], which lifts a lone device
//! into a one-element list before handing the value to serde. The mutating
//! hook then rewrites the stored object into the list shape.

use super::FLClusterSpec;
use serde_json::Value;

/// Spec keys whose value used to be a single device.
const LIST_FIELDS: [&str; 2] = ["edgeServer", "edgeClient"];

/// Result of decoding a stored spec.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSpec {
    /// The spec in the current shape.
    pub spec: FLClusterSpec,
    /// Whether any field had to be converted from the legacy shape.
    pub converted: bool,
}

/// Rewrite legacy single-device fields in place. Returns whether anything changed.
pub fn upgrade_legacy(spec: &mut Value) -> bool {
    let Some(fields) = spec.as_object_mut() else {
        return false;
    };

    let mut converted = false;
    for key in LIST_FIELDS {
        if let Some(value) = fields.get_mut(key) {
            if value.is_object() {
                let device = value.take();
                *value = Value::Array(vec![device]);
                converted = true;
            }
        }
    }
    converted
}

/// Decode a spec value, accepting both the list and the legacy single-device shape.
pub fn decode_spec(mut value: Value) -> Result<DecodedSpec, serde_json::Error> {
    let converted = upgrade_legacy(&mut value);
    let spec = serde_json::from_value(value)?;
    Ok(DecodedSpec { spec, converted })
}
