//! Semantic comparison of desired and observed objects.
//!
//! The platform fills in defaults and bookkeeping on every object it stores,
//! so structural equality against an observed object is always false. The
//! engine instead asks whether every field the generator sets is present in
//! the observed object with the same meaning.

use crate::error::OperatorResult;
use crate::quantity;
use crate::resources::ChildObject;
use serde_json::Value;

/// Keys whose children are resource quantities.
const QUANTITY_MAPS: [&str; 3] = ["requests", "limits", "capacity"];

/// Whether `observed` has drifted from `desired`.
pub fn needs_update(desired: &ChildObject, observed: &ChildObject) -> OperatorResult<bool> {
    let desired = desired.to_value()?;
    let observed = observed.to_value()?;
    Ok(!is_subset(&desired, Some(&observed), false))
}

/// `desired` is contained in `observed`.
///
/// Objects compare key-wise, arrays element-wise with equal length, scalars by
/// value. Null and empty desired containers match absent observed fields.
/// With `quantities` set, strings compare by amount.
pub fn is_subset(desired: &Value, observed: Option<&Value>, quantities: bool) -> bool {
    let observed = observed.filter(|v| !v.is_null());

    match desired {
        Value::Null => true,
        Value::Object(fields) => {
            let observed = match observed {
                None => None,
                Some(Value::Object(o)) => Some(o),
                Some(_) => return false,
            };
            fields.iter().all(|(key, value)| {
                let nested = quantities || QUANTITY_MAPS.contains(&key.as_str());
                is_subset(value, observed.and_then(|o| o.get(key)), nested)
            })
        }
        Value::Array(items) if items.is_empty() => match observed {
            None => true,
            Some(Value::Array(o)) => o.is_empty(),
            Some(_) => false,
        },
        Value::Array(items) => match observed {
            Some(Value::Array(o)) if o.len() == items.len() => items
                .iter()
                .zip(o)
                .all(|(d, o)| is_subset(d, Some(o), quantities)),
            _ => false,
        },
        Value::String(d) if quantities => match observed {
            Some(Value::String(o)) => quantity::equivalent(d, o),
            _ => false,
        },
        scalar => observed == Some(scalar),
    }
}

/// Copy fields the server owns from `observed` into `desired` before a replace.
///
/// Without them a replace is rejected (`resourceVersion`, Service cluster IPs,
/// defaulted immutable PVC fields) or would undo binding state (PVC
/// `volumeName`, PV `claimRef`).
pub fn adopt_server_fields(desired: &mut ChildObject, observed: &ChildObject) {
    let observed_meta = observed.meta();
    let meta = desired.meta_mut();
    meta.resource_version = observed_meta.resource_version.clone();
    if meta.annotations.is_none() {
        meta.annotations = observed_meta.annotations.clone();
    }
    if meta.finalizers.is_none() {
        meta.finalizers = observed_meta.finalizers.clone();
    }

    match (desired, observed) {
        (ChildObject::Service(d), ChildObject::Service(o)) => {
            if let (Some(ds), Some(os)) = (d.spec.as_mut(), o.spec.as_ref()) {
                ds.cluster_ip = os.cluster_ip.clone();
                ds.cluster_ips = os.cluster_ips.clone();
            }
        }
        (ChildObject::PersistentVolumeClaim(d), ChildObject::PersistentVolumeClaim(o)) => {
            if let (Some(ds), Some(os)) = (d.spec.as_mut(), o.spec.as_ref()) {
                if ds.volume_name.is_none() {
                    ds.volume_name = os.volume_name.clone();
                }
                if ds.storage_class_name.is_none() {
                    ds.storage_class_name = os.storage_class_name.clone();
                }
                if ds.volume_mode.is_none() {
                    ds.volume_mode = os.volume_mode.clone();
                }
            }
        }
        (ChildObject::PersistentVolume(d), ChildObject::PersistentVolume(o)) => {
            if let (Some(ds), Some(os)) = (d.spec.as_mut(), o.spec.as_ref()) {
                ds.claim_ref = os.claim_ref.clone();
            }
        }
        _ => {}
    }
}
