//! Admission handling for FLCluster objects.
//!
//! The defaulting hook fills unset fields and lifts legacy single-device
//! fields into lists, answering with a JSON patch. The validating hook
//! applies the create, update and delete rules from [`crate::validation`].
//! Both are pure; the `kfl-webhook` binary only moves bytes.

use crate::crd::{DecodedSpec, FLClusterSpec, decode_spec};
use crate::validation::{self, ValidationError};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use serde_json::{Map, Value};
use thiserror::Error;

/// Path of the defaulting hook.
pub const MUTATE_PATH: &str = "/mutate-kfl-aut-tech-v1alpha1-flcluster";
/// Path of the validating hook.
pub const VALIDATE_PATH: &str = "/validate-kfl-aut-tech-v1alpha1-flcluster";

/// Raw flag fields, checked separately so rule order holds for bad spellings.
const FLAG_FIELDS: [&str; 2] = ["edgeBased", "offload"];

/// Why an admission request could not be processed.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The request carries no object where one is required.
    #[error("admission request has no {0}")]
    MissingObject(&'static str),

    /// The object's spec does not decode.
    #[error("invalid FLCluster spec: {0}")]
    Decode(#[from] serde_json::Error),

    /// The declaration breaks a validation rule.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// A spec as admitted: decoded fields plus the raw flag values.
#[derive(Debug, Clone)]
pub struct AdmittedSpec {
    /// Decoded spec with the flags left unset.
    pub decoded: DecodedSpec,
    /// Raw `edgeBased` value, if present.
    pub edge_based: Option<Value>,
    /// Raw `offload` value, if present.
    pub offload: Option<Value>,
}

impl AdmittedSpec {
    /// Decode the spec of an admitted object.
    pub fn from_object(object: &DynamicObject) -> Result<Self, AdmissionError> {
        let mut spec = match object.data.get("spec") {
            Some(Value::Object(fields)) => fields.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(AdmissionError::Decode(serde::de::Error::custom(
                    "spec must be an object",
                )));
            }
        };
        let edge_based = spec.remove(FLAG_FIELDS[0]);
        let offload = spec.remove(FLAG_FIELDS[1]);
        let decoded = decode_spec(Value::Object(spec))?;

        Ok(Self {
            decoded,
            edge_based,
            offload,
        })
    }

    /// Run the create rules, then the flag rules.
    pub fn validate_create(&self) -> Result<FLClusterSpec, ValidationError> {
        validation::validate_create(&self.decoded.spec)?;
        self.with_flags()
    }

    /// The spec with its flags parsed. Fails on a badly spelled flag.
    pub fn with_flags(&self) -> Result<FLClusterSpec, ValidationError> {
        let mut spec = self.decoded.spec.clone();
        spec.edge_based = validation::check_flag(FLAG_FIELDS[0], self.edge_based.as_ref())?;
        spec.offload = validation::check_flag(FLAG_FIELDS[1], self.offload.as_ref())?;
        Ok(spec)
    }
}

/// JSON patch that defaults `object` and migrates legacy fields.
///
/// Badly spelled flags are left as they are for the validating hook to reject.
pub fn defaulting_patch(object: &DynamicObject) -> Result<json_patch::Patch, AdmissionError> {
    let admitted = AdmittedSpec::from_object(object)?;
    if admitted.decoded.converted {
        tracing::info!(
            name = object.metadata.name.as_deref().unwrap_or_default(),
            "Migrating legacy FLCluster spec to edge lists"
        );
    }

    let mut spec = admitted.decoded.spec.clone();
    spec.edge_based = validation::check_flag(FLAG_FIELDS[0], admitted.edge_based.as_ref())
        .ok()
        .flatten();
    spec.offload = validation::check_flag(FLAG_FIELDS[1], admitted.offload.as_ref())
        .ok()
        .flatten();
    validation::apply_defaults(&mut spec);

    let mut defaulted = serde_json::to_value(&spec)?;
    if let Value::Object(fields) = &mut defaulted {
        for (&field, raw) in FLAG_FIELDS.iter().zip([&admitted.edge_based, &admitted.offload]) {
            if let Some(raw) = raw {
                if validation::check_flag(field, Some(raw)).is_err() {
                    fields.insert(field.to_string(), raw.clone());
                }
            }
        }
    }

    let original = serde_json::to_value(object)?;
    let mut patched = original.clone();
    patched["spec"] = defaulted;
    Ok(json_patch::diff(&original, &patched))
}

/// Apply the validation rules for `operation`.
pub fn check(
    operation: &Operation,
    object: Option<&DynamicObject>,
    old_object: Option<&DynamicObject>,
) -> Result<(), AdmissionError> {
    match operation {
        Operation::Create => {
            let object = object.ok_or(AdmissionError::MissingObject("object"))?;
            AdmittedSpec::from_object(object)?.validate_create()?;
        }
        Operation::Update => {
            let object = object.ok_or(AdmissionError::MissingObject("object"))?;
            let old = old_object.ok_or(AdmissionError::MissingObject("oldObject"))?;
            let new = AdmittedSpec::from_object(object)?;
            let old = AdmittedSpec::from_object(old)?;
            validation::validate_update(&old.decoded.spec, &new.decoded.spec)?;
            new.with_flags()?;
        }
        Operation::Delete => {
            let spec = old_object
                .and_then(|o| AdmittedSpec::from_object(o).ok())
                .map(|a| a.decoded.spec)
                .unwrap_or_default();
            validation::validate_delete(&spec)?;
        }
        Operation::Connect => {}
    }
    Ok(())
}

/// Defaulting hook.
pub fn mutate(request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);
    if !matches!(request.operation, Operation::Create | Operation::Update) {
        return response;
    }
    let Some(object) = &request.object else {
        return response;
    };

    match defaulting_patch(object) {
        Ok(patch) if patch.0.is_empty() => response,
        Ok(patch) => {
            tracing::info!(
                uid = %request.uid,
                name = %request.name,
                operations = patch.0.len(),
                "Defaulting FLCluster"
            );
            response.with_patch(patch).unwrap_or_else(|e| {
                tracing::error!(uid = %request.uid, error = %e, "Failed to serialize patch");
                AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
            })
        }
        Err(e) => {
            tracing::warn!(uid = %request.uid, error = %e, "Cannot default FLCluster");
            response.deny(e.to_string())
        }
    }
}

/// Validating hook.
pub fn validate(request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);
    match check(
        &request.operation,
        request.object.as_ref(),
        request.old_object.as_ref(),
    ) {
        Ok(()) => response,
        Err(e) => {
            tracing::info!(
                uid = %request.uid,
                name = %request.name,
                operation = ?request.operation,
                reason = %e,
                "Rejecting FLCluster"
            );
            response.deny(e.to_string())
        }
    }
}

/// Parse an AdmissionReview body and answer it with `hook`.
pub fn review(
    body: &[u8],
    hook: fn(&AdmissionRequest<DynamicObject>) -> AdmissionResponse,
) -> AdmissionReview<DynamicObject> {
    let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(body) {
        Ok(review) => review,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse AdmissionReview");
            return AdmissionResponse::invalid(e.to_string()).into_review();
        }
    };
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            tracing::error!(error = %e, "AdmissionReview has no request");
            return AdmissionResponse::invalid(e.to_string()).into_review();
        }
    };
    hook(&request).into_review()
}
