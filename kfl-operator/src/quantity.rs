//! Resource quantity parsing and translation.
//!
//! Device shapes carry CPU and memory as free-form strings. This module checks
//! them against the quantity grammar, turns them into `k8s_openapi`
//! [`Quantity`] values and builds the container [`ResourceRequirements`] the
//! generators attach to every workload.
//!
//! Accepted grammar: `[sign]digits[.digits][suffix]` where the suffix is one of
//! the binary units (`Ki`, `Mi`, `Gi`, `Ti`, `Pi`, `Ei`), a decimal unit
//! (`n`, `u`, `m`, `k`, `K`, `M`, `G`, `T`, `P`, `E`) or a decimal exponent
//! (`e`/`E` followed by `[sign]digits`).

use crate::crd::Resources;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;

/// Quantity grammar, anchored.
///
/// Captures: 1 = sign, 2 = number, 3 = unit suffix or exponent.
static QUANTITY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([+-]?)([0-9]+(?:\.[0-9]+)?|\.[0-9]+)(?:(Ki|Mi|Gi|Ti|Pi|Ei|[numkKMGTP]|[eE](?:[+-]?[0-9]+)?))?$",
    )
    .expect("QUANTITY_PATTERN is a valid regex")
});

/// Relative tolerance used when comparing two parsed quantities.
const EQUALITY_TOLERANCE: f64 = 1e-9;

/// Errors produced while parsing a quantity string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    /// The string does not follow the quantity grammar.
    #[error("{field} value {value:?} does not match the resource quantity pattern")]
    Malformed {
        /// Resource dimension being parsed (cpu or memory).
        field: &'static str,
        /// Offending value.
        value: String,
    },
}

/// A quantity string that passed the grammar check, with its numeric value.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuantity {
    raw: String,
    value: f64,
}

impl ParsedQuantity {
    /// Parse `value` for the given resource dimension.
    pub fn parse(field: &'static str, value: &str) -> Result<Self, QuantityError> {
        let malformed = || QuantityError::Malformed {
            field,
            value: value.to_string(),
        };

        let caps = QUANTITY_PATTERN.captures(value).ok_or_else(malformed)?;
        let sign = if caps.get(1).map(|m| m.as_str()) == Some("-") {
            -1.0
        } else {
            1.0
        };
        let number: f64 = caps[2].parse().map_err(|_| malformed())?;
        let multiplier = match caps.get(3).map(|m| m.as_str()) {
            None => 1.0,
            Some(suffix) => suffix_multiplier(suffix).ok_or_else(malformed)?,
        };

        // 0 scaled by an overflowed exponent is still 0.
        let amount = if number == 0.0 {
            0.0
        } else {
            sign * number * multiplier
        };

        Ok(Self {
            raw: value.to_string(),
            value: amount,
        })
    }

    /// The original string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The numeric value in base units (cores, bytes).
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Whether two quantities denote the same amount, e.g. `1000m` and `1`.
    pub fn same_amount(&self, other: &ParsedQuantity) -> bool {
        if !self.value.is_finite() || !other.value.is_finite() {
            return self.value == other.value;
        }
        let scale = self.value.abs().max(other.value.abs()).max(1e-12);
        (self.value - other.value).abs() / scale <= EQUALITY_TOLERANCE
    }

    /// Convert into the platform representation.
    pub fn into_quantity(self) -> Quantity {
        Quantity(self.raw)
    }
}

fn suffix_multiplier(suffix: &str) -> Option<f64> {
    let m = match suffix {
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" | "K" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        // A bare exponent marker with no digits is the exa suffix.
        "E" | "e" => 1e18,
        exp => {
            // The grammar guarantees digits, so a parse failure is overflow.
            let digits = &exp[1..];
            let power = digits.parse::<i32>().unwrap_or(if digits.starts_with('-') {
                i32::MIN
            } else {
                i32::MAX
            });
            10f64.powi(power)
        }
    };
    Some(m)
}

/// Check a quantity string without keeping the result. Empty strings pass.
pub fn validate(field: &'static str, value: &str) -> Result<(), QuantityError> {
    if value.is_empty() {
        return Ok(());
    }
    ParsedQuantity::parse(field, value).map(|_| ())
}

/// Compare two quantity strings by amount; falls back to string equality
/// when either side does not parse.
pub fn equivalent(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (
        ParsedQuantity::parse("quantity", a),
        ParsedQuantity::parse("quantity", b),
    ) {
        (Ok(a), Ok(b)) => a.same_amount(&b),
        _ => false,
    }
}

/// Translate a device resource shape into container resource requirements.
///
/// Requests and limits are set to the same value. Empty strings leave the
/// dimension out entirely; if both are empty the result has neither map.
pub fn resource_requirements(resources: &Resources) -> Result<ResourceRequirements, QuantityError> {
    let mut list = BTreeMap::new();

    if !resources.cpu.is_empty() {
        let cpu = ParsedQuantity::parse("cpu", &resources.cpu)?;
        list.insert("cpu".to_string(), cpu.into_quantity());
    }
    if !resources.memory.is_empty() {
        let memory = ParsedQuantity::parse("memory", &resources.memory)?;
        list.insert("memory".to_string(), memory.into_quantity());
    }

    if list.is_empty() {
        return Ok(ResourceRequirements::default());
    }

    Ok(ResourceRequirements {
        requests: Some(list.clone()),
        limits: Some(list),
        ..Default::default()
    })
}
