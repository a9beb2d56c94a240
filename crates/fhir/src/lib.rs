//! FHIR wire/boundary support for clinical pathways.
//!
//! This crate provides **wire models** and **format helpers** for the FHIR R4 resources a
//! pathway touches:
//! - the action templates authored in the editor (`MedicationRequest`, `ServiceRequest`,
//!   `CarePlan`)
//! - the Clinical Practice Guideline output of an export (`PlanDefinition`,
//!   `ActivityDefinition`, `Library`) and the transaction `Bundle` that carries them
//!
//! This crate focuses on:
//! - serialisation/deserialisation with field-path error reporting
//! - small constructors and accessors the exporters need
//!
//! It does not validate resources against FHIR profiles.

pub mod activity_definition;
pub mod bundle;
pub mod coding;
pub mod library;
pub mod plan_definition;
pub mod request;

// Re-export facades
pub use activity_definition::ActivityDefinition;
pub use bundle::{Bundle, BundleEntry, BundleRequest, BundleResource};
pub use coding::{CodeableConcept, Coding};
pub use library::{Attachment, Library};
pub use plan_definition::{
    ActionCondition, ActionRelationship, Expression, PlanDefinition, PlanDefinitionAction,
    RelatedAction,
};
pub use request::{ActionResource, CarePlan, MedicationRequest, ServiceRequest, UnsupportedResource};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("translation error: {0}")]
    Translation(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;

/// Parse a wire model from JSON text.
///
/// This uses `serde_path_to_error` to surface the path (e.g. `entry.0.resource.kind`) of the
/// failing field when the JSON does not match the wire schema.
///
/// # Errors
///
/// Returns [`FhirError::Translation`] naming the failing path and the underlying cause.
pub fn parse_json<T: DeserializeOwned>(what: &str, json_text: &str) -> FhirResult<T> {
    let mut deserializer = serde_json::Deserializer::from_str(json_text);
    serde_path_to_error::deserialize::<_, T>(&mut deserializer).map_err(|err| {
        let path = err.path().to_string();
        let source = err.into_inner();
        let path = if path.is_empty() || path == "." {
            "<root>".to_string()
        } else {
            path
        };
        FhirError::Translation(format!("{what} schema mismatch at {path}: {source}"))
    })
}

/// Render a wire model as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`FhirError::InvalidJson`] if serialisation fails.
pub fn render_json<T: Serialize>(value: &T) -> FhirResult<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Render a wire model as YAML.
///
/// # Errors
///
/// Returns [`FhirError::InvalidYaml`] if serialisation fails.
pub fn render_yaml<T: Serialize>(value: &T) -> FhirResult<String> {
    Ok(serde_yaml::to_string(value)?)
}

/// Ensure a parsed resource carries the expected `resourceType`.
pub(crate) fn expect_resource_type(expected: &str, actual: &str) -> FhirResult<()> {
    if actual != expected {
        return Err(FhirError::InvalidInput(format!(
            "Expected resourceType '{expected}', got '{actual}'"
        )));
    }
    Ok(())
}
