//! ActivityDefinition wire model.
//!
//! One ActivityDefinition is emitted per distinct `(system, code)` pair found on pathway
//! actions; PlanDefinition actions point at it through `definitionCanonical`.

use crate::coding::CodeableConcept;
use crate::{expect_resource_type, parse_json, FhirResult};
use serde::{Deserialize, Serialize};

pub const RESOURCE_TYPE: &str = "ActivityDefinition";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDefinition {
    pub resource_type: String,

    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub status: String,

    /// The resource type the activity instantiates (`MedicationRequest`, ...).
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_codeable_concept: Option<CodeableConcept>,
}

impl ActivityDefinition {
    /// A draft ActivityDefinition of the given kind.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            resource_type: RESOURCE_TYPE.into(),
            id: id.into(),
            url: None,
            name: None,
            title: None,
            status: "draft".into(),
            kind: kind.into(),
            description: None,
            code: None,
            product_codeable_concept: None,
        }
    }

    /// Parse an ActivityDefinition from JSON text, checking `resourceType`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FhirError`] on schema mismatch or a wrong `resourceType`.
    pub fn parse(json_text: &str) -> FhirResult<Self> {
        let parsed: Self = parse_json(RESOURCE_TYPE, json_text)?;
        expect_resource_type(RESOURCE_TYPE, &parsed.resource_type)?;
        Ok(parsed)
    }
}
