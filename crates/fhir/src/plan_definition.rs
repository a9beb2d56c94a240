//! PlanDefinition wire model and its nested action tree.
//!
//! Branching in a PlanDefinition is expressed as applicability conditions on child actions,
//! and ordering between actions as `relatedAction` edges. Nested `action` lists group the
//! children of a decision that is itself conditional.

use crate::coding::{CodeableConcept, Coding};
use crate::{expect_resource_type, parse_json, FhirResult};
use serde::{Deserialize, Serialize};

pub const RESOURCE_TYPE: &str = "PlanDefinition";

/// Code system of the PlanDefinition `type` element.
pub const PLAN_DEFINITION_TYPE_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/plan-definition-type";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDefinition {
    pub resource_type: String,

    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<CodeableConcept>,

    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub library: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action: Vec<PlanDefinitionAction>,
}

impl PlanDefinition {
    /// A draft clinical-protocol PlanDefinition with no actions.
    pub fn clinical_protocol(id: impl Into<String>) -> Self {
        Self {
            resource_type: RESOURCE_TYPE.into(),
            id: id.into(),
            url: None,
            version: None,
            name: None,
            title: None,
            plan_type: Some(CodeableConcept::from_coding(Coding::new(
                PLAN_DEFINITION_TYPE_SYSTEM,
                "clinical-protocol",
                Some("Clinical Protocol".into()),
            ))),
            status: "draft".into(),
            date: None,
            publisher: None,
            description: None,
            library: Vec::new(),
            action: Vec::new(),
        }
    }

    /// Parse a PlanDefinition from JSON text, checking `resourceType`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FhirError`] on schema mismatch or a wrong `resourceType`.
    pub fn parse(json_text: &str) -> FhirResult<Self> {
        let parsed: Self = parse_json(RESOURCE_TYPE, json_text)?;
        expect_resource_type(RESOURCE_TYPE, &parsed.resource_type)?;
        Ok(parsed)
    }

    /// Depth-first search of the action tree for the action with `id`.
    pub fn find_action(&self, id: &str) -> Option<&PlanDefinitionAction> {
        let mut stack: Vec<&PlanDefinitionAction> = self.action.iter().collect();
        while let Some(action) = stack.pop() {
            if action.id == id {
                return Some(action);
            }
            stack.extend(action.action.iter());
        }
        None
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDefinitionAction {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub condition: Vec<ActionCondition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_action: Vec<RelatedAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_canonical: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action: Vec<PlanDefinitionAction>,
}

impl PlanDefinitionAction {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// An applicability condition written in CQL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionCondition {
    pub kind: String,
    pub expression: Expression,
}

impl ActionCondition {
    /// An `applicability` condition evaluating the CQL `expression`.
    pub fn applicability(expression: impl Into<String>, description: Option<String>) -> Self {
        Self {
            kind: "applicability".into(),
            expression: Expression {
                language: "text/cql".into(),
                expression: expression.into(),
                description,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub language: String,
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionRelationship {
    BeforeStart,
    AfterEnd,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedAction {
    pub action_id: String,
    pub relationship: ActionRelationship,
}

impl RelatedAction {
    pub fn new(action_id: impl Into<String>, relationship: ActionRelationship) -> Self {
        Self {
            action_id: action_id.into(),
            relationship,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_uses_kebab_case() {
        let related = RelatedAction::new("a1", ActionRelationship::AfterEnd);
        let json = serde_json::to_value(&related).expect("serialize");
        assert_eq!(json["relationship"], "after-end");
        assert_eq!(json["actionId"], "a1");
    }

    #[test]
    fn empty_collections_are_not_serialised() {
        let plan = PlanDefinition::clinical_protocol("p1");
        let json = serde_json::to_value(&plan).expect("serialize");
        assert!(json.get("action").is_none());
        assert!(json.get("library").is_none());
        assert_eq!(json["type"]["coding"][0]["code"], "clinical-protocol");
    }

    #[test]
    fn find_action_searches_nested_actions() {
        let mut plan = PlanDefinition::clinical_protocol("p1");
        let mut group = PlanDefinitionAction::new("group");
        group.action.push(PlanDefinitionAction::new("child"));
        plan.action.push(group);

        assert!(plan.find_action("child").is_some());
        assert!(plan.find_action("missing").is_none());
    }

    #[test]
    fn parse_rejects_wrong_resource_type() {
        let json = r#"{ "resourceType": "Library", "id": "x", "status": "draft" }"#;
        let err = PlanDefinition::parse(json).expect_err("wrong type");
        assert!(err.to_string().contains("Expected resourceType 'PlanDefinition'"));
    }

    #[test]
    fn parse_reports_failing_path() {
        let json = r#"{ "resourceType": "PlanDefinition", "id": "x", "status": "draft",
            "action": [{ "id": 7 }] }"#;
        let err = PlanDefinition::parse(json).expect_err("id must be a string");
        assert!(err.to_string().contains("action[0].id"), "{err}");
    }
}
