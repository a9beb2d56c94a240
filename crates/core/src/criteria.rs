//! Criteria: reusable, externally managed CQL-backed boolean expressions.
//!
//! The criteria collection is owned by the caller. Transitions refer to criteria by id
//! through `condition.criteriaSource`; those references are weak and have to be resolved
//! against the collection on every use.

use crate::elm::Elm;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    pub id: String,

    #[serde(default)]
    pub label: String,

    /// Name of the statement in the criteria library that evaluates the criteria.
    #[serde(default)]
    pub statement: String,

    /// For library-backed criteria, the complete CQL library text. For builder-authored
    /// criteria, the CQL expression body of the statement.
    #[serde(default)]
    pub cql: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elm: Option<Elm>,

    /// State of the visual criteria builder, when the criteria was authored there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder: Option<Value>,
}

/// Where the logic of a criteria lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CriteriaLibrary<'a> {
    /// Compiled into its own library with this identifier.
    External { id: &'a str, version: &'a str },
    /// Authored in the visual builder; only an expression body exists.
    Builder,
}

impl Criteria {
    /// Identifier and version of the library this criteria was compiled into.
    pub fn library(&self) -> CriteriaLibrary<'_> {
        match self.elm.as_ref().and_then(|elm| {
            elm.library_id()
                .map(|id| (id, elm.library.identifier.version.as_deref().unwrap_or("1")))
        }) {
            // Builder criteria may carry compiled ELM, but their `cql` is only an expression body.
            Some((id, version)) if self.builder.is_none() => {
                CriteriaLibrary::External { id, version }
            }
            _ => CriteriaLibrary::Builder,
        }
    }

    /// The statement name used when referencing this criteria from a pathway.
    pub fn statement_name(&self) -> &str {
        if self.statement.is_empty() {
            &self.label
        } else {
            &self.statement
        }
    }
}

/// Find a criteria by its id.
pub fn find_by_id<'a>(criteria: &'a [Criteria], id: &str) -> Option<&'a Criteria> {
    criteria.iter().find(|c| c.id == id)
}

/// Find the criteria compiled into the library with identifier `library_id`.
pub fn find_by_library_id<'a>(criteria: &'a [Criteria], library_id: &str) -> Option<&'a Criteria> {
    criteria
        .iter()
        .find(|c| matches!(c.library(), CriteriaLibrary::External { id, .. } if id == library_id))
}
