//! Coding and CodeableConcept data types.

use serde::{Deserialize, Serialize};

/// A single code from a code system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default)]
    pub system: String,

    #[serde(default)]
    pub code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: impl Into<String>, code: impl Into<String>, display: Option<String>) -> Self {
        Self {
            system: system.into(),
            code: code.into(),
            display,
        }
    }
}

/// A concept expressed as one or more codings.
///
/// Pathway actions only ever inspect the first coding; further entries are carried through
/// unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default)]
    pub coding: Vec<Coding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    /// A concept with a single coding.
    pub fn from_coding(coding: Coding) -> Self {
        Self {
            coding: vec![coding],
            text: None,
        }
    }

    /// The load-bearing first coding, if any.
    pub fn first_coding(&self) -> Option<&Coding> {
        self.coding.first()
    }

    /// Mutable access to the first coding, inserting an empty one when the list is empty.
    pub fn first_coding_mut(&mut self) -> &mut Coding {
        if self.coding.is_empty() {
            self.coding.push(Coding::default());
        }
        &mut self.coding[0]
    }
}
