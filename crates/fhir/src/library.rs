//! Library wire model.
//!
//! Libraries carry CQL source text and, when available, compiled ELM JSON as base64
//! attachments.

use crate::coding::{CodeableConcept, Coding};
use crate::{expect_resource_type, parse_json, FhirError, FhirResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

pub const RESOURCE_TYPE: &str = "Library";

/// Code system of the Library `type` element.
pub const LIBRARY_TYPE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/library-type";

pub const CQL_CONTENT_TYPE: &str = "text/cql";
pub const ELM_CONTENT_TYPE: &str = "application/elm+json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Library {
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

    pub status: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub library_type: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Attachment>,
}

impl Library {
    /// A draft logic library with no content.
    pub fn logic_library(id: impl Into<String>) -> Self {
        Self {
            resource_type: RESOURCE_TYPE.into(),
            id: id.into(),
            url: None,
            version: None,
            name: None,
            title: None,
            status: "draft".into(),
            library_type: Some(CodeableConcept::from_coding(Coding::new(
                LIBRARY_TYPE_SYSTEM,
                "logic-library",
                Some("Logic Library".into()),
            ))),
            publisher: None,
            description: None,
            content: Vec::new(),
        }
    }

    /// Attach CQL source text.
    pub fn with_cql(mut self, cql: &str) -> Self {
        self.content.push(Attachment::encode(CQL_CONTENT_TYPE, cql));
        self
    }

    /// Attach compiled ELM JSON.
    pub fn with_elm(mut self, elm_json: &str) -> Self {
        self.content.push(Attachment::encode(ELM_CONTENT_TYPE, elm_json));
        self
    }

    /// Decoded text of the first attachment with `content_type`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] if the attachment is not valid base64 UTF-8.
    pub fn content_text(&self, content_type: &str) -> FhirResult<Option<String>> {
        self.content
            .iter()
            .find(|a| a.content_type == content_type)
            .map(Attachment::decode)
            .transpose()
    }

    /// Parse a Library from JSON text, checking `resourceType`.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] on schema mismatch or a wrong `resourceType`.
    pub fn parse(json_text: &str) -> FhirResult<Self> {
        let parsed: Self = parse_json(RESOURCE_TYPE, json_text)?;
        expect_resource_type(RESOURCE_TYPE, &parsed.resource_type)?;
        Ok(parsed)
    }
}

/// Inline content, base64 encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub content_type: String,
    pub data: String,
}

impl Attachment {
    pub fn encode(content_type: &str, text: &str) -> Self {
        Self {
            content_type: content_type.into(),
            data: STANDARD.encode(text.as_bytes()),
        }
    }

    /// Decode the attachment back to text.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] for invalid base64 or non-UTF-8 content.
    pub fn decode(&self) -> FhirResult<String> {
        let bytes = STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| FhirError::Translation(format!("invalid base64 attachment: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| FhirError::Translation(format!("attachment is not UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cql_content_is_base64_encoded() {
        let library = Library::logic_library("LIBFoo").with_cql("library LIBFoo version '1'");
        assert_eq!(library.content[0].content_type, "text/cql");
        assert_ne!(library.content[0].data, "library LIBFoo version '1'");
        let text = library
            .content_text(CQL_CONTENT_TYPE)
            .expect("decodes")
            .expect("present");
        assert_eq!(text, "library LIBFoo version '1'");
    }

    #[test]
    fn missing_content_type_yields_none() {
        let library = Library::logic_library("LIBFoo");
        assert!(library.content_text(ELM_CONTENT_TYPE).expect("ok").is_none());
    }

    #[test]
    fn invalid_base64_is_reported() {
        let attachment = Attachment {
            content_type: CQL_CONTENT_TYPE.into(),
            data: "***".into(),
        };
        assert!(matches!(attachment.decode(), Err(FhirError::Translation(_))));
    }
}
