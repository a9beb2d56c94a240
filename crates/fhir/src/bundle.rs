//! Transaction Bundle wire model.

use crate::activity_definition::{self, ActivityDefinition};
use crate::library::{self, Library};
use crate::plan_definition::{self, PlanDefinition};
use crate::{expect_resource_type, parse_json, FhirResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

pub const RESOURCE_TYPE: &str = "Bundle";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub resource_type: String,

    pub id: String,

    #[serde(rename = "type")]
    pub bundle_type: String,

    #[serde(default)]
    pub entry: Vec<BundleEntry>,
}

impl Bundle {
    /// An empty transaction bundle.
    pub fn transaction(id: impl Into<String>) -> Self {
        Self {
            resource_type: RESOURCE_TYPE.into(),
            id: id.into(),
            bundle_type: "transaction".into(),
            entry: Vec::new(),
        }
    }

    /// Append a `PUT` entry for `resource`, addressed at `<base_url>/<ResourceType>/<id>`.
    pub fn push_put(&mut self, base_url: &str, resource: impl Into<BundleResource>) {
        let resource = resource.into();
        let relative = format!("{}/{}", resource.resource_type(), resource.id());
        self.entry.push(BundleEntry {
            full_url: format!("{}/{}", base_url.trim_end_matches('/'), relative),
            resource,
            request: BundleRequest {
                method: "PUT".into(),
                url: relative,
            },
        });
    }

    pub fn libraries(&self) -> impl Iterator<Item = &Library> {
        self.entry.iter().filter_map(|e| match &e.resource {
            BundleResource::Library(r) => Some(r),
            _ => None,
        })
    }

    pub fn activity_definitions(&self) -> impl Iterator<Item = &ActivityDefinition> {
        self.entry.iter().filter_map(|e| match &e.resource {
            BundleResource::ActivityDefinition(r) => Some(r),
            _ => None,
        })
    }

    pub fn plan_definitions(&self) -> impl Iterator<Item = &PlanDefinition> {
        self.entry.iter().filter_map(|e| match &e.resource {
            BundleResource::PlanDefinition(r) => Some(r),
            _ => None,
        })
    }

    /// Parse a Bundle from JSON text, checking `resourceType`.
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

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    pub full_url: String,
    pub resource: BundleResource,
    pub request: BundleRequest,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRequest {
    pub method: String,
    pub url: String,
}

/// The resources a pathway export can place in a bundle.
#[derive(Clone, Debug, PartialEq)]
pub enum BundleResource {
    Library(Library),
    ActivityDefinition(ActivityDefinition),
    PlanDefinition(PlanDefinition),
}

impl BundleResource {
    pub fn resource_type(&self) -> &str {
        match self {
            BundleResource::Library(r) => &r.resource_type,
            BundleResource::ActivityDefinition(r) => &r.resource_type,
            BundleResource::PlanDefinition(r) => &r.resource_type,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            BundleResource::Library(r) => &r.id,
            BundleResource::ActivityDefinition(r) => &r.id,
            BundleResource::PlanDefinition(r) => &r.id,
        }
    }
}

impl From<Library> for BundleResource {
    fn from(r: Library) -> Self {
        BundleResource::Library(r)
    }
}

impl From<ActivityDefinition> for BundleResource {
    fn from(r: ActivityDefinition) -> Self {
        BundleResource::ActivityDefinition(r)
    }
}

impl From<PlanDefinition> for BundleResource {
    fn from(r: PlanDefinition) -> Self {
        BundleResource::PlanDefinition(r)
    }
}

impl Serialize for BundleResource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            BundleResource::Library(r) => r.serialize(serializer),
            BundleResource::ActivityDefinition(r) => r.serialize(serializer),
            BundleResource::PlanDefinition(r) => r.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for BundleResource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let value = Value::deserialize(deserializer)?;
        let resource_type = value
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::missing_field("resourceType"))?
            .to_owned();

        match resource_type.as_str() {
            library::RESOURCE_TYPE => serde_json::from_value(value)
                .map(BundleResource::Library)
                .map_err(D::Error::custom),
            activity_definition::RESOURCE_TYPE => serde_json::from_value(value)
                .map(BundleResource::ActivityDefinition)
                .map_err(D::Error::custom),
            plan_definition::RESOURCE_TYPE => serde_json::from_value(value)
                .map(BundleResource::PlanDefinition)
                .map_err(D::Error::custom),
            other => Err(D::Error::custom(format!(
                "unsupported bundle resource type '{other}'"
            ))),
        }
    }
}
