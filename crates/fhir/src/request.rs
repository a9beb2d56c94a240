//! Action resource templates authored on pathway action nodes.
//!
//! An action wraps exactly one FHIR request-like resource. The editor knows three kinds:
//! `MedicationRequest`, `ServiceRequest` and `CarePlan`. Any other `resourceType` is kept
//! verbatim as [`UnsupportedResource`] so a document survives a load/save cycle unchanged,
//! and the exporters report it instead of failing to parse the whole pathway.
//!
//! Fields the pathway tooling does not interpret are carried in a flattened `extra` map.

use crate::coding::CodeableConcept;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

const RESOURCE_TYPE: &str = "resourceType";

/// An order for a medication, identified by `medicationCodeableConcept`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    #[serde(default)]
    pub medication_codeable_concept: CodeableConcept,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An order for a procedure or diagnostic service, identified by `code`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    #[serde(default)]
    pub code: CodeableConcept,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A care plan, matched by its `title` rather than by a code.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarePlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub code: CodeableConcept,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A resource whose `resourceType` the pathway tooling does not understand.
#[derive(Clone, Debug, PartialEq)]
pub struct UnsupportedResource {
    pub resource_type: String,
    pub body: Map<String, Value>,
}

/// The resource template carried by a pathway action.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionResource {
    MedicationRequest(MedicationRequest),
    ServiceRequest(ServiceRequest),
    CarePlan(CarePlan),
    Unsupported(UnsupportedResource),
}

impl ActionResource {
    /// The FHIR `resourceType` string of this resource.
    pub fn resource_type(&self) -> &str {
        match self {
            ActionResource::MedicationRequest(_) => "MedicationRequest",
            ActionResource::ServiceRequest(_) => "ServiceRequest",
            ActionResource::CarePlan(_) => "CarePlan",
            ActionResource::Unsupported(r) => &r.resource_type,
        }
    }

    /// The concept identifying what is ordered.
    ///
    /// `medicationCodeableConcept` for medication requests, `code` for service requests and
    /// care plans, nothing for unsupported resources.
    pub fn codeable_concept(&self) -> Option<&CodeableConcept> {
        match self {
            ActionResource::MedicationRequest(r) => Some(&r.medication_codeable_concept),
            ActionResource::ServiceRequest(r) => Some(&r.code),
            ActionResource::CarePlan(r) => Some(&r.code),
            ActionResource::Unsupported(_) => None,
        }
    }

    /// Mutable counterpart of [`ActionResource::codeable_concept`].
    pub fn codeable_concept_mut(&mut self) -> Option<&mut CodeableConcept> {
        match self {
            ActionResource::MedicationRequest(r) => Some(&mut r.medication_codeable_concept),
            ActionResource::ServiceRequest(r) => Some(&mut r.code),
            ActionResource::CarePlan(r) => Some(&mut r.code),
            ActionResource::Unsupported(_) => None,
        }
    }

    /// The care plan title, if this is a care plan.
    pub fn title(&self) -> Option<&str> {
        match self {
            ActionResource::CarePlan(r) => Some(&r.title),
            _ => None,
        }
    }
}

fn with_resource_type<T: Serialize>(resource_type: &str, resource: &T) -> serde_json::Result<Value> {
    let mut value = serde_json::to_value(resource)?;
    if let Value::Object(map) = &mut value {
        map.insert(RESOURCE_TYPE.into(), Value::String(resource_type.into()));
    }
    Ok(value)
}

impl Serialize for ActionResource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let value = match self {
            ActionResource::MedicationRequest(r) => with_resource_type("MedicationRequest", r),
            ActionResource::ServiceRequest(r) => with_resource_type("ServiceRequest", r),
            ActionResource::CarePlan(r) => with_resource_type("CarePlan", r),
            ActionResource::Unsupported(r) => {
                let mut body = r.body.clone();
                body.insert(RESOURCE_TYPE.into(), Value::String(r.resource_type.clone()));
                Ok(Value::Object(body))
            }
        }
        .map_err(serde::ser::Error::custom)?;
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ActionResource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let mut body = Map::<String, Value>::deserialize(deserializer)?;
        let resource_type = match body.remove(RESOURCE_TYPE) {
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(D::Error::custom(format!(
                    "resourceType must be a string, got {other}"
                )))
            }
            None => return Err(D::Error::missing_field(RESOURCE_TYPE)),
        };

        let resource = match resource_type.as_str() {
            "MedicationRequest" => ActionResource::MedicationRequest(
                serde_json::from_value(Value::Object(body)).map_err(D::Error::custom)?,
            ),
            "ServiceRequest" => ActionResource::ServiceRequest(
                serde_json::from_value(Value::Object(body)).map_err(D::Error::custom)?,
            ),
            "CarePlan" => ActionResource::CarePlan(
                serde_json::from_value(Value::Object(body)).map_err(D::Error::custom)?,
            ),
            _ => ActionResource::Unsupported(UnsupportedResource {
                resource_type: resource_type.clone(),
                body,
            }),
        };
        Ok(resource)
    }
}
