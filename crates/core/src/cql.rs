//! Textual CQL generation.
//!
//! Two kinds of library are produced here: the small standalone library synthesised for an
//! action node from its FHIR template ([`create_cql`]), and the navigational library that
//! stitches criteria libraries and builder-authored expressions together
//! ([`construct_cql_library`]).

use crate::config::ExportConfig;
use crate::constants::{IDENTIFIER_FALLBACK, KNOWN_CODE_SYSTEMS};
use crate::graph::codeable_concept_from_action;
use crate::model::{Action, Pathway};
use crate::{PathwayError, PathwayResult};
use fhir::{ActionResource, Coding};
use indexmap::IndexMap;
use pathways_types::CqlIdentifier;
use serde::Serialize;
use std::fmt::Write as _;

/// Build a CQL library that includes other libraries, re-exports some of their statements
/// and inlines builder-authored expressions.
///
/// * `included` maps library id to version.
/// * `referenced` maps define name to the included library that owns it.
/// * `builder` maps define name to its raw CQL expression.
///
/// Includes come first, then referenced defines, then builder defines.
pub fn construct_cql_library(
    config: &ExportConfig,
    library_name: &str,
    included: &IndexMap<String, String>,
    referenced: &IndexMap<String, String>,
    builder: &IndexMap<String, String>,
) -> String {
    let mut cql = header(config, library_name);

    for (id, version) in included {
        let _ = writeln!(cql, "include \"{id}\" version '{version}' called {id}");
    }
    cql.push_str("\ncontext Patient\n");

    for (name, library) in referenced {
        let _ = writeln!(cql, "\ndefine \"{name}\": {library}.\"{name}\"");
    }
    for (name, expression) in builder {
        let _ = writeln!(cql, "\ndefine \"{name}\": {expression}");
    }

    cql
}

fn header(config: &ExportConfig, library_name: &str) -> String {
    format!(
        "library {library_name} version '{}'\n\nusing FHIR version '{}'\n\n",
        config.library_version(),
        config.fhir_version()
    )
}

/// CQL identifier for a library derived from a pathway or criteria label.
///
/// `library_identifier("Breast Cancer", "Navigation")` gives `BreastCancerNavigation`.
pub fn library_identifier(label: &str, suffix: &str) -> String {
    format!("{}{suffix}", CqlIdentifier::from_label(label, IDENTIFIER_FALLBACK))
}

/// Qualify a statement name with its library, unless it already is.
///
/// `qualify("LIBFoo", "isMale")` and `qualify("LIBFoo", "LIBFoo.isMale")` both give
/// `LIBFoo.isMale`.
pub fn qualify(library: &str, name: &str) -> String {
    match name.strip_prefix(library) {
        Some(rest) if rest.starts_with('.') => name.to_owned(),
        _ => format!("{library}.{name}"),
    }
}

/// Identifier and version declared by the `library` line of a CQL text.
///
/// The identifier may be quoted. Returns `None` if the text has no `library` declaration.
pub fn parse_library_header(cql: &str) -> Option<(String, Option<String>)> {
    let line = cql
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("library "))?;
    let rest = line["library ".len()..].trim();

    let (name, rest) = match rest.strip_prefix('"') {
        Some(quoted) => {
            let end = quoted.find('"')?;
            (&quoted[..end], quoted[end + 1..].trim())
        }
        None => {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            (&rest[..end], rest[end..].trim())
        }
    };
    if name.is_empty() {
        return None;
    }

    let version = rest
        .strip_prefix("version")
        .map(str::trim)
        .and_then(|v| v.strip_prefix('\''))
        .and_then(|v| v.split('\'').next())
        .map(str::to_owned);

    Some((name.to_owned(), version))
}

fn cql_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Name of the `codesystem` declaration for a coding system URL.
fn code_system_name(system: &str) -> String {
    KNOWN_CODE_SYSTEMS
        .iter()
        .find(|(_, url)| *url == system)
        .map(|(name, _)| (*name).to_owned())
        .unwrap_or_else(|| CqlIdentifier::from_label(system, "CodeSystem").to_string())
}

fn code_declarations(cql: &mut String, coding: &Coding) -> String {
    let system_name = code_system_name(&coding.system);
    let code_name = format!("{} code", coding.code);

    let _ = writeln!(
        cql,
        "codesystem \"{system_name}\": '{}'",
        cql_string(&coding.system)
    );
    let _ = write!(
        cql,
        "code \"{code_name}\": '{}' from \"{system_name}\"",
        cql_string(&coding.code)
    );
    if let Some(display) = coding.display.as_deref().filter(|d| !d.is_empty()) {
        let _ = write!(cql, " display '{}'", cql_string(display));
    }
    cql.push_str("\n\n");

    code_name
}

fn first_coding<'a>(action: &'a Action, node_key: &str) -> PathwayResult<&'a Coding> {
    codeable_concept_from_action(action)
        .and_then(|concept| concept.first_coding())
        .filter(|coding| !coding.code.is_empty())
        .ok_or_else(|| PathwayError::MissingCoding(node_key.to_owned()))
}

/// Synthesise a standalone CQL library whose single define, named after `node_key`,
/// retrieves the resource `action` describes.
///
/// Medication requests are matched by code. Service requests prefer a matching completed
/// `Procedure` over the order itself. Care plans are matched by title.
///
/// # Errors
///
/// * [`PathwayError::UnsupportedResource`] for any other resource type.
/// * [`PathwayError::MissingCoding`] if a coded resource has no coding.
pub fn create_cql(config: &ExportConfig, action: &Action, node_key: &str) -> PathwayResult<String> {
    let library_name = CqlIdentifier::from_label(node_key, IDENTIFIER_FALLBACK);
    let mut cql = header(config, library_name.as_str());

    let body = match &action.resource {
        ActionResource::MedicationRequest(_) => {
            let code = code_declarations(&mut cql, first_coding(action, node_key)?);
            format!(
                "  [MedicationRequest: \"{code}\"] MR\n    \
                 return Tuple{{ resourceType: 'MedicationRequest', id: MR.id.value, status: MR.status.value }}"
            )
        }
        ActionResource::ServiceRequest(_) => {
            let code = code_declarations(&mut cql, first_coding(action, node_key)?);
            format!(
                "  if exists [Procedure: \"{code}\"] then\n    \
                 [Procedure: \"{code}\"] P\n      \
                 return Tuple{{ resourceType: 'Procedure', id: P.id.value, status: P.status.value }}\n  \
                 else\n    \
                 [ServiceRequest: \"{code}\"] SR\n      \
                 return Tuple{{ resourceType: 'ServiceRequest', id: SR.id.value, status: SR.status.value }}"
            )
        }
        ActionResource::CarePlan(plan) => {
            format!(
                "  [CarePlan] R where R.title.value='{}'\n    \
                 return Tuple{{ resourceType: 'CarePlan', id: R.id.value, status: R.status.value }}",
                cql_string(&plan.title)
            )
        }
        ActionResource::Unsupported(other) => {
            return Err(PathwayError::UnsupportedResource {
                node: node_key.to_owned(),
                resource_type: other.resource_type.clone(),
            });
        }
    };

    let _ = write!(cql, "context Patient\n\ndefine \"{node_key}\":\n{body}\n");
    Ok(cql)
}

/// CQL synthesised for one action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCql {
    pub node: String,
    pub action_id: String,
    pub cql: String,
}

/// An action CQL could not be synthesised for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCqlFailure {
    pub node: String,
    pub action_id: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ActionCqlReport {
    pub libraries: Vec<ActionCql>,
    pub failures: Vec<ActionCqlFailure>,
}

impl ActionCqlReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run [`create_cql`] over every action of every action node.
///
/// A failing action is recorded in the report and logged; the remaining actions are still
/// processed.
pub fn synthesize_action_cql(config: &ExportConfig, pathway: &Pathway) -> ActionCqlReport {
    let mut report = ActionCqlReport::default();

    for (key, node) in &pathway.nodes {
        for action in node.actions() {
            match create_cql(config, action, key) {
                Ok(cql) => report.libraries.push(ActionCql {
                    node: key.clone(),
                    action_id: action.id.clone(),
                    cql,
                }),
                Err(err) => {
                    tracing::warn!(node = key.as_str(), action = action.id.as_str(), "{err}");
                    report.failures.push(ActionCqlFailure {
                        node: key.clone(),
                        action_id: action.id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    report
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::ActionType;
    use fhir::{CarePlan, CodeableConcept, MedicationRequest, ServiceRequest, UnsupportedResource};

    pub(crate) fn service_request_action(id: &str, system: &str, code: &str) -> Action {
        Action {
            id: id.into(),
            action_type: ActionType::Create,
            description: "Procedure".into(),
            resource: ActionResource::ServiceRequest(ServiceRequest {
                code: CodeableConcept::from_coding(Coding::new(system, code, None)),
                ..ServiceRequest::default()
            }),
        }
    }

    fn map(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn empty_library_has_header_only() {
        let cql = construct_cql_library(
            &ExportConfig::default(),
            "FooLib",
            &IndexMap::new(),
            &IndexMap::new(),
            &IndexMap::new(),
        );
        assert!(cql.contains("library FooLib version '1.0'"));
        assert!(cql.contains("using FHIR version '4.0.1'"));
        assert!(!cql.contains("include"));
        assert!(!cql.contains("define"));
    }

    #[test]
    fn includes_and_defines_are_emitted_in_order() {
        let cql = construct_cql_library(
            &ExportConfig::default(),
            "FooLib",
            &map(&[("BarLib", "42")]),
            &map(&[("quxDef", "BarLib")]),
            &map(&[("isAdult", "AgeInYears() >= 18")]),
        );

        assert!(cql
            .lines()
            .any(|l| l.contains("include \"BarLib\" version '42' called BarLib")));
        assert_eq!(cql.matches("define \"quxDef\": BarLib.\"quxDef\"").count(), 1);
        assert_eq!(cql.matches("define").count(), 2);

        let include = cql.find("include").expect("include");
        let context = cql.find("context Patient").expect("context");
        let referenced = cql.find("quxDef").expect("referenced");
        let inline = cql.find("isAdult").expect("builder");
        assert!(include < context && context < referenced && referenced < inline);
    }

    #[test]
    fn library_identifier_sanitises_label() {
        assert_eq!(library_identifier("Breast Cancer", "Navigation"), "BreastCancerNavigation");
        assert_eq!(library_identifier("", "Criteria"), "PathwayCriteria");
    }

    #[test]
    fn qualify_does_not_double_prefix() {
        assert_eq!(qualify("LIBFoo", "isMale"), "LIBFoo.isMale");
        assert_eq!(qualify("LIBFoo", "LIBFoo.isMale"), "LIBFoo.isMale");
        assert_eq!(qualify("LIB", "LIBFoo.isMale"), "LIB.LIBFoo.isMale");
    }

    #[test]
    fn library_header_is_parsed() {
        let cql = "// generated\nlibrary LIBFoo version '2'\nusing FHIR version '4.0.1'\n";
        assert_eq!(
            parse_library_header(cql),
            Some(("LIBFoo".into(), Some("2".into())))
        );
        assert_eq!(
            parse_library_header("library \"Quoted\"\n"),
            Some(("Quoted".into(), None))
        );
        assert_eq!(parse_library_header("define x: 1"), None);
    }

    #[test]
    fn medication_request_retrieves_by_code() {
        let action = Action {
            id: "a1".into(),
            action_type: ActionType::Create,
            description: "Tamoxifen".into(),
            resource: ActionResource::MedicationRequest(MedicationRequest {
                medication_codeable_concept: CodeableConcept::from_coding(Coding::new(
                    "http://www.nlm.nih.gov/research/umls/rxnorm",
                    "10324",
                    Some("Tamoxifen".into()),
                )),
                ..MedicationRequest::default()
            }),
        };
        let cql = create_cql(&ExportConfig::default(), &action, "Tamoxifen").expect("cql");

        assert!(cql.contains("Tuple{ resourceType: 'MedicationRequest', "));
        assert!(cql.contains("[MedicationRequest: \"10324 code\"]"));
        assert!(cql.contains("codesystem \"RXNORM\""));
        assert!(cql.contains("display 'Tamoxifen'"));
        assert!(cql.contains("define \"Tamoxifen\":"));
    }

    #[test]
    fn service_request_prefers_procedure() {
        let action = service_request_action("a1", "http://snomed.info/sct", "392021009");
        let cql = create_cql(&ExportConfig::default(), &action, "Surgery").expect("cql");

        assert!(cql.contains("if exists [Procedure: \"392021009 code\"]"));
        assert!(cql.contains("Tuple{ resourceType: 'Procedure', "));
        assert!(cql.contains("Tuple{ resourceType: 'ServiceRequest', "));
        assert!(cql.contains("codesystem \"SNOMEDCT\": 'http://snomed.info/sct'"));
    }

    #[test]
    fn care_plan_matches_by_title() {
        let action = Action {
            id: "a1".into(),
            action_type: ActionType::Create,
            description: String::new(),
            resource: ActionResource::CarePlan(CarePlan {
                title: "Chemo".into(),
                ..CarePlan::default()
            }),
        };
        let cql = create_cql(&ExportConfig::default(), &action, "plan").expect("cql");
        assert!(cql.contains("[CarePlan] R where R.title.value='Chemo'"));
        assert!(!cql.contains("codesystem"));
    }

    #[test]
    fn unsupported_resource_is_an_error() {
        let action = Action {
            id: "a1".into(),
            action_type: ActionType::Create,
            description: String::new(),
            resource: ActionResource::Unsupported(UnsupportedResource {
                resource_type: "Observation".into(),
                body: serde_json::Map::new(),
            }),
        };
        let err = create_cql(&ExportConfig::default(), &action, "obs").expect_err("unsupported");
        assert!(matches!(
            err,
            PathwayError::UnsupportedResource { ref resource_type, .. } if resource_type == "Observation"
        ));
    }

    #[test]
    fn missing_coding_is_an_error() {
        let action = Action {
            id: "a1".into(),
            action_type: ActionType::Create,
            description: String::new(),
            resource: ActionResource::ServiceRequest(ServiceRequest::default()),
        };
        let err = create_cql(&ExportConfig::default(), &action, "n").expect_err("no coding");
        assert!(matches!(err, PathwayError::MissingCoding(_)));
    }
}
