//! Standalone pathway documents: export to JSON and import back.
//!
//! An exported document carries one combined navigational ELM library instead of the
//! per-node and per-condition fragments the editor keeps, and none of the transient ids the
//! editor assigns. Import restores those ids.

use crate::config::ExportConfig;
use crate::constants::{NAVIGATION_LIBRARY_SUFFIX, PRECONDITIONS_LIBRARY_SUFFIX};
use crate::cql::library_identifier;
use crate::elm::{merge_elm, renamed_statement, Elm};
use crate::graph::deep_copy_pathway;
use crate::model::{Pathway, PathwayElm};
use crate::validation::validate_pathway;
use crate::{PathwayError, PathwayResult};
use pathways_uuid::ShortId;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Merge `fragment` into `target` and add its logic statement under `name`.
fn absorb(target: &mut Elm, fragment: &Elm, name: &str, context: &str) -> PathwayResult<()> {
    let statement = fragment
        .non_reserved_statement()
        .ok_or_else(|| PathwayError::MissingElmStatement(context.to_owned()))?;
    merge_elm(target, fragment);
    target.upsert_statement(renamed_statement(statement, name));
    Ok(())
}

/// Combine the ELM fragments of `pathway` into its navigational and precondition libraries.
///
/// Each action node's statement is renamed to the node key, each condition's statement to
/// the condition's `cql`, and each precondition's to its element name.
///
/// # Errors
///
/// Returns [`PathwayError::MissingElmStatement`] for a fragment with no usable statement.
pub fn build_pathway_elm(config: &ExportConfig, pathway: &Pathway) -> PathwayResult<PathwayElm> {
    let version = config.library_version();
    let mut navigational = Elm::empty(
        library_identifier(&pathway.name, NAVIGATION_LIBRARY_SUFFIX),
        version,
    );

    for (key, node) in &pathway.nodes {
        if let Some(elm) = node.action_node().and_then(|a| a.elm.as_ref()) {
            absorb(&mut navigational, elm, key, &format!("node '{key}'"))?;
        }
        for t in &node.transitions {
            if let Some(condition) = &t.condition {
                if let Some(elm) = &condition.elm {
                    let context = format!("condition on transition '{}' of node '{key}'", t.id);
                    absorb(&mut navigational, elm, &condition.cql, &context)?;
                }
            }
        }
    }

    let mut preconditions = None;
    for pre in &pathway.preconditions {
        if let Some(elm) = &pre.elm {
            let target = preconditions.get_or_insert_with(|| {
                Elm::empty(
                    library_identifier(&pathway.name, PRECONDITIONS_LIBRARY_SUFFIX),
                    version,
                )
            });
            let context = format!("precondition '{}'", pre.element_name);
            absorb(target, elm, &pre.element_name, &context)?;
        }
    }

    Ok(PathwayElm {
        navigational: Some(navigational),
        preconditions,
    })
}

/// Serialize `pathway` as a standalone JSON document.
///
/// Node keys, transition ids, action ids and embedded ELM fragments are left out; the
/// fragments are replaced by the combined libraries of [`build_pathway_elm`]. Action nodes
/// that had ELM get `cql` set to their key, the name their statement has in the combined
/// library.
///
/// # Errors
///
/// Returns the errors of [`validate_pathway`] and [`build_pathway_elm`].
pub fn export_pathway(config: &ExportConfig, pathway: &Pathway) -> PathwayResult<String> {
    validate_pathway(pathway)?;
    let combined = build_pathway_elm(config, pathway)?;

    let mut copy = deep_copy_pathway(pathway);
    for (key, node) in copy.nodes.iter_mut() {
        if node.action_node().is_some_and(|a| a.elm.is_some()) {
            Arc::make_mut(node).action_node_mut()?.cql = key.clone();
        }
    }
    copy.elm = Some(combined);

    let mut value = serde_json::to_value(&copy).map_err(PathwayError::Serialization)?;
    strip_internal_fields(&mut value);
    let json = serde_json::to_string_pretty(&value).map_err(PathwayError::Serialization)?;

    tracing::info!(pathway = pathway.id.as_str(), nodes = pathway.nodes.len(), "exported pathway");
    Ok(json)
}

fn strip_internal_fields(value: &mut Value) {
    if let Some(nodes) = value.get_mut("nodes").and_then(Value::as_object_mut) {
        for node in nodes.values_mut().filter_map(Value::as_object_mut) {
            node.shift_remove("key");
            node.shift_remove("elm");

            if let Some(transitions) = node.get_mut("transitions").and_then(Value::as_array_mut) {
                for t in transitions.iter_mut().filter_map(Value::as_object_mut) {
                    t.shift_remove("id");
                    if let Some(condition) = t.get_mut("condition").and_then(Value::as_object_mut) {
                        condition.shift_remove("elm");
                    }
                }
            }
            if let Some(actions) = node.get_mut("action").and_then(Value::as_array_mut) {
                for action in actions.iter_mut().filter_map(Value::as_object_mut) {
                    action.shift_remove("id");
                }
            }
        }
    }

    if let Some(preconditions) = value.get_mut("preconditions").and_then(Value::as_array_mut) {
        for pre in preconditions.iter_mut().filter_map(Value::as_object_mut) {
            pre.shift_remove("elm");
        }
    }
}

/// Restore the editor-side identity of a parsed document.
///
/// Node keys are taken from the map keys. Missing transition, action and precondition ids
/// are generated. Nothing else is checked.
///
/// # Errors
///
/// Returns [`PathwayError::IdAllocation`] if no unused id could be generated.
pub fn normalize_pathway(mut pathway: Pathway) -> PathwayResult<Pathway> {
    for (key, node) in pathway.nodes.iter_mut() {
        let needs_ids = node.key != *key
            || node.transitions.iter().any(|t| t.id.is_empty())
            || node.actions().iter().any(|a| a.id.is_empty());
        if !needs_ids {
            continue;
        }
        let node = Arc::make_mut(node);
        node.key = key.clone();

        for idx in 0..node.transitions.len() {
            if node.transitions[idx].id.is_empty() {
                let id = ShortId::generate_unique(|id| node.transitions.iter().any(|t| t.id == id))?;
                node.transitions[idx].id = id.into_string();
            }
        }
        if let Ok(payload) = node.action_node_mut() {
            for idx in 0..payload.action.len() {
                if payload.action[idx].id.is_empty() {
                    let id = ShortId::generate_unique(|id| payload.action.iter().any(|a| a.id == id))?;
                    payload.action[idx].id = id.into_string();
                }
            }
        }
    }

    for idx in 0..pathway.preconditions.len() {
        if pathway.preconditions[idx].id.is_empty() {
            let id =
                ShortId::generate_unique(|id| pathway.preconditions.iter().any(|p| p.id == id))?;
            pathway.preconditions[idx].id = id.into_string();
        }
    }

    Ok(pathway)
}

/// Parse and normalize a pathway document without validating its structure.
///
/// # Errors
///
/// * [`PathwayError::Import`] naming the JSON path of the first bad field.
/// * The errors of [`normalize_pathway`].
pub fn parse_pathway(json: &str) -> PathwayResult<Pathway> {
    let de = &mut serde_json::Deserializer::from_str(json);
    let pathway: Pathway = serde_path_to_error::deserialize(de).map_err(|e| {
        let path = e.path().to_string();
        let path = if path.is_empty() || path == "." {
            "<root>".to_owned()
        } else {
            path
        };
        PathwayError::Import(format!("{path}: {}", e.into_inner()))
    })?;
    normalize_pathway(pathway)
}

/// Parse a pathway document such as the one [`export_pathway`] writes.
///
/// # Errors
///
/// * The errors of [`parse_pathway`].
/// * The errors of [`validate_pathway`] for structurally broken documents.
pub fn import_pathway(json: &str) -> PathwayResult<Pathway> {
    let pathway = parse_pathway(json)?;
    validate_pathway(&pathway)?;
    tracing::debug!(pathway = pathway.id.as_str(), "imported pathway");
    Ok(pathway)
}

/// Read and import a pathway document from disk.
pub fn read_pathway_file(path: impl AsRef<Path>) -> PathwayResult<Pathway> {
    let json = std::fs::read_to_string(path.as_ref()).map_err(PathwayError::FileRead)?;
    import_pathway(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{
        add_node, add_node_action, add_precondition, add_transition, create_new_pathway,
        make_node_action, make_node_branch, set_node_cql, set_transition_condition,
    };
    use crate::constants::START_KEY;
    use crate::cql::tests::service_request_action;
    use crate::elm::tests::sample_elm;
    use std::io::Write;

    fn sample() -> Pathway {
        let p = create_new_pathway("Breast Cancer", Some("d"), Some("p1"));
        let (p, branch) = add_node(&p).expect("node");
        let p = make_node_branch(&p, &branch).expect("branch");
        let (p, act) = add_node(&p).expect("node");
        let p = make_node_action(&p, &act).expect("action");
        let p = add_node_action(&p, &act, service_request_action("", "http://snomed.info/sct", "1"))
            .expect("add action");
        let p = set_node_cql(&p, &act, &sample_elm("ActLib", "Surgery")).expect("cql");
        let p = add_transition(&p, START_KEY, &branch).expect("edge");
        let p = add_transition(&p, &branch, &act).expect("edge");
        let tid = p.nodes[&branch].transitions[0].id.clone();
        let p = set_transition_condition(
            &p,
            &branch,
            &tid,
            "Male",
            &sample_elm("LIBFoo", "isMale"),
            None,
            None,
        )
        .expect("condition");
        add_precondition(&p, "Gender", "male", &sample_elm("Pre", "isMale")).expect("pre")
    }

    #[test]
    fn export_strips_internal_fields() {
        let p = sample();
        let json = export_pathway(&ExportConfig::default(), &p).expect("export");
        let value: Value = serde_json::from_str(&json).expect("json");

        for node in value["nodes"].as_object().expect("nodes").values() {
            assert!(node.get("key").is_none());
            assert!(node.get("elm").is_none());
            for t in node["transitions"].as_array().expect("transitions") {
                assert!(t.get("id").is_none());
                if let Some(c) = t.get("condition") {
                    assert!(c.get("elm").is_none());
                }
            }
            if let Some(actions) = node.get("action").and_then(Value::as_array) {
                assert!(actions.iter().all(|a| a.get("id").is_none()));
            }
        }
        assert!(value["preconditions"][0].get("elm").is_none());
    }

    #[test]
    fn export_builds_combined_library() {
        let p = sample();
        let combined = build_pathway_elm(&ExportConfig::default(), &p).expect("elm");
        let nav = combined.navigational.expect("navigational");
        assert_eq!(nav.library_id(), Some("BreastCancerNavigation"));

        let names: Vec<&str> = nav
            .statements()
            .iter()
            .filter_map(crate::elm::statement_name_of)
            .collect();
        let act = p.nodes.values().find(|n| n.is_action_node()).expect("action").key.as_str();
        // The branch precedes the action node in map order.
        assert_eq!(names, ["isMale", act]);
        // Both fragments declare the same usings; the union keeps one of each.
        assert_eq!(nav.library.usings.as_ref().map(|u| u.def.len()), Some(2));

        let pre = combined.preconditions.expect("preconditions");
        assert_eq!(pre.library_id(), Some("BreastCancerPreconditions"));
        assert_eq!(pre.statement_name("x").expect("statement"), "Gender");
    }

    #[test]
    fn export_does_not_touch_input() {
        let p = sample();
        let before = p.clone();
        export_pathway(&ExportConfig::default(), &p).expect("export");
        assert_eq!(p, before);
    }

    #[test]
    fn export_then_import_restores_structure() {
        let p = sample();
        let json = export_pathway(&ExportConfig::default(), &p).expect("export");
        let imported = import_pathway(&json).expect("import");

        assert_eq!(imported.nodes.len(), p.nodes.len());
        let keys: Vec<&String> = imported.nodes.keys().collect();
        let original: Vec<&String> = p.nodes.keys().collect();
        assert_eq!(keys, original);
        for (key, node) in &imported.nodes {
            assert_eq!(&node.key, key);
            assert!(node.transitions.iter().all(|t| !t.id.is_empty()));
            assert!(node.actions().iter().all(|a| !a.id.is_empty()));
        }
        assert!(imported.elm.and_then(|e| e.navigational).is_some());
        assert!(!imported.preconditions[0].id.is_empty());
    }

    #[test]
    fn exported_document_parses_without_issues() {
        let p = sample();
        let branch = p.nodes.values().find(|n| n.is_branch_node()).expect("branch").key.clone();
        let (p, second) = add_node(&p).expect("node");
        let p = make_node_action(&p, &second).expect("action");
        let p = add_transition(&p, &branch, &second).expect("edge");
        let json = export_pathway(&ExportConfig::default(), &p).expect("export");

        let parsed = parse_pathway(&json).expect("parse");
        assert!(crate::validation::find_issues(&parsed).is_empty());
        let ids: Vec<&str> = parsed.nodes[&branch]
            .transitions
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert!(crate::CpgExporter::new(&ExportConfig::default(), &parsed, &[])
            .export()
            .is_ok());
    }

    #[test]
    fn normalize_keeps_complete_nodes_shared() {
        let p = sample();
        let normalized = normalize_pathway(p.clone()).expect("normalize");
        for (key, node) in &p.nodes {
            assert!(Arc::ptr_eq(node, &normalized.nodes[key]));
        }
    }

    #[test]
    fn parse_skips_structural_checks() {
        let json = r#"{ "id": "p", "name": "P", "nodes": {} }"#;
        let parsed = parse_pathway(json).expect("parse");
        assert!(parsed.nodes.is_empty());
    }

    #[test]
    fn malformed_json_reports_path() {
        let json = r#"{ "id": "p", "name": "P", "nodes": { "Start": { "type": "start", "transitions": [ { "id": 3 } ] } } }"#;
        let err = import_pathway(json).expect_err("bad transition");
        match err {
            PathwayError::Import(msg) => assert!(msg.contains("nodes.Start"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }

        assert!(matches!(import_pathway("not json"), Err(PathwayError::Import(_))));
    }

    #[test]
    fn import_rejects_missing_start() {
        let json = r#"{ "id": "p", "name": "P", "nodes": {} }"#;
        assert!(matches!(import_pathway(json), Err(PathwayError::InvalidPathway(_))));
    }

    #[test]
    fn pathway_file_is_read_from_disk() {
        let json = export_pathway(&ExportConfig::default(), &sample()).expect("export");
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(json.as_bytes()).expect("write");

        let pathway = read_pathway_file(file.path()).expect("read");
        assert_eq!(pathway.name, "Breast Cancer");
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = read_pathway_file(dir.path().join("missing.json")).expect_err("missing");
        assert!(matches!(err, PathwayError::FileRead(_)));
    }
}
