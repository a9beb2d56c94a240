//! Export to a self-contained pathway document whose conditions reference CQL libraries
//! shipped inside the document itself.

use crate::config::ExportConfig;
use crate::constants::BUILDER_LIBRARY_SUFFIX;
use crate::cql::{construct_cql_library, library_identifier, parse_library_header, qualify};
use crate::criteria::{find_by_id, Criteria, CriteriaLibrary};
use crate::graph::deep_copy_pathway;
use crate::model::Pathway;
use crate::validation::validate_pathway;
use crate::{PathwayError, PathwayResult};
use indexmap::IndexMap;
use std::sync::Arc;

/// Rewrites a pathway so every condition names its statement as `Library.statement` and
/// every library those names point into is carried in `pathway.library`.
///
/// Library-backed criteria contribute their own CQL text. Criteria authored in the visual
/// builder are gathered into one synthesised `<Name>Criteria` library. Exporting an already
/// exported pathway gives the same result.
pub struct CaminoExporter<'a> {
    config: &'a ExportConfig,
    pathway: &'a Pathway,
    criteria: &'a [Criteria],
}

impl<'a> CaminoExporter<'a> {
    pub fn new(config: &'a ExportConfig, pathway: &'a Pathway, criteria: &'a [Criteria]) -> Self {
        Self {
            config,
            pathway,
            criteria,
        }
    }

    /// Produce the exported pathway. The input pathway is not modified.
    ///
    /// A condition whose `criteriaSource` does not resolve is left as it is and logged.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`validate_pathway`].
    pub fn export(&self) -> PathwayResult<Pathway> {
        validate_pathway(self.pathway)?;

        let mut exported = deep_copy_pathway(self.pathway);
        let builder_library = library_identifier(&self.pathway.name, BUILDER_LIBRARY_SUFFIX);
        let mut builder_defines: IndexMap<String, String> = IndexMap::new();
        let mut criteria_libraries: Vec<&str> = Vec::new();

        for (key, node) in exported.nodes.iter_mut() {
            if !node.transitions.iter().any(|t| t.condition.is_some()) {
                continue;
            }
            for t in &mut Arc::make_mut(node).transitions {
                let Some(condition) = t.condition.as_mut() else {
                    continue;
                };
                let Some(source) = condition.criteria_source.as_deref() else {
                    continue;
                };
                let Some(criteria) = find_by_id(self.criteria, source) else {
                    tracing::warn!(
                        node = key.as_str(),
                        criteria = source,
                        "condition references unknown criteria, left unqualified"
                    );
                    continue;
                };

                match criteria.library() {
                    CriteriaLibrary::External { id, .. } => {
                        condition.cql = qualify(id, &condition.cql);
                        criteria_libraries.push(criteria.cql.as_str());
                    }
                    CriteriaLibrary::Builder => {
                        let define = unqualified(&builder_library, &condition.cql);
                        builder_defines.insert(define.to_owned(), criteria.cql.clone());
                        condition.cql = qualify(&builder_library, &condition.cql);
                    }
                }
            }
        }

        for text in criteria_libraries {
            add_library(&mut exported.library, text);
        }

        if !builder_defines.is_empty() {
            let text = construct_cql_library(
                self.config,
                &builder_library,
                &IndexMap::new(),
                &IndexMap::new(),
                &builder_defines,
            );
            replace_library(&mut exported.library, &builder_library, text);
        }

        tracing::info!(
            pathway = self.pathway.id.as_str(),
            libraries = exported.library.len(),
            "exported camino pathway"
        );
        Ok(exported)
    }

    /// [`CaminoExporter::export`] rendered as pretty JSON.
    pub fn export_json(&self) -> PathwayResult<String> {
        let exported = self.export()?;
        serde_json::to_string_pretty(&exported).map_err(PathwayError::Serialization)
    }
}

fn unqualified<'n>(library: &str, name: &'n str) -> &'n str {
    name.strip_prefix(library)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(name)
}

fn library_name(text: &str) -> Option<String> {
    parse_library_header(text).map(|(name, _)| name)
}

/// Append `text` unless a library with the same name (or the same text) is already there.
fn add_library(libraries: &mut Vec<String>, text: &str) {
    let name = library_name(text);
    let present = libraries.iter().any(|existing| {
        existing == text || (name.is_some() && library_name(existing) == name)
    });
    if !present {
        libraries.push(text.to_owned());
    }
}

fn replace_library(libraries: &mut Vec<String>, name: &str, text: String) {
    match libraries
        .iter()
        .position(|existing| library_name(existing).as_deref() == Some(name))
    {
        Some(idx) => libraries[idx] = text,
        None => libraries.push(text),
    }
}
