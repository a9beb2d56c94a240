//! # Pathways Core
//!
//! Core logic for the clinical pathway editor.
//!
//! This crate contains pure document operations:
//! - the pathway graph model and traversal helpers
//! - copy-on-write builder functions used by the editor
//! - ELM merging and CQL library construction
//! - export to a standalone pathway document, a Camino pathway, or a CPG FHIR bundle
//!
//! **No API concerns**: HTTP servers and command line parsing belong in `api-rest` and
//! `pathways-cli`. Nothing here performs I/O apart from [`export::read_pathway_file`].

pub mod builder;
pub mod camino;
pub mod config;
pub mod constants;
pub mod cpg;
pub mod cql;
pub mod criteria;
pub mod elm;
pub mod error;
pub mod export;
pub mod graph;
pub mod model;
pub mod validation;

pub use camino::CaminoExporter;
pub use config::ExportConfig;
pub use cpg::{clean_pathway, CpgExporter};
pub use cql::ActionCqlReport;
pub use criteria::Criteria;
pub use elm::Elm;
pub use error::{PathwayError, PathwayResult};
pub use model::{Pathway, PathwayNode};

use pathways_types::NonEmptyText;
use pathways_uuid::ShortId;

/// Output format of a rendered CPG bundle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BundleFormat {
    #[default]
    Json,
    Yaml,
}

/// Pathway operations bound to one export configuration.
///
/// The configuration is resolved once by the caller and reused for every export.
#[derive(Clone, Debug, Default)]
pub struct PathwayService {
    config: ExportConfig,
}

impl PathwayService {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// A new pathway holding only the Start node.
    ///
    /// # Errors
    ///
    /// Returns [`PathwayError::InvalidInput`] for a blank name or an id that is not a valid
    /// short id.
    pub fn create(
        &self,
        name: &str,
        description: Option<&str>,
        id: Option<&str>,
    ) -> PathwayResult<Pathway> {
        let name = NonEmptyText::new(name)
            .map_err(|e| PathwayError::InvalidInput(format!("pathway name: {e}")))?;
        let id = id
            .map(ShortId::parse)
            .transpose()
            .map_err(|e| PathwayError::InvalidInput(format!("pathway id: {e}")))?;
        Ok(builder::create_new_pathway(
            name.as_str(),
            description,
            id.as_ref().map(ShortId::as_str),
        ))
    }

    /// Every structural problem in `pathway`, as messages.
    pub fn validate(&self, pathway: &Pathway) -> Vec<String> {
        validation::find_issues(pathway)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Compile `pathway` into a CPG transaction bundle.
    ///
    /// # Errors
    ///
    /// See [`CpgExporter::export`].
    pub fn export_cpg(&self, pathway: &Pathway, criteria: &[Criteria]) -> PathwayResult<fhir::Bundle> {
        CpgExporter::new(&self.config, pathway, criteria).export()
    }

    /// [`PathwayService::export_cpg`] rendered as text.
    pub fn render_cpg(
        &self,
        pathway: &Pathway,
        criteria: &[Criteria],
        format: BundleFormat,
    ) -> PathwayResult<String> {
        let exporter = CpgExporter::new(&self.config, pathway, criteria);
        match format {
            BundleFormat::Json => exporter.export_json(),
            BundleFormat::Yaml => exporter.export_yaml(),
        }
    }

    /// See [`CaminoExporter::export`].
    pub fn export_camino(&self, pathway: &Pathway, criteria: &[Criteria]) -> PathwayResult<Pathway> {
        CaminoExporter::new(&self.config, pathway, criteria).export()
    }

    /// See [`export::export_pathway`].
    pub fn export_pathway(&self, pathway: &Pathway) -> PathwayResult<String> {
        export::export_pathway(&self.config, pathway)
    }

    /// See [`cql::synthesize_action_cql`].
    pub fn action_cql(&self, pathway: &Pathway) -> ActionCqlReport {
        cql::synthesize_action_cql(&self.config, pathway)
    }
}
