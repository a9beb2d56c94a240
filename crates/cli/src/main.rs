use clap::{Parser, Subcommand, ValueEnum};
use pathways_core::config::export_config_from_env_values;
use pathways_core::export::{parse_pathway, read_pathway_file};
use pathways_core::{BundleFormat, Criteria, PathwayService};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pathways")]
#[command(about = "Clinical pathway editor CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

impl From<Format> for BundleFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => BundleFormat::Json,
            Format::Yaml => BundleFormat::Yaml,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print a new pathway holding only the Start node
    New {
        /// Pathway name
        name: String,
        /// Pathway description
        #[arg(long)]
        description: Option<String>,
        /// Pathway id (generated if omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// Export a pathway as a CPG FHIR bundle
    ExportCpg {
        /// Pathway JSON file
        pathway: PathBuf,
        /// Criteria JSON file (an array of criteria)
        #[arg(long)]
        criteria: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        format: Format,
    },
    /// Export a pathway with its condition libraries embedded
    ExportCamino {
        /// Pathway JSON file
        pathway: PathBuf,
        /// Criteria JSON file (an array of criteria)
        #[arg(long)]
        criteria: Option<PathBuf>,
    },
    /// Export a pathway as a standalone document with combined ELM
    ExportPathway {
        /// Pathway JSON file
        pathway: PathBuf,
    },
    /// Synthesise CQL for every action in a pathway
    ActionCql {
        /// Pathway JSON file
        pathway: PathBuf,
    },
    /// Check a pathway for structural problems
    Validate {
        /// Pathway JSON file
        pathway: PathBuf,
    },
}

fn read_criteria(path: Option<&Path>) -> Result<Vec<Criteria>, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let text = std::fs::read_to_string(path)?;
    Ok(fhir::parse_json("criteria", &text)?)
}

fn run(service: &PathwayService, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::New {
            name,
            description,
            id,
        } => {
            let pathway = service.create(&name, description.as_deref(), id.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&pathway)?);
        }
        Commands::ExportCpg {
            pathway,
            criteria,
            format,
        } => {
            let pathway = read_pathway_file(&pathway)?;
            let criteria = read_criteria(criteria.as_deref())?;
            println!("{}", service.render_cpg(&pathway, &criteria, format.into())?);
        }
        Commands::ExportCamino { pathway, criteria } => {
            let pathway = read_pathway_file(&pathway)?;
            let criteria = read_criteria(criteria.as_deref())?;
            let exported = service.export_camino(&pathway, &criteria)?;
            println!("{}", serde_json::to_string_pretty(&exported)?);
        }
        Commands::ExportPathway { pathway } => {
            let pathway = read_pathway_file(&pathway)?;
            println!("{}", service.export_pathway(&pathway)?);
        }
        Commands::ActionCql { pathway } => {
            let pathway = read_pathway_file(&pathway)?;
            let report = service.action_cql(&pathway);
            for library in &report.libraries {
                println!("// node {} action {}", library.node, library.action_id);
                println!("{}", library.cql);
            }
            for failure in &report.failures {
                eprintln!(
                    "Skipped node {} action {}: {}",
                    failure.node, failure.action_id, failure.reason
                );
            }
        }
        Commands::Validate { pathway } => {
            // Parse without the import checks so every problem is listed.
            let text = std::fs::read_to_string(&pathway)?;
            let pathway = parse_pathway(&text)?;
            let issues = service.validate(&pathway);
            if issues.is_empty() {
                println!("Pathway {} is valid.", pathway.id);
            } else {
                for issue in &issues {
                    println!("{issue}");
                }
                return Err(format!("{} problem(s) found", issues.len()).into());
            }
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'pathways --help' for commands");
        return;
    };

    let config = match export_config_from_env_values(
        std::env::var("PATHWAYS_BASE_URL").ok(),
        std::env::var("PATHWAYS_FHIR_VERSION").ok(),
        std::env::var("PATHWAYS_PUBLISHER").ok(),
    ) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error reading configuration: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(&PathwayService::new(config), command) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn export_cpg_parses_format() {
        let cli = Cli::try_parse_from(["pathways", "export-cpg", "p.json", "--format", "yaml"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Some(Commands::ExportCpg { format: Format::Yaml, criteria: None, .. })
        ));
    }

    #[test]
    fn criteria_file_is_optional() {
        assert!(read_criteria(None).expect("no file").is_empty());

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"[{{ "id": "c1", "label": "Male", "statement": "isMale", "cql": "true" }}]"#)
            .expect("write");
        let criteria = read_criteria(Some(file.path())).expect("criteria");
        assert_eq!(criteria.len(), 1);
        assert_eq!(criteria[0].statement_name(), "isMale");
    }

    #[test]
    fn new_then_export_round_trip() {
        let service = PathwayService::default();
        let pathway = service.create("N", None, Some("1")).expect("create");
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(serde_json::to_string(&pathway).expect("json").as_bytes())
            .expect("write");

        run(
            &service,
            Commands::ExportCpg {
                pathway: file.path().to_path_buf(),
                criteria: None,
                format: Format::Json,
            },
        )
        .expect("export");
    }

    #[test]
    fn exported_document_validates() {
        use pathways_core::builder::{add_node, add_transition, make_node_branch};

        let service = PathwayService::default();
        let mut pathway = service.create("N", None, Some("1")).expect("create");
        for _ in 0..2 {
            let (next, key) = add_node(&pathway).expect("node");
            let next = make_node_branch(&next, &key).expect("branch");
            pathway = add_transition(&next, "Start", &key).expect("edge");
        }

        let exported = service.export_pathway(&pathway).expect("export");
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(exported.as_bytes()).expect("write");

        run(&service, Commands::Validate { pathway: file.path().to_path_buf() })
            .expect("exported document is valid");
    }

    #[test]
    fn new_rejects_blank_name() {
        let err = run(
            &PathwayService::default(),
            Commands::New {
                name: " ".into(),
                description: None,
                id: None,
            },
        )
        .expect_err("blank name");
        assert!(err.to_string().contains("pathway name"));
    }
}
