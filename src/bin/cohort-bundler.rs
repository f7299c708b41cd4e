//! cohort-bundler CLI - convert a cohort file into per-subject transaction bundles

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cohort_bundler::{serialization, Cohort, CohortConverter, Diagnostic, SequentialIds};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cohort-bundler")]
#[command(version, about = "Assemble tabular cohort data into linked transaction bundles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert every subject of a cohort into a bundle
    Convert {
        /// Cohort file (YAML or JSON)
        #[arg(short, long, env = "COHORT_INPUT")]
        input: PathBuf,

        /// Output directory for bundles
        #[arg(short, long, env = "COHORT_OUTPUT", default_value = "output")]
        output: PathBuf,

        /// Output layout
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Load and validate a cohort file without converting it
    Validate {
        /// Cohort file (YAML or JSON)
        #[arg(short, long, env = "COHORT_INPUT")]
        input: PathBuf,
    },

    /// Print a single entity's resource for one subject
    Resource {
        /// Cohort file (YAML or JSON)
        #[arg(short, long, env = "COHORT_INPUT")]
        input: PathBuf,

        /// Entity name (e.g. PrimaryPatient)
        #[arg(short, long)]
        entity: String,

        /// Subject row index
        #[arg(long, default_value = "0")]
        index: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One pretty-printed `<index>.json` per subject
    Json,
    /// A single `bundles.ndjson`, one bundle per line
    Ndjson,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Convert { input, output, format } => convert(&input, &output, format),
        Commands::Validate { input } => validate(&input),
        Commands::Resource { input, entity, index } => resource(&input, &entity, index),
    }
}

fn load(input: &Path) -> Result<Cohort> {
    Cohort::load_from_file(input)
        .with_context(|| format!("Failed to load cohort from {}", input.display()))
}

fn convert(input: &Path, output: &Path, format: OutputFormat) -> Result<()> {
    let cohort = load(input)?;
    let bundles = CohortConverter::new(&cohort)
        .convert_all()
        .context("Failed to convert cohort")?;

    let skipped: usize = bundles.iter().map(|b| b.diagnostics.len()).sum();
    if skipped > 0 {
        warn!(skipped, "some fields or links were skipped; see warnings above");
    }

    match format {
        OutputFormat::Json => {
            let paths = serialization::write_envelopes(output, &bundles)
                .with_context(|| format!("Failed to write bundles to {}", output.display()))?;
            info!(bundles = paths.len(), dir = %output.display(), "conversion complete");
        }
        OutputFormat::Ndjson => {
            let path = serialization::write_ndjson_file(output, &bundles)
                .with_context(|| format!("Failed to write bundles to {}", output.display()))?;
            info!(bundles = bundles.len(), file = %path.display(), "conversion complete");
        }
    }
    Ok(())
}

fn validate(input: &Path) -> Result<()> {
    let cohort = load(input)?;

    println!("✓ {} is valid", input.display());
    println!("  entities: {}", cohort.entity_names().join(", "));
    println!("  links:    {}", cohort.links().len());
    println!("  fields:   {}", cohort.data().field_count());
    println!("  subjects: {}", cohort.row_count());

    for entity in cohort.entities() {
        if cohort.data().fields_for(&entity.entity).is_empty() {
            println!("  ⚠ entity '{}' has no fields", entity.entity);
        }
    }
    Ok(())
}

fn resource(input: &Path, entity: &str, index: usize) -> Result<()> {
    let cohort = load(input)?;
    if !cohort.has_entity(entity) {
        bail!(
            "Unknown entity '{}'; expected one of: {}",
            entity,
            cohort.entity_names().join(", ")
        );
    }
    let converter = CohortConverter::new(&cohort).with_id_generator(SequentialIds::new(entity));

    let (resource, diagnostics) = converter
        .build_single_resource(entity, index)
        .with_context(|| format!("Failed to build {} for subject {}", entity, index))?;

    for diagnostic in &diagnostics {
        if let Diagnostic::FieldSkipped { .. } | Diagnostic::LinkSkipped { .. } = diagnostic {
            eprintln!("⚠ {}", diagnostic);
        }
    }

    println!("{}", serde_json::to_string_pretty(&resource)?);
    Ok(())
}
