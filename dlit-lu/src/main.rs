//! dlit-lu - D-Log land use pipeline
//!
//! Loads the D-Log and its lookup tables, validates land-use codes, infills
//! missing attributes and writes MSOA-level volumes to the output folder.
//!
//! Configuration is read from the file named by `--config`, `DLIT_CONFIG`
//! or `dlit.toml` in the working directory, in that order.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dlit_common::config::{load_config, write_toml_config};
use dlit_common::logging::init_tracing;
use dlit_lu::export::write_outputs;
use dlit_lu::loader::load_inputs;
use dlit_lu::validators::{ManualResolver, NoManualResolution, WorksheetResolver};
use dlit_lu::{Pipeline, PipelineConfig, PipelineInputs};
use tracing::{info, warn};

/// Command-line arguments for dlit-lu
#[derive(Parser, Debug)]
#[command(name = "dlit-lu")]
#[command(about = "Validate, infill and disaggregate a D-Log planning register")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output folder (overrides `output_folder` in the config file)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the effective configuration to this path as a template and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(output) = args.output {
        config.output_folder = output;
    }

    init_tracing(&config.logging).context("Failed to initialise logging")?;

    if let Some(path) = args.write_config {
        write_toml_config(&config, &path)
            .with_context(|| format!("Failed to write config template {}", path.display()))?;
        info!("✓ Wrote config template {}", path.display());
        return Ok(());
    }

    info!(
        "Starting D-Log land use pipeline (dlit-lu) v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("Output folder: {}", config.output_folder.display());

    let pipeline_config = PipelineConfig::from_toml(&config)?;
    let inputs = load_inputs(&config.inputs).context("Failed to load inputs")?;

    let pipeline = Pipeline::new(
        pipeline_config,
        PipelineInputs {
            tables: &inputs.tables,
            geography: &inputs.geography,
            sic: &inputs.sic,
            demographics: &inputs.demographics,
            conversions: &inputs.conversions,
        },
    )?;

    let worksheet_path = config
        .infill
        .user_input_path
        .clone()
        .filter(|_| config.infill.user_infill);

    let mut worksheet = match &worksheet_path {
        Some(path) => Some(
            WorksheetResolver::load(path)
                .with_context(|| format!("Failed to read worksheet {}", path.display()))?,
        ),
        None => None,
    };
    let mut no_manual = NoManualResolution;
    let manual: &mut dyn ManualResolver = match worksheet.as_mut() {
        Some(worksheet) => worksheet,
        None => &mut no_manual,
    };

    let output = pipeline.run(inputs.records, manual)?;

    let written = write_outputs(&config.output_folder, &output)
        .context("Failed to write outputs")?;
    for path in &written {
        info!("✓ Wrote {}", path.display());
    }

    if let (Some(worksheet), Some(path)) = (&worksheet, &worksheet_path) {
        worksheet
            .write(path)
            .with_context(|| format!("Failed to write worksheet {}", path.display()))?;
        let open = worksheet.unanswered().count();
        if open > 0 {
            warn!(
                open_questions = open,
                "Worksheet has unanswered codes; fill in chosen_code and rerun"
            );
        }
    }

    info!(run_id = %output.run_id, "Run complete");
    Ok(())
}
