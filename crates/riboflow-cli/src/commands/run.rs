use crate::cli::RunArgs;
use crate::config::{FileConfig, build_pipeline_config};
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use riboflow::engine::error::EngineError;
use riboflow::engine::progress::ProgressReporter;
use riboflow::workflows;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run(args: RunArgs) -> Result<()> {
    if !args.input.is_file() {
        return Err(CliError::Argument(format!(
            "input file not found: {}",
            args.input.display()
        )));
    }
    let backends = args.selected_backends();
    if backends.is_empty() {
        return Err(CliError::Argument(
            "no backends selected; use --rhofold, --simrna, --protenix, or --all".into(),
        ));
    }

    let file_config = FileConfig::load(args.config.as_deref())?;
    let config = build_pipeline_config(&args, &file_config)?;

    println!("riboflow run");
    println!("  Input:     {}", args.input.display());
    println!("  Output:    {}", args.output_dir.display());
    println!("  Backends:  {}", config.backends.join(", "));
    if config.nstruct > 1 {
        println!("  Ensemble:  {} structures per backend", config.nstruct);
    }
    if !config.devices.is_empty() {
        println!("  Devices:   {}", config.devices.join(", "));
    }
    println!();

    let progress_handler = CliProgressHandler::new();
    let reporter = Arc::new(ProgressReporter::with_callback(
        progress_handler.get_callback(),
    ));

    info!("Starting pipeline run");
    let pipeline = workflows::run::run(&args.input, &args.output_dir, &config, reporter);

    let outcome = tokio::select! {
        outcome = pipeline => outcome?,
        _ = tokio::signal::ctrl_c() => {
            // Dropping the pipeline future kills in-flight external
            // processes; the checkpoint already holds the last fully
            // completed stage, so the run directory resumes cleanly.
            warn!("Interrupted; run directory is resumable");
            return Err(CliError::Engine(EngineError::Interrupted));
        }
    };

    println!("\nTop-ranked structures:");
    for (index, entry) in outcome.ranking.iter().take(5).enumerate() {
        println!(
            "  {}. {} (mean rank: {:.2})",
            index + 1,
            entry.model,
            entry.mean_rank
        );
    }
    println!("\nReport: {}", outcome.report.display());
    Ok(())
}
