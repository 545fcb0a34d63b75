use crate::cli::ReportArgs;
use crate::error::{CliError, Result};
use riboflow::engine::checkpoint::CheckpointStore;
use riboflow::workflows::report::write_summary;
use tracing::info;

/// Re-renders the summary report from a run directory's persisted state,
/// without executing any pipeline stage.
pub async fn run(args: ReportArgs) -> Result<()> {
    let store = CheckpointStore::new(&args.run_dir);
    let run = store
        .load()
        .map_err(riboflow::engine::error::EngineError::from)?
        .ok_or_else(|| {
            CliError::Argument(format!(
                "{} is not a riboflow run directory (no pipeline state found)",
                args.run_dir.display()
            ))
        })?;

    info!(run_dir = %args.run_dir.display(), "Regenerating report");
    let path = write_summary(&args.run_dir, &run)?;
    println!("Report regenerated: {}", path.display());
    Ok(())
}
