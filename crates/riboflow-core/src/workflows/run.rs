use crate::core::io::fasta::read_fasta;
use crate::core::models::ensemble::EnsembleResult;
use crate::core::models::member::MemberOutcome;
use crate::core::models::run::{PipelineRun, StageId, StageStatus};
use crate::engine::checkpoint::CheckpointStore;
use crate::engine::cluster;
use crate::engine::config::PipelineConfig;
use crate::engine::dispatch::Dispatcher;
use crate::engine::diversity;
use crate::engine::error::EngineError;
use crate::engine::process::CommandRunner;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::tools::infernal::InfernalTool;
use crate::tools::rnadvisor::{RankedModel, RnadvisorTool};
use crate::tools::rnafold::RnafoldTool;
use crate::tools::{PredictionInput, backend_for};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

const SEQUENCE_DIR: &str = "01_sequence_analysis";
const STRUCTURE_DIR: &str = "02_secondary_structure";
const PREDICTION_DIR: &str = "03_3d_prediction";
const SCORING_DIR: &str = "04_scoring";

/// Final result of one pipeline execution.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub run: PipelineRun,
    /// Consensus ranking of the scored representatives, best first.
    pub ranking: Vec<RankedModel>,
    pub report: PathBuf,
}

/// Executes (or resumes) the full pipeline over `fasta` inside `run_dir`.
///
/// Stage order: sequence analysis → secondary structure → per-backend 3D
/// prediction (concurrent branches) → per-backend clustering → scoring →
/// report. Every transition is checkpointed through the store before the
/// next stage starts, and only this function writes checkpoint state;
/// branches hand their results back over the join set.
#[instrument(skip_all, name = "pipeline_run")]
pub async fn run(
    fasta: &Path,
    run_dir: &Path,
    config: &PipelineConfig,
    reporter: Arc<ProgressReporter>,
) -> Result<PipelineOutcome, EngineError> {
    validate(config)?;
    let input_fasta = prepare_input(fasta, run_dir)?;

    let store = CheckpointStore::new(run_dir);
    let mut run = load_or_create(&store, config)?;
    reconcile_cached_predictions(&store, &mut run, config)?;

    let runner = CommandRunner::new(run_dir.join("logs"), config.invocation_timeout);

    // === Stage 1: sequence analysis (optional enrichment) ===
    let msa = run_sequence_analysis(&store, &mut run, config, &runner, &input_fasta, run_dir, &reporter).await?;

    // === Stage 2: secondary structure (optional enrichment) ===
    let secondary_structure =
        run_secondary_structure(&store, &mut run, config, &runner, &input_fasta, run_dir, &reporter).await?;

    let prediction_input = build_prediction_input(&input_fasta, msa, secondary_structure)?;

    // === Stage 3: per-backend 3D prediction, one concurrent branch each ===
    run_predictions(&store, &mut run, config, &prediction_input, run_dir, &reporter).await?;

    // === Stage 3b: per-backend clustering ===
    let representatives = run_clustering(&store, &mut run, config, run_dir, &reporter)?;

    // === Stage 4: scoring ===
    let ranking =
        run_scoring(&store, &mut run, config, &runner, run_dir, representatives, &reporter).await?;

    // === Stage 5: report ===
    let report = run_report(&store, &mut run, run_dir, &reporter)?;

    info!(
        run_dir = %run_dir.display(),
        ranked = ranking.len(),
        "Pipeline complete"
    );
    Ok(PipelineOutcome {
        run,
        ranking,
        report,
    })
}

fn validate(config: &PipelineConfig) -> Result<(), EngineError> {
    for backend in &config.backends {
        if backend_for(backend, &config.tools).is_none() {
            return Err(EngineError::Configuration(format!(
                "unknown backend '{}' (known: {})",
                backend,
                crate::tools::KNOWN_BACKENDS.join(", ")
            )));
        }
    }
    if config.backends.is_empty() {
        return Err(EngineError::Configuration(
            "no prediction backends requested".into(),
        ));
    }
    Ok(())
}

/// Copies the query into the run directory (first run only) and validates
/// that it contains at least one sequence.
fn prepare_input(fasta: &Path, run_dir: &Path) -> Result<PathBuf, EngineError> {
    let input_dir = run_dir.join("input");
    std::fs::create_dir_all(&input_dir)?;
    let query = input_dir.join("query.fasta");
    if !query.is_file() {
        std::fs::copy(fasta, &query)?;
    }

    let records =
        read_fasta(&query).map_err(|error| EngineError::Input(error.to_string()))?;
    match records.first() {
        Some(record) if !record.sequence.is_empty() => {
            info!(id = record.id(), length = record.sequence.len(), "Input loaded");
            Ok(query)
        }
        _ => Err(EngineError::Input(format!(
            "no sequences found in {}",
            fasta.display()
        ))),
    }
}

fn load_or_create(
    store: &CheckpointStore,
    config: &PipelineConfig,
) -> Result<PipelineRun, EngineError> {
    let fingerprint = config.fingerprint();
    let run = match store.load()? {
        Some(mut run) => {
            if run.fingerprint != fingerprint {
                info!("Configuration fingerprint changed; invalidating prediction stages");
                run.invalidate_for(fingerprint);
            }
            run
        }
        None => PipelineRun::new(fingerprint),
    };
    store.save(&run)?;
    Ok(run)
}

/// Distrust cached prediction stages whose recorded structures are gone,
/// and propagate any re-run decision downstream so stale clustering or
/// scoring results are never reused.
fn reconcile_cached_predictions(
    store: &CheckpointStore,
    run: &mut PipelineRun,
    config: &PipelineConfig,
) -> Result<(), EngineError> {
    let mut rerun_any = false;
    for backend in &config.backends {
        let stage = StageId::Prediction(backend.clone());
        let completed = run.is_completed(&stage);
        let intact = run
            .ensembles
            .get(backend)
            .map(|ensemble| ensemble.artifacts_intact() && ensemble.success_count() > 0)
            .unwrap_or(false);
        if completed && intact {
            continue;
        }
        if completed {
            warn!(backend = %backend, "Cached prediction artifacts are missing; stage will re-run");
        }
        rerun_any = true;
        run.stage_mut(&stage).status = StageStatus::Pending;
        run.stage_mut(&StageId::Clustering(backend.clone())).status = StageStatus::Pending;
        run.ensembles.remove(backend);
    }
    if rerun_any {
        run.stage_mut(&StageId::Scoring).status = StageStatus::Pending;
        run.stage_mut(&StageId::Report).status = StageStatus::Pending;
        store.save(run)?;
    }
    Ok(())
}

async fn run_sequence_analysis(
    store: &CheckpointStore,
    run: &mut PipelineRun,
    config: &PipelineConfig,
    runner: &CommandRunner,
    fasta: &Path,
    run_dir: &Path,
    reporter: &Arc<ProgressReporter>,
) -> Result<Option<PathBuf>, EngineError> {
    let stage = StageId::SequenceAnalysis;
    let stage_dir = run_dir.join(SEQUENCE_DIR);

    if run.is_completed(&stage) {
        info!("Sequence analysis already completed, skipping");
        return Ok(InfernalTool::alignment_path(&stage_dir));
    }
    if config.skip_sequence_analysis {
        info!("Skipping sequence analysis (requested)");
        store.mark_completed(run, &stage, vec![])?;
        return Ok(None);
    }

    let tool = InfernalTool::new(config.tools.infernal.clone());
    if !tool.check() {
        warn!("Infernal/Rfam not available; continuing without an alignment");
        store.mark_completed(run, &stage, vec![])?;
        return Ok(None);
    }

    reporter.report(Progress::StageStart {
        name: "Sequence Analysis".into(),
    });
    std::fs::create_dir_all(&stage_dir)?;
    store.mark_started(run, &stage)?;

    let Some(invocation) = tool.invocation(fasta, &stage_dir) else {
        store.mark_completed(run, &stage, vec![])?;
        reporter.report(Progress::StageFinish);
        return Ok(None);
    };
    let outcome = runner.run("cmscan", &invocation).await;

    let result = if outcome.is_success() && outputs_present(&invocation.expected_outputs) {
        let mut artifacts = invocation.expected_outputs.clone();
        let alignment = InfernalTool::alignment_path(&stage_dir);
        if let Some(alignment) = &alignment {
            artifacts.push(alignment.clone());
        }
        match InfernalTool::parse_top_family(&invocation.expected_outputs[0]) {
            Some(family) => info!(family = %family, "Rfam family identified"),
            None => info!("No Rfam family match found"),
        }
        store.mark_completed(run, &stage, artifacts)?;
        alignment
    } else {
        store.mark_failed(run, &stage, outcome.failure_reason())?;
        None
    };
    reporter.report(Progress::StageFinish);
    Ok(result)
}

async fn run_secondary_structure(
    store: &CheckpointStore,
    run: &mut PipelineRun,
    config: &PipelineConfig,
    runner: &CommandRunner,
    fasta: &Path,
    run_dir: &Path,
    reporter: &Arc<ProgressReporter>,
) -> Result<Option<String>, EngineError> {
    let stage = StageId::SecondaryStructure;
    let stage_dir = run_dir.join(STRUCTURE_DIR);
    let dot_file = stage_dir.join(crate::tools::rnafold::DOT_FILE);

    if run.is_completed(&stage) {
        info!("Secondary structure already completed, skipping");
        return Ok(RnafoldTool::parse_dot_bracket(&dot_file).map(|(db, _)| db));
    }

    let tool = RnafoldTool::new(config.tools.rnafold.clone());
    if !tool.check() {
        warn!("RNAfold not available; continuing without a secondary structure");
        store.mark_completed(run, &stage, vec![])?;
        return Ok(None);
    }

    reporter.report(Progress::StageStart {
        name: "Secondary Structure".into(),
    });
    std::fs::create_dir_all(&stage_dir)?;
    store.mark_started(run, &stage)?;

    let invocation = tool.invocation(fasta, &stage_dir);
    let outcome = runner.run("rnafold", &invocation).await;

    let result = if outcome.is_success() && outputs_present(&invocation.expected_outputs) {
        store.mark_completed(run, &stage, invocation.expected_outputs.clone())?;
        match RnafoldTool::parse_dot_bracket(&dot_file) {
            Some((db, mfe)) => {
                info!(structure = %db, mfe, "Secondary structure predicted");
                Some(db)
            }
            None => {
                warn!("RNAfold output could not be parsed");
                None
            }
        }
    } else {
        store.mark_failed(run, &stage, outcome.failure_reason())?;
        None
    };
    reporter.report(Progress::StageFinish);
    Ok(result)
}

fn build_prediction_input(
    fasta: &Path,
    msa: Option<PathBuf>,
    secondary_structure: Option<String>,
) -> Result<PredictionInput, EngineError> {
    let records =
        read_fasta(fasta).map_err(|error| EngineError::Input(error.to_string()))?;
    let record = records
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::Input("query disappeared from run directory".into()))?;
    Ok(PredictionInput {
        fasta: fasta.to_path_buf(),
        sequence_id: record.id().to_string(),
        sequence: record.sequence,
        msa,
        secondary_structure,
    })
}

async fn run_predictions(
    store: &CheckpointStore,
    run: &mut PipelineRun,
    config: &PipelineConfig,
    input: &PredictionInput,
    run_dir: &Path,
    reporter: &Arc<ProgressReporter>,
) -> Result<(), EngineError> {
    let pending: Vec<String> = config
        .backends
        .iter()
        .filter(|backend| !run.is_completed(&StageId::Prediction((*backend).clone())))
        .cloned()
        .collect();
    if pending.is_empty() {
        info!("All prediction stages already completed, skipping");
        return Ok(());
    }

    reporter.report(Progress::StageStart {
        name: "3D Prediction".into(),
    });

    let mut tasks: JoinSet<(String, EnsembleResult)> = JoinSet::new();
    for backend_name in &pending {
        let stage = StageId::Prediction(backend_name.clone());
        let backend = backend_for(backend_name, &config.tools)
            .expect("backends were validated before any stage started");

        if !backend.check() {
            store.mark_failed(run, &stage, format!("{backend_name} is not available"))?;
            continue;
        }
        store.mark_started(run, &stage)?;

        let plans = diversity::plan(config.nstruct, config.mc_dropout, config.noise_scale);
        let devices = config.devices.clone();
        let work_dir = run_dir.join(PREDICTION_DIR).join(backend_name);
        std::fs::create_dir_all(&work_dir)?;
        let dispatcher = Dispatcher::new(
            CommandRunner::new(run_dir.join("logs"), config.invocation_timeout),
            reporter.clone(),
        );
        let input = input.clone();
        let name = backend_name.clone();
        tasks.spawn(async move {
            let ensemble = dispatcher
                .run(backend, &input, &plans, &devices, &work_dir)
                .await;
            (name, ensemble)
        });
    }

    // Branches report back here; this loop is the only checkpoint writer.
    while let Some(joined) = tasks.join_next().await {
        let (backend_name, ensemble) = match joined {
            Ok(result) => result,
            Err(error) => {
                warn!(%error, "Prediction branch panicked");
                continue;
            }
        };
        let stage = StageId::Prediction(backend_name.clone());
        let succeeded = ensemble.success_count();
        if succeeded > 0 {
            let artifacts = ensemble
                .structure_paths()
                .into_iter()
                .cloned()
                .collect();
            info!(
                backend = %backend_name,
                succeeded,
                planned = ensemble.members.len(),
                "Prediction branch completed"
            );
            run.ensembles.insert(backend_name, ensemble);
            store.mark_completed(run, &stage, artifacts)?;
        } else {
            let reason = ensemble
                .members
                .iter()
                .find_map(|m| match &m.outcome {
                    MemberOutcome::Failed { reason } => Some(reason.clone()),
                    MemberOutcome::Structure { .. } => None,
                })
                .unwrap_or_else(|| "no members were planned".into());
            run.ensembles.insert(backend_name, ensemble);
            store.mark_failed(run, &stage, format!("all members failed: {reason}"))?;
        }
    }

    reporter.report(Progress::StageFinish);
    Ok(())
}

/// Clusters each completed backend ensemble and returns the structures to
/// score per backend: cluster representatives normally, all successful
/// members when clustering failed (raw fallback).
fn run_clustering(
    store: &CheckpointStore,
    run: &mut PipelineRun,
    config: &PipelineConfig,
    run_dir: &Path,
    reporter: &Arc<ProgressReporter>,
) -> Result<BTreeMap<String, Vec<usize>>, EngineError> {
    let mut representatives = BTreeMap::new();

    for backend in &config.backends {
        let stage = StageId::Clustering(backend.clone());
        let prediction = StageId::Prediction(backend.clone());

        if !run.is_completed(&prediction) {
            let reason = EngineError::UpstreamFailed {
                stage: stage.clone(),
                upstream: prediction.clone(),
            };
            store.mark_failed(run, &stage, reason.to_string())?;
            continue;
        }
        let Some(ensemble) = run.ensembles.get(backend).cloned() else {
            store.mark_failed(run, &stage, "ensemble result missing from state")?;
            continue;
        };

        let clusters_path = run_dir
            .join(PREDICTION_DIR)
            .join(backend)
            .join("clusters.json");

        if run.is_completed(&stage) {
            info!(backend = %backend, "Clustering already completed, skipping");
            representatives.insert(
                backend.clone(),
                reps_from_artifacts(&clusters_path, &ensemble),
            );
            continue;
        }

        reporter.report(Progress::StageStart {
            name: format!("Clustering ({backend})"),
        });
        store.mark_started(run, &stage)?;

        match cluster::cluster(&ensemble, config.rmsd_threshold) {
            Ok(clusters) => {
                let reps: Vec<usize> = clusters.iter().map(|c| c.representative).collect();
                let json = serde_json::to_string_pretty(&clusters)
                    .map_err(|e| EngineError::Input(e.to_string()))?;
                std::fs::write(&clusters_path, json)?;
                info!(
                    backend = %backend,
                    clusters = clusters.len(),
                    "Ensemble reduced to cluster representatives"
                );
                store.mark_completed(run, &stage, vec![clusters_path.clone()])?;
                representatives.insert(backend.clone(), reps);
            }
            Err(error) => {
                // Clustering failure is local to this backend: its raw
                // successful members fall back to being scored directly.
                store.mark_failed(run, &stage, error.to_string())?;
                representatives.insert(backend.clone(), ensemble.successful_indices());
            }
        }
        reporter.report(Progress::StageFinish);
    }

    Ok(representatives)
}

fn reps_from_artifacts(clusters_path: &Path, ensemble: &EnsembleResult) -> Vec<usize> {
    std::fs::read_to_string(clusters_path)
        .ok()
        .and_then(|raw| {
            serde_json::from_str::<Vec<crate::core::models::cluster::StructureCluster>>(&raw).ok()
        })
        .map(|clusters| clusters.iter().map(|c| c.representative).collect())
        .unwrap_or_else(|| ensemble.successful_indices())
}

async fn run_scoring(
    store: &CheckpointStore,
    run: &mut PipelineRun,
    config: &PipelineConfig,
    runner: &CommandRunner,
    run_dir: &Path,
    representatives: BTreeMap<String, Vec<usize>>,
    reporter: &Arc<ProgressReporter>,
) -> Result<Vec<RankedModel>, EngineError> {
    let stage = StageId::Scoring;
    let scoring_dir = run_dir.join(SCORING_DIR);
    let scores_json = scoring_dir.join("scores.json");

    if run.is_completed(&stage) {
        if let Some(ranking) = ranking_from_artifacts(&scores_json) {
            info!("Scoring already completed, skipping");
            return Ok(ranking);
        }
        run.stage_mut(&stage).status = StageStatus::Pending;
    }

    // Candidates sorted by (backend, seed): aggregation must never depend
    // on the order branches finished in.
    let mut candidates: Vec<(String, usize, PathBuf)> = Vec::new();
    for (backend, indices) in &representatives {
        let Some(ensemble) = run.ensembles.get(backend) else {
            continue;
        };
        for &index in indices {
            let member = &ensemble.members[index];
            if let Some(path) = member.structure_path() {
                candidates.push((backend.clone(), member.seed, path.clone()));
            }
        }
    }
    candidates.sort();

    if candidates.is_empty() {
        store.mark_failed(run, &stage, "no backend produced any structure")?;
        mark_report_blocked(store, run, &stage)?;
        return Err(EngineError::NothingToScore);
    }

    reporter.report(Progress::StageStart {
        name: "Scoring".into(),
    });

    let tool = RnadvisorTool::new(config.tools.rnadvisor.clone());
    if !tool.check() {
        store.mark_failed(run, &stage, "rnadvisor is not available")?;
        mark_report_blocked(store, run, &stage)?;
        return Err(EngineError::Scoring("rnadvisor is not available".into()));
    }

    store.mark_started(run, &stage)?;

    // Stage the representatives under stable names for the scorer.
    let models_dir = scoring_dir.join("models");
    std::fs::create_dir_all(&models_dir)?;
    for (backend, seed, path) in &candidates {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("pdb");
        std::fs::copy(path, models_dir.join(format!("{backend}_s{seed}.{extension}")))?;
    }
    info!(models = candidates.len(), "Scoring cluster representatives");

    let scores_csv = scoring_dir.join("scores.csv");
    let invocation = tool.invocation(&models_dir, &scores_csv);
    let outcome = runner.run("rnadvisor", &invocation).await;

    if !outcome.is_success() || !outputs_present(&invocation.expected_outputs) {
        let reason = if outcome.is_success() {
            "scorer produced no output table".to_string()
        } else {
            outcome.failure_reason()
        };
        store.mark_failed(run, &stage, &reason)?;
        mark_report_blocked(store, run, &stage)?;
        return Err(EngineError::Scoring(reason));
    }

    let scores = RnadvisorTool::parse_scores(&scores_csv)
        .map_err(|error| EngineError::Scoring(error.to_string()))?;
    let ranking = RnadvisorTool::consensus_rank(&scores);
    if ranking.is_empty() {
        store.mark_failed(run, &stage, "scorer ranked no models")?;
        mark_report_blocked(store, run, &stage)?;
        return Err(EngineError::Scoring("scorer ranked no models".into()));
    }

    std::fs::write(
        &scores_json,
        serde_json::to_string_pretty(&scores).map_err(|e| EngineError::Input(e.to_string()))?,
    )?;
    let ranking_txt = scoring_dir.join("ranking.txt");
    let lines: Vec<String> = ranking
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {} (mean rank: {:.2})", i + 1, r.model, r.mean_rank))
        .collect();
    std::fs::write(&ranking_txt, lines.join("\n") + "\n")?;

    info!(best = %ranking[0].model, "Scoring complete");
    store.mark_completed(
        run,
        &stage,
        vec![scores_csv, scores_json.clone(), ranking_txt],
    )?;
    reporter.report(Progress::StageFinish);
    Ok(ranking)
}

fn ranking_from_artifacts(scores_json: &Path) -> Option<Vec<RankedModel>> {
    let raw = std::fs::read_to_string(scores_json).ok()?;
    let scores: Vec<crate::tools::rnadvisor::ModelScores> = serde_json::from_str(&raw).ok()?;
    let ranking = RnadvisorTool::consensus_rank(&scores);
    (!ranking.is_empty()).then_some(ranking)
}

/// A failed scoring stage blocks its declared dependent, the report.
fn mark_report_blocked(
    store: &CheckpointStore,
    run: &mut PipelineRun,
    upstream: &StageId,
) -> Result<(), EngineError> {
    let reason = EngineError::UpstreamFailed {
        stage: StageId::Report,
        upstream: upstream.clone(),
    };
    store.mark_failed(run, &StageId::Report, reason.to_string())?;
    Ok(())
}

fn run_report(
    store: &CheckpointStore,
    run: &mut PipelineRun,
    run_dir: &Path,
    reporter: &Arc<ProgressReporter>,
) -> Result<PathBuf, EngineError> {
    let stage = StageId::Report;
    reporter.report(Progress::StageStart {
        name: "Report".into(),
    });
    store.mark_started(run, &stage)?;
    match super::report::write_summary(run_dir, run) {
        Ok(path) => {
            store.mark_completed(run, &stage, vec![path.clone()])?;
            reporter.report(Progress::StageFinish);
            Ok(path)
        }
        Err(error) => {
            store.mark_failed(run, &stage, error.to_string())?;
            Err(EngineError::Io(error))
        }
    }
}

fn outputs_present(outputs: &[PathBuf]) -> bool {
    outputs.iter().all(|path| {
        std::fs::metadata(path)
            .map(|meta| meta.len() > 0)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::{PipelineConfig, RnadvisorConfig, SimRnaConfig, ToolsConfig};
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    /// Fake SimRNA: records each invocation, then writes a small but valid
    /// backbone PDB to `<prefix>_AA.pdb`.
    fn fake_simrna(dir: &Path, marker: &Path) -> PathBuf {
        let script = dir.join("SimRNA");
        let body = [
            "#!/bin/sh".to_string(),
            format!("echo run >> {}", marker.display()),
            "prefix=\"\"".to_string(),
            "while [ $# -gt 0 ]; do".to_string(),
            "  case \"$1\" in -o) prefix=\"$2\"; shift 2;; *) shift;; esac".to_string(),
            "done".to_string(),
            "cat > \"${prefix}_AA.pdb\" <<'EOF'".to_string(),
            "ATOM      1  P     G A   1       0.000   0.000   0.000  1.00  0.00           P"
                .to_string(),
            "ATOM      2  P     G A   2       3.000   1.000   1.100  1.00  0.00           P"
                .to_string(),
            "ATOM      3  P     G A   3       6.000   2.500   2.200  1.00  0.00           P"
                .to_string(),
            "ATOM      4  P     G A   4       9.000   1.500   3.300  1.00  0.00           P"
                .to_string(),
            "EOF".to_string(),
        ];
        std::fs::write(&script, body.join("\n") + "\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    /// Fake RNAdvisor: one CSV row per staged model.
    fn fake_rnadvisor(dir: &Path) -> PathBuf {
        let script = dir.join("rnadvisor");
        let body = [
            "#!/bin/sh",
            "pd=\"\"; out=\"\"",
            "while [ $# -gt 0 ]; do",
            "  case \"$1\" in",
            "    --pred_dir) pd=\"$2\"; shift 2;;",
            "    --out_path) out=\"$2\"; shift 2;;",
            "    *) shift;;",
            "  esac",
            "done",
            "echo 'name,rsRNASP,MCQ' > \"$out\"",
            "i=0",
            "for f in \"$pd\"/*; do",
            "  i=$((i+1))",
            "  echo \"$(basename \"$f\"),-1$i0.0,0.$i\" >> \"$out\"",
            "done",
        ];
        std::fs::write(&script, body.join("\n") + "\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn write_query(dir: &Path) -> PathBuf {
        let fasta = dir.join("query.fasta");
        std::fs::write(&fasta, ">hairpin test\nGGGAAACCC\n").unwrap();
        fasta
    }

    fn test_config(tools_dir: &Path, marker: &Path, nstruct: usize) -> PipelineConfig {
        PipelineConfig::builder()
            .backends(vec!["simrna".into()])
            .nstruct(nstruct)
            .invocation_timeout(Duration::from_secs(30))
            .tools(ToolsConfig {
                simrna: SimRnaConfig {
                    binary: Some(fake_simrna(tools_dir, marker)),
                    data_dir: None,
                    steps: 100,
                },
                rnadvisor: RnadvisorConfig {
                    binary: fake_rnadvisor(tools_dir).display().to_string(),
                    metrics: vec!["rsRNASP".into(), "MCQ".into()],
                },
                ..ToolsConfig::default()
            })
            .build()
            .unwrap()
    }

    fn invocation_count(marker: &Path) -> usize {
        std::fs::read_to_string(marker)
            .map(|text| text.lines().count())
            .unwrap_or(0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn end_to_end_run_produces_a_ranking() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("invocations.log");
        let fasta = write_query(dir.path());
        let run_dir = dir.path().join("run");
        let config = test_config(dir.path(), &marker, 3);

        let outcome = run(&fasta, &run_dir, &config, Arc::new(ProgressReporter::new()))
            .await
            .unwrap();

        assert_eq!(outcome.ranking.len(), 1, "identical members cluster to one rep");
        assert!(outcome.report.is_file());
        assert_eq!(invocation_count(&marker), 3);

        let run_state = outcome.run;
        for stage in [
            StageId::SequenceAnalysis,
            StageId::SecondaryStructure,
            StageId::Prediction("simrna".into()),
            StageId::Clustering("simrna".into()),
            StageId::Scoring,
            StageId::Report,
        ] {
            assert_eq!(
                run_state.stage(&stage).unwrap().status,
                StageStatus::Completed,
                "{stage}"
            );
        }
        assert!(
            run_dir
                .join("03_3d_prediction/simrna/clusters.json")
                .is_file()
        );
        assert!(run_dir.join("pipeline_state.json").is_file());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resume_skips_completed_prediction_stages() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("invocations.log");
        let fasta = write_query(dir.path());
        let run_dir = dir.path().join("run");
        let config = test_config(dir.path(), &marker, 2);

        run(&fasta, &run_dir, &config, Arc::new(ProgressReporter::new()))
            .await
            .unwrap();
        assert_eq!(invocation_count(&marker), 2);

        // Identical configuration: nothing re-runs, the ranking is reloaded.
        let outcome = run(&fasta, &run_dir, &config, Arc::new(ProgressReporter::new()))
            .await
            .unwrap();
        assert_eq!(invocation_count(&marker), 2, "prediction must not re-run");
        assert!(!outcome.ranking.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn interrupted_prediction_restarts_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("invocations.log");
        let fasta = write_query(dir.path());
        let run_dir = dir.path().join("run");
        let config = test_config(dir.path(), &marker, 2);

        run(&fasta, &run_dir, &config, Arc::new(ProgressReporter::new()))
            .await
            .unwrap();
        assert_eq!(invocation_count(&marker), 2);

        // Simulate a crash mid-prediction: the stage is on disk as
        // `running` with no recorded ensemble.
        let store = CheckpointStore::new(&run_dir);
        let mut state = store.load().unwrap().unwrap();
        state
            .stage_mut(&StageId::Prediction("simrna".into()))
            .status = StageStatus::Running;
        state.ensembles.clear();
        store.save(&state).unwrap();

        let outcome = run(&fasta, &run_dir, &config, Arc::new(ProgressReporter::new()))
            .await
            .unwrap();
        // Stages 1-2 are skipped, prediction re-runs all members.
        assert_eq!(invocation_count(&marker), 4);
        assert_eq!(
            outcome.run.stage(&StageId::SequenceAnalysis).unwrap().status,
            StageStatus::Completed
        );
        assert!(!outcome.ranking.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn changed_nstruct_invalidates_cached_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("invocations.log");
        let fasta = write_query(dir.path());
        let run_dir = dir.path().join("run");

        run(
            &fasta,
            &run_dir,
            &test_config(dir.path(), &marker, 2),
            Arc::new(ProgressReporter::new()),
        )
        .await
        .unwrap();
        assert_eq!(invocation_count(&marker), 2);

        run(
            &fasta,
            &run_dir,
            &test_config(dir.path(), &marker, 3),
            Arc::new(ProgressReporter::new()),
        )
        .await
        .unwrap();
        assert_eq!(
            invocation_count(&marker),
            5,
            "artifacts exist but the fingerprint changed, so prediction re-runs"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn partial_backend_success_still_ranks() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("invocations.log");
        let fasta = write_query(dir.path());
        let run_dir = dir.path().join("run");
        // rhofold has no script configured, so its branch fails; simrna
        // carries the run.
        let mut config = test_config(dir.path(), &marker, 2);
        config.backends = vec!["rhofold".into(), "simrna".into()];

        let outcome = run(&fasta, &run_dir, &config, Arc::new(ProgressReporter::new()))
            .await
            .unwrap();

        assert_eq!(
            outcome.run.stage(&StageId::Prediction("rhofold".into())).unwrap().status,
            StageStatus::Failed
        );
        assert_eq!(
            outcome.run.stage(&StageId::Prediction("simrna".into())).unwrap().status,
            StageStatus::Completed
        );
        assert!(!outcome.ranking.is_empty());
        assert!(outcome.ranking.iter().all(|r| r.model.starts_with("simrna")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn zero_successful_backends_is_pipeline_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("invocations.log");
        let fasta = write_query(dir.path());
        let run_dir = dir.path().join("run");
        let mut config = test_config(dir.path(), &marker, 2);
        config.backends = vec!["rhofold".into()];

        let error = run(&fasta, &run_dir, &config, Arc::new(ProgressReporter::new()))
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::NothingToScore));

        let store = CheckpointStore::new(&run_dir);
        let state = store.load().unwrap().unwrap();
        assert_eq!(state.stage(&StageId::Scoring).unwrap().status, StageStatus::Failed);
        assert_eq!(state.stage(&StageId::Report).unwrap().status, StageStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_backend_fails_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("invocations.log");
        let fasta = write_query(dir.path());
        let run_dir = dir.path().join("run");
        let mut config = test_config(dir.path(), &marker, 1);
        config.backends = vec!["alphafold".into()];

        let error = run(&fasta, &run_dir, &config, Arc::new(ProgressReporter::new()))
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::Configuration(_)));
        assert!(!run_dir.join("pipeline_state.json").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sequence_stages_complete_without_their_tools() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("invocations.log");
        let fasta = write_query(dir.path());
        let run_dir = dir.path().join("run");
        let config = test_config(dir.path(), &marker, 1);

        let outcome = run(&fasta, &run_dir, &config, Arc::new(ProgressReporter::new()))
            .await
            .unwrap();
        // Neither Infernal nor RNAfold is configured in the test
        // environment; both stages complete as empty enrichment stages.
        assert_eq!(
            outcome.run.stage(&StageId::SequenceAnalysis).unwrap().status,
            StageStatus::Completed
        );
        assert_eq!(
            outcome.run.stage(&StageId::SecondaryStructure).unwrap().status,
            StageStatus::Completed
        );
    }
}
