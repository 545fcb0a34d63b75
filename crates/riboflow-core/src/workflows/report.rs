use crate::core::io::fasta::read_fasta;
use crate::core::models::cluster::StructureCluster;
use crate::core::models::run::{PipelineRun, StageId, StageStatus};
use crate::tools::rnadvisor::{ModelScores, RnadvisorTool};
use crate::tools::rnafold::RnafoldTool;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

/// Directory of the report stage inside a run directory.
pub const REPORT_DIR: &str = "05_report";

/// Renders `summary.md` for a run from its persisted state and stage
/// artifacts. Everything is optional except the stage table: the report
/// shows whatever the run produced, which makes it equally usable for
/// partial and failed runs.
pub fn write_summary(run_dir: &Path, run: &PipelineRun) -> std::io::Result<PathBuf> {
    let report_dir = run_dir.join(REPORT_DIR);
    std::fs::create_dir_all(&report_dir)?;

    let mut text = String::new();
    let _ = writeln!(text, "# riboflow — Structure Prediction Report");
    let _ = writeln!(
        text,
        "\nGenerated: {}\n",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );

    write_input_section(&mut text, run_dir);
    write_secondary_structure_section(&mut text, run_dir);
    write_stage_table(&mut text, run);
    write_ensemble_section(&mut text, run);
    write_cluster_section(&mut text, run);
    write_ranking_section(&mut text, run_dir);

    let path = report_dir.join("summary.md");
    std::fs::write(&path, text)?;
    info!(path = %path.display(), "Report written");
    Ok(path)
}

fn write_input_section(text: &mut String, run_dir: &Path) {
    let fasta = run_dir.join("input").join("query.fasta");
    let Ok(records) = read_fasta(&fasta) else {
        return;
    };
    let Some(record) = records.first() else {
        return;
    };
    let _ = writeln!(text, "## Input");
    let _ = writeln!(text, "- **Sequence ID**: {}", record.id());
    let _ = writeln!(text, "- **Length**: {} nt", record.sequence.len());
    let _ = writeln!(text, "- **GC content**: {:.1}%", record.gc_percent());
    let _ = writeln!(text, "- **Sequence**: `{}`", record.sequence);
    let _ = writeln!(text);
}

fn write_secondary_structure_section(text: &mut String, run_dir: &Path) {
    let dot_file = run_dir.join("02_secondary_structure").join("rnafold.dot");
    let Some((structure, mfe)) = RnafoldTool::parse_dot_bracket(&dot_file) else {
        return;
    };
    let _ = writeln!(text, "## Secondary Structure (RNAfold)");
    let _ = writeln!(text, "- **Dot-bracket**: `{structure}`");
    let _ = writeln!(text, "- **MFE**: {mfe:.2} kcal/mol");
    let _ = writeln!(text);
}

fn write_stage_table(text: &mut String, run: &PipelineRun) {
    let _ = writeln!(text, "## Stages");
    let _ = writeln!(text);
    let _ = writeln!(text, "| Stage | Status | Detail |");
    let _ = writeln!(text, "|-------|--------|--------|");
    for record in &run.stages {
        let status = match record.status {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "FAILED",
        };
        let detail = record.failure.as_deref().unwrap_or("");
        let _ = writeln!(text, "| {} | {} | {} |", record.stage, status, detail);
    }
    let _ = writeln!(text);
}

fn write_ensemble_section(text: &mut String, run: &PipelineRun) {
    if run.ensembles.is_empty() {
        return;
    }
    let _ = writeln!(text, "## Ensembles");
    let _ = writeln!(text);
    let _ = writeln!(text, "| Backend | Members | Succeeded | Failed |");
    let _ = writeln!(text, "|---------|---------|-----------|--------|");
    for (backend, ensemble) in &run.ensembles {
        let succeeded = ensemble.success_count();
        let _ = writeln!(
            text,
            "| {} | {} | {} | {} |",
            backend,
            ensemble.members.len(),
            succeeded,
            ensemble.members.len() - succeeded
        );
    }
    let _ = writeln!(text);
}

fn write_cluster_section(text: &mut String, run: &PipelineRun) {
    let mut wrote_header = false;
    for record in &run.stages {
        let StageId::Clustering(backend) = &record.stage else {
            continue;
        };
        let Some(clusters) = record
            .artifacts
            .iter()
            .find(|p| p.file_name().is_some_and(|n| n == "clusters.json"))
            .and_then(|p| load_clusters(p))
        else {
            continue;
        };
        let Some(ensemble) = run.ensembles.get(backend) else {
            continue;
        };

        if !wrote_header {
            let _ = writeln!(text, "## Structural Clusters");
            let _ = writeln!(text);
            wrote_header = true;
        }
        let _ = writeln!(text, "### {backend}");
        let _ = writeln!(text);
        let _ = writeln!(
            text,
            "| Cluster | Population | Representative seed | Mean RMSD (Å) | Consensus |"
        );
        let _ = writeln!(text, "|---------|------------|--------------------|----------------|-----------|");
        for (i, cluster) in clusters.iter().enumerate() {
            let seed = ensemble
                .members
                .get(cluster.representative)
                .map(|m| m.seed.to_string())
                .unwrap_or_else(|| "?".into());
            let _ = writeln!(
                text,
                "| {} | {} | {} | {:.2} | {} |",
                i + 1,
                cluster.population(),
                seed,
                cluster.mean_rmsd,
                if cluster.consensus { "yes" } else { "no" }
            );
        }
        let _ = writeln!(text);
    }
}

fn write_ranking_section(text: &mut String, run_dir: &Path) {
    let scores_json = run_dir.join("04_scoring").join("scores.json");
    let Ok(raw) = std::fs::read_to_string(&scores_json) else {
        return;
    };
    let Ok(scores) = serde_json::from_str::<Vec<ModelScores>>(&raw) else {
        return;
    };
    let ranking = RnadvisorTool::consensus_rank(&scores);
    if ranking.is_empty() {
        return;
    }

    let _ = writeln!(text, "## Model Ranking");
    let _ = writeln!(text);
    let _ = writeln!(text, "**Best model**: {}", ranking[0].model);
    let _ = writeln!(text);
    let _ = writeln!(text, "| Rank | Model | Mean rank |");
    let _ = writeln!(text, "|------|-------|-----------|");
    for (i, entry) in ranking.iter().enumerate() {
        let _ = writeln!(
            text,
            "| {} | {} | {:.2} |",
            i + 1,
            entry.model,
            entry.mean_rank
        );
    }
    let _ = writeln!(text);
}

fn load_clusters(path: &Path) -> Option<Vec<StructureCluster>> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}
