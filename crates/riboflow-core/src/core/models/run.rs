use super::ensemble::EnsembleResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Identifies one stage of the pipeline state machine.
///
/// Per-backend stages carry the backend name so that branches checkpoint
/// independently: a failure in `Prediction("simrna")` never touches
/// `Prediction("rhofold")`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum StageId {
    /// Rfam family search and MSA construction (Infernal).
    SequenceAnalysis,
    /// Secondary structure prediction (RNAfold).
    SecondaryStructure,
    /// 3D structure prediction for one backend.
    Prediction(String),
    /// RMSD clustering of one backend's ensemble.
    Clustering(String),
    /// External scoring of representative structures.
    Scoring,
    /// Summary report generation.
    Report,
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageId::SequenceAnalysis => write!(f, "sequence_analysis"),
            StageId::SecondaryStructure => write!(f, "secondary_structure"),
            StageId::Prediction(backend) => write!(f, "prediction:{backend}"),
            StageId::Clustering(backend) => write!(f, "clustering:{backend}"),
            StageId::Scoring => write!(f, "scoring"),
            StageId::Report => write!(f, "report"),
        }
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequence_analysis" => Ok(StageId::SequenceAnalysis),
            "secondary_structure" => Ok(StageId::SecondaryStructure),
            "scoring" => Ok(StageId::Scoring),
            "report" => Ok(StageId::Report),
            other => match other.split_once(':') {
                Some(("prediction", backend)) if !backend.is_empty() => {
                    Ok(StageId::Prediction(backend.to_string()))
                }
                Some(("clustering", backend)) if !backend.is_empty() => {
                    Ok(StageId::Clustering(backend.to_string()))
                }
                _ => Err(format!("unknown stage identifier: {other:?}")),
            },
        }
    }
}

impl From<StageId> for String {
    fn from(id: StageId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for StageId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Lifecycle status of one stage.
///
/// `Running` is only ever observed in memory or in a state file written by a
/// process that died; the checkpoint store downgrades it to `Pending` on
/// load because no process survives a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Checkpointed record of one stage's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageId,
    pub status: StageStatus,
    /// Output artifact paths declared at completion. A stage is `Completed`
    /// only if every listed artifact exists and is non-empty.
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
    /// Failure diagnostic, present only for `Failed` records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Wall-clock time of the last status transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl StageRecord {
    pub fn pending(stage: StageId) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            artifacts: Vec::new(),
            failure: None,
            timestamp: None,
        }
    }

    /// Whether the record counts as completed *and* its declared artifacts
    /// are still present and non-empty on disk.
    pub fn completed_with_artifacts(&self) -> bool {
        self.status == StageStatus::Completed
            && self.artifacts.iter().all(|p| {
                std::fs::metadata(p)
                    .map(|meta| meta.len() > 0)
                    .unwrap_or(false)
            })
    }
}

/// Summary of the configuration governing the prediction stages, used to
/// detect stale cached results on resume.
///
/// Equality is exact: any change to the backend set, ensemble size,
/// stochastic flags, or device list invalidates prediction and everything
/// downstream of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFingerprint {
    pub backends: Vec<String>,
    pub nstruct: usize,
    pub mc_dropout: bool,
    pub noise_scale: f64,
    pub devices: Vec<String>,
}

/// The persisted state of one pipeline execution over one input sequence.
///
/// The run exclusively owns its stage records and ensemble results. Only
/// the stage orchestrator mutates it, and every transition goes through the
/// checkpoint store so the on-disk state always reflects the last fully
/// applied transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Fingerprint of the configuration this run's cached stages are valid
    /// for.
    pub fingerprint: ConfigFingerprint,
    /// Ordered stage records, upstream first.
    pub stages: Vec<StageRecord>,
    /// Ensemble results keyed by backend name. `BTreeMap` keeps the
    /// serialized state file stable and human-diffable.
    #[serde(default)]
    pub ensembles: BTreeMap<String, EnsembleResult>,
}

impl PipelineRun {
    /// Creates a fresh run with every stage for `fingerprint`'s backend set
    /// in `Pending` state.
    pub fn new(fingerprint: ConfigFingerprint) -> Self {
        let mut stages = vec![
            StageRecord::pending(StageId::SequenceAnalysis),
            StageRecord::pending(StageId::SecondaryStructure),
        ];
        for backend in &fingerprint.backends {
            stages.push(StageRecord::pending(StageId::Prediction(backend.clone())));
        }
        for backend in &fingerprint.backends {
            stages.push(StageRecord::pending(StageId::Clustering(backend.clone())));
        }
        stages.push(StageRecord::pending(StageId::Scoring));
        stages.push(StageRecord::pending(StageId::Report));
        Self {
            fingerprint,
            stages,
            ensembles: BTreeMap::new(),
        }
    }

    pub fn stage(&self, id: &StageId) -> Option<&StageRecord> {
        self.stages.iter().find(|record| &record.stage == id)
    }

    pub fn stage_mut(&mut self, id: &StageId) -> &mut StageRecord {
        let position = self.stages.iter().position(|record| &record.stage == id);
        match position {
            Some(index) => &mut self.stages[index],
            None => {
                self.stages.push(StageRecord::pending(id.clone()));
                self.stages.last_mut().unwrap()
            }
        }
    }

    /// Whether `id` is completed and its artifacts survive on disk.
    pub fn is_completed(&self, id: &StageId) -> bool {
        self.stage(id)
            .map(StageRecord::completed_with_artifacts)
            .unwrap_or(false)
    }

    /// Downgrades any `Running` record to `Pending`. Called on every load:
    /// a `Running` status in a freshly loaded file means the prior process
    /// died mid-stage.
    pub fn downgrade_running(&mut self) {
        for record in &mut self.stages {
            if record.status == StageStatus::Running {
                record.status = StageStatus::Pending;
                record.artifacts.clear();
            }
        }
    }

    /// Invalidates the prediction stages and everything downstream of them,
    /// discarding recorded ensembles, then installs `fingerprint` as the
    /// run's new governing configuration.
    ///
    /// The sequence stages are left untouched; their behavior does not
    /// depend on any fingerprinted knob.
    pub fn invalidate_for(&mut self, fingerprint: ConfigFingerprint) {
        self.stages.retain(|record| {
            matches!(
                record.stage,
                StageId::SequenceAnalysis | StageId::SecondaryStructure
            )
        });
        for backend in &fingerprint.backends {
            self.stages
                .push(StageRecord::pending(StageId::Prediction(backend.clone())));
        }
        for backend in &fingerprint.backends {
            self.stages
                .push(StageRecord::pending(StageId::Clustering(backend.clone())));
        }
        self.stages.push(StageRecord::pending(StageId::Scoring));
        self.stages.push(StageRecord::pending(StageId::Report));
        self.ensembles.clear();
        self.fingerprint = fingerprint;
    }
}
