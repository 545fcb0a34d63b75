use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Execution parameters for one planned ensemble member, before a device has
/// been assigned and before anything has run.
///
/// Plans are produced by the diversity controller. Seed 0 is the canonical
/// deterministic baseline: it always carries `mc_dropout = false` and
/// `noise_scale = 0.0` regardless of what was requested for the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemberPlan {
    /// Seed index within the ensemble (0-based, dense).
    pub seed: usize,
    /// Whether Monte-Carlo dropout is re-enabled for this member's inference.
    pub mc_dropout: bool,
    /// Input noise scale applied to this member's inference (0.0 = none).
    pub noise_scale: f64,
}

impl MemberPlan {
    /// Returns `true` if this plan is the deterministic seed-0 baseline.
    pub fn is_baseline(&self) -> bool {
        self.seed == 0 && !self.mc_dropout && self.noise_scale == 0.0
    }
}

/// Terminal outcome of one ensemble member's external invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MemberOutcome {
    /// The backend emitted a structure file for this member.
    Structure { path: PathBuf },
    /// The invocation failed, timed out, or produced no output file.
    /// `reason` carries the captured diagnostic (exit status / stderr tail);
    /// it is never discarded silently.
    Failed { reason: String },
}

/// One generated 3D structure candidate for a given backend and seed.
///
/// Members are immutable once produced: the dispatcher builds them and the
/// rest of the pipeline only reads them (clustering refers to them by index).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMember {
    /// Name of the backend that produced (or failed to produce) this member.
    pub backend: String,
    /// Seed index within the backend's ensemble.
    pub seed: usize,
    /// Identifier of the compute device the member ran on (e.g. `cuda:0`,
    /// or the `cpu` fallback sentinel).
    pub device: String,
    /// Whether Monte-Carlo dropout was enabled for this member.
    pub mc_dropout: bool,
    /// Input noise scale applied for this member.
    pub noise_scale: f64,
    /// Result of the invocation.
    pub outcome: MemberOutcome,
}

impl EnsembleMember {
    /// The structure file path, if this member succeeded.
    pub fn structure_path(&self) -> Option<&PathBuf> {
        match &self.outcome {
            MemberOutcome::Structure { path } => Some(path),
            MemberOutcome::Failed { .. } => None,
        }
    }

    /// Returns `true` if this member produced a structure.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, MemberOutcome::Structure { .. })
    }
}
