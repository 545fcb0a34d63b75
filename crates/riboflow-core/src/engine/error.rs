use crate::core::io::StructureIoError;
use crate::core::models::run::StageId;
use thiserror::Error;

/// Failure to durably record pipeline state. Always fatal for the whole
/// run: the orchestrator must not proceed past a stage whose completion
/// could not be recorded.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write checkpoint '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read checkpoint '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint '{path}' is not valid pipeline state: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures while preparing or launching a backend invocation. Member-level
/// process failures are *not* errors; they become failure markers on the
/// owning members.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("backend '{backend}' does not support batch execution")]
    BatchUnsupported { backend: String },

    #[error("failed to prepare invocation for backend '{backend}': {source}")]
    InputPreparation {
        backend: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of the structural clustering engine. Fatal for one backend's
/// clustering stage only; the raw successful members fall back to being
/// scored directly.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(
        "atom count mismatch between members (seed {seed_a}: {len_a} backbone atoms, seed {seed_b}: {len_b})"
    )]
    AtomCountMismatch {
        seed_a: usize,
        len_a: usize,
        seed_b: usize,
        len_b: usize,
    },

    #[error("failed to load member structure: {source}")]
    StructureIo {
        #[from]
        source: StructureIoError,
    },

    #[error("RMSD superposition failed between seeds {seed_a} and {seed_b}")]
    Superposition { seed_a: usize, seed_b: usize },
}

/// Top-level error taxonomy of the stage orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration, surfaced before any stage starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required upstream stage never completed, so the dependent stage is
    /// failed without attempting execution.
    #[error("stage '{stage}' cannot run: upstream stage '{upstream}' did not complete")]
    UpstreamFailed { stage: StageId, upstream: StageId },

    /// Scoring produced no ranking (zero backends produced any structure).
    #[error("scoring failed: no backend produced any structure")]
    NothingToScore,

    /// The external scorer ran but did not produce a usable ranking.
    #[error("scoring failed: {0}")]
    Scoring(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("input error: {0}")]
    Input(String),

    /// The run was interrupted by the user; the checkpoint reflects the
    /// last fully completed stage.
    #[error("run interrupted")]
    Interrupted,
}
