use super::member::EnsembleMember;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The ordered collection of [`EnsembleMember`]s produced by one backend
/// during one pipeline run.
///
/// The result exclusively owns its members; structural clusters refer to
/// them by index and must never outlive the result they index into.
/// Members are kept in ascending seed order regardless of the order in
/// which devices finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    /// Name of the backend that produced this ensemble.
    pub backend: String,
    /// All planned members, successful and failed, ordered by seed.
    pub members: Vec<EnsembleMember>,
}

impl EnsembleResult {
    /// Creates a result for `backend`, sorting `members` by seed so that
    /// downstream consumers never observe device completion order.
    pub fn new(backend: impl Into<String>, mut members: Vec<EnsembleMember>) -> Self {
        members.sort_by_key(|m| m.seed);
        Self {
            backend: backend.into(),
            members,
        }
    }

    /// Indices of the members that produced a structure, in seed order.
    pub fn successful_indices(&self) -> Vec<usize> {
        self.members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_success())
            .map(|(i, _)| i)
            .collect()
    }

    /// Number of members that produced a structure.
    pub fn success_count(&self) -> usize {
        self.members.iter().filter(|m| m.is_success()).count()
    }

    /// Structure file paths of successful members, in seed order.
    pub fn structure_paths(&self) -> Vec<&PathBuf> {
        self.members
            .iter()
            .filter_map(|m| m.structure_path())
            .collect()
    }

    /// Returns `true` if every recorded structure file still exists and is
    /// non-empty on disk. Used to decide whether a persisted prediction
    /// stage can be trusted on resume.
    pub fn artifacts_intact(&self) -> bool {
        self.structure_paths().iter().all(|p| {
            std::fs::metadata(p)
                .map(|meta| meta.len() > 0)
                .unwrap_or(false)
        })
    }
}
