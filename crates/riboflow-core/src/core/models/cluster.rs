use serde::{Deserialize, Serialize};

/// One structural cluster over an ensemble, holding non-owning references
/// (member indices) into the [`EnsembleResult`] it was computed from.
///
/// Index-based references keep the cluster free of any lifetime coupling to
/// the ensemble's members; a cluster must be discarded whenever its ensemble
/// is regenerated.
///
/// [`EnsembleResult`]: super::ensemble::EnsembleResult
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureCluster {
    /// Index of the representative member (the medoid: lowest mean RMSD to
    /// its co-members, ties broken by lowest seed).
    pub representative: usize,
    /// Indices of all members assigned to this cluster, ascending.
    pub members: Vec<usize>,
    /// Mean pairwise RMSD between cluster members, in Angstroms.
    /// Zero for singleton clusters.
    pub mean_rmsd: f64,
    /// Largest pairwise RMSD between cluster members, in Angstroms.
    pub max_rmsd: f64,
    /// Whether the cluster's members span two or more backends. Agreement
    /// between independent prediction methods is evidence the conformation
    /// is not a single method's artifact.
    #[serde(default)]
    pub consensus: bool,
}

impl StructureCluster {
    /// Number of members in this cluster.
    pub fn population(&self) -> usize {
        self.members.len()
    }
}
