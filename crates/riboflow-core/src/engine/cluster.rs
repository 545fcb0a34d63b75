use crate::core::io::read_backbone_coords;
use crate::core::models::cluster::StructureCluster;
use crate::core::models::ensemble::EnsembleResult;
use crate::engine::error::ClusterError;
use nalgebra::Point3;
use tracing::{debug, info};

/// Groups an ensemble's successful members into structural clusters and
/// selects a representative per cluster.
///
/// Failed members are excluded before any geometry is touched. With exactly
/// one successful member the trivial singleton cluster is returned without
/// computing RMSD. Otherwise the full pairwise RMSD matrix (optimal
/// superposition, backbone atoms) is agglomerated greedily: pairs are
/// visited in ascending RMSD order and their clusters merged while the pair
/// is below `rmsd_threshold` (single linkage). The representative is the
/// medoid, ties broken by lowest seed; output clusters are ordered by
/// descending population, then ascending representative seed. The whole
/// computation is deterministic for a given ensemble.
pub fn cluster(
    ensemble: &EnsembleResult,
    rmsd_threshold: f64,
) -> Result<Vec<StructureCluster>, ClusterError> {
    let selected: Vec<usize> = ensemble.successful_indices();
    match selected.len() {
        0 => return Ok(Vec::new()),
        1 => {
            return Ok(vec![StructureCluster {
                representative: selected[0],
                members: selected,
                mean_rmsd: 0.0,
                max_rmsd: 0.0,
                consensus: false,
            }]);
        }
        _ => {}
    }

    let coords = load_coordinates(ensemble, &selected)?;
    let matrix = pairwise_rmsd(ensemble, &selected, &coords)?;
    let assignment = agglomerate(selected.len(), &matrix, rmsd_threshold);
    let clusters = build_clusters(ensemble, &selected, &matrix, &assignment);

    info!(
        backend = %ensemble.backend,
        members = selected.len(),
        clusters = clusters.len(),
        threshold = rmsd_threshold,
        "Clustering complete"
    );
    Ok(clusters)
}

fn load_coordinates(
    ensemble: &EnsembleResult,
    selected: &[usize],
) -> Result<Vec<Vec<Point3<f64>>>, ClusterError> {
    let mut coords = Vec::with_capacity(selected.len());
    for &index in selected {
        let member = &ensemble.members[index];
        let path = member
            .structure_path()
            .expect("selected indices are successful members");
        coords.push(read_backbone_coords(path)?);
    }

    // Atom selection must be consistent across the whole ensemble; a
    // mismatch is an error, never a silently skipped pair.
    for window in 0..coords.len() {
        if coords[window].len() != coords[0].len() {
            return Err(ClusterError::AtomCountMismatch {
                seed_a: ensemble.members[selected[0]].seed,
                len_a: coords[0].len(),
                seed_b: ensemble.members[selected[window]].seed,
                len_b: coords[window].len(),
            });
        }
    }
    Ok(coords)
}

fn pairwise_rmsd(
    ensemble: &EnsembleResult,
    selected: &[usize],
    coords: &[Vec<Point3<f64>>],
) -> Result<Vec<Vec<f64>>, ClusterError> {
    use crate::core::utils::geometry::superposed_rmsd;

    let n = coords.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let rmsd = superposed_rmsd(&coords[i], &coords[j]).ok_or(
                ClusterError::Superposition {
                    seed_a: ensemble.members[selected[i]].seed,
                    seed_b: ensemble.members[selected[j]].seed,
                },
            )?;
            matrix[i][j] = rmsd;
            matrix[j][i] = rmsd;
        }
    }
    Ok(matrix)
}

/// Union-find over matrix positions.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Attach the larger root under the smaller for stable roots.
            let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[high] = low;
        }
    }
}

/// Greedy single-linkage agglomeration: merge along pairs in ascending
/// RMSD order while below the threshold.
fn agglomerate(n: usize, matrix: &[Vec<f64>], threshold: f64) -> DisjointSet {
    let mut pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .collect();
    pairs.sort_by(|&(ai, aj), &(bi, bj)| {
        matrix[ai][aj]
            .partial_cmp(&matrix[bi][bj])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (ai, aj).cmp(&(bi, bj)))
    });

    let mut sets = DisjointSet::new(n);
    for (i, j) in pairs {
        if matrix[i][j] < threshold {
            sets.union(i, j);
        } else {
            break;
        }
    }
    sets
}

fn build_clusters(
    ensemble: &EnsembleResult,
    selected: &[usize],
    matrix: &[Vec<f64>],
    assignment: &DisjointSet,
) -> Vec<StructureCluster> {
    let n = selected.len();
    let mut sets = DisjointSet {
        parent: assignment.parent.clone(),
    };

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut root_to_group: std::collections::BTreeMap<usize, usize> =
        std::collections::BTreeMap::new();
    for pos in 0..n {
        let root = sets.find(pos);
        let group = *root_to_group.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[group].push(pos);
    }

    let mut clusters: Vec<StructureCluster> = groups
        .into_iter()
        .map(|positions| {
            let (mean_rmsd, max_rmsd) = intra_stats(&positions, matrix);
            let representative_pos = medoid(ensemble, selected, &positions, matrix);
            let backends: std::collections::BTreeSet<&str> = positions
                .iter()
                .map(|&p| ensemble.members[selected[p]].backend.as_str())
                .collect();
            debug!(
                representative_seed = ensemble.members[selected[representative_pos]].seed,
                population = positions.len(),
                mean_rmsd,
                "Built cluster"
            );
            StructureCluster {
                representative: selected[representative_pos],
                members: positions.iter().map(|&p| selected[p]).collect(),
                mean_rmsd,
                max_rmsd,
                consensus: backends.len() >= 2,
            }
        })
        .collect();

    clusters.sort_by(|a, b| {
        b.population()
            .cmp(&a.population())
            .then_with(|| {
                let seed_a = ensemble.members[a.representative].seed;
                let seed_b = ensemble.members[b.representative].seed;
                seed_a.cmp(&seed_b)
            })
    });
    clusters
}

fn intra_stats(positions: &[usize], matrix: &[Vec<f64>]) -> (f64, f64) {
    if positions.len() < 2 {
        return (0.0, 0.0);
    }
    let mut sum = 0.0;
    let mut max = 0.0_f64;
    let mut count = 0usize;
    for (offset, &i) in positions.iter().enumerate() {
        for &j in &positions[offset + 1..] {
            sum += matrix[i][j];
            max = max.max(matrix[i][j]);
            count += 1;
        }
    }
    (sum / count as f64, max)
}

/// The medoid: lowest mean RMSD to co-members, ties by lowest seed.
fn medoid(
    ensemble: &EnsembleResult,
    selected: &[usize],
    positions: &[usize],
    matrix: &[Vec<f64>],
) -> usize {
    let mut best = positions[0];
    let mut best_key = (f64::INFINITY, usize::MAX);
    for &candidate in positions {
        let mean = if positions.len() > 1 {
            positions
                .iter()
                .filter(|&&other| other != candidate)
                .map(|&other| matrix[candidate][other])
                .sum::<f64>()
                / (positions.len() - 1) as f64
        } else {
            0.0
        };
        let key = (mean, ensemble.members[selected[candidate]].seed);
        if key.0 < best_key.0 || (key.0 == best_key.0 && key.1 < best_key.1) {
            best = candidate;
            best_key = key;
        }
    }
    best
}
