use super::{Invocation, binary_available};
use crate::engine::config::RnadvisorConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Metrics where a lower value means a better model (statistical potentials
/// / pseudo-energies). Everything else ranks descending.
static LOWER_IS_BETTER: phf::Set<&'static str> = phf::phf_set! {
    "rsRNASP",
    "DFIRE",
    "DFIRE-RNA",
    "RASP",
};

#[derive(Debug, Error)]
pub enum ScoreParseError {
    #[error("failed to read scorer output '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("scorer output '{path}' is not valid CSV: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("scorer output '{path}' has no model name column")]
    MissingNameColumn { path: String },
}

/// All metric values the scorer reported for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelScores {
    pub model: String,
    pub metrics: BTreeMap<String, f64>,
}

/// One entry of the consensus ranking. Lower `mean_rank` is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedModel {
    pub model: String,
    pub mean_rank: f64,
}

/// RNAdvisor adapter: scores a directory of candidate structures against a
/// panel of quality metrics.
pub struct RnadvisorTool {
    config: RnadvisorConfig,
}

impl RnadvisorTool {
    pub fn new(config: RnadvisorConfig) -> Self {
        Self { config }
    }

    pub fn check(&self) -> bool {
        binary_available(&self.config.binary)
    }

    /// Scores every structure in `pred_dir`, writing the per-metric table
    /// to `out_csv`.
    pub fn invocation(&self, pred_dir: &Path, out_csv: &Path) -> Invocation {
        Invocation::new(&self.config.binary)
            .args(["--pred_dir".to_string(), pred_dir.display().to_string()])
            .args(["--scores".to_string(), self.config.metrics.join(",")])
            .args(["--out_path".to_string(), out_csv.display().to_string()])
            .expect_output(out_csv.to_path_buf())
    }

    /// Parses the scorer's CSV output: one row per model, first column the
    /// model name, remaining columns metric values. Unparseable cells are
    /// skipped (a metric can legitimately fail for one model).
    pub fn parse_scores(path: &Path) -> Result<Vec<ModelScores>, ScoreParseError> {
        let mut reader = csv::Reader::from_path(path).map_err(|source| {
            if matches!(source.kind(), csv::ErrorKind::Io(_)) {
                ScoreParseError::Io {
                    path: path.display().to_string(),
                    source: std::io::Error::other(source.to_string()),
                }
            } else {
                ScoreParseError::Csv {
                    path: path.display().to_string(),
                    source,
                }
            }
        })?;

        let headers = reader
            .headers()
            .map_err(|source| ScoreParseError::Csv {
                path: path.display().to_string(),
                source,
            })?
            .clone();
        if headers.is_empty() {
            return Err(ScoreParseError::MissingNameColumn {
                path: path.display().to_string(),
            });
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|source| ScoreParseError::Csv {
                path: path.display().to_string(),
                source,
            })?;
            let Some(model) = record.get(0).filter(|name| !name.is_empty()) else {
                continue;
            };
            let mut metrics = BTreeMap::new();
            for (header, value) in headers.iter().zip(record.iter()).skip(1) {
                if let Ok(value) = value.trim().parse::<f64>() {
                    metrics.insert(header.to_string(), value);
                }
            }
            rows.push(ModelScores {
                model: model.to_string(),
                metrics,
            });
        }
        Ok(rows)
    }

    /// Consensus ranking: each model's rank is averaged over every metric
    /// it was scored on, with the ranking direction per metric taken from
    /// [`LOWER_IS_BETTER`]. Ties in mean rank break by model name for
    /// determinism.
    pub fn consensus_rank(scores: &[ModelScores]) -> Vec<RankedModel> {
        let mut metric_names: Vec<&str> = scores
            .iter()
            .flat_map(|s| s.metrics.keys().map(String::as_str))
            .collect();
        metric_names.sort_unstable();
        metric_names.dedup();

        let mut rank_sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        for metric in &metric_names {
            let mut values: Vec<(&str, f64)> = scores
                .iter()
                .filter_map(|s| s.metrics.get(*metric).map(|v| (s.model.as_str(), *v)))
                .collect();
            if values.is_empty() {
                continue;
            }
            let ascending = LOWER_IS_BETTER.contains(metric);
            values.sort_by(|a, b| {
                let ordering = a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal);
                if ascending { ordering } else { ordering.reverse() }
            });
            for (rank, (model, _)) in values.iter().enumerate() {
                let entry = rank_sums.entry(model).or_insert((0.0, 0));
                entry.0 += (rank + 1) as f64;
                entry.1 += 1;
            }
        }

        let mut ranking: Vec<RankedModel> = rank_sums
            .into_iter()
            .map(|(model, (sum, count))| RankedModel {
                model: model.to_string(),
                mean_rank: sum / count as f64,
            })
            .collect();
        ranking.sort_by(|a, b| {
            a.mean_rank
                .partial_cmp(&b.mean_rank)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.model.cmp(&b.model))
        });
        ranking
    }
}
