use super::{Invocation, binary_available};
use crate::engine::config::InfernalConfig;
use std::path::{Path, PathBuf};

/// Infernal adapter: Rfam family search (`cmscan`) plus alignment of the
/// query against the best-matching covariance model.
///
/// The alignment is an optional artifact: it only appears when the query
/// hits an Rfam family, and downstream prediction runs fine without it.
pub struct InfernalTool {
    config: InfernalConfig,
}

impl InfernalTool {
    pub fn new(config: InfernalConfig) -> Self {
        Self { config }
    }

    pub fn check(&self) -> bool {
        if !binary_available(&self.config.cmscan) {
            return false;
        }
        self.config
            .rfam_cm
            .as_ref()
            .map(|cm| cm.is_file())
            .unwrap_or(false)
    }

    /// The `cmscan` invocation. The hit table is the required output;
    /// `alignment.sto` appears only on a family hit.
    pub fn invocation(&self, fasta: &Path, work_dir: &Path) -> Option<Invocation> {
        let rfam_cm = self.config.rfam_cm.as_ref()?;
        let tblout = work_dir.join("cmscan_tblout.txt");

        let mut invocation = Invocation::new(&self.config.cmscan)
            .args(["--cut_ga", "--rfam", "--nohmmonly"])
            .args(["--fmt", "2"])
            .args(["--tblout".to_string(), tblout.display().to_string()])
            .args([
                "-o".to_string(),
                work_dir.join("cmscan_output.txt").display().to_string(),
            ])
            .args([
                "-A".to_string(),
                work_dir.join("alignment.sto").display().to_string(),
            ]);
        if let Some(clanin) = &self.config.rfam_clanin {
            if clanin.is_file() {
                invocation =
                    invocation.args(["--clanin".to_string(), clanin.display().to_string()]);
            }
        }
        Some(
            invocation
                .arg(rfam_cm.display().to_string())
                .arg(fasta.display().to_string())
                .expect_output(tblout),
        )
    }

    /// Path of the alignment artifact, when the scan produced one.
    pub fn alignment_path(work_dir: &Path) -> Option<PathBuf> {
        let path = work_dir.join("alignment.sto");
        path.is_file().then_some(path)
    }

    /// Extracts the top-ranked Rfam family name from a `--fmt 2` hit table,
    /// or `None` when nothing matched.
    pub fn parse_top_family(tblout: &Path) -> Option<String> {
        let text = std::fs::read_to_string(tblout).ok()?;
        text.lines()
            .find(|line| !line.starts_with('#') && !line.trim().is_empty())
            .and_then(|line| line.split_whitespace().nth(1))
            .map(String::from)
    }
}
