use super::{Invocation, binary_available};
use crate::engine::config::RnafoldConfig;
use std::path::Path;

/// Output file RNAfold is asked to write into its working directory.
pub const DOT_FILE: &str = "rnafold.dot";

/// ViennaRNA adapter: minimum-free-energy secondary structure prediction.
pub struct RnafoldTool {
    config: RnafoldConfig,
}

impl RnafoldTool {
    pub fn new(config: RnafoldConfig) -> Self {
        Self { config }
    }

    pub fn check(&self) -> bool {
        binary_available(&self.config.binary)
    }

    pub fn invocation(&self, fasta: &Path, work_dir: &Path) -> Invocation {
        Invocation::new(&self.config.binary)
            .arg("--noPS")
            .args(["--infile".to_string(), fasta.display().to_string()])
            .arg(format!("--outfile={DOT_FILE}"))
            .current_dir(work_dir.to_path_buf())
            .expect_output(work_dir.join(DOT_FILE))
    }

    /// Parses the dot-bracket string and MFE from RNAfold's output file.
    ///
    /// RNAfold emits the structure on the last line, as
    /// `(((...))) (-12.30)`; anything unparseable yields `None` rather
    /// than a fabricated structure.
    pub fn parse_dot_bracket(dot_file: &Path) -> Option<(String, f64)> {
        let text = std::fs::read_to_string(dot_file).ok()?;
        for line in text.lines().rev() {
            let line = line.trim();
            if !line.starts_with(['(', ')', '.']) {
                continue;
            }
            let (structure, energy) = line.rsplit_once(" (")?;
            let mfe: f64 = energy.trim_end_matches(')').trim().parse().ok()?;
            return Some((structure.trim().to_string(), mfe));
        }
        None
    }
}
