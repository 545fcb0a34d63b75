use super::{Invocation, PredictionBackend, PredictionInput, binary_available};
use crate::core::models::member::MemberPlan;
use crate::engine::config::SimRnaConfig;
use crate::engine::error::DispatchError;
use std::path::Path;

/// SimRNA adapter: coarse-grained Monte-Carlo folding.
///
/// SimRNA has no multi-seed batch mode and no deterministic replay, so
/// every ensemble member is one independent simulation; diversity comes
/// from the sampler itself and the per-member RNG seed. The dot-bracket
/// from secondary structure prediction is turned into base-pair distance
/// restraints when available.
pub struct SimRnaBackend {
    config: SimRnaConfig,
}

impl SimRnaBackend {
    pub fn new(config: SimRnaConfig) -> Self {
        Self { config }
    }

    fn write_inputs(
        &self,
        input: &PredictionInput,
        seed_dir: &Path,
    ) -> Result<(std::path::PathBuf, Option<std::path::PathBuf>), DispatchError> {
        let io_err = |source| DispatchError::InputPreparation {
            backend: "simrna".into(),
            source,
        };
        std::fs::create_dir_all(seed_dir).map_err(io_err)?;

        // SimRNA input: sequence on the first line, secondary structure on
        // the second (unconstrained positions as dots).
        let structure = input
            .secondary_structure
            .clone()
            .unwrap_or_else(|| ".".repeat(input.sequence.len()));
        let seq_path = seed_dir.join("input.seq");
        std::fs::write(&seq_path, format!("{}\n{}\n", input.sequence, structure))
            .map_err(io_err)?;

        let restraints = match &input.secondary_structure {
            Some(ss) => {
                let restraints_path = seed_dir.join("restraints.txt");
                std::fs::write(&restraints_path, base_pair_restraints(ss)).map_err(io_err)?;
                Some(restraints_path)
            }
            None => None,
        };
        Ok((seq_path, restraints))
    }
}

/// Converts a dot-bracket string to SimRNA distance restraints, one
/// `DIST` line per base pair (N1/N3 pairing distance window).
fn base_pair_restraints(dot_bracket: &str) -> String {
    let mut stack = Vec::new();
    let mut lines = Vec::new();
    for (i, ch) in dot_bracket.chars().enumerate() {
        match ch {
            '(' => stack.push(i),
            ')' => {
                if let Some(j) = stack.pop() {
                    lines.push(format!("DIST A {} N1 A {} N3 5.0 10.0 1.0", j + 1, i + 1));
                }
            }
            _ => {}
        }
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

impl PredictionBackend for SimRnaBackend {
    fn name(&self) -> &'static str {
        "simrna"
    }

    fn check(&self) -> bool {
        self.config
            .binary
            .as_ref()
            .map(|binary| binary_available(&binary.display().to_string()))
            .unwrap_or(false)
    }

    fn single(
        &self,
        input: &PredictionInput,
        plan: &MemberPlan,
        _device: &str,
        work_dir: &Path,
    ) -> Result<Invocation, DispatchError> {
        let binary = self.config.binary.as_ref().ok_or_else(|| {
            DispatchError::InputPreparation {
                backend: "simrna".into(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "SimRNA binary not configured",
                ),
            }
        })?;

        let seed_dir = work_dir.join(format!("seed_{}", plan.seed));
        let (seq_path, restraints) = self.write_inputs(input, &seed_dir)?;
        let prefix = seed_dir.join("simrna");

        let mut invocation = Invocation::new(binary.display().to_string())
            .args(["-s".to_string(), seq_path.display().to_string()])
            .args(["-o".to_string(), prefix.display().to_string()])
            .args(["-n".to_string(), self.config.steps.to_string()])
            .args(["-G".to_string(), plan.seed.to_string()]);
        if let Some(data_dir) = &self.config.data_dir {
            invocation = invocation.args(["-E".to_string(), data_dir.display().to_string()]);
        }
        if let Some(restraints) = restraints {
            invocation = invocation.args(["-r".to_string(), restraints.display().to_string()]);
        }

        Ok(invocation.expect_output(seed_dir.join("simrna_AA.pdb")))
    }
}
