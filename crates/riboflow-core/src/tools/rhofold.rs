use super::{Invocation, PredictionBackend, PredictionInput};
use crate::core::models::member::MemberPlan;
use crate::engine::config::RhoFoldConfig;
use crate::engine::error::DispatchError;
use std::path::Path;

/// RhoFold+ adapter: deep-learning RNA 3D prediction.
///
/// RhoFold+ is deterministic for a fixed seed and is driven through a batch
/// inference script that loads the model once and then iterates a seed
/// list, writing one `run_<seed>/unrelaxed_model.pdb` per seed. Model
/// loading dominates wall-clock time, so batching all of a device's seeds
/// into one invocation is the whole point of this adapter.
pub struct RhoFoldBackend {
    config: RhoFoldConfig,
}

impl RhoFoldBackend {
    pub fn new(config: RhoFoldConfig) -> Self {
        Self { config }
    }

    fn base_invocation(
        &self,
        input: &PredictionInput,
        device: &str,
        work_dir: &Path,
    ) -> Result<Invocation, DispatchError> {
        let script = self.config.script.as_ref().ok_or_else(|| {
            DispatchError::InputPreparation {
                backend: "rhofold".into(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "rhofold batch script not configured",
                ),
            }
        })?;

        let mut invocation = Invocation::new("python")
            .arg(script.display().to_string())
            .args(["--input_fas".to_string(), input.fasta.display().to_string()])
            .args([
                "--output_base_dir".to_string(),
                work_dir.display().to_string(),
            ])
            .args(["--device".to_string(), device.to_string()]);

        if let Some(model_dir) = &self.config.model_dir {
            invocation = invocation.args(["--ckpt".to_string(), model_dir.display().to_string()]);
        }
        // Fall back to single-sequence mode when no alignment is available.
        invocation = match &input.msa {
            Some(msa) => invocation.args(["--input_a3m".to_string(), msa.display().to_string()]),
            None => invocation.args(["--single_seq_pred", "True"]),
        };
        Ok(invocation)
    }

    fn seed_args(invocation: Invocation, plans: &[MemberPlan]) -> Invocation {
        let seeds: Vec<String> = plans.iter().map(|p| p.seed.to_string()).collect();
        let mut invocation = invocation.args(["--seeds".to_string(), seeds.join(",")]);

        // Stochastic options are per-seed so the seed-0 deterministic
        // baseline survives inside a mixed batch.
        let dropout_seeds: Vec<String> = plans
            .iter()
            .filter(|p| p.mc_dropout)
            .map(|p| p.seed.to_string())
            .collect();
        if !dropout_seeds.is_empty() {
            invocation =
                invocation.args(["--mc-dropout-seeds".to_string(), dropout_seeds.join(",")]);
        }
        let noise = plans
            .iter()
            .map(|p| p.noise_scale)
            .find(|scale| *scale > 0.0);
        if let Some(scale) = noise {
            let noisy_seeds: Vec<String> = plans
                .iter()
                .filter(|p| p.noise_scale > 0.0)
                .map(|p| p.seed.to_string())
                .collect();
            invocation = invocation
                .args(["--noise-scale".to_string(), scale.to_string()])
                .args(["--noise-seeds".to_string(), noisy_seeds.join(",")]);
        }
        invocation
    }
}

impl PredictionBackend for RhoFoldBackend {
    fn name(&self) -> &'static str {
        "rhofold"
    }

    fn check(&self) -> bool {
        self.config
            .script
            .as_ref()
            .map(|script| script.is_file())
            .unwrap_or(false)
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn single(
        &self,
        input: &PredictionInput,
        plan: &MemberPlan,
        device: &str,
        work_dir: &Path,
    ) -> Result<Invocation, DispatchError> {
        self.batch(input, std::slice::from_ref(plan), device, work_dir)
    }

    fn batch(
        &self,
        input: &PredictionInput,
        plans: &[MemberPlan],
        device: &str,
        work_dir: &Path,
    ) -> Result<Invocation, DispatchError> {
        let mut invocation =
            Self::seed_args(self.base_invocation(input, device, work_dir)?, plans);
        for plan in plans {
            invocation = invocation
                .expect_output(work_dir.join(format!("run_{}", plan.seed)).join("unrelaxed_model.pdb"));
        }
        Ok(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn input() -> PredictionInput {
        PredictionInput {
            fasta: PathBuf::from("/run/input/query.fasta"),
            sequence_id: "tRNA".into(),
            sequence: "GCGGAUUU".into(),
            msa: None,
            secondary_structure: None,
        }
    }

    fn config_with_script(dir: &Path) -> RhoFoldConfig {
        let script = dir.join("batch_infer.py");
        std::fs::write(&script, "# stub\n").unwrap();
        RhoFoldConfig {
            script: Some(script),
            model_dir: Some(PathBuf::from("/opt/rhofold/params")),
        }
    }

    #[test]
    fn check_requires_an_existing_script() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!RhoFoldBackend::new(RhoFoldConfig::default()).check());
        assert!(RhoFoldBackend::new(config_with_script(dir.path())).check());
    }

    #[test]
    fn batch_lists_all_seeds_and_expected_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RhoFoldBackend::new(config_with_script(dir.path()));
        let plans = vec![
            MemberPlan { seed: 0, mc_dropout: false, noise_scale: 0.0 },
            MemberPlan { seed: 2, mc_dropout: true, noise_scale: 0.1 },
            MemberPlan { seed: 4, mc_dropout: true, noise_scale: 0.1 },
        ];
        let work = dir.path().join("rhofold/cuda_0");
        let inv = backend.batch(&input(), &plans, "cuda:0", &work).unwrap();

        assert_eq!(inv.program, "python");
        let args = inv.args.join(" ");
        assert!(args.contains("--seeds 0,2,4"));
        assert!(args.contains("--mc-dropout-seeds 2,4"));
        assert!(args.contains("--noise-scale 0.1"));
        assert!(args.contains("--device cuda:0"));
        assert!(args.contains("--single_seq_pred True"));
        assert_eq!(inv.expected_outputs.len(), 3);
        assert_eq!(
            inv.expected_outputs[1],
            work.join("run_2").join("unrelaxed_model.pdb")
        );
    }

    #[test]
    fn vanilla_batch_has_no_stochastic_args() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RhoFoldBackend::new(config_with_script(dir.path()));
        let plans = vec![MemberPlan { seed: 0, mc_dropout: false, noise_scale: 0.0 }];
        let inv = backend
            .batch(&input(), &plans, "cpu", dir.path())
            .unwrap();
        let args = inv.args.join(" ");
        assert!(!args.contains("--mc-dropout-seeds"));
        assert!(!args.contains("--noise-scale"));
    }

    #[test]
    fn msa_switches_off_single_sequence_mode() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RhoFoldBackend::new(config_with_script(dir.path()));
        let mut with_msa = input();
        with_msa.msa = Some(PathBuf::from("/run/01_sequence_analysis/alignment.sto"));
        let plans = vec![MemberPlan { seed: 0, mc_dropout: false, noise_scale: 0.0 }];
        let inv = backend
            .batch(&with_msa, &plans, "cpu", dir.path())
            .unwrap();
        let args = inv.args.join(" ");
        assert!(args.contains("--input_a3m"));
        assert!(!args.contains("--single_seq_pred"));
    }

    #[test]
    fn missing_script_is_an_input_preparation_error() {
        let backend = RhoFoldBackend::new(RhoFoldConfig::default());
        let plans = vec![MemberPlan { seed: 0, mc_dropout: false, noise_scale: 0.0 }];
        let result = backend.batch(&input(), &plans, "cpu", Path::new("/tmp/x"));
        assert!(matches!(
            result,
            Err(DispatchError::InputPreparation { .. })
        ));
    }
}
