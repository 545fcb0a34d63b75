use super::{Invocation, PredictionBackend, PredictionInput, binary_available};
use crate::core::models::member::MemberPlan;
use crate::engine::config::ProtenixConfig;
use crate::engine::error::DispatchError;
use std::path::Path;

/// Protenix adapter: AF3-class diffusion prediction.
///
/// Protenix takes its whole job description, including the seed list, from
/// an input JSON document, so one invocation per device covers any number
/// of seeds. The device is pinned through `CUDA_VISIBLE_DEVICES` rather
/// than a CLI flag. Diffusion sampling is seed-conditioned but not bitwise
/// deterministic, so the seed-0 member is a baseline by convention only.
pub struct ProtenixBackend {
    config: ProtenixConfig,
}

impl ProtenixBackend {
    pub fn new(config: ProtenixConfig) -> Self {
        Self { config }
    }

    fn write_input_json(
        &self,
        input: &PredictionInput,
        plans: &[MemberPlan],
        work_dir: &Path,
    ) -> Result<std::path::PathBuf, DispatchError> {
        let io_err = |source| DispatchError::InputPreparation {
            backend: "protenix".into(),
            source,
        };

        let seeds: Vec<usize> = plans.iter().map(|p| p.seed).collect();
        let noise_scale = plans
            .iter()
            .map(|p| p.noise_scale)
            .fold(0.0_f64, f64::max);
        let mut job = serde_json::json!({
            "name": format!("riboflow_{}", input.sequence_id),
            "modelSeeds": seeds,
            "sequences": [{
                "rnaSequence": { "sequence": input.sequence, "count": 1 }
            }],
        });
        if plans.iter().any(|p| p.mc_dropout) {
            job["mcDropout"] = serde_json::json!(true);
        }
        if noise_scale > 0.0 {
            job["inputNoiseScale"] = serde_json::json!(noise_scale);
        }

        std::fs::create_dir_all(work_dir).map_err(io_err)?;
        let json_path = work_dir.join("input.json");
        let text = serde_json::to_string_pretty(&serde_json::json!([job]))
            .map_err(|e| io_err(std::io::Error::other(e)))?;
        std::fs::write(&json_path, text).map_err(io_err)?;
        Ok(json_path)
    }
}

impl PredictionBackend for ProtenixBackend {
    fn name(&self) -> &'static str {
        "protenix"
    }

    fn check(&self) -> bool {
        binary_available(&self.config.binary)
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
        let json_path = self.write_input_json(input, plans, work_dir)?;

        let mut invocation = Invocation::new(&self.config.binary)
            .arg("pred")
            .args(["-i".to_string(), json_path.display().to_string()])
            .args(["-o".to_string(), work_dir.display().to_string()]);
        if let Some(model) = &self.config.model {
            invocation = invocation.args(["-n".to_string(), model.clone()]);
        }
        if let Some(gpu_id) = device.strip_prefix("cuda:") {
            invocation = invocation.env("CUDA_VISIBLE_DEVICES", gpu_id);
        }

        for plan in plans {
            invocation = invocation.expect_output(
                work_dir
                    .join(format!("seed_{}", plan.seed))
                    .join("predictions")
                    .join("model_0.cif"),
            );
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
            sequence_id: "hairpin".into(),
            sequence: "GGGAAACCC".into(),
            msa: None,
            secondary_structure: None,
        }
    }

    fn plans() -> Vec<MemberPlan> {
        vec![
            MemberPlan { seed: 0, mc_dropout: false, noise_scale: 0.0 },
            MemberPlan { seed: 1, mc_dropout: true, noise_scale: 0.05 },
        ]
    }

    #[test]
    fn batch_writes_input_json_with_seed_list() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProtenixBackend::new(ProtenixConfig::default());
        let inv = backend
            .batch(&input(), &plans(), "cuda:1", dir.path())
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("input.json")).unwrap())
                .unwrap();
        assert_eq!(json[0]["modelSeeds"], serde_json::json!([0, 1]));
        assert_eq!(json[0]["mcDropout"], serde_json::json!(true));
        assert_eq!(
            json[0]["sequences"][0]["rnaSequence"]["sequence"],
            serde_json::json!("GGGAAACCC")
        );

        assert_eq!(inv.env, vec![("CUDA_VISIBLE_DEVICES".into(), "1".into())]);
        assert_eq!(inv.expected_outputs.len(), 2);
    }

    #[test]
    fn cpu_device_sets_no_gpu_pin() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProtenixBackend::new(ProtenixConfig::default());
        let inv = backend
            .batch(&input(), &plans(), "cpu", dir.path())
            .unwrap();
        assert!(inv.env.is_empty());
    }

    #[test]
    fn vanilla_plans_leave_stochastic_fields_out() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProtenixBackend::new(ProtenixConfig::default());
        let vanilla = vec![MemberPlan { seed: 0, mc_dropout: false, noise_scale: 0.0 }];
        backend
            .batch(&input(), &vanilla, "cpu", dir.path())
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("input.json")).unwrap())
                .unwrap();
        assert!(json[0].get("mcDropout").is_none());
        assert!(json[0].get("inputNoiseScale").is_none());
    }
}
