use crate::core::models::ensemble::EnsembleResult;
use crate::core::models::member::{EnsembleMember, MemberOutcome, MemberPlan};
use crate::engine::devices;
use crate::engine::process::{CmdOutcome, CommandRunner};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::tools::{Invocation, PredictionBackend, PredictionInput};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Dispatches one backend's planned ensemble members onto the configured
/// devices.
///
/// Members sharing a device run sequentially inside one task; distinct
/// devices run concurrently. Batch-capable backends get a single invocation
/// per device covering that device's whole seed list, so the model is
/// loaded once per device; other backends get one invocation per member.
/// A member failure (non-zero exit, timeout, missing output) is recorded on
/// the member and never aborts the rest of the ensemble.
pub struct Dispatcher {
    runner: Arc<CommandRunner>,
    reporter: Arc<ProgressReporter>,
}

impl Dispatcher {
    pub fn new(runner: CommandRunner, reporter: Arc<ProgressReporter>) -> Self {
        Self {
            runner: Arc::new(runner),
            reporter,
        }
    }

    pub async fn run(
        &self,
        backend: Arc<dyn PredictionBackend>,
        input: &PredictionInput,
        plans: &[MemberPlan],
        device_pool: &[String],
        work_dir: &Path,
    ) -> EnsembleResult {
        let assignments = devices::assign(plans.len(), device_pool);
        self.reporter.report(Progress::EnsembleStart {
            backend: backend.name().to_string(),
            total_members: plans.len() as u64,
        });

        // Group members by device, preserving seed order within a group.
        let mut groups: Vec<(String, Vec<MemberPlan>)> = Vec::new();
        for (plan, device) in plans.iter().zip(assignments.iter()) {
            match groups.iter_mut().find(|(d, _)| d == device) {
                Some((_, group)) => group.push(*plan),
                None => groups.push((device.clone(), vec![*plan])),
            }
        }
        info!(
            backend = backend.name(),
            members = plans.len(),
            devices = groups.len(),
            batched = backend.supports_batch(),
            "Dispatching ensemble"
        );

        let mut tasks: JoinSet<Vec<EnsembleMember>> = JoinSet::new();
        for (device, group) in groups {
            let backend = backend.clone();
            let runner = self.runner.clone();
            let reporter = self.reporter.clone();
            let input = input.clone();
            let work_dir = work_dir.to_path_buf();
            tasks.spawn(async move {
                run_device_group(backend, runner, reporter, input, device, group, work_dir).await
            });
        }

        let mut members = Vec::with_capacity(plans.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(group_members) => members.extend(group_members),
                Err(error) => {
                    // A panicked device task loses its members' results; the
                    // remaining devices still count.
                    warn!(backend = backend.name(), %error, "Device task failed");
                }
            }
        }

        self.reporter.report(Progress::EnsembleFinish);
        EnsembleResult::new(backend.name(), members)
    }
}

async fn run_device_group(
    backend: Arc<dyn PredictionBackend>,
    runner: Arc<CommandRunner>,
    reporter: Arc<ProgressReporter>,
    input: PredictionInput,
    device: String,
    plans: Vec<MemberPlan>,
    work_dir: PathBuf,
) -> Vec<EnsembleMember> {
    if backend.supports_batch() {
        // One invocation per device; outputs land in a per-device directory
        // so concurrent batches never share scratch state.
        let device_dir = work_dir.join(device.replace(':', "_"));
        let tag = format!("{}_{}", backend.name(), device.replace(':', "_"));
        let invocation = match backend.batch(&input, &plans, &device, &device_dir) {
            Ok(invocation) => invocation,
            Err(error) => {
                return fail_all(&backend, &reporter, &device, &plans, error.to_string());
            }
        };
        let outcome = runner.run(&tag, &invocation).await;
        let members = collect_batch(&backend, &device, &plans, &invocation, &outcome);
        for _ in &members {
            reporter.report(Progress::MemberFinished);
        }
        members
    } else {
        let mut members = Vec::with_capacity(plans.len());
        for plan in plans {
            let tag = format!("{}_s{}", backend.name(), plan.seed);
            let member = match backend.single(&input, &plan, &device, &work_dir) {
                Ok(invocation) => {
                    let outcome = runner.run(&tag, &invocation).await;
                    collect_single(&backend, &device, &plan, &invocation, &outcome)
                }
                Err(error) => failed_member(&backend, &device, &plan, error.to_string()),
            };
            reporter.report(Progress::MemberFinished);
            members.push(member);
        }
        members
    }
}

fn collect_batch(
    backend: &Arc<dyn PredictionBackend>,
    device: &str,
    plans: &[MemberPlan],
    invocation: &Invocation,
    outcome: &CmdOutcome,
) -> Vec<EnsembleMember> {
    plans
        .iter()
        .enumerate()
        .map(|(index, plan)| {
            if !outcome.is_success() {
                return failed_member(backend, device, plan, outcome.failure_reason());
            }
            match invocation.expected_outputs.get(index) {
                Some(path) if file_nonempty(path) => EnsembleMember {
                    backend: backend.name().to_string(),
                    seed: plan.seed,
                    device: device.to_string(),
                    mc_dropout: plan.mc_dropout,
                    noise_scale: plan.noise_scale,
                    outcome: MemberOutcome::Structure { path: path.clone() },
                },
                Some(path) => failed_member(
                    backend,
                    device,
                    plan,
                    format!("process exited 0 but output is missing: {}", path.display()),
                ),
                None => failed_member(
                    backend,
                    device,
                    plan,
                    "backend declared no output for this seed".to_string(),
                ),
            }
        })
        .collect()
}

fn collect_single(
    backend: &Arc<dyn PredictionBackend>,
    device: &str,
    plan: &MemberPlan,
    invocation: &Invocation,
    outcome: &CmdOutcome,
) -> EnsembleMember {
    if !outcome.is_success() {
        return failed_member(backend, device, plan, outcome.failure_reason());
    }
    match invocation.expected_outputs.first() {
        Some(path) if file_nonempty(path) => EnsembleMember {
            backend: backend.name().to_string(),
            seed: plan.seed,
            device: device.to_string(),
            mc_dropout: plan.mc_dropout,
            noise_scale: plan.noise_scale,
            outcome: MemberOutcome::Structure { path: path.clone() },
        },
        Some(path) => failed_member(
            backend,
            device,
            plan,
            format!("process exited 0 but output is missing: {}", path.display()),
        ),
        None => failed_member(
            backend,
            device,
            plan,
            "backend declared no output for this seed".to_string(),
        ),
    }
}

fn fail_all(
    backend: &Arc<dyn PredictionBackend>,
    reporter: &Arc<ProgressReporter>,
    device: &str,
    plans: &[MemberPlan],
    reason: String,
) -> Vec<EnsembleMember> {
    let members: Vec<EnsembleMember> = plans
        .iter()
        .map(|plan| failed_member(backend, device, plan, reason.clone()))
        .collect();
    for _ in &members {
        reporter.report(Progress::MemberFinished);
    }
    members
}

fn failed_member(
    backend: &Arc<dyn PredictionBackend>,
    device: &str,
    plan: &MemberPlan,
    reason: String,
) -> EnsembleMember {
    warn!(
        backend = backend.name(),
        seed = plan.seed,
        device,
        %reason,
        "Ensemble member failed"
    );
    EnsembleMember {
        backend: backend.name().to_string(),
        seed: plan.seed,
        device: device.to_string(),
        mc_dropout: plan.mc_dropout,
        noise_scale: plan.noise_scale,
        outcome: MemberOutcome::Failed { reason },
    }
}

fn file_nonempty(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::diversity;
    use crate::engine::error::DispatchError;
    use std::time::Duration;

    /// Test backend driven by small shell scripts. `fail_seeds` exit
    /// non-zero, `silent_seeds` exit zero without writing their output.
    struct ShellBackend {
        batching: bool,
        marker: PathBuf,
        fail_seeds: Vec<usize>,
        silent_seeds: Vec<usize>,
        sleep_seeds: Vec<usize>,
    }

    impl ShellBackend {
        fn plain(batching: bool, marker: PathBuf) -> Self {
            Self {
                batching,
                marker,
                fail_seeds: vec![],
                silent_seeds: vec![],
                sleep_seeds: vec![],
            }
        }

        fn script_for(&self, plan: &MemberPlan, output: &Path) -> String {
            if self.sleep_seeds.contains(&plan.seed) {
                return "sleep 30".to_string();
            }
            if self.fail_seeds.contains(&plan.seed) {
                return format!("echo 'seed {} exploded' >&2; exit 1", plan.seed);
            }
            if self.silent_seeds.contains(&plan.seed) {
                return "exit 0".to_string();
            }
            format!(
                "mkdir -p {dir}; echo MODEL > {out}",
                dir = output.parent().unwrap().display(),
                out = output.display()
            )
        }
    }

    impl PredictionBackend for ShellBackend {
        fn name(&self) -> &'static str {
            "shellfold"
        }
        fn check(&self) -> bool {
            true
        }
        fn supports_batch(&self) -> bool {
            self.batching
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
            _input: &PredictionInput,
            plans: &[MemberPlan],
            _device: &str,
            work_dir: &Path,
        ) -> Result<Invocation, DispatchError> {
            let mut script = String::new();
            let mut invocation = Invocation::new("sh");
            // Record one marker line per invocation so tests can count how
            // many external processes were launched.
            script.push_str(&format!("echo invoked >> {}; ", self.marker.display()));
            for plan in plans {
                let output = work_dir.join(format!("run_{}", plan.seed)).join("model.pdb");
                script.push_str(&self.script_for(plan, &output));
                script.push_str("; ");
                invocation = invocation.expect_output(output);
            }
            std::fs::create_dir_all(work_dir).map_err(|source| {
                DispatchError::InputPreparation {
                    backend: "shellfold".into(),
                    source,
                }
            })?;
            Ok(invocation.arg("-c").arg(script))
        }
    }

    fn test_input() -> PredictionInput {
        PredictionInput {
            fasta: PathBuf::from("/tmp/query.fasta"),
            sequence_id: "q".into(),
            sequence: "GGGAAACCC".into(),
            msa: None,
            secondary_structure: None,
        }
    }

    fn dispatcher(dir: &Path, timeout: Duration) -> Dispatcher {
        Dispatcher::new(
            CommandRunner::new(dir.join("logs"), timeout),
            Arc::new(ProgressReporter::new()),
        )
    }

    #[tokio::test]
    async fn all_members_succeed_in_batch_mode() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let dispatcher = dispatcher(dir.path(), Duration::from_secs(20));
        let plans = diversity::plan(3, false, 0.0);

        let result = dispatcher
            .run(
                Arc::new(ShellBackend::plain(true, dir.path().join("invocations.log"))),
                &test_input(),
                &plans,
                &[],
                &work,
            )
            .await;
        assert_eq!(result.success_count(), 3);
        let seeds: Vec<usize> = result.members.iter().map(|m| m.seed).collect();
        assert_eq!(seeds, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn batching_amortizes_one_invocation_per_device() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let dispatcher = dispatcher(dir.path(), Duration::from_secs(20));
        let plans = diversity::plan(6, false, 0.0);
        let devices = vec!["cuda:0".to_string(), "cuda:1".to_string()];

        let result = dispatcher
            .run(
                Arc::new(ShellBackend::plain(true, dir.path().join("invocations.log"))),
                &test_input(),
                &plans,
                &devices,
                &work,
            )
            .await;
        assert_eq!(result.success_count(), 6);

        let log = std::fs::read_to_string(dir.path().join("invocations.log")).unwrap();
        assert_eq!(log.lines().count(), 2, "one batch per device");

        // Round-robin: even seeds on cuda:0, odd on cuda:1.
        for member in &result.members {
            let expected = if member.seed % 2 == 0 { "cuda:0" } else { "cuda:1" };
            assert_eq!(member.device, expected, "seed {}", member.seed);
        }
    }

    #[tokio::test]
    async fn non_batching_backend_runs_one_invocation_per_member() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let dispatcher = dispatcher(dir.path(), Duration::from_secs(20));
        let plans = diversity::plan(3, false, 0.0);

        let result = dispatcher
            .run(
                Arc::new(ShellBackend::plain(false, dir.path().join("invocations.log"))),
                &test_input(),
                &plans,
                &[],
                &work,
            )
            .await;
        assert_eq!(result.success_count(), 3);
        let log = std::fs::read_to_string(dir.path().join("invocations.log")).unwrap();
        assert_eq!(log.lines().count(), 3);
    }

    #[tokio::test]
    async fn one_failing_member_does_not_abort_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let dispatcher = dispatcher(dir.path(), Duration::from_secs(20));
        let backend = ShellBackend {
            fail_seeds: vec![1],
            ..ShellBackend::plain(false, dir.path().join("invocations.log"))
        };
        let plans = diversity::plan(3, false, 0.0);

        let result = dispatcher
            .run(Arc::new(backend), &test_input(), &plans, &[], &work)
            .await;
        assert_eq!(result.success_count(), 2);
        let failed = &result.members[1];
        assert!(!failed.is_success());
        match &failed.outcome {
            MemberOutcome::Failed { reason } => {
                assert!(reason.contains("exit code 1"), "{reason}");
                assert!(reason.contains("seed 1 exploded"), "stderr not captured: {reason}");
            }
            MemberOutcome::Structure { .. } => unreachable!(),
        }
    }

    #[tokio::test]
    async fn zero_exit_with_missing_output_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let dispatcher = dispatcher(dir.path(), Duration::from_secs(20));
        let backend = ShellBackend {
            silent_seeds: vec![0],
            ..ShellBackend::plain(false, dir.path().join("invocations.log"))
        };
        let plans = diversity::plan(1, false, 0.0);

        let result = dispatcher
            .run(Arc::new(backend), &test_input(), &plans, &[], &work)
            .await;
        assert_eq!(result.success_count(), 0);
        match &result.members[0].outcome {
            MemberOutcome::Failed { reason } => {
                assert!(reason.contains("output is missing"), "{reason}");
            }
            MemberOutcome::Structure { .. } => unreachable!(),
        }
    }

    #[tokio::test]
    async fn timeout_fails_only_the_owning_members() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let dispatcher = dispatcher(dir.path(), Duration::from_millis(400));
        // Seed 0 hangs on cuda:0; seed 1 runs fine on cuda:1.
        let backend = ShellBackend {
            sleep_seeds: vec![0],
            ..ShellBackend::plain(false, dir.path().join("invocations.log"))
        };
        let plans = diversity::plan(2, false, 0.0);
        let devices = vec!["cuda:0".to_string(), "cuda:1".to_string()];

        let result = dispatcher
            .run(Arc::new(backend), &test_input(), &plans, &devices, &work)
            .await;
        assert_eq!(result.success_count(), 1);
        assert!(!result.members[0].is_success());
        match &result.members[0].outcome {
            MemberOutcome::Failed { reason } => assert!(reason.contains("timed out")),
            MemberOutcome::Structure { .. } => unreachable!(),
        }
        assert!(result.members[1].is_success());
    }
}
