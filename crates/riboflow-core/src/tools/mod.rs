//! Adapters for the external programs the pipeline orchestrates.
//!
//! Adapters never spawn processes. Each one *describes* an invocation
//! (program, arguments, environment, expected output files) and the engine's
//! command runner executes it. This keeps every adapter testable without the
//! tool installed, and keeps process handling (timeouts, log capture,
//! kill-on-drop) in exactly one place.

pub mod infernal;
pub mod protenix;
pub mod rhofold;
pub mod rnadvisor;
pub mod rnafold;
pub mod simrna;

use crate::core::models::member::MemberPlan;
use crate::engine::config::ToolsConfig;
use crate::engine::error::DispatchError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Backend names accepted by the pipeline, in canonical order.
pub const KNOWN_BACKENDS: &[&str] = &["rhofold", "simrna", "protenix"];

/// A fully described external process invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Working directory for tools that write outputs relative to it.
    pub current_dir: Option<PathBuf>,
    /// Files the invocation must produce. Success requires a zero exit code
    /// *and* every expected output present and non-empty. For prediction
    /// invocations there is exactly one entry per seed, in seed order.
    pub expected_outputs: Vec<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            expected_outputs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: PathBuf) -> Self {
        self.current_dir = Some(dir);
        self
    }

    pub fn expect_output(mut self, path: PathBuf) -> Self {
        self.expected_outputs.push(path);
        self
    }
}

/// Inputs shared by every prediction invocation of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionInput {
    /// The copied query FASTA inside the run directory.
    pub fasta: PathBuf,
    pub sequence_id: String,
    pub sequence: String,
    /// Stockholm/A3M alignment from sequence analysis, when available.
    pub msa: Option<PathBuf>,
    /// Dot-bracket string from secondary structure prediction, when
    /// available.
    pub secondary_structure: Option<String>,
}

/// Capability interface of a 3D structure prediction backend.
///
/// The orchestrator and dispatcher never branch on backend identity beyond
/// selecting the adapter; everything backend-specific lives behind this
/// trait.
pub trait PredictionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the external tool is installed and configured.
    fn check(&self) -> bool;

    /// Whether the backend can run a whole seed list in one process,
    /// amortizing model loading once per device.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Describes the invocation for a single ensemble member.
    fn single(
        &self,
        input: &PredictionInput,
        plan: &MemberPlan,
        device: &str,
        work_dir: &Path,
    ) -> Result<Invocation, DispatchError>;

    /// Describes one invocation covering all of `plans` on one device.
    /// `expected_outputs` must list one structure file per plan, in order.
    fn batch(
        &self,
        _input: &PredictionInput,
        _plans: &[MemberPlan],
        _device: &str,
        _work_dir: &Path,
    ) -> Result<Invocation, DispatchError> {
        Err(DispatchError::BatchUnsupported {
            backend: self.name().to_string(),
        })
    }
}

/// Looks up the adapter for `name`, or `None` for an unknown backend.
pub fn backend_for(name: &str, tools: &ToolsConfig) -> Option<Arc<dyn PredictionBackend>> {
    match name {
        "rhofold" => Some(Arc::new(rhofold::RhoFoldBackend::new(tools.rhofold.clone()))),
        "simrna" => Some(Arc::new(simrna::SimRnaBackend::new(tools.simrna.clone()))),
        "protenix" => Some(Arc::new(protenix::ProtenixBackend::new(
            tools.protenix.clone(),
        ))),
        _ => None,
    }
}

/// Returns `true` if `program` resolves to an executable: either an existing
/// path, or a name found on `PATH`.
pub(crate) fn binary_available(program: &str) -> bool {
    if program.is_empty() {
        return false;
    }
    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        return as_path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_builder_accumulates() {
        let inv = Invocation::new("cmscan")
            .arg("--rfam")
            .args(["--tblout", "out.txt"])
            .env("OMP_NUM_THREADS", "4")
            .expect_output(PathBuf::from("out.txt"));
        assert_eq!(inv.program, "cmscan");
        assert_eq!(inv.args, vec!["--rfam", "--tblout", "out.txt"]);
        assert_eq!(inv.env, vec![("OMP_NUM_THREADS".into(), "4".into())]);
        assert_eq!(inv.expected_outputs.len(), 1);
    }

    #[test]
    fn registry_knows_all_backends() {
        let tools = ToolsConfig::default();
        for name in KNOWN_BACKENDS {
            assert!(backend_for(name, &tools).is_some(), "{name}");
        }
        assert!(backend_for("alphafold", &tools).is_none());
    }

    #[test]
    fn binary_available_finds_sh() {
        assert!(binary_available("sh"));
        assert!(!binary_available("definitely-not-a-real-binary-xyz"));
        assert!(!binary_available(""));
    }

    #[test]
    fn binary_available_checks_explicit_paths_directly() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("tool.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        assert!(binary_available(script.to_str().unwrap()));
        assert!(!binary_available(dir.path().join("missing").to_str().unwrap()));
    }
}
