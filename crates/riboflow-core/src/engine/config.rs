use crate::core::models::run::ConfigFingerprint;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default RMSD cutoff for cluster formation, in Angstroms.
pub const DEFAULT_RMSD_THRESHOLD: f64 = 5.0;

/// Default per-invocation timeout: generous enough for worst-case model
/// download + load + inference on a long sequence.
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Invalid parameter {name}: {message}")]
    InvalidParameter { name: &'static str, message: String },
}

/// Locations and knobs of the external tools, one sub-config per tool.
/// `None`/empty paths mean "not installed"; availability is probed through
/// each adapter's `check`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolsConfig {
    pub infernal: InfernalConfig,
    pub rnafold: RnafoldConfig,
    pub rhofold: RhoFoldConfig,
    pub simrna: SimRnaConfig,
    pub protenix: ProtenixConfig,
    pub rnadvisor: RnadvisorConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfernalConfig {
    /// `cmscan` executable name or path.
    pub cmscan: String,
    /// Rfam covariance model database; sequence analysis is unavailable
    /// without it.
    pub rfam_cm: Option<PathBuf>,
    /// Optional Rfam clan competition file.
    pub rfam_clanin: Option<PathBuf>,
}

impl Default for InfernalConfig {
    fn default() -> Self {
        Self {
            cmscan: "cmscan".into(),
            rfam_cm: None,
            rfam_clanin: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RnafoldConfig {
    /// `RNAfold` executable name or path.
    pub binary: String,
}

impl Default for RnafoldConfig {
    fn default() -> Self {
        Self {
            binary: "RNAfold".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RhoFoldConfig {
    /// Batch inference script (loads the model once, runs a seed list).
    pub script: Option<PathBuf>,
    /// Pretrained checkpoint directory.
    pub model_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimRnaConfig {
    /// SimRNA executable path.
    pub binary: Option<PathBuf>,
    /// SimRNA data directory (`-E`).
    pub data_dir: Option<PathBuf>,
    /// Monte-Carlo steps per simulation.
    pub steps: u64,
}

impl Default for SimRnaConfig {
    fn default() -> Self {
        Self {
            binary: None,
            data_dir: None,
            steps: 10_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtenixConfig {
    /// `protenix` executable name or path.
    pub binary: String,
    /// Optional model override.
    pub model: Option<String>,
}

impl Default for ProtenixConfig {
    fn default() -> Self {
        Self {
            binary: "protenix".into(),
            model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RnadvisorConfig {
    /// `rnadvisor` executable name or path.
    pub binary: String,
    /// Metrics requested from the scorer.
    pub metrics: Vec<String>,
}

impl Default for RnadvisorConfig {
    fn default() -> Self {
        Self {
            binary: "rnadvisor".into(),
            metrics: vec!["rsRNASP".into(), "DFIRE".into(), "RASP".into(), "MCQ".into()],
        }
    }
}

/// Full configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Backends to run, in the order requested.
    pub backends: Vec<String>,
    /// Ensemble size per backend.
    pub nstruct: usize,
    /// Re-enable Monte-Carlo dropout for stochastic members (seeds >= 1).
    pub mc_dropout: bool,
    /// Input noise scale for stochastic members (seeds >= 1).
    pub noise_scale: f64,
    /// Compute devices, e.g. `["cuda:0", "cuda:1"]`. Empty = CPU fallback.
    pub devices: Vec<String>,
    /// Skip the Infernal stage even if configured.
    pub skip_sequence_analysis: bool,
    /// RMSD cutoff for cluster formation, in Angstroms.
    pub rmsd_threshold: f64,
    /// Per-invocation timeout for external processes.
    pub invocation_timeout: Duration,
    pub tools: ToolsConfig,
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// The fingerprint of the knobs that govern prediction and everything
    /// downstream of it.
    pub fn fingerprint(&self) -> ConfigFingerprint {
        ConfigFingerprint {
            backends: self.backends.clone(),
            nstruct: self.nstruct,
            mc_dropout: self.mc_dropout,
            noise_scale: self.noise_scale,
            devices: self.devices.clone(),
        }
    }
}

#[derive(Default)]
pub struct PipelineConfigBuilder {
    backends: Vec<String>,
    nstruct: Option<usize>,
    mc_dropout: bool,
    noise_scale: f64,
    devices: Vec<String>,
    skip_sequence_analysis: bool,
    rmsd_threshold: Option<f64>,
    invocation_timeout: Option<Duration>,
    tools: ToolsConfig,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backends(mut self, backends: Vec<String>) -> Self {
        self.backends = backends;
        self
    }
    pub fn nstruct(mut self, nstruct: usize) -> Self {
        self.nstruct = Some(nstruct);
        self
    }
    pub fn mc_dropout(mut self, enabled: bool) -> Self {
        self.mc_dropout = enabled;
        self
    }
    pub fn noise_scale(mut self, scale: f64) -> Self {
        self.noise_scale = scale;
        self
    }
    pub fn devices(mut self, devices: Vec<String>) -> Self {
        self.devices = devices;
        self
    }
    pub fn skip_sequence_analysis(mut self, skip: bool) -> Self {
        self.skip_sequence_analysis = skip;
        self
    }
    pub fn rmsd_threshold(mut self, threshold: f64) -> Self {
        self.rmsd_threshold = Some(threshold);
        self
    }
    pub fn invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = Some(timeout);
        self
    }
    pub fn tools(mut self, tools: ToolsConfig) -> Self {
        self.tools = tools;
        self
    }

    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        let nstruct = self.nstruct.unwrap_or(1);
        if nstruct == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "nstruct",
                message: "ensemble size must be at least 1".into(),
            });
        }
        if self.noise_scale < 0.0 || !self.noise_scale.is_finite() {
            return Err(ConfigError::InvalidParameter {
                name: "noise_scale",
                message: format!("must be a finite value >= 0, got {}", self.noise_scale),
            });
        }
        let rmsd_threshold = self.rmsd_threshold.unwrap_or(DEFAULT_RMSD_THRESHOLD);
        if rmsd_threshold <= 0.0 || !rmsd_threshold.is_finite() {
            return Err(ConfigError::InvalidParameter {
                name: "rmsd_threshold",
                message: format!("must be a finite value > 0, got {rmsd_threshold}"),
            });
        }

        Ok(PipelineConfig {
            backends: self.backends,
            nstruct,
            mc_dropout: self.mc_dropout,
            noise_scale: self.noise_scale,
            devices: self.devices,
            skip_sequence_analysis: self.skip_sequence_analysis,
            rmsd_threshold,
            invocation_timeout: self.invocation_timeout.unwrap_or(DEFAULT_INVOCATION_TIMEOUT),
            tools: self.tools,
        })
    }
}
