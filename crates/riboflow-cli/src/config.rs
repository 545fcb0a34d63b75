use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use riboflow::engine::config::{
    InfernalConfig, PipelineConfig, ProtenixConfig, RhoFoldConfig, RnadvisorConfig, RnafoldConfig,
    SimRnaConfig, ToolsConfig,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Partial configuration loaded from the TOML file. Every field is
/// optional: CLI flags override file values, and anything left unset falls
/// back to the core defaults.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub tools: FileTools,
    pub ensemble: FileEnsemble,
    pub execution: FileExecution,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileTools {
    pub infernal: FileInfernal,
    pub rnafold: FileRnafold,
    pub rhofold: FileRhofold,
    pub simrna: FileSimrna,
    pub protenix: FileProtenix,
    pub rnadvisor: FileRnadvisor,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileInfernal {
    pub cmscan: Option<String>,
    pub rfam_cm: Option<PathBuf>,
    pub rfam_clanin: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileRnafold {
    pub binary: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileRhofold {
    pub script: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileSimrna {
    pub binary: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub steps: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileProtenix {
    pub binary: Option<String>,
    pub model: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileRnadvisor {
    pub binary: Option<String>,
    pub metrics: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileEnsemble {
    pub nstruct: Option<usize>,
    pub mc_dropout: Option<bool>,
    pub noise_scale: Option<f64>,
    pub rmsd_threshold: Option<f64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileExecution {
    pub devices: Option<Vec<String>>,
    pub invocation_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Loads the configuration file, or the all-defaults configuration
    /// when no path was given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        debug!(path = %path.display(), "Loading configuration file");
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|source| CliError::FileParsing {
            path: path.to_path_buf(),
            source: source.into(),
        })
    }

    /// Materializes the tool configuration, file values over core defaults.
    pub fn tools_config(&self) -> ToolsConfig {
        let defaults = ToolsConfig::default();
        ToolsConfig {
            infernal: InfernalConfig {
                cmscan: self
                    .tools
                    .infernal
                    .cmscan
                    .clone()
                    .unwrap_or(defaults.infernal.cmscan),
                rfam_cm: self.tools.infernal.rfam_cm.clone(),
                rfam_clanin: self.tools.infernal.rfam_clanin.clone(),
            },
            rnafold: RnafoldConfig {
                binary: self
                    .tools
                    .rnafold
                    .binary
                    .clone()
                    .unwrap_or(defaults.rnafold.binary),
            },
            rhofold: RhoFoldConfig {
                script: self.tools.rhofold.script.clone(),
                model_dir: self.tools.rhofold.model_dir.clone(),
            },
            simrna: SimRnaConfig {
                binary: self.tools.simrna.binary.clone(),
                data_dir: self.tools.simrna.data_dir.clone(),
                steps: self.tools.simrna.steps.unwrap_or(defaults.simrna.steps),
            },
            protenix: ProtenixConfig {
                binary: self
                    .tools
                    .protenix
                    .binary
                    .clone()
                    .unwrap_or(defaults.protenix.binary),
                model: self.tools.protenix.model.clone(),
            },
            rnadvisor: RnadvisorConfig {
                binary: self
                    .tools
                    .rnadvisor
                    .binary
                    .clone()
                    .unwrap_or(defaults.rnadvisor.binary),
                metrics: self
                    .tools
                    .rnadvisor
                    .metrics
                    .clone()
                    .unwrap_or(defaults.rnadvisor.metrics),
            },
        }
    }
}

/// Builds the core pipeline configuration from the file config plus CLI
/// overrides (CLI wins wherever both are set).
pub fn build_pipeline_config(args: &RunArgs, file: &FileConfig) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .backends(args.selected_backends())
        .tools(file.tools_config())
        .skip_sequence_analysis(args.skip_sequence_analysis);

    if let Some(nstruct) = args.nstruct.or(file.ensemble.nstruct) {
        builder = builder.nstruct(nstruct);
    }
    builder = builder.mc_dropout(args.mc_dropout || file.ensemble.mc_dropout.unwrap_or(false));
    if let Some(noise) = args.noise_scale.or(file.ensemble.noise_scale) {
        builder = builder.noise_scale(noise);
    }
    if let Some(threshold) = args.rmsd_threshold.or(file.ensemble.rmsd_threshold) {
        builder = builder.rmsd_threshold(threshold);
    }

    let devices = {
        let from_cli = args.device_list();
        if from_cli.is_empty() {
            file.execution.devices.clone().unwrap_or_default()
        } else {
            from_cli
        }
    };
    builder = builder.devices(devices);

    if let Some(secs) = args.timeout.or(file.execution.invocation_timeout_secs) {
        builder = builder.invocation_timeout(Duration::from_secs(secs));
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["riboflow", "run", "-i", "q.fasta"];
        argv.extend_from_slice(extra);
        let crate::cli::Cli { command, .. } = crate::cli::Cli::parse_from(argv);
        match command {
            crate::cli::Commands::Run(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn file_values_reach_the_tools_config() {
        let file: FileConfig = toml::from_str(
            r#"
            [tools.simrna]
            binary = "/opt/simrna/SimRNA"
            steps = 500000

            [tools.rnadvisor]
            metrics = ["MCQ"]

            [ensemble]
            nstruct = 5
            rmsd-threshold = 3.5
            "#,
        )
        .unwrap();
        let tools = file.tools_config();
        assert_eq!(
            tools.simrna.binary.as_deref(),
            Some(Path::new("/opt/simrna/SimRNA"))
        );
        assert_eq!(tools.simrna.steps, 500_000);
        assert_eq!(tools.rnadvisor.metrics, vec!["MCQ"]);

        let config = build_pipeline_config(&run_args(&["--simrna"]), &file).unwrap();
        assert_eq!(config.nstruct, 5);
        assert_eq!(config.rmsd_threshold, 3.5);
    }

    #[test]
    fn cli_overrides_file_values() {
        let file: FileConfig = toml::from_str("[ensemble]\nnstruct = 5\n").unwrap();
        let config =
            build_pipeline_config(&run_args(&["--simrna", "-n", "2", "--device", "cuda:0"]), &file)
                .unwrap();
        assert_eq!(config.nstruct, 2);
        assert_eq!(config.devices, vec!["cuda:0"]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: std::result::Result<FileConfig, _> = toml::from_str("[tools]\nfoo = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn defaults_apply_without_a_file() {
        let config =
            build_pipeline_config(&run_args(&["--simrna"]), &FileConfig::default()).unwrap();
        assert_eq!(config.nstruct, 1);
        assert_eq!(config.backends, vec!["simrna"]);
        assert!(config.devices.is_empty());
    }
}
