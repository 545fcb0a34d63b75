use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Marta Oliveira, Jan Kowalczyk",
    version,
    about = "riboflow - A resumable pipeline for ensemble RNA 3D structure prediction, clustering, and scoring.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full prediction pipeline over an input sequence.
    Run(RunArgs),
    /// Re-generate the summary report from an existing run directory
    /// without re-executing prediction.
    Report(ReportArgs),
    /// Check which external tools are installed and accessible.
    Check(CheckArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the input FASTA file (single RNA sequence).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub input: PathBuf,

    /// Run directory for all outputs and the resumable checkpoint.
    #[arg(short, long, value_name = "PATH", default_value = "./riboflow_output")]
    pub output_dir: PathBuf,

    /// Path to the tool configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    // --- Backend selection ---
    /// Run RhoFold+ (deep learning).
    #[arg(long)]
    pub rhofold: bool,

    /// Run SimRNA (physics-based).
    #[arg(long)]
    pub simrna: bool,

    /// Run Protenix (AF3-class).
    #[arg(long)]
    pub protenix: bool,

    /// Run all known backends.
    #[arg(long)]
    pub all: bool,

    // --- Ensemble options ---
    /// Number of structures to generate per backend.
    #[arg(short, long, value_name = "INT")]
    pub nstruct: Option<usize>,

    /// Re-enable Monte-Carlo dropout for stochastic ensemble members.
    #[arg(long)]
    pub mc_dropout: bool,

    /// Input noise scale for stochastic ensemble members.
    #[arg(long, value_name = "FLOAT")]
    pub noise_scale: Option<f64>,

    /// RMSD cutoff for cluster formation, in Angstroms.
    #[arg(long, value_name = "FLOAT")]
    pub rmsd_threshold: Option<f64>,

    // --- Execution options ---
    /// Compute device(s), comma-separated (e.g. cuda:0,cuda:1).
    #[arg(short, long, value_name = "DEVICES")]
    pub device: Option<String>,

    /// Per-invocation timeout in seconds for external processes.
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Skip the Infernal/Rfam sequence analysis stage.
    #[arg(long)]
    pub skip_sequence_analysis: bool,
}

impl RunArgs {
    /// Backends selected on the command line, in canonical order.
    pub fn selected_backends(&self) -> Vec<String> {
        if self.all {
            return riboflow::tools::KNOWN_BACKENDS
                .iter()
                .map(|b| b.to_string())
                .collect();
        }
        let mut backends = Vec::new();
        if self.rhofold {
            backends.push("rhofold".to_string());
        }
        if self.simrna {
            backends.push("simrna".to_string());
        }
        if self.protenix {
            backends.push("protenix".to_string());
        }
        backends
    }

    /// The device list parsed from the comma-separated `--device` value.
    pub fn device_list(&self) -> Vec<String> {
        self.device
            .as_deref()
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Arguments for the `report` subcommand.
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Existing pipeline run directory.
    #[arg(required = true, value_name = "RUN_DIR")]
    pub run_dir: PathBuf,
}

/// Arguments for the `check` subcommand.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Path to the tool configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}
