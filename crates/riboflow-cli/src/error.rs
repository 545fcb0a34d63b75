use riboflow::engine::config::ConfigError;
use riboflow::engine::error::EngineError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to parse file '{path}': {source}", path = path.display())]
    FileParsing {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// The stage a failed run stopped at, when the error pins one down.
    /// Used to name the failure on exit, as the checkpoint is what the
    /// user will want to inspect next.
    pub fn failing_stage(&self) -> Option<String> {
        match self {
            CliError::Engine(EngineError::UpstreamFailed { stage, .. }) => Some(stage.to_string()),
            CliError::Engine(EngineError::NothingToScore | EngineError::Scoring(_)) => {
                Some("scoring".to_string())
            }
            _ => None,
        }
    }
}
