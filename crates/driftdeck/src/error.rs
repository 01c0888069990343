use driftconf::ConfigError;
use thiserror::Error;

use crate::output::OutputError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine task has shut down")]
    Closed,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Output(#[from] OutputError),
}
