use thiserror::Error;

use crate::state_machine::{Outcome, Phase, TableError};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Transition table rejected: {0}")]
    Table(#[from] TableError),

    #[error("No transition for {phase} on {outcome}")]
    MissingTransition { phase: Phase, outcome: Outcome },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
