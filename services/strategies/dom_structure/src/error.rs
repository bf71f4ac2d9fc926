//! Error types for the DOM structure strategy

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] dom_types::SnapshotError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Lifecycle error: {message}")]
    Lifecycle { message: String },

    #[error("Threshold model error: {message}")]
    Model { message: String },

    #[error("Signal dispatch error: {message}")]
    Dispatch { message: String },
}

impl StrategyError {
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StrategyError>;
