//! Error types for the HTTP load tester

use serpbench_core::HarnessError;
use thiserror::Error;

/// Result type alias for load tester operations
pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error(transparent)]
    Harness(#[from] HarnessError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error was raised before any request was sent
    pub fn is_config(&self) -> bool {
        match self {
            Self::Config(_) | Self::Template(_) | Self::Toml(_) => true,
            Self::Harness(e) => e.is_config(),
            _ => false,
        }
    }
}
