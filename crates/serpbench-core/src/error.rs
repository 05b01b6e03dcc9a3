//! Error types for the load generator
//!
//! Network failures of individual requests are never errors here; they are
//! classified into a [`crate::StatusClass`]. These variants cover
//! configuration mistakes and faults in the harness's own bookkeeping.

use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors that abort a run (or prevent it from starting)
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Configuration rejected before the run started
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A report sink failed to persist a report
    #[error("Report sink '{sink}' failed: {reason}")]
    Sink { sink: String, reason: String },

    /// An alert hook failed to deliver an alert
    #[error("Alert hook '{hook}' failed: {reason}")]
    Hook { hook: String, reason: String },

    /// Latency histogram could not be created
    #[error("Histogram error: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),

    /// A worker or aggregator task died outside the per-request boundary
    #[error("Harness task failed: {0}")]
    TaskFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Build a sink error from any displayable cause
    pub fn sink(sink: impl Into<String>, reason: impl ToString) -> Self {
        Self::Sink {
            sink: sink.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a hook error from any displayable cause
    pub fn hook(hook: impl Into<String>, reason: impl ToString) -> Self {
        Self::Hook {
            hook: hook.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error was raised while validating configuration
    pub fn is_config(&self) -> bool {
        matches!(self, Self::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HarnessError::sink("csv", "disk full");
        let msg = format!("{}", err);
        assert!(msg.contains("csv"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_config_errors() {
        assert!(HarnessError::InvalidConfig("zero concurrency".into()).is_config());
        assert!(!HarnessError::TaskFailed("join".into()).is_config());
    }
}
