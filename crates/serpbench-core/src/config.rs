//! Harness configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Load generator configuration
///
/// Exactly one of `total_requests` and `duration_secs` must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Maximum requests in flight at once (also the worker count)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Stop after this many requests have been dispatched
    #[serde(default)]
    pub total_requests: Option<u64>,

    /// Stop dispatching once this many seconds have elapsed
    #[serde(default)]
    pub duration_secs: Option<f64>,

    /// Target requests per second; 0 means unconstrained
    #[serde(default)]
    pub target_rps: f64,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: f64,

    /// Interval between live reports in seconds
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: f64,

    /// Rolling window of successful latencies shown in live reports
    #[serde(default = "default_latency_window")]
    pub latency_window: Option<usize>,

    /// Maximum characters kept from an error message
    #[serde(default = "default_error_detail_limit")]
    pub error_detail_limit: usize,
}

fn default_concurrency() -> usize {
    10
}

fn default_request_timeout() -> f64 {
    30.0
}

fn default_report_interval() -> f64 {
    5.0
}

fn default_latency_window() -> Option<usize> {
    Some(500)
}

fn default_error_detail_limit() -> usize {
    300
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            total_requests: None,
            duration_secs: Some(60.0),
            target_rps: 0.0,
            request_timeout_secs: default_request_timeout(),
            report_interval_secs: default_report_interval(),
            latency_window: default_latency_window(),
            error_detail_limit: default_error_detail_limit(),
        }
    }
}

/// When a run stops dispatching new work
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopCondition {
    /// Fixed number of requests
    Count(u64),
    /// Fixed wall-clock window measured from run start
    Duration(Duration),
}

impl HarnessConfig {
    /// Configuration for a fixed request count
    pub fn for_count(concurrency: usize, total_requests: u64) -> Self {
        Self {
            concurrency,
            total_requests: Some(total_requests),
            duration_secs: None,
            ..Default::default()
        }
    }

    /// Configuration for a fixed run duration
    pub fn for_duration(concurrency: usize, duration_secs: f64) -> Self {
        Self {
            concurrency,
            total_requests: None,
            duration_secs: Some(duration_secs),
            ..Default::default()
        }
    }

    /// Check the configuration and resolve the stop condition
    pub fn validate(&self) -> Result<StopCondition> {
        if self.concurrency == 0 {
            return Err(invalid("concurrency must be at least 1"));
        }
        if !self.target_rps.is_finite() || self.target_rps < 0.0 {
            return Err(invalid(format!(
                "target_rps must be a finite value >= 0, got {}",
                self.target_rps
            )));
        }
        if self.is_paced() && 1.0 / self.target_rps >= MAX_SECS {
            return Err(invalid(format!(
                "target_rps {} is too small to pace requests",
                self.target_rps
            )));
        }
        positive_secs("request_timeout_secs", self.request_timeout_secs)?;
        positive_secs("report_interval_secs", self.report_interval_secs)?;
        if self.latency_window == Some(0) {
            return Err(invalid("latency_window must be at least 1 when set"));
        }

        match (self.total_requests, self.duration_secs) {
            (Some(_), Some(_)) => Err(invalid(
                "set either total_requests or duration_secs, not both",
            )),
            (None, None) => Err(invalid(
                "one of total_requests or duration_secs must be set",
            )),
            (Some(0), None) => Err(invalid("total_requests must be at least 1")),
            (Some(total), None) => Ok(StopCondition::Count(total)),
            (None, Some(secs)) => {
                positive_secs("duration_secs", secs)?;
                Ok(StopCondition::Duration(Duration::from_secs_f64(secs)))
            }
        }
    }

    /// Per-request timeout (call after [`validate`](Self::validate))
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs)
    }

    /// Live report interval (call after [`validate`](Self::validate))
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs_f64(self.report_interval_secs)
    }

    /// Whether dispatch is paced at all
    pub fn is_paced(&self) -> bool {
        self.target_rps > 0.0
    }
}

fn invalid(msg: impl Into<String>) -> HarnessError {
    HarnessError::InvalidConfig(msg.into())
}

/// Longest span any configured value may describe
const MAX_SECS: f64 = 1e12;

fn positive_secs(field: &str, value: f64) -> Result<()> {
    // Duration::from_secs_f64 panics on NaN, negatives and overflow
    if value.is_finite() && value > 0.0 && value < MAX_SECS {
        Ok(())
    } else {
        Err(invalid(format!(
            "{} must be a positive number of seconds, got {}",
            field, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_duration_mode() {
        let config = HarnessConfig::default();
        assert_eq!(
            config.validate().unwrap(),
            StopCondition::Duration(Duration::from_secs(60))
        );
        assert!(!config.is_paced());
    }

    #[test]
    fn test_count_mode() {
        let config = HarnessConfig::for_count(5, 200);
        assert_eq!(config.validate().unwrap(), StopCondition::Count(200));
    }

    #[test]
    fn test_requires_exactly_one_stop_mode() {
        let mut config = HarnessConfig::for_count(5, 10);
        config.duration_secs = Some(2.0);
        assert!(config.validate().unwrap_err().is_config());

        config.total_requests = None;
        config.duration_secs = None;
        assert!(config.validate().unwrap_err().is_config());
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let mut config = HarnessConfig::for_duration(0, 1.0);
        assert!(config.validate().is_err());

        config.concurrency = 2;
        config.target_rps = -1.0;
        assert!(config.validate().is_err());

        config.target_rps = 0.0;
        config.request_timeout_secs = f64::NAN;
        assert!(config.validate().is_err());

        config.request_timeout_secs = 1.0;
        config.duration_secs = Some(-3.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_rate_too_small_to_pace() {
        let mut config = HarnessConfig::for_count(2, 5);
        config.target_rps = 1e-19;
        assert!(config.validate().unwrap_err().is_config());

        config.target_rps = 1e-12;
        assert!(config.validate().is_err());

        config.target_rps = 0.5;
        assert_eq!(config.validate().unwrap(), StopCondition::Count(5));
    }
}
