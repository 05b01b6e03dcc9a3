//! Benchmark configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! steps = [20, 50]
//!
//! [harness]
//! duration_secs = 60
//! request_timeout_secs = 30
//!
//! [keywords]
//! terms = ["Apple", "Bread", "Cheese"]
//! order = "random"
//!
//! [[target]]
//! name = "google"
//! url = "https://serpapi.com/search"
//! query_param = "q"
//! params = { engine = "google", no_cache = "true" }
//! check = { expect_json = true, error_field = "error", require_any = ["organic_results"] }
//!
//! [[alerts]]
//! name = "success_rate"
//! condition = { kind = "success_rate_below", percent = 95.0 }
//! streak = 3
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serpbench_core::{AlertCondition, AlertRule, HarnessConfig};

use crate::check::ResponseCheck;
use crate::error::{BenchError, Result};
use crate::executor::RetryPolicy;
use crate::keywords::KeywordPool;
use crate::template::RequestTemplate;
use crate::webhook::WebhookConfig;

/// One endpoint under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,

    #[serde(flatten)]
    pub request: RequestTemplate,

    #[serde(default)]
    pub check: ResponseCheck,

    /// Retries of timed-out or failed requests; none by default
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Overrides the top-level keyword pool
    #[serde(default)]
    pub keywords: Option<KeywordPool>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl TargetConfig {
    pub fn new(name: impl Into<String>, request: RequestTemplate) -> Self {
        Self {
            name: name.into(),
            request,
            check: ResponseCheck::default(),
            retry: RetryPolicy::default(),
            keywords: None,
            enabled: true,
        }
    }
}

/// Where results are written besides the console
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Summary rows are appended here, one per (target, concurrency)
    #[serde(default)]
    pub summary_csv: Option<PathBuf>,

    /// Per-request CSV files are written to this directory
    #[serde(default)]
    pub details_dir: Option<PathBuf>,

    /// Pretty JSON of every summary row
    #[serde(default)]
    pub json: Option<PathBuf>,
}

/// Repeated test cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Pause between the end of one cycle and the start of the next
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,

    /// Stop after this many cycles; unset means run until interrupted
    #[serde(default)]
    pub cycles: Option<u64>,
}

fn default_monitor_interval() -> u64 {
    60
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            cycles: None,
        }
    }
}

/// Complete benchmark configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default)]
    pub harness: HarnessConfig,

    /// Concurrency levels to run every target at; empty means
    /// `harness.concurrency` only
    #[serde(default)]
    pub steps: Vec<usize>,

    /// Keyword pool shared by targets without their own
    #[serde(default)]
    pub keywords: Option<KeywordPool>,

    #[serde(default, rename = "target")]
    pub targets: Vec<TargetConfig>,

    #[serde(default)]
    pub alerts: Vec<AlertRule>,

    #[serde(default)]
    pub webhook: Option<WebhookConfig>,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl BenchConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BenchError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Concurrency levels in run order
    pub fn concurrency_steps(&self) -> Vec<usize> {
        if self.steps.is_empty() {
            vec![self.harness.concurrency]
        } else {
            self.steps.clone()
        }
    }

    pub fn enabled_targets(&self) -> impl Iterator<Item = &TargetConfig> {
        self.targets.iter().filter(|t| t.enabled)
    }

    /// Keep only the named targets
    pub fn retain_targets(&mut self, names: &[String]) {
        if !names.is_empty() {
            self.targets.retain(|t| names.contains(&t.name));
        }
    }

    pub fn keywords_for(&self, target: &TargetConfig) -> Option<Arc<KeywordPool>> {
        target
            .keywords
            .as_ref()
            .or(self.keywords.as_ref())
            .cloned()
            .map(Arc::new)
    }

    /// Harness configuration for one concurrency step
    pub fn harness_for_step(&self, concurrency: usize) -> HarnessConfig {
        HarnessConfig {
            concurrency,
            ..self.harness.clone()
        }
    }

    /// Reject anything that would fail after the first request went out
    pub fn validate(&self) -> Result<()> {
        self.harness.validate()?;
        for step in &self.steps {
            self.harness_for_step(*step).validate()?;
        }

        if self.enabled_targets().next().is_none() {
            return Err(BenchError::config("no enabled targets"));
        }
        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(BenchError::config("target name must not be empty"));
            }
            if !names.insert(target.name.as_str()) {
                return Err(BenchError::config(format!(
                    "duplicate target name '{}'",
                    target.name
                )));
            }
            target
                .request
                .validate()
                .and_then(|()| target.retry.validate())
                .map_err(|e| BenchError::config(format!("target '{}': {}", target.name, e)))?;
            if let Some(pool) = &target.keywords {
                pool.validate()?;
            }
        }
        if let Some(pool) = &self.keywords {
            pool.validate()?;
        }

        for rule in &self.alerts {
            validate_rule(rule)?;
        }
        if let Some(webhook) = &self.webhook {
            webhook.validate()?;
        }
        if self.monitor.interval_secs == 0 {
            return Err(BenchError::config("monitor.interval_secs must be at least 1"));
        }
        if self.monitor.cycles == Some(0) {
            return Err(BenchError::config("monitor.cycles must be at least 1 when set"));
        }
        Ok(())
    }
}

fn validate_rule(rule: &AlertRule) -> Result<()> {
    if rule.streak == 0 {
        return Err(BenchError::config(format!(
            "alert '{}': streak must be at least 1",
            rule.name
        )));
    }
    match rule.condition {
        AlertCondition::SuccessRateBelow { percent } | AlertCondition::TimeoutRateAbove { percent }
            if !(0.0..=100.0).contains(&percent) =>
        {
            Err(BenchError::config(format!(
                "alert '{}': percent must be within 0..=100, got {}",
                rule.name, percent
            )))
        }
        _ => Ok(()),
    }
}
