//! Streak-based alerting
//!
//! A rule fires when its condition is violated on `streak` consecutive
//! observations. It fires once per streak; a single non-violating
//! observation re-arms it.
//!
//! Rate rules observe each closed reporting interval (live ticks and the
//! final partial interval). Intervals with no outcomes are skipped: they
//! neither extend nor reset a streak. The server-error rule observes every
//! individual outcome.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::outcome::RequestOutcome;
use crate::stats::RunStatistics;

/// Counts consecutive violations and fires once per streak
#[derive(Debug, Clone)]
pub struct StreakDetector {
    required: usize,
    streak: usize,
    fired: bool,
}

impl StreakDetector {
    pub fn new(required: usize) -> Self {
        Self {
            required: required.max(1),
            streak: 0,
            fired: false,
        }
    }

    /// Feed one observation; returns `true` when the alert should fire
    pub fn observe(&mut self, violated: bool) -> bool {
        if !violated {
            self.streak = 0;
            self.fired = false;
            return false;
        }
        self.streak += 1;
        if self.streak >= self.required && !self.fired {
            self.fired = true;
            return true;
        }
        false
    }
}

/// What a rule watches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertCondition {
    /// Interval success rate below `percent`
    SuccessRateBelow { percent: f64 },
    /// Interval timeout rate above `percent`
    TimeoutRateAbove { percent: f64 },
    /// Consecutive 5xx responses
    ConsecutiveServerErrors,
}

/// A named condition plus the streak length that triggers it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub condition: AlertCondition,
    #[serde(default = "default_streak")]
    pub streak: usize,
}

fn default_streak() -> usize {
    3
}

impl AlertRule {
    pub fn success_rate_below(percent: f64, streak: usize) -> Self {
        Self {
            name: "success_rate".to_string(),
            condition: AlertCondition::SuccessRateBelow { percent },
            streak,
        }
    }

    pub fn timeout_rate_above(percent: f64, streak: usize) -> Self {
        Self {
            name: "timeout_rate".to_string(),
            condition: AlertCondition::TimeoutRateAbove { percent },
            streak,
        }
    }

    pub fn consecutive_server_errors(streak: usize) -> Self {
        Self {
            name: "server_errors".to_string(),
            condition: AlertCondition::ConsecutiveServerErrors,
            streak,
        }
    }

    fn describe(&self, label: &str) -> String {
        match &self.condition {
            AlertCondition::SuccessRateBelow { percent } => format!(
                "{}: success rate below {}% for {} consecutive intervals",
                label, percent, self.streak
            ),
            AlertCondition::TimeoutRateAbove { percent } => format!(
                "{}: timeout rate above {}% for {} consecutive intervals",
                label, percent, self.streak
            ),
            AlertCondition::ConsecutiveServerErrors => format!(
                "{}: {} consecutive 5xx responses",
                label, self.streak
            ),
        }
    }
}

/// A fired alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub rule: String,
    pub label: String,
    pub message: String,
    /// The observations that made up the streak (percentages or status codes)
    pub observations: Vec<f64>,
    pub raised_at: DateTime<Utc>,
}

/// Receives fired alerts
#[async_trait]
pub trait AlertHook: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, alert: &Alert) -> Result<()>;
}

#[derive(Debug, Clone)]
struct RuleState {
    rule: AlertRule,
    detector: StreakDetector,
    recent: VecDeque<f64>,
}

impl RuleState {
    fn observe(&mut self, label: &str, value: f64, violated: bool) -> Option<Alert> {
        self.recent.push_back(value);
        while self.recent.len() > self.rule.streak.max(1) {
            self.recent.pop_front();
        }
        if !self.detector.observe(violated) {
            return None;
        }
        Some(Alert {
            rule: self.rule.name.clone(),
            label: label.to_string(),
            message: self.rule.describe(label),
            observations: self.recent.iter().copied().collect(),
            raised_at: Utc::now(),
        })
    }
}

/// Evaluates a set of rules for one label (target)
#[derive(Debug, Clone)]
pub struct AlertEngine {
    label: String,
    rules: Vec<RuleState>,
}

impl AlertEngine {
    pub fn new(label: impl Into<String>, rules: Vec<AlertRule>) -> Self {
        Self {
            label: label.into(),
            rules: rules
                .into_iter()
                .map(|rule| RuleState {
                    detector: StreakDetector::new(rule.streak),
                    recent: VecDeque::new(),
                    rule,
                })
                .collect(),
        }
    }

    /// Observe the success rate of one reporting interval, in percent
    pub fn observe_success_rate(&mut self, percent: f64) -> Vec<Alert> {
        let label = self.label.clone();
        self.rules
            .iter_mut()
            .filter_map(|state| match state.rule.condition {
                AlertCondition::SuccessRateBelow { percent: threshold } => {
                    state.observe(&label, percent, percent < threshold)
                }
                _ => None,
            })
            .collect()
    }

    /// Observe the timeout rate of one reporting interval, in percent
    pub fn observe_timeout_rate(&mut self, percent: f64) -> Vec<Alert> {
        let label = self.label.clone();
        self.rules
            .iter_mut()
            .filter_map(|state| match state.rule.condition {
                AlertCondition::TimeoutRateAbove { percent: threshold } => {
                    state.observe(&label, percent, percent > threshold)
                }
                _ => None,
            })
            .collect()
    }

    /// Observe a closed reporting interval; empty intervals are skipped
    pub fn observe_interval(&mut self, interval: &RunStatistics) -> Vec<Alert> {
        if interval.total == 0 {
            return Vec::new();
        }
        let mut alerts = self.observe_success_rate(interval.success_percent());
        alerts.extend(self.observe_timeout_rate(interval.timeout_percent()));
        alerts
    }

    /// Observe a single outcome
    pub fn observe_outcome(&mut self, outcome: &RequestOutcome) -> Vec<Alert> {
        let label = self.label.clone();
        let code = f64::from(outcome.status_code.unwrap_or_default());
        self.rules
            .iter_mut()
            .filter_map(|state| match state.rule.condition {
                AlertCondition::ConsecutiveServerErrors => {
                    state.observe(&label, code, outcome.is_server_error())
                }
                _ => None,
            })
            .collect()
    }
}

/// Rules plus hooks, shareable across runs so streaks survive between
/// monitoring cycles
#[derive(Clone)]
pub struct AlertPolicy {
    engine: Arc<Mutex<AlertEngine>>,
    hooks: Vec<Arc<dyn AlertHook>>,
}

impl AlertPolicy {
    pub fn new(engine: AlertEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn AlertHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub(crate) fn observe_interval(&self, interval: &RunStatistics) -> Vec<Alert> {
        self.engine.lock().observe_interval(interval)
    }

    pub(crate) fn observe_outcome(&self, outcome: &RequestOutcome) -> Vec<Alert> {
        self.engine.lock().observe_outcome(outcome)
    }

    /// Deliver alerts to every hook; hook failures are logged, not fatal
    pub(crate) async fn deliver(&self, alerts: &[Alert]) {
        for alert in alerts {
            warn!(label = %alert.label, rule = %alert.rule, "ALERT: {}", alert.message);
            for hook in &self.hooks {
                if let Err(e) = hook.notify(alert).await {
                    warn!(hook = hook.name(), "alert delivery failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Attempt;
    use std::time::Duration;

    #[test]
    fn test_streak_fires_once_then_requires_reset() {
        let mut engine = AlertEngine::new("google", vec![AlertRule::success_rate_below(60.0, 3)]);
        let fired: Vec<usize> = [50.0, 40.0, 30.0, 96.0, 20.0]
            .iter()
            .map(|rate| engine.observe_success_rate(*rate).len())
            .collect();
        assert_eq!(fired, vec![0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_continuing_streak_does_not_refire() {
        let mut detector = StreakDetector::new(3);
        let fired: Vec<bool> = [true, true, true, true, true, false, true, true, true]
            .iter()
            .map(|v| detector.observe(*v))
            .collect();
        assert_eq!(
            fired,
            vec![false, false, true, false, false, false, false, false, true]
        );
    }

    #[test]
    fn test_alert_carries_streak_observations() {
        let mut engine = AlertEngine::new("bing", vec![AlertRule::timeout_rate_above(10.0, 2)]);
        assert!(engine.observe_timeout_rate(5.0).is_empty());
        assert!(engine.observe_timeout_rate(20.0).is_empty());
        let alerts = engine.observe_timeout_rate(30.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].observations, vec![20.0, 30.0]);
        assert!(alerts[0].message.contains("bing"));
    }

    #[test]
    fn test_server_error_rule_watches_outcomes() {
        let mut engine =
            AlertEngine::new("yandex", vec![AlertRule::consecutive_server_errors(3)]);
        let attempt = Attempt::begin(0, Duration::from_secs(1));

        assert!(engine.observe_outcome(&attempt.http_error(502, "x")).is_empty());
        assert!(engine.observe_outcome(&attempt.http_error(504, "x")).is_empty());
        let alerts = engine.observe_outcome(&attempt.http_error(500, "x"));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].observations, vec![502.0, 504.0, 500.0]);

        // A 404 is not a server error and resets the streak
        assert!(engine.observe_outcome(&attempt.http_error(404, "x")).is_empty());
        assert!(engine.observe_outcome(&attempt.success(200, 1)).is_empty());
    }

    #[test]
    fn test_empty_interval_is_skipped() {
        let mut engine = AlertEngine::new("ddg", vec![AlertRule::success_rate_below(95.0, 2)]);
        let bad = RunStatistics {
            total: 10,
            success_count: 1,
            success_rate: 0.1,
            ..Default::default()
        };
        assert!(engine.observe_interval(&bad).is_empty());
        assert!(engine.observe_interval(&RunStatistics::default()).is_empty());
        assert_eq!(engine.observe_interval(&bad).len(), 1);
    }
}
