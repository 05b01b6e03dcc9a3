//! Streaming statistics over request outcomes
//!
//! Percentiles use the nearest-rank rule: sort ascending and take
//! `sorted[ceil(n * p) - 1]`, clamped to `[0, n - 1]`. Only successful
//! requests contribute to the latency percentiles; failed latencies go to a
//! separate histogram.

use std::collections::BTreeMap;
use std::time::Instant;

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::outcome::{RequestOutcome, StatusClass};

/// Slack subtracted before `ceil` so that products such as `100 * 0.07`
/// (7.000000000000001 in binary) land on the intended rank.
const RANK_EPSILON: f64 = 1e-9;

/// Nearest-rank percentile of an ascending slice; `None` when empty
pub fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let rank = (n as f64 * p.clamp(0.0, 1.0) - RANK_EPSILON).ceil() as i64;
    let idx = (rank - 1).clamp(0, n as i64 - 1) as usize;
    Some(sorted[idx])
}

/// Latency distribution of successful requests, in seconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub avg_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
    pub p50_secs: f64,
    pub p75_secs: f64,
    pub p90_secs: f64,
    pub p95_secs: f64,
    pub p99_secs: f64,
}

impl LatencySummary {
    /// Summarize samples in any order; all zeros when empty
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a f64>) -> Self {
        let mut sorted: Vec<f64> = samples.into_iter().copied().collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        let pick = |p: f64| nearest_rank(&sorted, p).unwrap_or_default();
        Self {
            samples: sorted.len() as u64,
            avg_secs: sorted.iter().sum::<f64>() / sorted.len() as f64,
            min_secs: sorted[0],
            max_secs: sorted[sorted.len() - 1],
            p50_secs: pick(0.50),
            p75_secs: pick(0.75),
            p90_secs: pick(0.90),
            p95_secs: pick(0.95),
            p99_secs: pick(0.99),
        }
    }
}

/// Aggregate over a set of outcomes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub http_errors: u64,
    pub timeouts: u64,
    pub transport_errors: u64,

    /// `success_count / total`, in `[0, 1]`
    pub success_rate: f64,
    /// `timeouts / total`, in `[0, 1]`
    pub timeout_rate: f64,

    /// `total / elapsed_secs`
    pub throughput: f64,
    /// First dispatch to last completion
    pub elapsed_secs: f64,

    /// Successful requests only
    pub latency: LatencySummary,
    pub failure_latency_mean_secs: f64,
    pub failure_latency_max_secs: f64,

    pub bytes_received: u64,
    pub avg_success_size: f64,
    pub status_counts: BTreeMap<u16, u64>,
}

impl RunStatistics {
    pub fn success_percent(&self) -> f64 {
        self.success_rate * 100.0
    }

    pub fn error_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (1.0 - self.success_rate) * 100.0
        }
    }

    pub fn timeout_percent(&self) -> f64 {
        self.timeout_rate * 100.0
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Running counters behind [`RunStatistics`].
///
/// Owned by the aggregator task; nothing else mutates it.
#[derive(Debug)]
pub struct Tally {
    total: u64,
    success: u64,
    http_errors: u64,
    timeouts: u64,
    transport_errors: u64,
    bytes_received: u64,
    success_bytes: u64,
    success_latencies: Vec<f64>,
    /// Microseconds
    failure_latency: Histogram<u64>,
    status_counts: BTreeMap<u16, u64>,
    first_started: Option<Instant>,
    last_completed: Option<Instant>,
}

impl Tally {
    pub fn new() -> Result<Self> {
        Ok(Self {
            total: 0,
            success: 0,
            http_errors: 0,
            timeouts: 0,
            transport_errors: 0,
            bytes_received: 0,
            success_bytes: 0,
            success_latencies: Vec::new(),
            failure_latency: Histogram::new(3)?,
            status_counts: BTreeMap::new(),
            first_started: None,
            last_completed: None,
        })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn record(&mut self, outcome: &RequestOutcome) {
        self.total += 1;
        self.bytes_received += outcome.content_size;
        if let Some(code) = outcome.status_code {
            *self.status_counts.entry(code).or_insert(0) += 1;
        }

        match outcome.status_class {
            StatusClass::Success => {
                self.success += 1;
                self.success_bytes += outcome.content_size;
                self.success_latencies.push(outcome.latency_secs());
            }
            failure => {
                match failure {
                    StatusClass::HttpError => self.http_errors += 1,
                    StatusClass::Timeout => self.timeouts += 1,
                    _ => self.transport_errors += 1,
                }
                self.failure_latency
                    .saturating_record(outcome.latency.as_micros() as u64);
            }
        }

        let completed = outcome.completed_at();
        self.first_started = Some(match self.first_started {
            Some(first) => first.min(outcome.started_at),
            None => outcome.started_at,
        });
        self.last_completed = Some(match self.last_completed {
            Some(last) => last.max(completed),
            None => completed,
        });
    }

    pub fn snapshot(&self) -> RunStatistics {
        let elapsed_secs = match (self.first_started, self.last_completed) {
            (Some(first), Some(last)) => last.saturating_duration_since(first).as_secs_f64(),
            _ => 0.0,
        };
        let failures = self.total - self.success;
        let (failure_mean, failure_max) = if failures == 0 {
            (0.0, 0.0)
        } else {
            (
                self.failure_latency.mean() / 1e6,
                self.failure_latency.max() as f64 / 1e6,
            )
        };

        RunStatistics {
            total: self.total,
            success_count: self.success,
            failure_count: failures,
            http_errors: self.http_errors,
            timeouts: self.timeouts,
            transport_errors: self.transport_errors,
            success_rate: ratio(self.success, self.total),
            timeout_rate: ratio(self.timeouts, self.total),
            throughput: if elapsed_secs > 0.0 {
                self.total as f64 / elapsed_secs
            } else {
                0.0
            },
            elapsed_secs,
            latency: LatencySummary::from_samples(&self.success_latencies),
            failure_latency_mean_secs: failure_mean,
            failure_latency_max_secs: failure_max,
            bytes_received: self.bytes_received,
            avg_success_size: if self.success > 0 {
                self.success_bytes as f64 / self.success as f64
            } else {
                0.0
            },
            status_counts: self.status_counts.clone(),
        }
    }

    pub fn reset(&mut self) {
        self.total = 0;
        self.success = 0;
        self.http_errors = 0;
        self.timeouts = 0;
        self.transport_errors = 0;
        self.bytes_received = 0;
        self.success_bytes = 0;
        self.success_latencies.clear();
        self.failure_latency.reset();
        self.status_counts.clear();
        self.first_started = None;
        self.last_completed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Attempt;
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn test_nearest_rank_reference_vector() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(nearest_rank(&v, 0.50), Some(3.0));
        assert_eq!(nearest_rank(&v, 0.90), Some(5.0));
        assert_eq!(nearest_rank(&v, 0.0), Some(1.0));
        assert_eq!(nearest_rank(&v, 1.0), Some(5.0));
        assert_eq!(nearest_rank(&[], 0.5), None);
    }

    #[test]
    fn test_nearest_rank_float_noise() {
        // 100 * 0.07 is slightly above 7 in binary; rank must still be 7
        let v: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(nearest_rank(&v, 0.07), Some(7.0));
        assert_eq!(nearest_rank(&v, 0.95), Some(95.0));
        assert_eq!(nearest_rank(&v, 0.99), Some(99.0));
    }

    #[test]
    fn test_summary_ignores_input_order() {
        let summary = LatencySummary::from_samples(&[5.0, 1.0, 4.0, 2.0, 3.0]);
        assert_eq!(summary.samples, 5);
        assert_eq!(summary.p50_secs, 3.0);
        assert_eq!(summary.p90_secs, 5.0);
        assert_eq!(summary.min_secs, 1.0);
        assert_eq!(summary.avg_secs, 3.0);
    }

    #[test]
    fn test_empty_tally_has_zero_rates() {
        let stats = Tally::new().unwrap().snapshot();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.throughput, 0.0);
        assert_eq!(stats.error_percent(), 0.0);
    }

    #[test]
    fn test_failures_do_not_enter_success_percentiles() {
        let mut tally = Tally::new().unwrap();
        let attempt = Attempt::begin(0, Duration::from_secs(1));

        let mut ok = attempt.success(200, 100);
        ok.latency = Duration::from_millis(100);
        let mut slow_fail = attempt.timed_out();
        slow_fail.latency = Duration::from_secs(30);
        let mut http = attempt.http_error(502, "HTTP 502");
        http.latency = Duration::from_millis(10);

        tally.record(&ok);
        tally.record(&slow_fail);
        tally.record(&http);

        let stats = tally.snapshot();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.success_count + stats.failure_count, stats.total);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.http_errors, 1);
        assert_eq!(stats.latency.samples, 1);
        assert!((stats.latency.p99_secs - 0.1).abs() < 1e-9);
        assert!(stats.failure_latency_max_secs >= 29.9);
        assert_eq!(stats.status_counts.get(&502), Some(&1));
        assert!((stats.elapsed_secs - 30.0).abs() < 0.01);
        assert!((stats.throughput - 0.1).abs() < 0.001);

        tally.reset();
        assert_eq!(tally.snapshot().total, 0);
    }

    proptest! {
        #[test]
        fn prop_percentile_is_a_sample_and_monotonic(
            mut v in proptest::collection::vec(0.0f64..100.0, 1..200),
            p in 0.0f64..1.0,
            q in 0.0f64..1.0,
        ) {
            v.sort_by(|a, b| a.total_cmp(b));
            let lo = nearest_rank(&v, p.min(q)).unwrap();
            let hi = nearest_rank(&v, p.max(q)).unwrap();
            prop_assert!(v.contains(&lo));
            prop_assert!(lo <= hi);
        }

        #[test]
        fn prop_counts_always_balance(classes in proptest::collection::vec(0u8..4, 0..100)) {
            let mut tally = Tally::new().unwrap();
            let attempt = Attempt::begin(0, Duration::from_secs(1));
            for c in &classes {
                let outcome = match c {
                    0 => attempt.success(200, 1),
                    1 => attempt.http_error(500, "HTTP 500"),
                    2 => attempt.timed_out(),
                    _ => attempt.transport_error("refused"),
                };
                tally.record(&outcome);
            }
            let stats = tally.snapshot();
            prop_assert_eq!(stats.total, classes.len() as u64);
            prop_assert_eq!(stats.success_count + stats.failure_count, stats.total);
            prop_assert_eq!(
                stats.http_errors + stats.timeouts + stats.transport_errors,
                stats.failure_count
            );
            prop_assert!((0.0..=1.0).contains(&stats.success_rate));
        }
    }
}
