//! Reports and the sinks that receive them

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::outcome::RequestOutcome;
use crate::stats::{LatencySummary, RunStatistics};

/// Whether a report is a periodic snapshot or the end-of-run summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Live,
    Final,
}

/// Snapshot handed to every [`ReportSink`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Run label (usually the target name)
    pub label: String,
    pub kind: ReportKind,
    pub generated_at: DateTime<Utc>,
    pub concurrency: usize,
    /// Seconds since the run started
    pub run_elapsed_secs: f64,
    /// Seconds left before the deadline, duration mode only
    pub remaining_secs: Option<f64>,
    /// Everything recorded so far
    pub cumulative: RunStatistics,
    /// Outcomes recorded since the previous report
    pub interval: RunStatistics,
    /// `interval.total` divided by the interval length
    pub current_qps: f64,
    /// Rolling window of recent successful latencies
    pub rolling: Option<LatencySummary>,
}

impl Report {
    pub fn is_final(&self) -> bool {
        self.kind == ReportKind::Final
    }
}

/// Destination for reports (console, CSV, webhook, ...)
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Called once per outcome, in arrival order
    async fn record(&self, _outcome: &RequestOutcome) -> Result<()> {
        Ok(())
    }

    /// Called for every live report and exactly once with the final report
    async fn emit(&self, report: &Report) -> Result<()>;
}

/// Logs reports through `tracing`
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl ReportSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn emit(&self, report: &Report) -> Result<()> {
        let stats = &report.cumulative;
        let rolling_avg_ms = report
            .rolling
            .as_ref()
            .map(|r| r.avg_secs * 1000.0)
            .unwrap_or_default();

        match report.kind {
            ReportKind::Live => info!(
                label = %report.label,
                elapsed_secs = %format!("{:.1}", report.run_elapsed_secs),
                remaining_secs = ?report.remaining_secs.map(|r| r.round()),
                "total={} ok={} fail={} success={:.2}% qps={:.2} avg={:.1}ms rolling_avg={:.1}ms",
                stats.total,
                stats.success_count,
                stats.failure_count,
                stats.success_percent(),
                report.current_qps,
                stats.latency.avg_secs * 1000.0,
                rolling_avg_ms,
            ),
            ReportKind::Final => info!(
                label = %report.label,
                "finished: total={} ok={} success={:.2}% throughput={:.2}/s p50={:.3}s p99={:.3}s",
                stats.total,
                stats.success_count,
                stats.success_percent(),
                stats.throughput,
                stats.latency.p50_secs,
                stats.latency.p99_secs,
            ),
        }
        Ok(())
    }
}

/// Keeps every report in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<Report>>,
    recorded: Mutex<u64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    pub fn final_reports(&self) -> Vec<Report> {
        self.reports
            .lock()
            .iter()
            .filter(|r| r.is_final())
            .cloned()
            .collect()
    }

    /// Outcomes seen through [`ReportSink::record`]
    pub fn recorded(&self) -> u64 {
        *self.recorded.lock()
    }
}

#[async_trait]
impl ReportSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn record(&self, _outcome: &RequestOutcome) -> Result<()> {
        *self.recorded.lock() += 1;
        Ok(())
    }

    async fn emit(&self, report: &Report) -> Result<()> {
        self.reports.lock().push(report.clone());
        Ok(())
    }
}
