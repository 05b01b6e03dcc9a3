//! Single consumer of request outcomes
//!
//! Owns all statistics state. Workers only ever send outcomes down the
//! channel, so no statistic is updated from two places.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, warn};

use crate::alert::AlertPolicy;
use crate::error::Result;
use crate::outcome::RequestOutcome;
use crate::report::{Report, ReportKind, ReportSink};
use crate::stats::{LatencySummary, RunStatistics, Tally};

/// What the aggregator hands back once the channel closes
#[derive(Debug)]
pub(crate) struct Aggregate {
    pub recorded: u64,
    pub alerts_fired: u64,
    pub statistics: RunStatistics,
    pub final_report: Report,
}

pub(crate) struct Aggregator {
    label: String,
    concurrency: usize,
    started: Instant,
    deadline: Option<Instant>,
    period: Duration,
    cumulative: Tally,
    window: Tally,
    rolling: Option<(VecDeque<f64>, usize)>,
    last_close: Instant,
    sinks: Vec<Arc<dyn ReportSink>>,
    alerts: Option<AlertPolicy>,
    alerts_fired: u64,
}

impl Aggregator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        label: String,
        concurrency: usize,
        started: Instant,
        deadline: Option<Instant>,
        period: Duration,
        latency_window: Option<usize>,
        sinks: Vec<Arc<dyn ReportSink>>,
        alerts: Option<AlertPolicy>,
    ) -> Result<Self> {
        Ok(Self {
            label,
            concurrency,
            started,
            deadline,
            period,
            cumulative: Tally::new()?,
            window: Tally::new()?,
            rolling: latency_window.map(|cap| (VecDeque::with_capacity(cap), cap)),
            last_close: started,
            sinks,
            alerts,
            alerts_fired: 0,
        })
    }

    /// Consume outcomes until every sender is dropped, emitting a live
    /// report each period and one final report at the end
    pub async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<RequestOutcome>,
    ) -> Result<Aggregate> {
        let mut ticker = interval_at((self.started + self.period).into(), self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(outcome) => self.ingest(outcome).await,
                    None => break,
                },
                _ = ticker.tick() => {
                    let report = self.close_interval(ReportKind::Live).await;
                    for sink in &self.sinks {
                        if let Err(e) = sink.emit(&report).await {
                            warn!(sink = sink.name(), "live report failed: {}", e);
                        }
                    }
                }
            }
        }

        let final_report = self.close_interval(ReportKind::Final).await;
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(&final_report).await {
                warn!(sink = sink.name(), "final report failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        debug!(label = %self.label, recorded = self.cumulative.total(), "aggregator done");
        Ok(Aggregate {
            recorded: self.cumulative.total(),
            alerts_fired: self.alerts_fired,
            statistics: final_report.cumulative.clone(),
            final_report,
        })
    }

    async fn ingest(&mut self, outcome: RequestOutcome) {
        self.cumulative.record(&outcome);
        self.window.record(&outcome);

        if let Some((recent, cap)) = self.rolling.as_mut() {
            if outcome.is_success() {
                if recent.len() == *cap {
                    recent.pop_front();
                }
                recent.push_back(outcome.latency_secs());
            }
        }

        for sink in &self.sinks {
            if let Err(e) = sink.record(&outcome).await {
                warn!(sink = sink.name(), seq = outcome.seq, "failed to record outcome: {}", e);
            }
        }

        if let Some(policy) = &self.alerts {
            let fired = policy.observe_outcome(&outcome);
            if !fired.is_empty() {
                self.alerts_fired += fired.len() as u64;
                policy.deliver(&fired).await;
            }
        }
    }

    /// Build the report for the interval that just ended, run the interval
    /// alert rules over it and start a new interval
    async fn close_interval(&mut self, kind: ReportKind) -> Report {
        let now = Instant::now();
        let interval = self.window.snapshot();
        let interval_secs = now.saturating_duration_since(self.last_close).as_secs_f64();

        let report = Report {
            label: self.label.clone(),
            kind,
            generated_at: Utc::now(),
            concurrency: self.concurrency,
            run_elapsed_secs: now.saturating_duration_since(self.started).as_secs_f64(),
            remaining_secs: self
                .deadline
                .map(|deadline| deadline.saturating_duration_since(now).as_secs_f64()),
            cumulative: self.cumulative.snapshot(),
            current_qps: if interval_secs > 0.0 {
                interval.total as f64 / interval_secs
            } else {
                0.0
            },
            interval,
            rolling: self
                .rolling
                .as_ref()
                .map(|(recent, _)| LatencySummary::from_samples(recent.iter())),
        };

        if let Some(policy) = &self.alerts {
            let fired = policy.observe_interval(&report.interval);
            if !fired.is_empty() {
                self.alerts_fired += fired.len() as u64;
                policy.deliver(&fired).await;
            }
        }

        self.window.reset();
        self.last_close = now;
        report
    }
}
