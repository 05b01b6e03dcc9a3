//! Run orchestration

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::aggregator::Aggregator;
use crate::alert::AlertPolicy;
use crate::config::{HarnessConfig, StopCondition};
use crate::error::{HarnessError, Result};
use crate::pool::{RequestExecutor, SlotGauge, WorkSource, WorkerPool};
use crate::report::{Report, ReportSink};
use crate::scheduler::Scheduler;
use crate::stats::RunStatistics;

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub label: String,
    pub concurrency: usize,
    /// Tickets handed out by the scheduler
    pub dispatched: u64,
    /// Outcomes that reached the aggregator
    pub recorded: u64,
    /// Highest number of requests observed in flight at once
    pub peak_in_flight: usize,
    pub alerts_fired: u64,
    pub wall_clock: Duration,
    pub statistics: RunStatistics,
    pub final_report: Report,
}

/// Drives requests against one executor.
///
/// ```ignore
/// let summary = LoadGenerator::new(HarnessConfig::for_count(10, 1000), executor, source)?
///     .with_label("google")
///     .with_sink(Arc::new(TracingSink))
///     .run()
///     .await?;
/// ```
pub struct LoadGenerator<E, S> {
    config: HarnessConfig,
    stop: StopCondition,
    executor: Arc<E>,
    source: Arc<S>,
    label: String,
    sinks: Vec<Arc<dyn ReportSink>>,
    alerts: Option<AlertPolicy>,
}

impl<E, S> LoadGenerator<E, S>
where
    E: RequestExecutor,
    S: WorkSource<Item = E::Item>,
{
    /// Validates `config`; an invalid configuration never starts a run
    pub fn new(config: HarnessConfig, executor: E, source: S) -> Result<Self> {
        Self::from_shared(config, Arc::new(executor), Arc::new(source))
    }

    /// Same as [`new`](Self::new) for an executor and source already shared
    /// across runs (one HTTP client for several concurrency steps, say)
    pub fn from_shared(config: HarnessConfig, executor: Arc<E>, source: Arc<S>) -> Result<Self> {
        let stop = config.validate()?;
        Ok(Self {
            config,
            stop,
            executor,
            source,
            label: "run".to_string(),
            sinks: Vec::new(),
            alerts: None,
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_alerts(mut self, alerts: AlertPolicy) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run to completion.
    ///
    /// Returns once every dispatched request has been recorded and the final
    /// report has been emitted to every sink.
    pub async fn run(self) -> Result<RunSummary> {
        let concurrency = self.config.concurrency;
        info!(
            label = %self.label,
            concurrency,
            stop = ?self.stop,
            target_rps = self.config.target_rps,
            "starting run"
        );

        let scheduler = Arc::new(Scheduler::new(self.stop, self.config.target_rps));
        let (tx, rx) = mpsc::unbounded_channel();

        let aggregator = Aggregator::new(
            self.label.clone(),
            concurrency,
            scheduler.started(),
            scheduler.deadline(),
            self.config.report_interval(),
            self.config.latency_window,
            self.sinks,
            self.alerts,
        )?;
        let aggregator = tokio::spawn(aggregator.run(rx));

        let gauge = Arc::new(SlotGauge::default());
        let pool = Arc::new(WorkerPool {
            executor: self.executor,
            source: self.source,
            scheduler: scheduler.clone(),
            slots: Arc::new(Semaphore::new(concurrency)),
            gauge: gauge.clone(),
            timeout: self.config.request_timeout(),
            detail_limit: self.config.error_detail_limit,
        });

        let mut workers = JoinSet::new();
        for worker in 0..concurrency {
            workers.spawn(pool.clone().run_worker(worker, tx.clone()));
        }
        drop(tx);

        let mut worker_failure = None;
        while let Some(joined) = workers.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => HarnessError::TaskFailed(format!("worker: {}", e)),
            };
            error!(label = %self.label, "worker failed: {}", failure);
            worker_failure.get_or_insert(failure);
        }
        let wall_clock = scheduler.started().elapsed();

        // Workers are gone, so the channel is closed and the aggregator
        // finishes with whatever was recorded
        let aggregate = aggregator
            .await
            .map_err(|e| HarnessError::TaskFailed(format!("aggregator: {}", e)))?;
        if let Some(failure) = worker_failure {
            return Err(failure);
        }
        let aggregate = aggregate?;

        let dispatched = scheduler.dispatched();
        if dispatched != aggregate.recorded {
            error!(
                label = %self.label,
                dispatched,
                recorded = aggregate.recorded,
                "dispatched and recorded counts differ"
            );
            return Err(HarnessError::TaskFailed(format!(
                "dispatched {} requests but recorded {}",
                dispatched, aggregate.recorded
            )));
        }
        info!(
            label = %self.label,
            recorded = aggregate.recorded,
            wall_clock_secs = wall_clock.as_secs_f64(),
            peak_in_flight = gauge.peak(),
            "run complete"
        );

        Ok(RunSummary {
            label: self.label,
            concurrency,
            dispatched,
            recorded: aggregate.recorded,
            peak_in_flight: gauge.peak(),
            alerts_fired: aggregate.alerts_fired,
            wall_clock,
            statistics: aggregate.statistics,
            final_report: aggregate.final_report,
        })
    }
}
