//! Multi-target test cycles and the monitor loop

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serpbench_core::{AlertEngine, AlertPolicy, LoadGenerator, ReportSink, RunSummary, TracingSink};
use tokio::pin;
use tracing::{error, info, warn};

use crate::config::{BenchConfig, TargetConfig};
use crate::error::Result;
use crate::executor::{HttpExecutor, TargetSource};
use crate::sinks::{
    append_summary_csv, summary_table, write_json, ConsoleSink, DetailCsvSink, SummaryRow,
};
use crate::webhook::{MarkdownWebhook, SummaryWebhookSink};

/// How reports reach the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStyle {
    /// Progress lines and boxed tables on stdout
    Console,
    /// Everything through `tracing`
    Log,
}

/// Runs every enabled target at every concurrency step
pub struct Suite {
    config: BenchConfig,
    style: ReportStyle,
    webhook: Option<MarkdownWebhook>,
    /// One policy per target, so alert streaks survive across cycles
    policies: HashMap<String, AlertPolicy>,
}

impl Suite {
    pub fn new(config: BenchConfig, style: ReportStyle) -> Result<Self> {
        config.validate()?;
        let webhook = config
            .webhook
            .clone()
            .map(MarkdownWebhook::new)
            .transpose()?;

        let policies = config
            .enabled_targets()
            .map(|target| {
                let mut policy =
                    AlertPolicy::new(AlertEngine::new(target.name.clone(), config.alerts.clone()));
                if let Some(webhook) = &webhook {
                    policy = policy.with_hook(Arc::new(webhook.clone()));
                }
                (target.name.clone(), policy)
            })
            .collect();

        Ok(Self {
            config,
            style,
            webhook,
            policies,
        })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Run one full cycle: every target, every step, in order.
    ///
    /// A run that fails is logged and skipped; the rows of the runs that
    /// completed are returned.
    pub async fn run_cycle(&self) -> Result<Vec<SummaryRow>> {
        let steps = self.config.concurrency_steps();
        let mut rows = Vec::new();

        for target in self.config.enabled_targets() {
            let executor =
                Arc::new(HttpExecutor::new(target.check.clone())?.with_retry(target.retry));
            let source = Arc::new(TargetSource::new(
                target.request.clone(),
                self.config.keywords_for(target),
            ));

            for &concurrency in &steps {
                match self
                    .run_target(target, concurrency, executor.clone(), source.clone())
                    .await
                {
                    Ok(summary) => rows.push(SummaryRow::from_summary(&summary)),
                    Err(e) => error!(target = %target.name, concurrency, "run failed: {}", e),
                }
            }
        }
        Ok(rows)
    }

    async fn run_target(
        &self,
        target: &TargetConfig,
        concurrency: usize,
        executor: Arc<HttpExecutor>,
        source: Arc<TargetSource>,
    ) -> Result<RunSummary> {
        let mut generator =
            LoadGenerator::from_shared(self.config.harness_for_step(concurrency), executor, source)?
                .with_label(target.name.clone());

        let display: Arc<dyn ReportSink> = match self.style {
            ReportStyle::Console => Arc::new(ConsoleSink),
            ReportStyle::Log => Arc::new(TracingSink),
        };
        generator = generator.with_sink(display);

        if let Some(dir) = &self.config.output.details_dir {
            generator = generator.with_sink(Arc::new(DetailCsvSink::create(
                dir,
                &target.name,
                concurrency,
            )?));
        }
        if let Some(webhook) = self.webhook.as_ref().filter(|w| w.sends_summary()) {
            generator = generator.with_sink(Arc::new(SummaryWebhookSink::new(webhook.clone())));
        }
        if let Some(policy) = self.policies.get(&target.name) {
            generator = generator.with_alerts(policy.clone());
        }

        Ok(generator.run().await?)
    }

    /// Persist and print the rows of a cycle
    pub fn publish(&self, rows: &[SummaryRow]) -> Result<()> {
        if rows.is_empty() {
            warn!("No completed runs to report");
            return Ok(());
        }
        if let Some(path) = &self.config.output.summary_csv {
            append_summary_csv(path, rows)?;
        }
        if let Some(path) = &self.config.output.json {
            write_json(path, rows)?;
        }
        match self.style {
            ReportStyle::Console => println!("\n{}", summary_table(rows)),
            ReportStyle::Log => info!("\n{}", summary_table(rows)),
        }
        Ok(())
    }

    /// Run a single cycle and publish it
    pub async fn run_once(&self) -> Result<Vec<SummaryRow>> {
        let rows = self.run_cycle().await?;
        self.publish(&rows)?;
        Ok(rows)
    }

    /// Repeat cycles until `shutdown` resolves or the configured cycle
    /// count is reached. A cycle interrupted by `shutdown` is abandoned.
    pub async fn monitor<F>(&self, shutdown: F) -> Result<u64>
    where
        F: Future<Output = ()>,
    {
        let pause = Duration::from_secs(self.config.monitor.interval_secs);
        let limit = self.config.monitor.cycles;
        pin!(shutdown);

        let mut completed = 0u64;
        loop {
            info!(cycle = completed + 1, "Starting monitoring cycle");
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, abandoning current cycle");
                    break;
                }
                rows = self.run_cycle() => {
                    self.publish(&rows?)?;
                    completed += 1;
                }
            }

            if limit.is_some_and(|limit| completed >= limit) {
                break;
            }

            info!("Next cycle in {}s", pause.as_secs());
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
        info!(cycles = completed, "Monitoring stopped");
        Ok(completed)
    }
}
