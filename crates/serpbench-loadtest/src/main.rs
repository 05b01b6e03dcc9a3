//! # serpbench CLI
//!
//! Command-line interface for load testing and monitoring search APIs.
//!
//! ## Usage
//!
//! ```bash
//! # Run every target in the config file once
//! serpbench --config serpbench.toml run
//!
//! # Same targets at concurrency 20 then 50, fixed 500 requests each
//! serpbench --config serpbench.toml run --steps 20,50 --requests 500
//!
//! # Monitor with alerts until Ctrl-C
//! serpbench --config serpbench.toml monitor
//!
//! # Validate the configuration and print the plan
//! serpbench --config serpbench.toml check
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serpbench_loadtest::{
    BenchConfig, KeywordOrder, KeywordPool, ReportStyle, RequestTemplate, Suite, TargetConfig,
    WebhookConfig,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "serpbench")]
#[command(version)]
#[command(about = "Load testing and monitoring tool for search APIs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "SERPBENCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines instead of console tables
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one test cycle over every target
    Run {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Repeat test cycles and raise alerts
    Monitor {
        #[command(flatten)]
        overrides: Overrides,

        /// Seconds between cycles
        #[arg(long)]
        interval: Option<u64>,

        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Validate the configuration and print the plan
    Check {
        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Command-line values that take precedence over the config file
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Ad-hoc target URL (added to the configured targets)
    #[arg(long)]
    url: Option<String>,

    /// Name for the ad-hoc target
    #[arg(long, default_value = "target")]
    name: String,

    /// Query parameter that receives the keyword for the ad-hoc target
    #[arg(long)]
    query_param: Option<String>,

    /// Comma-separated keywords
    #[arg(long, value_delimiter = ',')]
    keywords: Vec<String>,

    /// Pick keywords at random instead of round-robin
    #[arg(long)]
    random_keywords: bool,

    /// Only run these targets
    #[arg(short, long = "target")]
    targets: Vec<String>,

    /// Maximum concurrent requests
    #[arg(short = 'n', long)]
    concurrency: Option<usize>,

    /// Comma-separated concurrency steps
    #[arg(long, value_delimiter = ',')]
    steps: Vec<usize>,

    /// Test duration in seconds
    #[arg(short, long, conflicts_with = "requests")]
    duration: Option<f64>,

    /// Total requests per run
    #[arg(long)]
    requests: Option<u64>,

    /// Target requests per second (0 = unconstrained)
    #[arg(short, long)]
    rps: Option<f64>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Seconds between live reports
    #[arg(long)]
    report_interval: Option<f64>,

    /// Append summary rows to this CSV file
    #[arg(long)]
    summary_csv: Option<PathBuf>,

    /// Write per-request CSV files to this directory
    #[arg(long)]
    details_dir: Option<PathBuf>,

    /// Output results to JSON file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Markdown chat webhook for alerts
    #[arg(long, env = "SERPBENCH_WEBHOOK")]
    webhook: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut BenchConfig) {
        config.retain_targets(&self.targets);

        if let Some(url) = self.url {
            let mut request = RequestTemplate::get(url);
            request.query_param = self.query_param;
            config.targets.push(TargetConfig::new(self.name, request));
        }
        if !self.keywords.is_empty() {
            let order = if self.random_keywords {
                KeywordOrder::Random
            } else {
                KeywordOrder::RoundRobin
            };
            config.keywords = Some(KeywordPool::new(self.keywords, order));
        }

        let harness = &mut config.harness;
        if let Some(concurrency) = self.concurrency {
            harness.concurrency = concurrency;
        }
        if let Some(duration) = self.duration {
            harness.duration_secs = Some(duration);
            harness.total_requests = None;
        }
        if let Some(requests) = self.requests {
            harness.total_requests = Some(requests);
            harness.duration_secs = None;
        }
        if let Some(rps) = self.rps {
            harness.target_rps = rps;
        }
        if let Some(timeout) = self.timeout {
            harness.request_timeout_secs = timeout;
        }
        if let Some(interval) = self.report_interval {
            harness.report_interval_secs = interval;
        }
        if !self.steps.is_empty() {
            config.steps = self.steps;
        }

        if self.summary_csv.is_some() {
            config.output.summary_csv = self.summary_csv;
        }
        if self.details_dir.is_some() {
            config.output.details_dir = self.details_dir;
        }
        if self.output.is_some() {
            config.output.json = self.output;
        }
        if let Some(url) = self.webhook {
            config.webhook = Some(WebhookConfig {
                url,
                ..config.webhook.take().unwrap_or_else(|| WebhookConfig::new(""))
            });
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<BenchConfig> {
    match path {
        Some(path) => BenchConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(BenchConfig::default()),
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    info!("serpbench v{}", env!("CARGO_PKG_VERSION"));

    let style = if cli.log_json {
        ReportStyle::Log
    } else {
        ReportStyle::Console
    };
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run { overrides } => {
            overrides.apply(&mut config);
            let suite = Suite::new(config, style).context("invalid configuration")?;
            tokio::select! {
                rows = suite.run_once() => {
                    let rows = rows?;
                    if rows.is_empty() {
                        bail!("no run completed");
                    }
                }
                _ = shutdown_signal() => {
                    warn!("Interrupted");
                }
            }
        }
        Commands::Monitor {
            overrides,
            interval,
            cycles,
        } => {
            overrides.apply(&mut config);
            if let Some(interval) = interval {
                config.monitor.interval_secs = interval;
            }
            if cycles.is_some() {
                config.monitor.cycles = cycles;
            }
            let suite = Suite::new(config, style).context("invalid configuration")?;
            suite.monitor(shutdown_signal()).await?;
        }
        Commands::Check { overrides } => {
            overrides.apply(&mut config);
            config.validate().context("invalid configuration")?;
            print_plan(&config);
        }
    }

    Ok(())
}

fn print_plan(config: &BenchConfig) {
    let stop = match (config.harness.total_requests, config.harness.duration_secs) {
        (Some(total), _) => format!("{} requests", total),
        (None, Some(secs)) => format!("{}s", secs),
        (None, None) => "unbounded".to_string(),
    };
    let rate = if config.harness.target_rps > 0.0 {
        format!("{} req/s", config.harness.target_rps)
    } else {
        "unconstrained".to_string()
    };

    println!("Configuration OK");
    println!("  stop:        {}", stop);
    println!("  rate:        {}", rate);
    println!("  steps:       {:?}", config.concurrency_steps());
    println!("  timeout:     {}s", config.harness.request_timeout_secs);
    println!("  alerts:      {}", config.alerts.len());
    for target in config.enabled_targets() {
        let keywords = config
            .keywords_for(target)
            .map(|pool| pool.terms.len())
            .unwrap_or_default();
        println!(
            "  target:      {} {} {} ({} keywords)",
            target.name, target.request.method, target.request.url, keywords
        );
    }
}
