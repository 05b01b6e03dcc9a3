//! Console, CSV and JSON output

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serpbench_core::{HarnessError, Report, ReportKind, ReportSink, RequestOutcome, RunSummary};
use tracing::info;

use crate::error::Result;
use crate::executor::{ATTEMPTS_FIELD, QUERY_FIELD};

// ============================================================================
// CONSOLE
// ============================================================================

/// Prints a progress line per live report and a boxed table for the final one
#[derive(Debug, Default)]
pub struct ConsoleSink;

#[async_trait]
impl ReportSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn emit(&self, report: &Report) -> serpbench_core::Result<()> {
        match report.kind {
            ReportKind::Live => println!("{}", live_line(report)),
            ReportKind::Final => print_report(report),
        }
        Ok(())
    }
}

fn live_line(report: &Report) -> String {
    let stats = &report.cumulative;
    let remaining = report
        .remaining_secs
        .map(|secs| format!(" | left {:>4.0}s", secs))
        .unwrap_or_default();
    let rolling = report
        .rolling
        .as_ref()
        .filter(|r| r.samples > 0)
        .map(|r| format!(" | last {} avg {:.3}s", r.samples, r.avg_secs))
        .unwrap_or_default();
    format!(
        "[{}] {:>6.1}s{} | total {:>6} | ok {:>6} | fail {:>5} | success {:>6.2}% | qps {:>7.2}{}",
        report.label,
        report.run_elapsed_secs,
        remaining,
        stats.total,
        stats.success_count,
        stats.failure_count,
        stats.success_percent(),
        report.current_qps,
        rolling,
    )
}

/// Print formatted final report
pub fn print_report(report: &Report) {
    let stats = &report.cumulative;
    let lat = &stats.latency;
    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:^60} ║", format!("{} @ concurrency {}", report.label, report.concurrency));
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║ Elapsed:           {:>10.2} seconds                        ║", stats.elapsed_secs);
    println!("║ Total Requests:    {:>10}                                 ║", stats.total);
    println!("║ Successful:        {:>10}                                 ║", stats.success_count);
    println!("║ HTTP Errors:       {:>10}                                 ║", stats.http_errors);
    println!("║ Timeouts:          {:>10}                                 ║", stats.timeouts);
    println!(
        "║ Transport Errors:  {:>10}                                 ║",
        stats.transport_errors
    );
    println!(
        "║ Success Rate:      {:>10.2}%                                ║",
        stats.success_percent()
    );
    println!("║ Throughput:        {:>10.2} req/s                          ║", stats.throughput);
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║ SUCCESS LATENCY (seconds)                                    ║");
    println!("║   avg:             {:>10.3}                                 ║", lat.avg_secs);
    println!("║   p50:             {:>10.3}                                 ║", lat.p50_secs);
    println!("║   p75:             {:>10.3}                                 ║", lat.p75_secs);
    println!("║   p90:             {:>10.3}                                 ║", lat.p90_secs);
    println!("║   p95:             {:>10.3}                                 ║", lat.p95_secs);
    println!("║   p99:             {:>10.3}                                 ║", lat.p99_secs);
    println!("║   max:             {:>10.3}                                 ║", lat.max_secs);
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║ Bytes Received:    {:>10}                                 ║", stats.bytes_received);
    println!(
        "║ Avg Success Size:  {:>10.3} KB                             ║",
        stats.avg_success_size / 1024.0
    );

    if !stats.status_counts.is_empty() {
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ STATUS CODES                                                 ║");
        for (code, count) in &stats.status_counts {
            println!("║   {:<20}: {:>10}                         ║", code, count);
        }
    }

    println!("╚══════════════════════════════════════════════════════════════╝\n");
}

// ============================================================================
// PER-REQUEST DETAIL CSV
// ============================================================================

#[derive(Debug, Serialize)]
struct DetailRow<'a> {
    timestamp: String,
    target: &'a str,
    concurrency: usize,
    seq: u64,
    query: &'a str,
    status_class: &'static str,
    status_code: Option<u16>,
    latency_secs: f64,
    content_size: u64,
    attempts: Option<u32>,
    error: &'a str,
    fields: String,
}

/// One CSV row per outcome
pub struct DetailCsvSink {
    label: String,
    concurrency: usize,
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl DetailCsvSink {
    /// Create `<dir>/<label>_c<concurrency>_<timestamp>.csv`
    pub fn create(dir: &Path, label: &str, concurrency: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file_name = format!(
            "{}_c{}_{}.csv",
            sanitize(label),
            concurrency,
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        );
        let path = dir.join(file_name);
        let writer = csv::Writer::from_path(&path)?;
        Ok(Self {
            label: label.to_string(),
            concurrency,
            path,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl ReportSink for DetailCsvSink {
    fn name(&self) -> &str {
        "detail-csv"
    }

    async fn record(&self, outcome: &RequestOutcome) -> serpbench_core::Result<()> {
        let fields = outcome
            .fields
            .iter()
            .filter(|(name, _)| ![QUERY_FIELD, ATTEMPTS_FIELD].contains(&name.as_str()))
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(";");
        let row = DetailRow {
            timestamp: outcome.issued_at.to_rfc3339(),
            target: &self.label,
            concurrency: self.concurrency,
            seq: outcome.seq,
            query: outcome.fields.get(QUERY_FIELD).map(String::as_str).unwrap_or_default(),
            status_class: outcome.status_class.as_str(),
            status_code: outcome.status_code,
            latency_secs: outcome.latency_secs(),
            content_size: outcome.content_size,
            attempts: outcome
                .fields
                .get(ATTEMPTS_FIELD)
                .and_then(|tries| tries.parse().ok()),
            error: outcome.error_detail.as_deref().unwrap_or_default(),
            fields,
        };
        self.writer
            .lock()
            .serialize(row)
            .map_err(|e| HarnessError::sink(self.name(), e))
    }

    async fn emit(&self, report: &Report) -> serpbench_core::Result<()> {
        if report.is_final() {
            self.writer
                .lock()
                .flush()
                .map_err(|e| HarnessError::sink(self.name(), e))?;
            info!("Detailed records saved to {}", self.path.display());
        }
        Ok(())
    }
}

// ============================================================================
// SUMMARY ROWS
// ============================================================================

/// One row of the summary table, per (target, concurrency) run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub target: String,
    pub concurrency: usize,
    pub total: u64,
    pub rate_rps: f64,
    pub success: u64,
    pub success_pct: f64,
    pub error_pct: f64,
    pub timeouts: u64,
    pub avg_secs: f64,
    pub p50_secs: f64,
    pub p75_secs: f64,
    pub p90_secs: f64,
    pub p95_secs: f64,
    pub p99_secs: f64,
    pub elapsed_secs: f64,
    pub avg_size_kb: f64,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

impl SummaryRow {
    pub fn from_summary(summary: &RunSummary) -> Self {
        let stats = &summary.statistics;
        Self {
            target: summary.label.clone(),
            concurrency: summary.concurrency,
            total: stats.total,
            rate_rps: round_to(stats.throughput, 3),
            success: stats.success_count,
            success_pct: round_to(stats.success_percent(), 2),
            error_pct: round_to(stats.error_percent(), 2),
            timeouts: stats.timeouts,
            avg_secs: round_to(stats.latency.avg_secs, 3),
            p50_secs: round_to(stats.latency.p50_secs, 3),
            p75_secs: round_to(stats.latency.p75_secs, 3),
            p90_secs: round_to(stats.latency.p90_secs, 3),
            p95_secs: round_to(stats.latency.p95_secs, 3),
            p99_secs: round_to(stats.latency.p99_secs, 3),
            elapsed_secs: round_to(stats.elapsed_secs, 3),
            avg_size_kb: round_to(stats.avg_success_size / 1024.0, 3),
        }
    }
}

/// Append rows to a summary CSV; the header is written only for a new file
pub fn append_summary_csv(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!("Summary saved to {}", path.display());
    Ok(())
}

/// Write every row as pretty JSON
pub fn write_json(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    let json = serde_json::to_string_pretty(rows)?;
    std::fs::write(path, json)?;
    info!("Results saved to {}", path.display());
    Ok(())
}

/// Summary table columns and their widths; the first is left-aligned
const SUMMARY_COLUMNS: [(&str, usize); 15] = [
    ("target", 20),
    ("total", 8),
    ("conc", 6),
    ("rate/s", 10),
    ("success", 8),
    ("succ%", 8),
    ("err%", 8),
    ("avg(s)", 9),
    ("p50(s)", 8),
    ("p75(s)", 8),
    ("p90(s)", 8),
    ("p95(s)", 8),
    ("p99(s)", 8),
    ("elapsed(s)", 10),
    ("size(KB)", 10),
];

fn table_line(cells: &[String]) -> String {
    cells
        .iter()
        .zip(SUMMARY_COLUMNS)
        .enumerate()
        .map(|(i, (cell, (_, width)))| {
            if i == 0 {
                format!("{:<width$}", cell)
            } else {
                format!("{:>width$}", cell)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render the summary table shown at the end of a run
pub fn summary_table(rows: &[SummaryRow]) -> String {
    let names: Vec<String> = SUMMARY_COLUMNS
        .iter()
        .map(|(name, _)| name.to_string())
        .collect();
    let header = table_line(&names);
    let rule = "-".repeat(header.chars().count());

    let mut out = vec![rule.clone(), header, rule.clone()];
    for row in rows {
        out.push(table_line(&[
            row.target.clone(),
            row.total.to_string(),
            row.concurrency.to_string(),
            format!("{:.3}", row.rate_rps),
            row.success.to_string(),
            format!("{:.2}%", row.success_pct),
            format!("{:.2}%", row.error_pct),
            format!("{:.3}", row.avg_secs),
            format!("{:.3}", row.p50_secs),
            format!("{:.3}", row.p75_secs),
            format!("{:.3}", row.p90_secs),
            format!("{:.3}", row.p95_secs),
            format!("{:.3}", row.p99_secs),
            format!("{:.3}", row.elapsed_secs),
            format!("{:.3}", row.avg_size_kb),
        ]));
    }
    out.push(rule);
    out.join("\n")
}
