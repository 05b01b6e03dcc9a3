//! # serpbench load testing
//!
//! HTTP load testing and availability monitoring for search APIs, built on
//! the `serpbench-core` harness.
//!
//! ## Features
//!
//! - **Request templates**: method, URL, headers, query parameters and JSON
//!   bodies with `{query}` / `{query_encoded}` keyword placeholders
//! - **Retries**: timed-out or failed requests retried with exponential
//!   backoff inside the request timeout
//! - **Response checks**: 2xx responses that are HTML, undecodable, carry an
//!   error field or lack result fields count as failures
//! - **Concurrency steps**: every target rerun at each configured level
//! - **Outputs**: console tables, summary CSV, per-request CSV, JSON
//! - **Monitoring**: repeated cycles with streak alerts sent to a markdown
//!   chat webhook
//!
//! ## Usage
//!
//! ```bash
//! # One cycle over every target in the file
//! serpbench --config serpbench.toml run
//!
//! # Quick test of a single URL for 30 seconds at concurrency 20
//! serpbench run --url "https://example.com/search" --query-param q --duration 30 --concurrency 20
//!
//! # Monitor forever, one cycle every minute
//! serpbench --config serpbench.toml monitor --interval 60
//! ```

pub mod check;
pub mod config;
pub mod error;
pub mod executor;
pub mod keywords;
pub mod sinks;
pub mod suite;
pub mod template;
pub mod webhook;

pub use check::ResponseCheck;
pub use config::{BenchConfig, MonitorConfig, OutputConfig, TargetConfig};
pub use error::{BenchError, Result};
pub use executor::{
    HttpExecutor, HttpWorkItem, RetryPolicy, TargetSource, ATTEMPTS_FIELD, QUERY_FIELD,
};
pub use keywords::{KeywordOrder, KeywordPool};
pub use sinks::{
    append_summary_csv, print_report, summary_table, write_json, ConsoleSink, DetailCsvSink,
    SummaryRow,
};
pub use suite::{ReportStyle, Suite};
pub use template::{RenderedRequest, RequestTemplate};
pub use webhook::{MarkdownWebhook, SummaryWebhookSink, WebhookConfig};
