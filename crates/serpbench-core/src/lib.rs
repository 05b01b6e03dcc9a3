//! # serpbench core
//!
//! Bounded-concurrency, rate-controlled request harness with streaming
//! percentile statistics.
//!
//! A run is made of three cooperating parts:
//!
//! - **Scheduler**: decides when the next request may start and when the run
//!   stops (fixed request count or fixed duration, optional target rate)
//! - **Worker pool**: exactly `concurrency` workers, each holding a slot of a
//!   shared semaphore while its request is in flight
//! - **Aggregator**: the single consumer of outcomes; keeps cumulative and
//!   per-interval statistics, emits live and final reports, drives alerts
//!
//! ```text
//!   Scheduler ──ticket──► worker 0 ─┐
//!             ──ticket──► worker 1 ─┼──outcome──► Aggregator ──► sinks
//!             ──ticket──► worker N ─┘                 │
//!                                                     └──► alert hooks
//! ```
//!
//! What a "request" is lives behind [`RequestExecutor`] and [`WorkSource`];
//! the HTTP flavour is in the `serpbench-loadtest` crate.

mod aggregator;
pub mod alert;
pub mod config;
pub mod error;
pub mod harness;
pub mod outcome;
pub mod pool;
pub mod report;
pub mod scheduler;
pub mod stats;

pub use alert::{
    Alert, AlertCondition, AlertEngine, AlertHook, AlertPolicy, AlertRule, StreakDetector,
};
pub use config::{HarnessConfig, StopCondition};
pub use error::{HarnessError, Result};
pub use harness::{LoadGenerator, RunSummary};
pub use outcome::{Attempt, RequestOutcome, StatusClass};
pub use pool::{execute_in_slot, RequestExecutor, SlotGauge, WorkSource};
pub use report::{MemorySink, Report, ReportKind, ReportSink, TracingSink};
pub use scheduler::{next_ready_at, Scheduler};
pub use stats::{nearest_rank, LatencySummary, RunStatistics, Tally};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::alert::{AlertEngine, AlertHook, AlertPolicy, AlertRule};
    pub use crate::config::HarnessConfig;
    pub use crate::error::{HarnessError, Result};
    pub use crate::harness::{LoadGenerator, RunSummary};
    pub use crate::outcome::{Attempt, RequestOutcome, StatusClass};
    pub use crate::pool::{RequestExecutor, WorkSource};
    pub use crate::report::{Report, ReportKind, ReportSink};
}
