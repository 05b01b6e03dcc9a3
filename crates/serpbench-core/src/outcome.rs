//! Request outcomes and their classification

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a single request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    /// 2xx response whose body was read and accepted
    Success,
    /// Non-2xx response
    HttpError,
    /// Per-request deadline exceeded, at any phase
    Timeout,
    /// Anything else: DNS, connect, TLS, body decode, rejected content
    TransportError,
}

impl StatusClass {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::HttpError => "http_error",
            Self::Timeout => "timeout",
            Self::TransportError => "transport_error",
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified result of executing one work item
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// Dispatch sequence number
    pub seq: u64,
    /// Wall-clock time the network call began
    pub issued_at: DateTime<Utc>,
    /// Monotonic time the network call began
    pub started_at: Instant,
    /// Network-phase elapsed time; excludes waiting for a slot
    pub latency: Duration,
    pub status_class: StatusClass,
    pub status_code: Option<u16>,
    /// Bytes of body received (0 when no body was read)
    pub content_size: u64,
    pub error_detail: Option<String>,
    /// Values extracted from the decoded body for reporting
    pub fields: BTreeMap<String, String>,
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        self.status_class.is_success()
    }

    /// 5xx responses, whatever class they ended up in
    pub fn is_server_error(&self) -> bool {
        matches!(self.status_code, Some(500..=599))
    }

    pub fn latency_secs(&self) -> f64 {
        self.latency.as_secs_f64()
    }

    /// Monotonic completion time of the network phase
    pub fn completed_at(&self) -> Instant {
        self.started_at + self.latency
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_content_size(mut self, content_size: u64) -> Self {
        self.content_size = content_size;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Turn an apparently successful response into a failure.
    ///
    /// Latency and size are kept; the detail explains why the body was
    /// rejected.
    pub fn demote(mut self, detail: impl Into<String>) -> Self {
        self.status_class = StatusClass::TransportError;
        self.error_detail = Some(detail.into());
        self.fields.clear();
        self
    }

    /// Bound the error detail to `limit` characters
    pub fn truncate_detail(&mut self, limit: usize) {
        if let Some(detail) = self.error_detail.as_mut() {
            if let Some((idx, _)) = detail.char_indices().nth(limit) {
                detail.truncate(idx);
            }
        }
    }
}

/// One request's execution context, handed to the executor.
///
/// The attempt starts when the worker holds a concurrency slot, so every
/// outcome built from it measures network time only.
#[derive(Debug, Clone)]
pub struct Attempt {
    seq: u64,
    timeout: Duration,
    issued_at: DateTime<Utc>,
    started_at: Instant,
}

impl Attempt {
    /// Start the clock for request `seq`
    pub fn begin(seq: u64, timeout: Duration) -> Self {
        Self {
            seq,
            timeout,
            issued_at: Utc::now(),
            started_at: Instant::now(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn outcome(&self, status_class: StatusClass, error_detail: Option<String>) -> RequestOutcome {
        RequestOutcome {
            seq: self.seq,
            issued_at: self.issued_at,
            started_at: self.started_at,
            latency: self.elapsed(),
            status_class,
            status_code: None,
            content_size: 0,
            error_detail,
            fields: BTreeMap::new(),
        }
    }

    /// Accepted response
    pub fn success(&self, status_code: u16, content_size: u64) -> RequestOutcome {
        self.outcome(StatusClass::Success, None)
            .with_status_code(status_code)
            .with_content_size(content_size)
    }

    /// Non-2xx response; the body is not read
    pub fn http_error(&self, status_code: u16, detail: impl Into<String>) -> RequestOutcome {
        self.outcome(StatusClass::HttpError, Some(detail.into()))
            .with_status_code(status_code)
    }

    /// Deadline exceeded; latency is the partial elapsed time
    pub fn timed_out(&self) -> RequestOutcome {
        let detail = format!("request timed out after {:.3}s", self.timeout.as_secs_f64());
        self.outcome(StatusClass::Timeout, Some(detail))
    }

    /// Any failure not otherwise classified
    pub fn transport_error(&self, detail: impl Into<String>) -> RequestOutcome {
        self.outcome(StatusClass::TransportError, Some(detail.into()))
    }
}
