//! HTTP executor and work source

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serpbench_core::{Attempt, RequestExecutor, RequestOutcome, StatusClass, WorkSource};
use tracing::debug;

use crate::check::ResponseCheck;
use crate::error::{BenchError, Result};
use crate::keywords::KeywordPool;
use crate::template::{RenderedRequest, RequestTemplate};

/// Outcome field carrying the keyword used
pub const QUERY_FIELD: &str = "query";

/// Outcome field carrying how many tries the request took
pub const ATTEMPTS_FIELD: &str = "attempts";

/// One request to send
#[derive(Debug, Clone)]
pub enum HttpWorkItem {
    Ready {
        query: String,
        request: RenderedRequest,
    },
    /// The template could not be rendered for this keyword
    Unrenderable { query: String, reason: String },
}

/// Renders a target's template with the next keyword
#[derive(Debug, Clone)]
pub struct TargetSource {
    template: RequestTemplate,
    keywords: Option<Arc<KeywordPool>>,
}

impl TargetSource {
    pub fn new(template: RequestTemplate, keywords: Option<Arc<KeywordPool>>) -> Self {
        Self { template, keywords }
    }
}

impl WorkSource for TargetSource {
    type Item = HttpWorkItem;

    fn next_item(&self, seq: u64) -> HttpWorkItem {
        let query = self
            .keywords
            .as_ref()
            .map(|pool| pool.pick(seq))
            .unwrap_or_default()
            .to_string();
        match self.template.render(&query) {
            Ok(request) => HttpWorkItem::Ready { query, request },
            Err(e) => HttpWorkItem::Unrenderable {
                query,
                reason: e.to_string(),
            },
        }
    }
}

/// Retries of timed-out or failed requests within one dispatch.
///
/// The pause after the `n`th failed try is `backoff_secs * 2^n`. Every try
/// shares the request timeout, so a retry that cannot finish in time is not
/// started. HTTP error statuses are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra tries after the first one
    #[serde(default)]
    pub retries: u32,

    #[serde(default = "default_backoff")]
    pub backoff_secs: f64,
}

fn default_backoff() -> f64 {
    0.5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            backoff_secs: default_backoff(),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff_secs: f64) -> Self {
        Self {
            retries,
            backoff_secs,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.backoff_secs.is_finite() || self.backoff_secs < 0.0 {
            return Err(BenchError::config(format!(
                "retry.backoff_secs must be a finite value >= 0, got {}",
                self.backoff_secs
            )));
        }
        Ok(())
    }

    fn allows(&self, outcome: &RequestOutcome, tries: u32) -> bool {
        tries <= self.retries
            && matches!(
                outcome.status_class,
                StatusClass::Timeout | StatusClass::TransportError
            )
    }

    /// Pause after the `tries`th failed try
    pub fn backoff(&self, tries: u32) -> Duration {
        let exponent = i32::try_from(tries).unwrap_or(i32::MAX);
        Duration::try_from_secs_f64(self.backoff_secs * 2f64.powi(exponent))
            .unwrap_or(Duration::MAX)
    }
}

/// Sends requests with a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    check: ResponseCheck,
    retry: RetryPolicy,
}

impl HttpExecutor {
    pub fn new(check: ResponseCheck) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("serpbench/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, check))
    }

    pub fn with_client(client: Client, check: ResponseCheck) -> Self {
        Self {
            client,
            check,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One try, bounded by `timeout`
    async fn send_once(
        &self,
        request: &RenderedRequest,
        attempt: &Attempt,
        timeout: Duration,
    ) -> RequestOutcome {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return attempt.timed_out(),
            Err(e) => return attempt.transport_error(e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return attempt.http_error(status.as_u16(), format!("HTTP {}", status));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => {
                return attempt.timed_out().with_status_code(status.as_u16())
            }
            Err(e) => {
                return attempt
                    .transport_error(format!("reading body: {}", e))
                    .with_status_code(status.as_u16())
            }
        };

        let outcome = attempt.success(status.as_u16(), body.len() as u64);
        match self.check.evaluate(content_type.as_deref(), &body) {
            Ok(fields) => fields
                .into_iter()
                .fold(outcome, |outcome, (name, value)| outcome.with_field(name, value)),
            Err(detail) => outcome.demote(detail),
        }
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    type Item = HttpWorkItem;

    async fn execute(&self, item: HttpWorkItem, attempt: &Attempt) -> RequestOutcome {
        let (query, request) = match item {
            HttpWorkItem::Ready { query, request } => (query, request),
            HttpWorkItem::Unrenderable { query, reason } => {
                return attempt.transport_error(reason).with_field(QUERY_FIELD, query);
            }
        };

        let mut tries = 1;
        let outcome = loop {
            let remaining = attempt.timeout().saturating_sub(attempt.elapsed());
            let outcome = if remaining.is_zero() {
                attempt.timed_out()
            } else {
                self.send_once(&request, attempt, remaining).await
            };
            if !self.retry.allows(&outcome, tries) {
                break outcome;
            }

            let pause = self.retry.backoff(tries);
            if pause >= attempt.timeout().saturating_sub(attempt.elapsed()) {
                break outcome;
            }
            debug!(
                seq = attempt.seq(),
                tries,
                class = %outcome.status_class,
                "retrying in {:?}",
                pause
            );
            tokio::time::sleep(pause).await;
            tries += 1;
        };

        outcome
            .with_field(QUERY_FIELD, query)
            .with_field(ATTEMPTS_FIELD, tries.to_string())
    }
}
