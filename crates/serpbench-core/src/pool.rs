//! Bounded worker pool
//!
//! `concurrency` long-lived workers each loop: ticket from the scheduler,
//! build the work item, take a concurrency slot, run the request under a
//! timeout, forward the outcome. Nothing that happens inside one request can
//! take a worker down.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::Result;
use crate::outcome::{Attempt, RequestOutcome};
use crate::scheduler::Scheduler;

/// Performs one request.
///
/// Implementations classify their own failures; the pool additionally
/// enforces `attempt.timeout()` and turns panics into transport errors.
#[async_trait]
pub trait RequestExecutor: Send + Sync + 'static {
    type Item: Send + 'static;

    async fn execute(&self, item: Self::Item, attempt: &Attempt) -> RequestOutcome;
}

/// Builds the work item for a dispatch sequence number.
///
/// Sources may read shared configuration (keyword pools, templates) but
/// never mutate it.
pub trait WorkSource: Send + Sync + 'static {
    type Item: Send + 'static;

    fn next_item(&self, seq: u64) -> Self::Item;
}

impl<F, T> WorkSource for F
where
    F: Fn(u64) -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    type Item = T;

    fn next_item(&self, seq: u64) -> T {
        self(seq)
    }
}

/// Counts requests holding a concurrency slot
#[derive(Debug, Default)]
pub struct SlotGauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SlotGauge {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest simultaneous slot count observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A held concurrency slot; released on drop, whatever the exit path
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    gauge: Arc<SlotGauge>,
}

impl SlotGuard {
    fn new(permit: OwnedSemaphorePermit, gauge: Arc<SlotGauge>) -> Self {
        gauge.enter();
        Self {
            _permit: permit,
            gauge,
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.gauge.exit();
    }
}

pub(crate) struct WorkerPool<E, S> {
    pub executor: Arc<E>,
    pub source: Arc<S>,
    pub scheduler: Arc<Scheduler>,
    pub slots: Arc<Semaphore>,
    pub gauge: Arc<SlotGauge>,
    pub timeout: Duration,
    pub detail_limit: usize,
}

impl<E, S> WorkerPool<E, S>
where
    E: RequestExecutor,
    S: WorkSource<Item = E::Item>,
{
    /// Dispatch until the scheduler runs dry; fails only when the scheduler
    /// cannot hand out a ticket
    pub async fn run_worker(
        self: Arc<Self>,
        worker: usize,
        tx: mpsc::UnboundedSender<RequestOutcome>,
    ) -> Result<()> {
        while let Some(seq) = self.scheduler.next_dispatch().await? {
            let outcome = self.dispatch(seq).await;
            debug!(
                worker,
                seq,
                class = %outcome.status_class,
                status = ?outcome.status_code,
                latency_ms = outcome.latency.as_millis() as u64,
                "request finished"
            );
            if tx.send(outcome).is_err() {
                warn!(worker, "aggregator is gone, worker stopping");
                break;
            }
        }
        debug!(worker, "worker done");
        Ok(())
    }

    async fn dispatch(&self, seq: u64) -> RequestOutcome {
        let item = match std::panic::catch_unwind(AssertUnwindSafe(|| self.source.next_item(seq))) {
            Ok(item) => item,
            Err(panic) => {
                let attempt = Attempt::begin(seq, self.timeout);
                return attempt.transport_error(format!(
                    "work source panicked: {}",
                    panic_message(panic.as_ref())
                ));
            }
        };

        let mut outcome = execute_in_slot(
            self.executor.as_ref(),
            item,
            seq,
            self.timeout,
            &self.slots,
            &self.gauge,
        )
        .await;
        outcome.truncate_detail(self.detail_limit);
        outcome
    }
}

/// Run one item inside a concurrency slot with the request timeout applied
pub async fn execute_in_slot<E: RequestExecutor>(
    executor: &E,
    item: E::Item,
    seq: u64,
    timeout: Duration,
    slots: &Arc<Semaphore>,
    gauge: &Arc<SlotGauge>,
) -> RequestOutcome {
    let permit = match slots.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return Attempt::begin(seq, timeout).transport_error("concurrency slots closed");
        }
    };
    let slot = SlotGuard::new(permit, gauge.clone());

    let attempt = Attempt::begin(seq, timeout);
    let call = AssertUnwindSafe(executor.execute(item, &attempt)).catch_unwind();
    let outcome = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(panic)) => attempt.transport_error(format!(
            "executor panicked: {}",
            panic_message(panic.as_ref())
        )),
        Err(_) => attempt.timed_out(),
    };
    drop(slot);
    outcome
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
