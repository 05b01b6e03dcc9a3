//! Dispatch pacing and stop conditions
//!
//! Every worker asks the scheduler for a ticket before each iteration. The
//! scheduler is the single point that decides *when* the next request may
//! start and *whether* any more may start at all.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::sleep_until;

use crate::config::StopCondition;
use crate::error::{HarnessError, Result};

/// Earliest time the next dispatch may happen.
///
/// `Ok(None)` means immediately: without a rate target only the concurrency
/// limit throttles work. Fails when the slot lies beyond what [`Instant`]
/// can represent.
pub fn next_ready_at(last_dispatch: Instant, target_rate: f64) -> Result<Option<Instant>> {
    if !target_rate.is_finite() || target_rate <= 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(1.0 / target_rate)
        .ok()
        .and_then(|gap| last_dispatch.checked_add(gap))
        .map(Some)
        .ok_or_else(|| {
            HarnessError::InvalidConfig(format!(
                "target_rps {} puts the next dispatch out of range",
                target_rate
            ))
        })
}

/// Hands out dispatch tickets until the stop condition is reached
#[derive(Debug)]
pub struct Scheduler {
    stop: StopCondition,
    started: Instant,
    deadline: Option<Instant>,
    target_rps: f64,
    dispatched: AtomicU64,
    /// Slot reserved by the most recent ticket
    last_slot: Mutex<Option<Instant>>,
}

impl Scheduler {
    pub fn new(stop: StopCondition, target_rps: f64) -> Self {
        let started = Instant::now();
        let deadline = match stop {
            StopCondition::Duration(window) => Some(started + window),
            StopCondition::Count(_) => None,
        };
        Self {
            stop,
            started,
            deadline,
            target_rps,
            dispatched: AtomicU64::new(0),
            last_slot: Mutex::new(None),
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Tickets handed out so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    fn deadline_passed(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Wait for the next dispatch slot and return its sequence number.
    ///
    /// Returns `Ok(None)` once the run is over. A ticket is only counted as
    /// dispatched when it is returned, so every `Some` must end in exactly
    /// one recorded outcome.
    pub async fn next_dispatch(&self) -> Result<Option<u64>> {
        match self.stop {
            StopCondition::Count(total) => {
                let Ok(seq) = self
                    .dispatched
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        (n < total).then_some(n + 1)
                    })
                else {
                    return Ok(None);
                };
                match self.reserve_slot() {
                    Ok(Some(ready_at)) => sleep_until(ready_at.into()).await,
                    Ok(None) => {}
                    Err(e) => {
                        // Hand the ticket back; no outcome will follow it
                        self.dispatched.fetch_sub(1, Ordering::SeqCst);
                        return Err(e);
                    }
                }
                Ok(Some(seq))
            }
            StopCondition::Duration(_) => {
                if self.deadline_passed(Instant::now()) {
                    return Ok(None);
                }
                if let Some(ready_at) = self.reserve_slot()? {
                    if self.deadline_passed(ready_at) {
                        return Ok(None);
                    }
                    sleep_until(ready_at.into()).await;
                    if self.deadline_passed(Instant::now()) {
                        return Ok(None);
                    }
                }
                Ok(Some(self.dispatched.fetch_add(1, Ordering::SeqCst)))
            }
        }
    }

    /// Claim the next paced slot; `None` when unpaced.
    ///
    /// Slots never fall behind `now`, so a slow stretch does not turn into
    /// a catch-up burst.
    fn reserve_slot(&self) -> Result<Option<Instant>> {
        if self.target_rps <= 0.0 {
            return Ok(None);
        }
        let mut last = self.last_slot.lock();
        let now = Instant::now();
        let ready_at = match *last {
            Some(prev) => next_ready_at(prev, self.target_rps)?.map_or(now, |at| at.max(now)),
            None => now,
        };
        *last = Some(ready_at);
        Ok(Some(ready_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_ready_at() {
        let t0 = Instant::now();
        assert_eq!(next_ready_at(t0, 0.0).unwrap(), None);
        assert_eq!(next_ready_at(t0, f64::NAN).unwrap(), None);
        assert_eq!(
            next_ready_at(t0, 4.0).unwrap(),
            Some(t0 + Duration::from_millis(250))
        );
    }

    #[test]
    fn test_next_ready_at_out_of_range() {
        let t0 = Instant::now();
        assert!(next_ready_at(t0, 1e-19).is_err());
        assert!(next_ready_at(t0, 1e-300).is_err());
    }

    #[tokio::test]
    async fn test_count_mode_issues_exactly_total() {
        let scheduler = Scheduler::new(StopCondition::Count(3), 0.0);
        assert_eq!(scheduler.next_dispatch().await.unwrap(), Some(0));
        assert_eq!(scheduler.next_dispatch().await.unwrap(), Some(1));
        assert_eq!(scheduler.next_dispatch().await.unwrap(), Some(2));
        assert_eq!(scheduler.next_dispatch().await.unwrap(), None);
        assert_eq!(scheduler.dispatched(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_slot_returns_the_ticket() {
        let scheduler = Scheduler::new(StopCondition::Count(5), 1e-19);
        // First slot is immediate, the second cannot be represented
        assert_eq!(scheduler.next_dispatch().await.unwrap(), Some(0));
        assert!(scheduler.next_dispatch().await.is_err());
        assert_eq!(scheduler.dispatched(), 1);
    }

    #[tokio::test]
    async fn test_duration_mode_stops_at_deadline() {
        let scheduler = Scheduler::new(StopCondition::Duration(Duration::from_millis(50)), 0.0);
        assert!(scheduler.next_dispatch().await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(scheduler.next_dispatch().await.unwrap(), None);
        assert_eq!(scheduler.dispatched(), 1);
    }

    #[tokio::test]
    async fn test_paced_dispatch_spacing() {
        let scheduler = Scheduler::new(StopCondition::Count(5), 50.0);
        let start = Instant::now();
        while scheduler.next_dispatch().await.unwrap().is_some() {}
        // First slot is immediate, the remaining four are 20ms apart
        assert!(start.elapsed() >= Duration::from_millis(75));
    }

    #[tokio::test]
    async fn test_paced_slot_past_deadline_is_refused() {
        let scheduler = Scheduler::new(StopCondition::Duration(Duration::from_millis(100)), 1.0);
        assert_eq!(scheduler.next_dispatch().await.unwrap(), Some(0));
        // Next slot would be at +1s, well past the deadline
        let start = Instant::now();
        assert_eq!(scheduler.next_dispatch().await.unwrap(), None);
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
