//! Periodic Background Tasks
//!
//! Drives the eviction, rescale and row-dispatch loops: a step function is
//! invoked repeatedly until a cancellation token fires.
//!
//! # Loop contract
//!
//! - Cancellation is checked at the top of every iteration and interrupts
//!   the idle sleep, never a running step
//! - A step reporting [`Work::Busy`] is re-run immediately; [`Work::Idle`]
//!   sleeps for the task interval first
//! - A failed step is logged and treated as idle; the loop keeps running

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// What a step reports back to the loop driving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Work {
    /// Nothing more to do right now; sleep before the next step
    Idle,
    /// A backlog remains; step again without sleeping
    Busy,
}

/// Counters reported when a task stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskReport {
    /// Steps executed
    pub iterations: u64,
    /// Steps that returned an error
    pub failures: u64,
}

/// A named loop with a fixed idle interval.
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
}

impl PeriodicTask {
    /// Create a task that stops when `cancel` fires
    pub fn new(name: &'static str, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            name,
            interval,
            cancel,
        }
    }

    /// Task name used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `step` until cancelled.
    pub async fn run<F, Fut>(&self, mut step: F) -> TaskReport
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Work>>,
    {
        info!(task = self.name, interval = ?self.interval, "Starting background task");
        let mut report = TaskReport::default();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            report.iterations += 1;
            let work = match step().await {
                Ok(work) => work,
                Err(e) => {
                    report.failures += 1;
                    if e.is_store_failure() {
                        error!(task = self.name, "Store unavailable: {}", e);
                    } else {
                        warn!(task = self.name, "Background step failed: {}", e);
                    }
                    Work::Idle
                }
            };

            if work == Work::Busy {
                // Let request handlers in between back-to-back steps
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(task = self.name, "Cancelled while idle");
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(
            task = self.name,
            iterations = report.iterations,
            failures = report.failures,
            "Background task stopped"
        );
        report
    }
}
