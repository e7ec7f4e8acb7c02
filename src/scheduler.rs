//! Fixed-cadence driver for collection cycles.
//!
//! The first cycle runs immediately, then one per interval. Cycles never
//! overlap: ticks that elapse while a cycle is still running are dropped,
//! not queued.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{Span, info};

use crate::error::{Error, Result};
use crate::shutdown::Shutdown;

pub struct Scheduler {
    interval: Duration,
    shutdown: Shutdown,
    span: Span,
}

impl Scheduler {
    pub fn new(interval: Duration, shutdown: Shutdown) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Config("collection interval must be non-zero".to_string()));
        }
        Ok(Self {
            interval,
            shutdown,
            span: tracing::info_span!("scheduler", interval_secs = interval.as_secs()),
        })
    }

    /// Replace the span this scheduler logs under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Signal the scheduler to stop. The in-flight cycle sees the same
    /// signal at its next cancellable step.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    /// Run `cycle` now and then on every tick until stopped.
    ///
    /// Returns the number of cycles started.
    pub async fn run<F, Fut>(&self, mut cycle: F) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(parent: &self.span, "scheduler started");

        let mut cycles = 0;
        loop {
            // The first tick completes immediately.
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            cycles += 1;
            cycle().await;

            if self.shutdown.is_triggered() {
                break;
            }
        }

        info!(parent: &self.span, cycles, "scheduler stopped");
        cycles
    }
}
