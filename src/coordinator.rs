//! One collection cycle: produce, deliver or spool, then replay the backlog.
//!
//! The coordinator owns the producer, the transport and the spool. It is
//! driven sequentially; two cycles never run at once on the same instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::{Instrument, Span, error, info, warn};

use crate::error::{Error, Result};
use crate::model::{EventId, Snapshot};
use crate::producer::Producer;
use crate::shutdown::Shutdown;
use crate::spool::SpoolQueue;
use crate::telemetry::cycle::{record_cycle_report, start_cycle_span};
use crate::telemetry::metrics;
use crate::transport::{RetryPolicy, Transport, send_with_retry};

/// Per-cycle settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Bound on snapshot production.
    pub cycle_timeout: Duration,
    /// Policy for the direct delivery of a fresh snapshot. Replays always
    /// make a single attempt per event.
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cycle_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// What happened during one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Set when the producer failed; nothing was spooled in that case.
    pub producer_error: Option<String>,
    /// The snapshot produced this cycle, if any.
    pub snapshot: Option<Snapshot>,
    pub delivered_direct: bool,
    /// Id of the event created when direct delivery failed.
    pub spooled: Option<EventId>,
    /// Direct delivery and spooling both failed; the snapshot is gone.
    pub data_lost: bool,
    /// Spooled events delivered during the replay pass.
    pub replayed: usize,
    /// Spooled events whose replay attempt failed; they stay spooled.
    pub replay_failed: usize,
    /// Events left in the spool after replay, when the listing succeeded.
    pub spool_remaining: Option<usize>,
    /// The shutdown signal cut the cycle short.
    pub cancelled: bool,
}

impl CycleReport {
    /// True when a snapshot was produced this cycle.
    pub fn is_success(&self) -> bool {
        self.producer_error.is_none()
    }
}

/// Ties producer, transport and spool together.
pub struct DeliveryCoordinator<P, T> {
    producer: P,
    transport: T,
    spool: SpoolQueue,
    config: CoordinatorConfig,
    shutdown: Shutdown,
    cycles: AtomicU64,
    span: Span,
}

impl<P: Producer, T: Transport> DeliveryCoordinator<P, T> {
    pub fn new(
        producer: P,
        transport: T,
        spool: SpoolQueue,
        config: CoordinatorConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            producer,
            transport,
            spool,
            config,
            shutdown,
            cycles: AtomicU64::new(0),
            span: tracing::info_span!("coordinator"),
        }
    }

    /// Replace the span cycles are nested under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn spool(&self) -> &SpoolQueue {
        &self.spool
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run one collection cycle.
    ///
    /// Never fails as a whole: every error is logged and summarized in the
    /// returned report. The replay pass runs even when production failed, so
    /// an existing backlog still drains.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let span = start_cycle_span(&self.span, cycle);

        let report = async {
            let start = Instant::now();
            let mut report = CycleReport::default();

            match self.produce().await {
                Ok(snapshot) => {
                    metrics::snapshots_produced().add(1, &[KeyValue::new("result", "ok")]);
                    self.deliver_or_spool(&snapshot, &mut report).await;
                    report.snapshot = Some(snapshot);
                }
                Err(e) => {
                    metrics::snapshots_produced().add(1, &[KeyValue::new("result", "error")]);
                    error!(error = %e, "snapshot production failed, nothing to spool");
                    report.cancelled = matches!(e, Error::Cancelled);
                    report.producer_error = Some(e.to_string());
                }
            }

            if self.shutdown.is_triggered() {
                info!("shutdown requested, skipping replay");
                report.cancelled = true;
            } else {
                self.replay(&mut report).await;
            }

            metrics::cycle_duration_ms().record(start.elapsed().as_secs_f64() * 1000.0, &[]);
            report
        }
        .instrument(span.clone())
        .await;

        record_cycle_report(&span, &report);
        report
    }

    async fn produce(&self) -> Result<Snapshot> {
        let timeout = self.config.cycle_timeout;
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(timeout, self.producer.produce()) => match result {
                Ok(produced) => produced,
                Err(_) => Err(Error::Producer(format!(
                    "timed out after {}ms",
                    timeout.as_millis()
                ))),
            },
        }
    }

    /// Direct delivery; on any failure, spool the snapshot.
    async fn deliver_or_spool(&self, snapshot: &Snapshot, report: &mut CycleReport) {
        let result =
            send_with_retry(&self.transport, snapshot, &self.config.retry, &self.shutdown).await;

        match result {
            Ok(()) => {
                metrics::deliveries().add(1, &[path_direct(), KeyValue::new("result", "ok")]);
                info!("snapshot delivered");
                report.delivered_direct = true;
            }
            Err(e) => {
                metrics::deliveries().add(1, &[path_direct(), KeyValue::new("result", "error")]);
                warn!(error = %e, "direct delivery failed, spooling snapshot");
                if matches!(e, Error::Cancelled) {
                    report.cancelled = true;
                }

                match self.spool.enqueue(snapshot).await {
                    Ok(id) => {
                        info!(event_id = %id, "snapshot spooled for replay");
                        report.spooled = Some(id);
                    }
                    Err(e) => {
                        error!(error = %e, "failed to spool snapshot, snapshot lost");
                        report.data_lost = true;
                    }
                }
            }
        }
    }

    /// One attempt per pending event, oldest first. Failures are per event.
    async fn replay(&self, report: &mut CycleReport) {
        let pending = match self.spool.list_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "cannot list spool, skipping replay");
                return;
            }
        };

        let total = pending.len();
        if total > 0 {
            info!(pending = total, "replaying spooled events");
        }

        let mut removed = 0;
        for event in pending {
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(event_id = %event.id, "shutdown during replay, event stays spooled");
                    report.cancelled = true;
                    break;
                }
                result = self.transport.send(&event.payload) => result,
            };

            match result {
                Ok(()) => {
                    metrics::deliveries().add(1, &[path_replay(), KeyValue::new("result", "ok")]);
                    report.replayed += 1;
                    match self.spool.remove(event.id).await {
                        Ok(()) => {
                            removed += 1;
                            info!(event_id = %event.id, "spooled event delivered");
                        }
                        // Delivery is at-least-once; the event is sent again next cycle.
                        Err(e) => warn!(
                            event_id = %event.id,
                            error = %e,
                            "spooled event delivered but not removed"
                        ),
                    }
                }
                Err(e) => {
                    metrics::deliveries().add(1, &[path_replay(), KeyValue::new("result", "error")]);
                    report.replay_failed += 1;
                    warn!(event_id = %event.id, error = %e, "replay failed, event stays spooled");
                }
            }
        }

        report.spool_remaining = Some(total - removed);
    }
}

fn path_direct() -> KeyValue {
    KeyValue::new("path", "direct")
}

fn path_replay() -> KeyValue {
    KeyValue::new("path", "replay")
}
