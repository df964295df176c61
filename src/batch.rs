//! Single consumer of the event channel: groups events and flushes them to the sink.
//!
//! The time threshold is only checked when an event arrives; there is no
//! background timer. A batch that is old enough but sees no further traffic
//! stays pending until the next event (or until the process exits), so flush
//! latency under sparse traffic is not bounded by the time threshold.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::event::DnsQueryEvent;
use crate::sink::Sink;

#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    pub count_threshold: usize,
    pub time_threshold: Duration,
}

/// Totals over the accumulator's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub flushes: u64,
    pub persisted: u64,
    pub dropped: u64,
    /// Events still pending when the channel closed; never flushed.
    pub abandoned: u64,
}

pub struct BatchAccumulator {
    policy: FlushPolicy,
    sink: Arc<dyn Sink>,
    pending: Vec<DnsQueryEvent>,
    last_flush: Instant,
    report: BatchReport,
}

impl BatchAccumulator {
    pub fn new(policy: FlushPolicy, sink: Arc<dyn Sink>) -> Self {
        Self {
            policy,
            sink,
            pending: Vec::new(),
            last_flush: Instant::now(),
            report: BatchReport::default(),
        }
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn report(&self) -> BatchReport {
        self.report
    }

    /// Consumes events until every sender is gone. The partial batch left at
    /// that point is not flushed.
    pub async fn run(mut self, mut rx: mpsc::Receiver<DnsQueryEvent>) -> BatchReport {
        while let Some(event) = rx.recv().await {
            self.on_event(event).await;
        }
        self.report.abandoned = self.pending.len() as u64;
        if !self.pending.is_empty() {
            warn!(pending = self.pending.len(), "event channel closed, pending batch discarded");
        }
        self.report
    }

    /// Applies the flush rules for one received event.
    pub async fn on_event(&mut self, event: DnsQueryEvent) {
        // A time-eligible batch goes out on its own; the new event starts the next one.
        if self.time_elapsed() {
            self.flush().await;
        }

        self.pending.push(event);

        if self.pending.len() >= self.policy.count_threshold || self.time_elapsed() {
            self.flush().await;
        }
    }

    fn time_elapsed(&self) -> bool {
        !self.pending.is_empty() && self.last_flush.elapsed() >= self.policy.time_threshold
    }

    /// Hands the whole pending batch to the sink and clears it whatever the outcome.
    async fn flush(&mut self) {
        let batch = std::mem::take(&mut self.pending);
        let started = Instant::now();

        match self.sink.insert(&batch).await {
            Ok(()) => {
                self.report.persisted += batch.len() as u64;
                debug!(
                    sink = self.sink.name(),
                    events = batch.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "batch flushed"
                );
            }
            Err(err) => {
                self.report.dropped += batch.len() as u64;
                error!(
                    sink = self.sink.name(),
                    dropped = batch.len(),
                    error = %format!("{err:#}"),
                    "batch insert failed, dropping batch"
                );
            }
        }

        self.report.flushes += 1;
        self.last_flush = Instant::now();
    }
}
