//! Paced, bounded-concurrency dispatch of queued work
//!
//! The [`Dispatcher`] drains queues one after another. Each queue is fully
//! drained before the next is touched, because replies in a later queue are
//! addressed by destination ids recorded while draining an earlier one.
//!
//! Per batch it:
//! - takes up to `batch_size` items and issues them concurrently
//! - waits for all of them to settle
//! - records destination ids, dead-letters failures, flushes state
//! - sleeps for whatever is left of `pacing_floor`
//!
//! A failed item never stops the run.

use crate::metrics;
use crate::queue::{DurableQueue, WorkItem};
use crate::resolve::ReferenceTable;
use crate::shutdown::Flushable;
use crate::transport::{Transport, TransportError};
use crate::Result;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// HTTP status meaning the item already exists at the destination
const CONFLICT: u16 = 409;

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Items issued concurrently per batch
    pub batch_size: usize,
    /// Minimum wall time of one batch
    pub pacing_floor: Duration,
    /// Flush queues and references after every batch
    pub flush_after_batch: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            pacing_floor: Duration::from_millis(1000),
            flush_after_batch: true,
        }
    }
}

impl DispatchConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_pacing_floor(mut self, floor: Duration) -> Self {
        self.pacing_floor = floor;
        self
    }

    pub fn with_flush_after_batch(mut self, enabled: bool) -> Self {
        self.flush_after_batch = enabled;
        self
    }
}

/// Result of one item
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    /// Created, with the destination id when the response carried one
    Created(Option<String>),
    /// Already existed
    Conflict,
    Failed(String),
}

/// Counts for a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchSummary {
    pub succeeded: usize,
    pub conflicts: usize,
    pub failed: usize,
    pub batches: usize,
}

impl DispatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.conflicts + self.failed
    }
}

/// Running average of batch time for the remaining-time estimate
#[derive(Debug)]
struct Progress {
    total: usize,
    done: usize,
    elapsed: Duration,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self {
            total,
            done: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn record(&mut self, items: usize, took: Duration) {
        self.done += items;
        self.elapsed += took;
    }

    fn remaining(&self) -> Duration {
        if self.done == 0 {
            return Duration::ZERO;
        }
        let left = u32::try_from(self.total.saturating_sub(self.done)).unwrap_or(u32::MAX);
        let done = u32::try_from(self.done).unwrap_or(u32::MAX);
        (self.elapsed / done)
            .checked_mul(left)
            .unwrap_or(Duration::MAX)
    }
}

/// Render a duration the way progress lines show it
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms < 1000 {
        format!("{} ms", ms)
    } else if ms < 60_000 {
        format!("{:.2} seconds", duration.as_secs_f64())
    } else {
        format!("{:.2} minutes", duration.as_secs_f64() / 60.0)
    }
}

/// Drains work queues through a transport
pub struct Dispatcher<T> {
    transport: T,
    references: Arc<ReferenceTable>,
    dead_letters: Option<DurableQueue<WorkItem>>,
    config: DispatchConfig,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T, references: Arc<ReferenceTable>, config: DispatchConfig) -> Self {
        Self {
            transport,
            references,
            dead_letters: None,
            config,
        }
    }

    /// Keep permanently failed items in `queue` instead of dropping them
    pub fn with_dead_letters(mut self, queue: DurableQueue<WorkItem>) -> Self {
        self.dead_letters = Some(queue);
        self
    }

    pub fn references(&self) -> &ReferenceTable {
        &self.references
    }

    /// Drain `phases` in order, each to completion before the next
    ///
    /// Only state persistence failures abort the run.
    pub async fn run(&self, phases: &[&DurableQueue<WorkItem>]) -> Result<DispatchSummary> {
        let total = phases.iter().map(|q| q.len()).sum();
        let mut progress = Progress::new(total);
        let mut summary = DispatchSummary::default();

        info!(
            items = total,
            phases = phases.len(),
            batch_size = self.config.batch_size,
            "Starting dispatch"
        );

        for queue in phases {
            self.drain(queue, &mut progress, &mut summary).await?;
            info!(queue = %queue.name(), "Queue drained");
        }

        info!(
            succeeded = summary.succeeded,
            conflicts = summary.conflicts,
            failed = summary.failed,
            batches = summary.batches,
            "Dispatch complete"
        );
        Ok(summary)
    }

    async fn drain(
        &self,
        queue: &DurableQueue<WorkItem>,
        progress: &mut Progress,
        summary: &mut DispatchSummary,
    ) -> Result<()> {
        let phase = queue.name().to_string();

        loop {
            let batch = queue.dequeue(self.config.batch_size.max(1));
            if batch.is_empty() {
                break;
            }
            let started = Instant::now();

            let outcomes = join_all(batch.iter().map(|item| self.execute(item))).await;
            for (item, outcome) in batch.iter().zip(outcomes) {
                self.settle_item(&phase, item, outcome, summary)?;
            }
            queue.settle();
            summary.batches += 1;

            if self.config.flush_after_batch {
                self.flush_state(queue)?;
            }
            metrics::set_queue_depth(&phase, queue.len());

            let busy = started.elapsed();
            if busy < self.config.pacing_floor {
                tokio::time::sleep(self.config.pacing_floor - busy).await;
            }

            let took = started.elapsed();
            metrics::record_batch_duration(took.as_secs_f64());
            progress.record(batch.len(), took);
            info!(
                queue = %phase,
                done = progress.done,
                total = progress.total,
                remaining = %format_duration(progress.remaining()),
                "Dispatched batch"
            );
        }

        Ok(())
    }

    async fn execute(&self, item: &WorkItem) -> Outcome {
        let route = match item.route.resolve(&self.references) {
            Ok(route) => route,
            Err(e) => {
                error!(route = %item.route.path, error = %e, "Cannot address item");
                return Outcome::Failed(e.to_string());
            }
        };

        match self.transport.call(&route, &item.request_spec()).await {
            Ok(response) => Outcome::Created(response.created_id()),
            Err(e) if e.status() == Some(CONFLICT) => {
                warn!(route = %route, "Item already exists, treating as migrated");
                Outcome::Conflict
            }
            Err(e) => {
                log_failure(&route, &e);
                Outcome::Failed(e.to_string())
            }
        }
    }

    fn settle_item(
        &self,
        phase: &str,
        item: &WorkItem,
        outcome: Outcome,
        summary: &mut DispatchSummary,
    ) -> Result<()> {
        match outcome {
            Outcome::Created(id) => {
                summary.succeeded += 1;
                metrics::record_item(phase, "success");
                if let (Some(key), Some(id)) = (&item.source_key, id) {
                    self.references.insert(key.clone(), id);
                }
            }
            Outcome::Conflict => {
                summary.conflicts += 1;
                metrics::record_item(phase, "conflict");
                // imported messages are identified by their creation time
                if let Some(key) = &item.source_key {
                    if !self.references.contains(key) {
                        self.references
                            .insert(key.clone(), key.timestamp.millis().to_string());
                    }
                }
            }
            Outcome::Failed(reason) => {
                summary.failed += 1;
                metrics::record_item(phase, "failed");
                if let Some(ref dead) = self.dead_letters {
                    dead.enqueue(item.clone())?;
                    warn!(queue = %dead.name(), reason = %reason, "Item moved to dead letters");
                }
            }
        }
        Ok(())
    }

    fn flush_state(&self, queue: &DurableQueue<WorkItem>) -> Result<()> {
        queue.flush()?;
        Flushable::flush(&*self.references)?;
        if let Some(ref dead) = self.dead_letters {
            dead.flush()?;
        }
        Ok(())
    }
}

fn log_failure(route: &str, error: &TransportError) {
    match error {
        TransportError::Status {
            method,
            status,
            attempts,
            payload,
            body,
            ..
        } => error!(
            route,
            method = %method,
            status,
            attempts,
            payload = payload.as_deref().unwrap_or(""),
            response = %body,
            "Item failed"
        ),
        other => error!(route, error = %other, "Item failed"),
    }
}
