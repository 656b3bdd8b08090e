//! Bounded-concurrency batch scheduling.
//!
//! A fixed pool of worker threads pulls queue items through a shared atomic
//! cursor, so the number of in-flight conversions can never exceed the
//! limit, even transiently. Item state moves one way only
//! (Queued → Converting → terminal) and one item's failure never touches its
//! siblings. A global cancel stops dispatch immediately: items that never
//! started stay Queued, in-flight items come back Cancelled.

use crate::error::ConvertError;
use crate::orchestrator::{ConversionRequest, ConversionResult, Orchestrator};
use crate::process::CancelFlag;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Anything that can turn a request into a result. The scheduler only needs
/// this seam; tests substitute a stub for the real orchestrator.
pub trait Convert: Sync {
    fn convert(&self, req: &ConversionRequest, cancel: &CancelFlag) -> ConversionResult;
}

impl Convert for Orchestrator {
    fn convert(&self, req: &ConversionRequest, cancel: &CancelFlag) -> ConversionResult {
        self.convert_one(req, cancel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    Converting,
    Completed,
    Failed,
    Cancelled,
    Unsupported,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ItemStatus::Queued | ItemStatus::Converting)
    }
}

/// One batch entry. Owned by the scheduler for the duration of a run;
/// callers observe it through the state-change callback and the final slice.
#[derive(Debug)]
pub struct QueueItem {
    pub id: usize,
    pub request: ConversionRequest,
    pub status: ItemStatus,
    started: Option<Instant>,
    finished_elapsed: Option<Duration>,
    pub output: Option<PathBuf>,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
}

impl QueueItem {
    pub fn new(id: usize, request: ConversionRequest) -> Self {
        Self {
            id,
            request,
            status: ItemStatus::Queued,
            started: None,
            finished_elapsed: None,
            output: None,
            error: None,
            error_kind: None,
        }
    }

    /// Elapsed time, live: available while the item is still converting,
    /// frozen once it reaches a terminal state.
    pub fn elapsed(&self) -> Option<Duration> {
        self.finished_elapsed
            .or_else(|| self.started.map(|s| s.elapsed()))
    }

    fn apply(&mut self, result: ConversionResult) {
        self.finished_elapsed = Some(result.elapsed);
        self.output = result.output;
        self.status = match &result.error {
            None => ItemStatus::Completed,
            Some(ConvertError::Cancelled) => ItemStatus::Cancelled,
            Some(ConvertError::UnsupportedInput { .. }) => ItemStatus::Unsupported,
            Some(_) => ItemStatus::Failed,
        };
        if let Some(err) = result.error {
            self.error_kind = Some(err.kind());
            self.error = Some(format!("{err:#}"));
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub unsupported: usize,
    pub queued: usize,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.completed == self.total
    }

    fn from_items(items: &[QueueItem]) -> Self {
        let mut s = BatchSummary {
            total: items.len(),
            ..Default::default()
        };
        for item in items {
            match item.status {
                ItemStatus::Completed => s.completed += 1,
                ItemStatus::Failed => s.failed += 1,
                ItemStatus::Cancelled => s.cancelled += 1,
                ItemStatus::Unsupported => s.unsupported += 1,
                ItemStatus::Queued | ItemStatus::Converting => s.queued += 1,
            }
        }
        s
    }
}

/// Run every item to a terminal state (or leave it Queued on cancel), with
/// at most `limit` conversions in flight. `on_change` fires once when an
/// item starts converting and once when it reaches its terminal state.
pub fn run_batch<C: Convert>(
    converter: &C,
    items: &mut [QueueItem],
    limit: usize,
    cancel: &CancelFlag,
    on_change: &(dyn Fn(&QueueItem) + Sync),
) -> BatchSummary {
    let limit = limit.max(1);
    let workers = limit.min(items.len());
    let cursor = AtomicUsize::new(0);
    let slots: Vec<Mutex<&mut QueueItem>> = items.iter_mut().map(Mutex::new).collect();

    std::thread::scope(|scope| {
        for worker in 0..workers {
            let cursor = &cursor;
            let slots = &slots;
            scope.spawn(move || {
                debug!("batch worker {worker} started");
                loop {
                    // Cancel gates dispatch: an item not yet claimed stays
                    // Queued forever once the flag is up.
                    if cancel.is_cancelled() {
                        break;
                    }
                    let idx = cursor.fetch_add(1, Ordering::SeqCst);
                    if idx >= slots.len() {
                        break;
                    }
                    let request = {
                        let mut item = slots[idx].lock().expect("queue item lock");
                        item.status = ItemStatus::Converting;
                        item.started = Some(Instant::now());
                        on_change(&item);
                        item.request.clone()
                    };
                    let result = converter.convert(&request, cancel);
                    {
                        let mut item = slots[idx].lock().expect("queue item lock");
                        item.apply(result);
                        on_change(&item);
                    }
                }
                debug!("batch worker {worker} done");
            });
        }
    });

    BatchSummary::from_items(items)
}
