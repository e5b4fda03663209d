use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use inkcache_core::model::{PRIORITY_NIGHTLY, PRIORITY_USER_ACCESS};
use inkcache_core::{AccessTracker, BookId, Clock, CoreResult, DurableStore, JobEnqueuer, QueueStatus, SyncQueueEntry};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::{JobCompletion, JobOutcome};

#[derive(Debug, Clone, Default)]
pub struct SyncPassStats {
    pub enqueued: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub pending: usize,
    pub syncing: usize,
    pub last_run_date: Option<NaiveDate>,
}

/// Owns the durable `SyncQueueEntry` table end to end. Depends on
/// `JobEnqueuer` rather than the concrete `JobEngine`, breaking the
/// scheduler <-> job-engine cycle.
pub struct DeferredScheduler {
    store: DurableStore,
    enqueuer: Arc<dyn JobEnqueuer>,
    clock: Arc<dyn Clock>,
    trigger_hour: u32,
    trigger_minute: u32,
    rate_limit: Duration,
    last_run_date: Mutex<Option<NaiveDate>>,
    cancellation: CancellationToken,
}

impl DeferredScheduler {
    pub fn new(
        store: DurableStore,
        enqueuer: Arc<dyn JobEnqueuer>,
        clock: Arc<dyn Clock>,
        trigger_hour: u32,
        trigger_minute: u32,
        rate_limit: Duration,
    ) -> Self {
        Self {
            store,
            enqueuer,
            clock,
            trigger_hour,
            trigger_minute,
            rate_limit,
            last_run_date: Mutex::new(None),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }

    /// Upserts a `pending` entry at priority 1 for every non-completed
    /// book, resetting terminal entries back to pending rather than
    /// duplicating rows.
    pub async fn enqueue_unfinished_books(&self) -> CoreResult<usize> {
        let unfinished = self.store.list_unfinished_books()?;
        let now = self.clock.now();
        let mut enqueued = 0usize;
        for book in unfinished {
            let entry = match self.store.queue_get(&book.book_id)? {
                Some(mut existing) => {
                    if existing.status.is_terminal() {
                        existing.status = QueueStatus::Pending;
                    }
                    existing
                }
                None => SyncQueueEntry {
                    book_id: book.book_id.clone(),
                    added_at: now,
                    accessed_at: now,
                    access_count: 0,
                    priority: PRIORITY_NIGHTLY,
                    last_attempt: None,
                    status: QueueStatus::Pending,
                },
            };
            self.store.queue_upsert(&entry)?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// Runs one full sync pass: enqueues unfinished books, then drains
    /// every pending entry at the scheduler's slow, interruptible pace.
    /// Marking entries completed/failed is handled asynchronously by
    /// `spawn_completion_listener` rather than here, since job completion
    /// can race the next entry's enqueue.
    pub async fn run_sync_pass(&self) -> CoreResult<SyncPassStats> {
        self.enqueue_unfinished_books().await?;
        let pending = self.store.queue_pending()?;
        let mut stats = SyncPassStats::default();

        for (index, entry) in pending.iter().enumerate() {
            if self.cancellation.is_cancelled() {
                info!(enqueued = stats.enqueued, "sync pass interrupted between entries");
                break;
            }
            self.store.queue_update_status(&entry.book_id, QueueStatus::Syncing)?;
            if let Err(err) = self.enqueuer.enqueue(&entry.book_id, entry.priority).await {
                warn!(book_id = %entry.book_id, error = %err, "failed to enqueue sync-queue entry");
                self.store.queue_update_status(&entry.book_id, QueueStatus::Failed)?;
                continue;
            }
            stats.enqueued += 1;

            if index + 1 < pending.len() {
                self.clock.sleep(self.rate_limit).await;
            }
        }
        Ok(stats)
    }

    pub async fn clear_terminal(&self) -> CoreResult<usize> {
        self.store.queue_clear_terminal()
    }

    pub async fn stats(&self) -> CoreResult<SchedulerStats> {
        let pending = self.store.queue_pending()?.len();
        let syncing = self
            .store
            .list_unfinished_books()?
            .iter()
            .filter_map(|book| self.store.queue_get(&book.book_id).ok().flatten())
            .filter(|entry| entry.status == QueueStatus::Syncing)
            .count();
        Ok(SchedulerStats {
            pending,
            syncing,
            last_run_date: *self.last_run_date.lock().await,
        })
    }

    /// Checks whether today's nightly trigger time (local wall clock) has
    /// been reached and the pass hasn't already run today; if so, runs it
    /// and records today's date. Exposed separately from the polling loop
    /// so the trigger condition is unit-testable without a real minute-long
    /// wait.
    pub async fn maybe_run_nightly(&self, local_now: chrono::DateTime<Local>) -> CoreResult<bool> {
        let today = local_now.date_naive();
        let already_ran_today = *self.last_run_date.lock().await == Some(today);
        let past_trigger = local_now.time()
            >= chrono::NaiveTime::from_hms_opt(self.trigger_hour, self.trigger_minute, 0)
                .unwrap_or_default();

        if already_ran_today || !past_trigger {
            return Ok(false);
        }

        info!(hour = self.trigger_hour, minute = self.trigger_minute, "running nightly sync pass");
        self.run_sync_pass().await?;
        *self.last_run_date.lock().await = Some(today);
        Ok(true)
    }

    /// Manual trigger for `/admin/midnight-sync/trigger`: runs the pass
    /// immediately regardless of wall-clock time, without disturbing the
    /// nightly loop's own `last_run_date` bookkeeping.
    pub async fn trigger_now(&self) -> CoreResult<SyncPassStats> {
        self.run_sync_pass().await
    }

    /// Background task: wakes once a minute, compares wall-clock to the
    /// configured trigger time, and runs the sync pass once per day.
    pub fn spawn_nightly_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.cancellation.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                }
                if let Err(err) = self.maybe_run_nightly(Local::now()).await {
                    warn!(error = %err, "nightly sync pass failed");
                }
            }
        });
    }

    /// Background task: listens for job completions and mutates the owning
    /// queue entry's terminal status. Runs independently of `run_sync_pass`
    /// so a slow or cancelled pass never blocks completion bookkeeping for
    /// jobs it already enqueued.
    pub fn spawn_completion_listener(self: Arc<Self>, mut completions: tokio::sync::broadcast::Receiver<JobCompletion>) {
        tokio::spawn(async move {
            loop {
                let completion = tokio::select! {
                    _ = self.cancellation.cancelled() => break,
                    completion = completions.recv() => completion,
                };
                match completion {
                    Ok(JobCompletion { book_id, outcome, .. }) => {
                        let status = match outcome {
                            JobOutcome::Done => QueueStatus::Completed,
                            JobOutcome::Failed(_) => QueueStatus::Failed,
                        };
                        if let Err(err) = self.store.queue_update_status(&book_id, status) {
                            warn!(%book_id, error = %err, "failed to record sync-queue completion");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "scheduler completion listener lagged behind job engine");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

#[async_trait]
impl AccessTracker for DeferredScheduler {
    /// Idempotent upsert: first access inserts at priority 0 with
    /// `access_count=1`; subsequent accesses increment the count and reset
    /// a terminal entry back to pending so a previously-synced book is
    /// picked up again on renewed interest.
    async fn track_access(&self, book_id: &BookId) -> CoreResult<()> {
        let now = self.clock.now();
        let entry = match self.store.queue_get(book_id)? {
            Some(mut existing) => {
                existing.access_count += 1;
                existing.accessed_at = now;
                if existing.status.is_terminal() {
                    existing.status = QueueStatus::Pending;
                }
                existing
            }
            None => SyncQueueEntry {
                book_id: book_id.clone(),
                added_at: now,
                accessed_at: now,
                access_count: 1,
                priority: PRIORITY_USER_ACCESS,
                last_attempt: None,
                status: QueueStatus::Pending,
            },
        };
        self.store.queue_upsert(&entry)
    }
}
