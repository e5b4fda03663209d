use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inkcache_core::model::PRIORITY_MANUAL_TRIGGER;
use inkcache_core::{BookId, Clock, CoreError, CoreResult, Job, JobEnqueuer, JobState};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio_util::sync::CancellationToken;

/// Recent-completion dedup horizon: a successful sync within this window
/// suppresses re-enqueue even with `dedup=true`. Independent of the
/// scheduler's nightly cadence.
pub const RECENT_COMPLETION_HORIZON: Duration = Duration::from_secs(5 * 60);

/// Grace window workers get to finish their current job on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Outcome broadcast on every job completion so independent listeners (the
/// scheduler, in this workspace) can react without the engine depending on
/// them.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub book_id: BookId,
    pub job_id: u64,
    pub outcome: JobOutcome,
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Done,
    Failed(String),
}

#[derive(Debug, Clone, Default)]
pub struct JobStats {
    pub queue_size: usize,
    pub active_ids: Vec<BookId>,
    pub completed_count: u64,
    pub failed_count: u64,
    pub last_error: Option<String>,
    pub worker_count: usize,
    pub running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceResyncOutcome {
    Started(u64),
    AlreadySyncing,
}

struct QueuedJob {
    job_id: u64,
    book_id: BookId,
    priority: i64,
    sequence: u64,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueuedJob {}

/// Ordered by priority descending, then FIFO (lower sequence number wins
/// ties). The scheduler breaks its own ties by access_count desc then
/// accessed_at asc before handing off; at the engine level enqueue order is
/// the analogous tiebreak since priority is already resolved by the caller.
impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct EngineInner {
    syncer: Arc<dyn inkcache_core::BookSyncer>,
    clock: Arc<dyn Clock>,
    queue: Mutex<BinaryHeap<QueuedJob>>,
    notify: Notify,
    /// book_id -> job_id for every job that is queued or active; enforces
    /// at most one non-terminal job per book and backs dedup.
    book_to_job: Mutex<HashMap<BookId, u64>>,
    jobs: Mutex<HashMap<u64, Job>>,
    history: Mutex<VecDeque<u64>>,
    recent_completions: Mutex<HashMap<BookId, (DateTime<Utc>, u64)>>,
    next_job_id: AtomicU64,
    completed_count: AtomicU64,
    failed_count: AtomicU64,
    last_error: Mutex<Option<String>>,
    completions_tx: broadcast::Sender<JobCompletion>,
    worker_count: usize,
    rate_limit: Duration,
    running: AtomicBool,
    cancellation: CancellationToken,
}

const HISTORY_CAPACITY: usize = 500;

/// Priority queue + worker pool. Drained by `worker_count` fixed workers;
/// depends on `BookSyncer` rather than `CacheManager` directly so this
/// crate never needs to know about the read-through cache's full surface.
#[derive(Clone)]
pub struct JobEngine {
    inner: Arc<EngineInner>,
}

impl JobEngine {
    pub fn new(
        syncer: Arc<dyn inkcache_core::BookSyncer>,
        clock: Arc<dyn Clock>,
        worker_count: usize,
        rate_limit: Duration,
    ) -> Self {
        let (completions_tx, _) = broadcast::channel(256);
        let inner = Arc::new(EngineInner {
            syncer,
            clock,
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            book_to_job: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            recent_completions: Mutex::new(HashMap::new()),
            next_job_id: AtomicU64::new(1),
            completed_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            last_error: Mutex::new(None),
            completions_tx,
            worker_count: worker_count.max(1),
            rate_limit,
            running: AtomicBool::new(false),
            cancellation: CancellationToken::new(),
        });
        Self { inner }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobCompletion> {
        self.inner.completions_tx.subscribe()
    }

    /// Spawns the fixed worker pool. Each worker is independently
    /// supervised: a panic restarts it rather than shrinking the pool.
    pub fn spawn_workers(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        for worker_index in 0..self.inner.worker_count {
            let inner = self.inner.clone();
            tokio::spawn(supervise_worker(inner, worker_index));
        }
    }

    pub fn shutdown(&self) {
        self.inner.cancellation.cancel();
        self.inner.running.store(false, Ordering::SeqCst);
    }

    async fn enqueue_internal(&self, book_id: BookId, priority: i64, dedup: bool) -> CoreResult<u64> {
        if dedup {
            if let Some(existing) = self.inner.book_to_job.lock().await.get(&book_id).copied() {
                return Ok(existing);
            }
            let recent = self.inner.recent_completions.lock().await.get(&book_id).copied();
            if let Some((completed_at, job_id)) = recent {
                let age = self.inner.clock.now().signed_duration_since(completed_at);
                if age.to_std().map(|d| d < RECENT_COMPLETION_HORIZON).unwrap_or(true) {
                    return Ok(job_id);
                }
            }
        }

        let job_id = self.inner.next_job_id.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            job_id,
            book_id: book_id.clone(),
            priority,
            enqueued_at: self.inner.clock.now(),
            state: JobState::Queued,
            error: None,
        };
        self.inner.jobs.lock().await.insert(job_id, job);
        self.inner.book_to_job.lock().await.insert(book_id.clone(), job_id);

        let sequence = job_id;
        self.inner.queue.lock().await.push(QueuedJob {
            job_id,
            book_id,
            priority,
            sequence,
        });
        self.inner.notify.notify_one();
        Ok(job_id)
    }

    pub async fn enqueue(&self, book_id: &BookId, priority: i64, dedup: bool) -> CoreResult<u64> {
        self.enqueue_internal(book_id.clone(), priority, dedup).await
    }

    pub async fn force_resync(
        &self,
        book_id: &BookId,
        priority: i64,
        clear_cache: bool,
    ) -> CoreResult<ForceResyncOutcome> {
        if self.inner.book_to_job.lock().await.contains_key(book_id) {
            return Ok(ForceResyncOutcome::AlreadySyncing);
        }
        if clear_cache {
            self.inner.syncer.invalidate(book_id)?;
        }
        let priority = priority.max(PRIORITY_MANUAL_TRIGGER);
        let job_id = self.enqueue_internal(book_id.clone(), priority, false).await?;
        Ok(ForceResyncOutcome::Started(job_id))
    }

    pub async fn stats(&self) -> JobStats {
        let queue_size = self.inner.queue.lock().await.len();
        let active_ids = self
            .inner
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| job.state == JobState::Active)
            .map(|job| job.book_id.clone())
            .collect();
        JobStats {
            queue_size,
            active_ids,
            completed_count: self.inner.completed_count.load(Ordering::SeqCst),
            failed_count: self.inner.failed_count.load(Ordering::SeqCst),
            last_error: self.inner.last_error.lock().await.clone(),
            worker_count: self.inner.worker_count,
            running: self.inner.running.load(Ordering::SeqCst),
        }
    }

    pub async fn clear_history(&self) {
        let mut history = self.inner.history.lock().await;
        let mut jobs = self.inner.jobs.lock().await;
        for job_id in history.drain(..) {
            jobs.remove(&job_id);
        }
        self.inner.completed_count.store(0, Ordering::SeqCst);
        self.inner.failed_count.store(0, Ordering::SeqCst);
        *self.inner.last_error.lock().await = None;
    }
}

#[async_trait]
impl JobEnqueuer for JobEngine {
    async fn enqueue(&self, book_id: &BookId, priority: i64) -> CoreResult<u64> {
        JobEngine::enqueue(self, book_id, priority, true).await
    }
}

async fn supervise_worker(inner: Arc<EngineInner>, worker_index: usize) {
    loop {
        let handle = {
            let inner = inner.clone();
            tokio::spawn(async move { worker_loop(inner, worker_index).await })
        };
        match handle.await {
            Ok(()) => break,
            Err(join_err) => {
                tracing::error!(worker_index, error = %join_err, "job worker panicked, restarting");
                if inner.cancellation.is_cancelled() {
                    break;
                }
                continue;
            }
        }
    }
}

async fn worker_loop(inner: Arc<EngineInner>, worker_index: usize) {
    loop {
        let queued = tokio::select! {
            _ = inner.cancellation.cancelled() => None,
            queued = pop_next(&inner) => Some(queued),
        };
        let Some(queued) = queued else { break };

        if inner.cancellation.is_cancelled() {
            break;
        }

        let job_id = queued.job_id;
        tokio::select! {
            _ = run_job(&inner, queued, worker_index) => {}
            _ = async {
                inner.cancellation.cancelled().await;
                inner.clock.sleep(SHUTDOWN_GRACE).await;
            } => {
                tracing::warn!(worker_index, job_id, "job abandoned after shutdown grace window");
            }
        }

        tokio::select! {
            _ = inner.cancellation.cancelled() => break,
            _ = inner.clock.sleep(inner.rate_limit) => {}
        }
    }
}

async fn pop_next(inner: &Arc<EngineInner>) -> QueuedJob {
    loop {
        {
            let mut queue = inner.queue.lock().await;
            if let Some(job) = queue.pop() {
                return job;
            }
        }
        inner.notify.notified().await;
    }
}

async fn run_job(inner: &Arc<EngineInner>, queued: QueuedJob, worker_index: usize) {
    let QueuedJob { job_id, book_id, .. } = queued;

    if let Some(job) = inner.jobs.lock().await.get_mut(&job_id) {
        job.state = JobState::Active;
    }
    tracing::info!(worker_index, job_id, %book_id, "job started");

    let result = inner.syncer.sync_book(&book_id).await;
    let result = match result {
        Err(CoreError::StoreBusy(_)) => inner.syncer.sync_book(&book_id).await,
        other => other,
    };

    let outcome = match &result {
        Ok(()) => {
            inner.completed_count.fetch_add(1, Ordering::SeqCst);
            inner
                .recent_completions
                .lock()
                .await
                .insert(book_id.clone(), (inner.clock.now(), job_id));
            JobOutcome::Done
        }
        Err(err) => {
            inner.failed_count.fetch_add(1, Ordering::SeqCst);
            *inner.last_error.lock().await = Some(err.to_string());
            JobOutcome::Failed(err.to_string())
        }
    };

    if let Some(job) = inner.jobs.lock().await.get_mut(&job_id) {
        job.state = match &outcome {
            JobOutcome::Done => JobState::Done,
            JobOutcome::Failed(message) => {
                job.error = Some(message.clone());
                JobState::Failed
            }
        };
    }
    inner.book_to_job.lock().await.remove(&book_id);

    {
        let mut history = inner.history.lock().await;
        history.push_back(job_id);
        while history.len() > HISTORY_CAPACITY {
            if let Some(evicted) = history.pop_front() {
                inner.jobs.lock().await.remove(&evicted);
            }
        }
    }

    tracing::info!(worker_index, job_id, %book_id, outcome = ?outcome, "job finished");
    let _ = inner.completions_tx.send(JobCompletion {
        book_id,
        job_id,
        outcome,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkcache_core::SystemClock;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as TokioMutex;

    struct CountingSyncer {
        calls: AtomicUsize,
        fail_next: TokioMutex<bool>,
    }

    #[async_trait]
    impl inkcache_core::BookSyncer for CountingSyncer {
        async fn sync_book(&self, _book_id: &BookId) -> CoreResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut fail_next = self.fail_next.lock().await;
            if *fail_next {
                *fail_next = false;
                return Err(CoreError::UpstreamUnreachable("boom".to_string()));
            }
            Ok(())
        }

        fn invalidate(&self, _book_id: &BookId) -> CoreResult<()> {
            Ok(())
        }
    }

    fn engine_with(syncer: Arc<CountingSyncer>) -> JobEngine {
        JobEngine::new(syncer, Arc::new(SystemClock), 1, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn dedup_suppresses_reenqueue_while_job_outstanding() {
        let syncer = Arc::new(CountingSyncer {
            calls: AtomicUsize::new(0),
            fail_next: TokioMutex::new(false),
        });
        let engine = engine_with(syncer);
        let book_id = BookId::from("b1");

        let first = engine.enqueue(&book_id, 0, true).await.unwrap();
        let second = engine.enqueue(&book_id, 0, true).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn worker_runs_job_and_updates_stats() {
        let syncer = Arc::new(CountingSyncer {
            calls: AtomicUsize::new(0),
            fail_next: TokioMutex::new(false),
        });
        let engine = engine_with(syncer.clone());
        engine.spawn_workers();

        let book_id = BookId::from("b1");
        engine.enqueue(&book_id, 0, true).await.unwrap();

        for _ in 0..200 {
            if syncer.calls.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stats = engine.stats().await;
        assert_eq!(stats.completed_count, 1);
        assert!(stats.active_ids.is_empty());
        engine.shutdown();
    }

    #[tokio::test]
    async fn force_resync_reports_already_syncing_for_outstanding_job() {
        let syncer = Arc::new(CountingSyncer {
            calls: AtomicUsize::new(0),
            fail_next: TokioMutex::new(false),
        });
        let engine = engine_with(syncer);
        let book_id = BookId::from("b7");

        engine.enqueue(&book_id, 0, true).await.unwrap();
        let outcome = engine.force_resync(&book_id, 10, false).await.unwrap();
        assert_eq!(outcome, ForceResyncOutcome::AlreadySyncing);
    }

    /// The recent-completion dedup horizon suppresses re-enqueue right
    /// after a successful sync, but a later enqueue past the horizon must
    /// get a fresh job rather than returning the stale completed one.
    #[tokio::test]
    async fn dedup_expires_once_recent_completion_horizon_elapses() {
        let syncer = Arc::new(CountingSyncer {
            calls: AtomicUsize::new(0),
            fail_next: TokioMutex::new(false),
        });
        let clock = Arc::new(inkcache_core::ManualClock::new(Utc::now()));
        let engine = JobEngine::new(syncer.clone(), clock.clone(), 1, Duration::from_millis(1));
        engine.spawn_workers();
        let book_id = BookId::from("b9");

        let first = engine.enqueue(&book_id, 0, true).await.unwrap();
        for _ in 0..200 {
            if syncer.calls.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let within_horizon = engine.enqueue(&book_id, 0, true).await.unwrap();
        assert_eq!(within_horizon, first, "re-enqueue inside the horizon must return the completed job id");

        clock.advance(RECENT_COMPLETION_HORIZON + Duration::from_secs(1));
        let after_horizon = engine.enqueue(&book_id, 0, true).await.unwrap();
        assert_ne!(after_horizon, first, "re-enqueue past the horizon must start a fresh job");
        engine.shutdown();
    }
}
