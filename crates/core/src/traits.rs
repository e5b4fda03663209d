use async_trait::async_trait;

use crate::error::CoreResult;
use crate::model::BookId;

/// Satisfied by the scheduler. Breaks the CacheManager -> scheduler cycle:
/// CacheManager records access without depending on the scheduler's
/// concrete type or its own dependency on the job engine.
#[async_trait]
pub trait AccessTracker: Send + Sync {
    async fn track_access(&self, book_id: &BookId) -> CoreResult<()>;
}

/// Satisfied by `CacheManager`. Breaks the JobEngine -> cache-manager cycle:
/// the job engine's worker loop only needs "refresh this book's metadata
/// and chapter list, reconciling `last_chapter_number` upward," and the
/// narrow ability to drop a book's cached state for force-resync, not the
/// rest of CacheManager's read-through surface.
#[async_trait]
pub trait BookSyncer: Send + Sync {
    async fn sync_book(&self, book_id: &BookId) -> CoreResult<()>;

    /// Drops memory+store rows for `book_id`. Used by `force_resync`'s
    /// `clear_cache=true` path ahead of re-enqueueing.
    fn invalidate(&self, book_id: &BookId) -> CoreResult<()>;
}

/// Satisfied by `JobEngine`. Breaks the DeferredScheduler -> job-engine
/// cycle: the scheduler's sync pass only needs to enqueue a book at a given
/// priority, not the rest of JobEngine's stats/history surface.
#[async_trait]
pub trait JobEnqueuer: Send + Sync {
    async fn enqueue(&self, book_id: &BookId, priority: i64) -> CoreResult<u64>;
}
