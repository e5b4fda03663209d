use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{CoreError, CoreResult};
use crate::fetcher::UpstreamFetcher;
use crate::memory_cache::MemoryCache;
use crate::model::{Book, BookId, Category, CategoryId, Chapter, ChapterContent, PRIORITY_USER_ACCESS};
use crate::reconciliation;
use crate::singleflight::SingleflightGate;
use crate::store::DurableStore;
use crate::traits::{AccessTracker, BookSyncer, JobEnqueuer};

const CHAPTER_PAGE_SIZE: usize = 50;
const MAX_CHAPTER_PAGES: u32 = 500;

/// Composes MemoryCache, DurableStore, and UpstreamFetcher behind a
/// three-tier read-through algorithm. Depends on `AccessTracker` rather
/// than the scheduler directly; the concrete tracker is wired in once at
/// process startup via `set_access_tracker`.
pub struct CacheManager {
    store: DurableStore,
    memory: MemoryCache,
    fetcher: Arc<UpstreamFetcher>,
    sf_categories: SingleflightGate<Vec<Category>>,
    sf_book: SingleflightGate<Book>,
    sf_chapters: SingleflightGate<Vec<Chapter>>,
    sf_content: SingleflightGate<String>,
    access_tracker: OnceLock<Arc<dyn AccessTracker>>,
    job_enqueuer: OnceLock<Arc<dyn JobEnqueuer>>,
}

impl CacheManager {
    pub fn new(store: DurableStore, memory: MemoryCache, fetcher: Arc<UpstreamFetcher>) -> Self {
        Self {
            store,
            memory,
            fetcher,
            sf_categories: SingleflightGate::new(),
            sf_book: SingleflightGate::new(),
            sf_chapters: SingleflightGate::new(),
            sf_content: SingleflightGate::new(),
            access_tracker: OnceLock::new(),
            job_enqueuer: OnceLock::new(),
        }
    }

    /// Wired once at startup after the scheduler exists; a no-op if called
    /// twice (first writer wins).
    pub fn set_access_tracker(&self, tracker: Arc<dyn AccessTracker>) {
        let _ = self.access_tracker.set(tracker);
    }

    /// Wired once at startup after the job engine exists; backs
    /// `get_book_info`'s background `SyncBook(id, priority=0)` trigger.
    /// A no-op if called twice (first writer wins), same as
    /// `set_access_tracker`.
    pub fn set_job_enqueuer(&self, enqueuer: Arc<dyn JobEnqueuer>) {
        let _ = self.job_enqueuer.set(enqueuer);
    }

    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub async fn get_categories(&self) -> CoreResult<Vec<Category>> {
        let key = MemoryCache::categories_key();
        if let Some(cached) = self.memory.get::<Vec<Category>>(&key) {
            return Ok(cached);
        }
        let stored = self.store.list_categories()?;
        if !stored.is_empty() {
            self.memory.put(&key, &stored);
            return Ok(stored);
        }

        let fetcher = self.fetcher.clone();
        let fetched = self
            .sf_categories
            .run(&key, move || async move { fetcher.fetch_categories().await })
            .await;
        match fetched {
            Ok(categories) => {
                for category in &categories {
                    self.store.upsert_category(category)?;
                }
                self.memory.put(&key, &categories);
                Ok(categories)
            }
            Err(err) => {
                let stored = self.store.list_categories()?;
                if stored.is_empty() {
                    Err(err)
                } else {
                    Ok(stored)
                }
            }
        }
    }

    pub async fn list_books_in_category(
        &self,
        category_id: &CategoryId,
        page: u32,
    ) -> CoreResult<Vec<Book>> {
        let key = MemoryCache::category_page_key(category_id.as_str(), page);
        if let Some(cached) = self.memory.get::<Vec<Book>>(&key) {
            return Ok(cached);
        }
        let books = self.store.list_books_in_category(category_id, page)?;
        self.memory.put(&key, &books);
        Ok(books)
    }

    pub async fn get_book_info(&self, book_id: &BookId) -> CoreResult<Book> {
        if let Some(tracker) = self.access_tracker.get() {
            if let Err(err) = tracker.track_access(book_id).await {
                tracing::warn!(%book_id, error = %err, "access tracking failed");
            }
        }
        // Triggers a background SyncBook(id, priority=0) on read to refresh
        // metadata without blocking the caller. Dedup'd by the job engine
        // itself, so a hot book being read repeatedly doesn't pile up
        // redundant jobs.
        if let Some(enqueuer) = self.job_enqueuer.get() {
            if let Err(err) = enqueuer.enqueue(book_id, PRIORITY_USER_ACCESS).await {
                tracing::warn!(%book_id, error = %err, "background sync enqueue on read failed");
            }
        }

        let key = MemoryCache::book_key(book_id.as_str());
        if let Some(cached) = self.memory.get::<Book>(&key) {
            return Ok(cached);
        }
        if let Some(stored) = self.store.get_book(book_id)? {
            self.memory.put(&key, &stored);
            return Ok(stored);
        }

        let fetcher = self.fetcher.clone();
        let fetch_id = book_id.clone();
        let fetched = self
            .sf_book
            .run(&key, move || async move { fetcher.fetch_book_info(fetch_id.as_str()).await })
            .await;
        match fetched {
            Ok(book) => {
                self.store.upsert_book(&book)?;
                self.memory.put(&key, &book);
                Ok(book)
            }
            Err(err) => match self.store.get_book(book_id)? {
                Some(stored) => Ok(stored),
                None => Err(err),
            },
        }
    }

    /// Two-phase read: phase 1 resolves the requested page window
    /// synchronously (served from store/cache or, on a cold book, a direct
    /// upstream page fetch); phase 2, refreshing the rest of the chapter
    /// list and reconciling `last_chapter_number`, runs detached so it
    /// never blocks the caller. `all=true` instead resolves (and blocks on)
    /// the complete list.
    pub async fn get_chapter_list(
        self: &Arc<Self>,
        book_id: &BookId,
        page: u32,
        all: bool,
    ) -> CoreResult<Vec<Chapter>> {
        if all {
            return self.get_full_chapter_list(book_id).await;
        }

        let page = page.max(1);
        let key = MemoryCache::chapters_page_key(book_id.as_str(), page);
        if let Some(cached) = self.memory.get::<Vec<Chapter>>(&key) {
            return Ok(cached);
        }

        let stored_all = self.store.list_chapters(book_id)?;
        if !stored_all.is_empty() {
            let windowed = window_for_page(&stored_all, page);
            self.memory.put(&key, &windowed);
            self.spawn_background_full_refresh(book_id.clone());
            return Ok(windowed);
        }

        let fetcher = self.fetcher.clone();
        let fetch_id = book_id.clone();
        let fetched = self
            .sf_chapters
            .run(&key, move || async move {
                fetcher.fetch_chapter_list_page(fetch_id.as_str(), page).await
            })
            .await;

        match fetched {
            Ok(mut chapters) => {
                chapters.sort_by_key(|c| c.number);
                self.store.upsert_chapters_batch(&chapters)?;
                self.memory.put(&key, &chapters);
                self.spawn_background_full_refresh(book_id.clone());
                Ok(chapters)
            }
            Err(err) => {
                let stored = self.store.list_chapters(book_id)?;
                if stored.is_empty() {
                    Err(err)
                } else {
                    Ok(window_for_page(&stored, page))
                }
            }
        }
    }

    async fn get_full_chapter_list(&self, book_id: &BookId) -> CoreResult<Vec<Chapter>> {
        let all_key = MemoryCache::chapters_page_key(book_id.as_str(), 0);
        if let Some(cached) = self.memory.get::<Vec<Chapter>>(&all_key) {
            return Ok(cached);
        }
        let stored = self.store.list_chapters(book_id)?;
        if !stored.is_empty() {
            self.memory.put(&all_key, &stored);
            return Ok(stored);
        }
        self.fetch_and_reconcile_full_list(book_id).await
    }

    /// Phase 2 of the two-phase read, and also the chapter-list half of
    /// `BookSyncer::sync_book`: fetches every remaining page, reconciles
    /// `last_chapter_number` upward (never down), and persists.
    async fn fetch_and_reconcile_full_list(&self, book_id: &BookId) -> CoreResult<Vec<Chapter>> {
        let key = format!("chapters:{}:all", book_id.as_str());
        let fetcher = self.fetcher.clone();
        let fetch_id = book_id.clone();
        let fetched = self
            .sf_chapters
            .run(&key, move || async move { fetch_all_pages(&fetcher, fetch_id.as_str()).await })
            .await;

        match fetched {
            Ok(mut chapters) => {
                chapters.sort_by_key(|c| c.number);
                self.store.upsert_chapters_batch(&chapters)?;
                if let Some(book) = self.store.get_book(book_id)? {
                    let reconciled = reconciliation::reconcile(&book, &chapters);
                    if reconciled.advanced {
                        self.store.upsert_book(&reconciled.book)?;
                        self.memory.invalidate(&MemoryCache::book_key(book_id.as_str()));
                    }
                }
                self.memory
                    .put(&MemoryCache::chapters_page_key(book_id.as_str(), 0), &chapters);
                Ok(chapters)
            }
            Err(err) => {
                let stored = self.store.list_chapters(book_id)?;
                if stored.is_empty() {
                    Err(err)
                } else {
                    Ok(stored)
                }
            }
        }
    }

    fn spawn_background_full_refresh(self: &Arc<Self>, book_id: BookId) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = manager.fetch_and_reconcile_full_list(&book_id).await {
                tracing::warn!(%book_id, error = %err, "background chapter-list refresh (phase 2) failed");
            }
        });
    }

    pub async fn get_chapter_content(
        &self,
        book_id: &BookId,
        chapter_key: &str,
        bypass_cache: bool,
    ) -> CoreResult<String> {
        let key = MemoryCache::content_key(book_id.as_str(), chapter_key);
        if !bypass_cache {
            if let Some(cached) = self.memory.get::<String>(&key) {
                return Ok(cached);
            }
            if let Some(stored) = self.store.get_content(book_id, chapter_key)? {
                self.memory.put_content(&key, &stored.text);
                return Ok(stored.text);
            }
        }

        let fetcher = self.fetcher.clone();
        let fetch_id = book_id.clone();
        let fetch_key = chapter_key.to_string();
        let fetched = self
            .sf_content
            .run(&key, move || async move {
                fetcher.fetch_chapter_content(fetch_id.as_str(), &fetch_key).await
            })
            .await;

        match fetched {
            Ok(text) => {
                let content = ChapterContent {
                    book_id: book_id.clone(),
                    chapter_key: chapter_key.to_string(),
                    text: text.clone(),
                    fetched_at: Utc::now(),
                };
                self.store.upsert_content(&content)?;
                self.memory.put_content(&key, &text);
                Ok(text)
            }
            Err(err) => {
                if !bypass_cache {
                    if let Some(stored) = self.store.get_content(book_id, chapter_key)? {
                        return Ok(stored.text);
                    }
                }
                Err(err)
            }
        }
    }

    pub fn invalidate_book(&self, book_id: &BookId) -> CoreResult<()> {
        self.store.delete_book_chapters_and_content(book_id)?;
        self.memory.invalidate(&format!("book:{}", book_id.as_str()));
        self.memory.invalidate(&format!("chapters:{}", book_id.as_str()));
        self.memory.invalidate(&format!("content:{}", book_id.as_str()));
        Ok(())
    }

    pub fn clear_content_cache(&self) -> CoreResult<()> {
        self.store.clear_content()?;
        self.memory.invalidate("content:");
        Ok(())
    }
}

#[async_trait]
impl BookSyncer for CacheManager {
    async fn sync_book(&self, book_id: &BookId) -> CoreResult<()> {
        let book = self.fetcher.fetch_book_info(book_id.as_str()).await?;
        self.store.upsert_book(&book)?;
        self.memory.invalidate(&MemoryCache::book_key(book_id.as_str()));
        self.fetch_and_reconcile_full_list(book_id).await?;
        Ok(())
    }

    fn invalidate(&self, book_id: &BookId) -> CoreResult<()> {
        CacheManager::invalidate_book(self, book_id)
    }
}

fn window_for_page(chapters: &[Chapter], page: u32) -> Vec<Chapter> {
    let start = (page.saturating_sub(1) as usize) * CHAPTER_PAGE_SIZE;
    chapters.iter().skip(start).take(CHAPTER_PAGE_SIZE).cloned().collect()
}

async fn fetch_all_pages(fetcher: &UpstreamFetcher, book_id: &str) -> CoreResult<Vec<Chapter>> {
    let mut all = Vec::new();
    for page in 1..=MAX_CHAPTER_PAGES {
        match fetcher.fetch_chapter_list_page(book_id, page).await {
            Ok(chapters) if chapters.is_empty() => break,
            Ok(chapters) => all.extend(chapters),
            Err(CoreError::UpstreamInvalid(_)) if page > 1 => break,
            Err(err) => return Err(err),
        }
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PublicId;
    use crate::parser::{ResponseParser, ScraperResponseParser};
    use crate::rate_limiter::RateLimiter;
    use std::time::Duration;

    fn manager(tag: &str) -> Arc<CacheManager> {
        let store = DurableStore::open_in_memory(tag).unwrap();
        let memory = MemoryCache::new(1000, Duration::from_secs(60), Duration::from_secs(300));
        let fetcher = Arc::new(
            UpstreamFetcher::new(
                "https://example.test",
                Arc::new(RateLimiter::default()),
                Arc::new(ScraperResponseParser::default()) as Arc<dyn ResponseParser>,
                None,
            )
            .unwrap(),
        );
        Arc::new(CacheManager::new(store, memory, fetcher))
    }

    #[tokio::test]
    async fn get_book_info_returns_store_value_without_upstream_when_present() {
        let manager = manager("book-info-store-hit");
        let mut book = Book::new_stub(BookId::from("b1"), PublicId::from("p1"));
        book.name = "Stored Title".to_string();
        manager.store().upsert_book(&book).unwrap();

        let fetched = manager.get_book_info(&BookId::from("b1")).await.unwrap();
        assert_eq!(fetched.name, "Stored Title");
    }

    struct RecordingEnqueuer {
        calls: tokio::sync::Mutex<Vec<(BookId, i64)>>,
    }

    #[async_trait]
    impl crate::traits::JobEnqueuer for RecordingEnqueuer {
        async fn enqueue(&self, book_id: &BookId, priority: i64) -> CoreResult<u64> {
            self.calls.lock().await.push((book_id.clone(), priority));
            Ok(1)
        }
    }

    /// A `get_book_info` read triggers a background
    /// `SyncBook(id, priority=0)` through the wired `JobEnqueuer`, distinct
    /// from (and in addition to) access tracking.
    #[tokio::test]
    async fn get_book_info_triggers_background_sync_via_job_enqueuer() {
        let manager = manager("book-info-job-enqueue");
        let enqueuer = Arc::new(RecordingEnqueuer { calls: tokio::sync::Mutex::new(Vec::new()) });
        manager.set_job_enqueuer(enqueuer.clone() as Arc<dyn crate::traits::JobEnqueuer>);

        let mut book = Book::new_stub(BookId::from("b1"), PublicId::from("p1"));
        book.name = "Stored Title".to_string();
        manager.store().upsert_book(&book).unwrap();

        manager.get_book_info(&BookId::from("b1")).await.unwrap();

        let calls = enqueuer.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (BookId::from("b1"), crate::model::PRIORITY_USER_ACCESS));
    }

    #[tokio::test]
    async fn invalidate_book_clears_chapters_and_content() {
        let manager = manager("invalidate-book");
        let book_id = BookId::from("b1");
        let chapters = vec![Chapter {
            book_id: book_id.clone(),
            number: 1,
            title: "Ch1".to_string(),
            upstream_url: "https://example.test/1".to_string(),
            public_id: None,
        }];
        manager.store().upsert_chapters_batch(&chapters).unwrap();
        manager.invalidate_book(&book_id).unwrap();

        let remaining = manager.store().list_chapters(&book_id).unwrap();
        assert!(remaining.is_empty());
    }
}
