use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use inkcache_core::model::{CategoryId, PRIORITY_MANUAL_TRIGGER, PRIORITY_USER_ACCESS};
use inkcache_core::{Book, BookId, Category, Chapter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;

pub fn router(state: ApiState) -> Router {
    let admin = Router::new()
        .route("/jobs/sync/:book_id", post(admin_sync_book))
        .route("/jobs/clear_history", post(admin_clear_history))
        .route("/jobs/force-resync/:book_id", post(admin_force_resync))
        .route("/jobs/stats", get(admin_job_stats))
        .route("/midnight-sync/stats", get(admin_midnight_stats))
        .route(
            "/midnight-sync/enqueue-unfinished",
            post(admin_midnight_enqueue_unfinished),
        )
        .route("/midnight-sync/trigger", post(admin_midnight_trigger))
        .route(
            "/midnight-sync/clear-completed",
            post(admin_midnight_clear_completed),
        )
        .route("/cache/clear", post(admin_cache_clear))
        .route("/init-sync", post(admin_init_sync));

    Router::new()
        .route("/health", get(health))
        .route("/categories", get(list_categories))
        .route("/categories/:category_id/books", get(list_books_in_category))
        .route("/books/:book_id", get(get_book))
        .route("/books/:book_id/chapters", get(get_chapter_list))
        .route("/books/:book_id/chapters/:chapter_key", get(get_chapter_content))
        .nest("/admin", admin)
        .with_state(state)
}

// -- response DTOs ------------------------------------------------------

#[derive(Serialize)]
struct CategoryDto {
    id: String,
    name: String,
    url: String,
}

impl From<Category> for CategoryDto {
    fn from(category: Category) -> Self {
        Self {
            id: category.category_id.as_str().to_string(),
            name: category.name,
            url: category.upstream_url,
        }
    }
}

#[derive(Serialize)]
struct BookSummaryDto {
    id: String,
    name: String,
    author: String,
    status: &'static str,
    last_chapter_number: i64,
}

impl From<Book> for BookSummaryDto {
    fn from(book: Book) -> Self {
        Self {
            id: book.book_id.as_str().to_string(),
            name: book.name,
            author: book.author,
            status: book.status.as_str(),
            last_chapter_number: book.last_chapter_number,
        }
    }
}

#[derive(Serialize)]
struct BookInfoDto {
    id: String,
    public_id: String,
    name: String,
    author: String,
    book_type: String,
    status: &'static str,
    update_date: Option<chrono::DateTime<chrono::Utc>>,
    description: String,
    bookmark_count: i64,
    view_count: i64,
    last_chapter_number: i64,
    last_chapter_title: Option<String>,
    last_chapter_url: Option<String>,
}

impl From<Book> for BookInfoDto {
    fn from(book: Book) -> Self {
        Self {
            id: book.book_id.as_str().to_string(),
            public_id: book.public_id.as_str().to_string(),
            name: book.name,
            author: book.author,
            book_type: book.book_type,
            status: book.status.as_str(),
            update_date: book.update_date,
            description: book.description,
            bookmark_count: book.bookmark_count,
            view_count: book.view_count,
            last_chapter_number: book.last_chapter_number,
            last_chapter_title: book.last_chapter_title,
            last_chapter_url: book.last_chapter_url,
        }
    }
}

#[derive(Serialize)]
struct ChapterRefDto {
    number: i64,
    title: String,
    url: String,
    id: Option<String>,
}

impl From<Chapter> for ChapterRefDto {
    fn from(chapter: Chapter) -> Self {
        Self {
            number: chapter.number,
            title: chapter.title,
            url: chapter.upstream_url,
            id: chapter.public_id.map(|p| p.as_str().to_string()),
        }
    }
}

#[derive(Serialize)]
struct ChapterListDto {
    chapters: Vec<ChapterRefDto>,
    #[serde(rename = "totalPages", skip_serializing_if = "Option::is_none")]
    total_pages: Option<u32>,
}

#[derive(Serialize)]
struct ChapterContentDto {
    book_id: String,
    chapter_num: i64,
    title: Option<String>,
    url: Option<String>,
    text: String,
    chapter_id: Option<String>,
}

// -- query params ---------------------------------------------------------

#[derive(Deserialize, Default)]
struct PageQuery {
    page: Option<u32>,
}

#[derive(Deserialize, Default)]
struct BooksInCategoryQuery {
    page: Option<u32>,
    bg_sync: Option<bool>,
}

#[derive(Deserialize, Default)]
struct ChapterListQuery {
    page: Option<u32>,
    all: Option<bool>,
}

#[derive(Deserialize, Default)]
struct ChapterContentQuery {
    nocache: Option<bool>,
}

#[derive(Deserialize, Default)]
struct PriorityQuery {
    priority: Option<i64>,
}

#[derive(Deserialize, Default)]
struct ClearCacheQuery {
    clear_cache: Option<bool>,
}

#[derive(Deserialize, Default)]
struct InitSyncQuery {
    categories_limit: Option<u32>,
    pages_per_category: Option<u32>,
}

// -- handlers -------------------------------------------------------------

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let (books_in_db, chapters_in_db) = state.cache.store().stats().unwrap_or((0, 0));
    let job_stats = state.jobs.stats().await;
    Json(json!({
        "status": "ok",
        "cache": {
            "books_in_db": books_in_db,
            "chapters_in_db": chapters_in_db,
            "memory_cache_size": state.cache.memory().entry_count(),
        },
        "jobs": {
            "pending": job_stats.queue_size,
            "active_ids": job_stats.active_ids.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
            "completed": job_stats.completed_count,
            "failed": job_stats.failed_count,
            "workers": job_stats.worker_count,
            "running": job_stats.running,
        },
    }))
}

async fn list_categories(State(state): State<ApiState>) -> ApiResult<Json<Vec<CategoryDto>>> {
    let categories = state.cache.get_categories().await?;
    Ok(Json(categories.into_iter().map(CategoryDto::from).collect()))
}

async fn list_books_in_category(
    State(state): State<ApiState>,
    Path(category_id): Path<String>,
    Query(query): Query<BooksInCategoryQuery>,
) -> ApiResult<Json<Vec<BookSummaryDto>>> {
    let category_id = CategoryId::from(category_id);
    let page = query.page.unwrap_or(1);
    let books = state.cache.list_books_in_category(&category_id, page).await?;

    if query.bg_sync.unwrap_or(true) {
        for book in &books {
            let jobs = state.jobs.clone();
            let book_id = book.book_id.clone();
            tokio::spawn(async move {
                if let Err(err) = jobs.enqueue(&book_id, PRIORITY_USER_ACCESS, true).await {
                    warn!(%book_id, error = %err, "background bg_sync enqueue failed");
                }
            });
        }
    }

    Ok(Json(books.into_iter().map(BookSummaryDto::from).collect()))
}

async fn get_book(State(state): State<ApiState>, Path(book_id): Path<String>) -> ApiResult<Json<BookInfoDto>> {
    let book_id = BookId::from(book_id);
    let book = state.cache.get_book_info(&book_id).await?;
    Ok(Json(BookInfoDto::from(book)))
}

async fn get_chapter_list(
    State(state): State<ApiState>,
    Path(book_id): Path<String>,
    Query(query): Query<ChapterListQuery>,
) -> ApiResult<Json<ChapterListDto>> {
    let book_id = BookId::from(book_id);
    let page = query.page.unwrap_or(1);
    let all = query.all.unwrap_or(false);
    let chapters = state.cache.get_chapter_list(&book_id, page, all).await?;
    let total_pages = if all {
        Some(((chapters.len() as u32).max(1) + CHAPTERS_PER_PAGE - 1) / CHAPTERS_PER_PAGE)
    } else {
        None
    };
    Ok(Json(ChapterListDto {
        chapters: chapters.into_iter().map(ChapterRefDto::from).collect(),
        total_pages,
    }))
}

const CHAPTERS_PER_PAGE: u32 = 50;

async fn get_chapter_content(
    State(state): State<ApiState>,
    Path((book_id, chapter_key)): Path<(String, String)>,
    Query(query): Query<ChapterContentQuery>,
) -> ApiResult<Json<ChapterContentDto>> {
    let book_id = BookId::from(book_id);
    let bypass = query.nocache.unwrap_or(false);
    let text = state
        .cache
        .get_chapter_content(&book_id, &chapter_key, bypass)
        .await?;

    let chapter_number: i64 = chapter_key.parse().unwrap_or(0);
    let chapter_ref = state.cache.store().get_chapter_ref(&book_id, chapter_number)?;

    Ok(Json(ChapterContentDto {
        book_id: book_id.as_str().to_string(),
        chapter_num: chapter_number,
        title: chapter_ref.as_ref().map(|c| c.title.clone()),
        url: chapter_ref.as_ref().map(|c| c.upstream_url.clone()),
        text,
        chapter_id: chapter_ref.and_then(|c| c.public_id).map(|id| id.as_str().to_string()),
    }))
}

// -- admin handlers ---------------------------------------------------------

async fn admin_sync_book(
    State(state): State<ApiState>,
    Path(book_id): Path<String>,
    Query(query): Query<PriorityQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let book_id = BookId::from(book_id);
    let priority = query.priority.unwrap_or(PRIORITY_USER_ACCESS);
    let job_id = state.jobs.enqueue(&book_id, priority, true).await.map_err(ApiError::from)?;
    Ok(Json(json!({ "job_id": job_id })))
}

async fn admin_clear_history(State(state): State<ApiState>) -> Json<serde_json::Value> {
    state.jobs.clear_history().await;
    Json(json!({ "status": "cleared" }))
}

async fn admin_force_resync(
    State(state): State<ApiState>,
    Path(book_id): Path<String>,
    Query(query): Query<ClearCacheQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let book_id = BookId::from(book_id);
    let clear_cache = query.clear_cache.unwrap_or(true);
    let outcome = state
        .jobs
        .force_resync(&book_id, PRIORITY_MANUAL_TRIGGER, clear_cache)
        .await?;

    // Matches the existing client contract: a conflicting force-resync
    // still responds 200 with an explanatory body rather than 409.
    let body = match outcome {
        inkcache_jobs::ForceResyncOutcome::Started(job_id) => json!({ "status": "started", "job_id": job_id }),
        inkcache_jobs::ForceResyncOutcome::AlreadySyncing => json!({ "status": "already_syncing" }),
    };
    Ok(Json(body))
}

async fn admin_job_stats(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let stats = state.jobs.stats().await;
    Json(json!({
        "queue_size": stats.queue_size,
        "active_ids": stats.active_ids.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
        "completed_count": stats.completed_count,
        "failed_count": stats.failed_count,
        "last_error": stats.last_error,
        "worker_count": stats.worker_count,
        "running": stats.running,
    }))
}

async fn admin_midnight_stats(State(state): State<ApiState>) -> ApiResult<Json<serde_json::Value>> {
    let stats = state.scheduler.stats().await?;
    Ok(Json(json!({
        "pending": stats.pending,
        "syncing": stats.syncing,
        "last_run_date": stats.last_run_date.map(|d| d.to_string()),
    })))
}

async fn admin_midnight_enqueue_unfinished(State(state): State<ApiState>) -> ApiResult<Json<serde_json::Value>> {
    let enqueued = state.scheduler.enqueue_unfinished_books().await?;
    Ok(Json(json!({ "enqueued": enqueued })))
}

async fn admin_midnight_trigger(State(state): State<ApiState>) -> ApiResult<Json<serde_json::Value>> {
    let stats = state.scheduler.trigger_now().await?;
    Ok(Json(json!({ "enqueued": stats.enqueued })))
}

async fn admin_midnight_clear_completed(State(state): State<ApiState>) -> ApiResult<Json<serde_json::Value>> {
    let removed = state.scheduler.clear_terminal().await?;
    Ok(Json(json!({ "removed": removed })))
}

async fn admin_cache_clear(State(state): State<ApiState>) -> ApiResult<Json<serde_json::Value>> {
    state.cache.clear_content_cache()?;
    Ok(Json(json!({ "status": "cleared" })))
}

async fn admin_init_sync(
    State(state): State<ApiState>,
    Query(query): Query<InitSyncQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let categories_limit = query.categories_limit.unwrap_or(5) as usize;
    let pages_per_category = query.pages_per_category.unwrap_or(1);

    let categories = state.cache.get_categories().await?;
    let mut books_enqueued = 0usize;
    for category in categories.into_iter().take(categories_limit) {
        for page in 1..=pages_per_category {
            let books = state
                .cache
                .list_books_in_category(&category.category_id, page)
                .await?;
            if books.is_empty() {
                break;
            }
            for book in books {
                let jobs: Arc<inkcache_jobs::JobEngine> = state.jobs.clone();
                let book_id = book.book_id.clone();
                tokio::spawn(async move {
                    if let Err(err) = jobs.enqueue(&book_id, PRIORITY_USER_ACCESS, true).await {
                        warn!(%book_id, error = %err, "init-sync enqueue failed");
                    }
                });
                books_enqueued += 1;
            }
        }
    }

    Ok(Json(json!({
        "status": "started",
        "categories_scanned": categories_limit,
        "books_enqueued": books_enqueued,
    })))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use inkcache_core::{
        AccessTracker, BookSyncer, Category, CategoryId, DurableStore, MemoryCache, PublicId,
        RateLimiter, ResponseParser, ScraperResponseParser, SystemClock, UpstreamFetcher,
    };
    use inkcache_jobs::{DeferredScheduler, JobEngine};
    use tower::ServiceExt; // for `oneshot`

    use super::*;

    fn test_state(tag: &str) -> (ApiState, DurableStore) {
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
        let cache = Arc::new(inkcache_core::CacheManager::new(store.clone(), memory, fetcher));
        let job_engine = Arc::new(JobEngine::new(
            cache.clone() as Arc<dyn BookSyncer>,
            Arc::new(SystemClock),
            1,
            Duration::from_millis(1),
        ));
        let scheduler = Arc::new(DeferredScheduler::new(
            store.clone(),
            job_engine.clone() as Arc<dyn inkcache_core::JobEnqueuer>,
            Arc::new(SystemClock),
            3,
            0,
            Duration::from_millis(1),
        ));
        cache.set_access_tracker(scheduler.clone() as Arc<dyn AccessTracker>);
        cache.set_job_enqueuer(Arc::new((*job_engine).clone()) as Arc<dyn inkcache_core::JobEnqueuer>);
        (ApiState::new(cache, job_engine, scheduler), store)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (state, _store) = test_state("routes-health");
        let app = router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_categories_returns_stored_categories() {
        let (state, store) = test_state("routes-categories");
        store
            .upsert_category(&Category {
                category_id: CategoryId::from("fantasy"),
                name: "Fantasy".to_string(),
                upstream_url: "https://example.test/fantasy".to_string(),
            })
            .unwrap();
        let app = router(state);

        let response = app
            .oneshot(Request::builder().uri("/categories").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let categories: Vec<CategoryDto> = serde_json::from_slice(&body).unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].name, "Fantasy");
    }

    #[tokio::test]
    async fn get_book_returns_stored_book_without_touching_upstream() {
        let (state, store) = test_state("routes-get-book");
        let mut book = Book::new_stub(BookId::from("b1"), PublicId::from("p1"));
        book.name = "Stored Title".to_string();
        store.upsert_book(&book).unwrap();
        let app = router(state);

        let response = app
            .oneshot(Request::builder().uri("/books/b1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let fetched: BookInfoDto = serde_json::from_slice(&body).unwrap();
        assert_eq!(fetched.name, "Stored Title");
    }

    #[tokio::test]
    async fn get_book_missing_returns_502_when_upstream_unreachable() {
        let (state, _store) = test_state("routes-get-book-missing");
        let app = router(state);

        let response = app
            .oneshot(Request::builder().uri("/books/does-not-exist").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn force_resync_reports_already_syncing_for_outstanding_job() {
        let (state, _store) = test_state("routes-force-resync");
        let jobs = state.jobs.clone();
        jobs.enqueue(&BookId::from("b1"), PRIORITY_USER_ACCESS, true).await.unwrap();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/jobs/force-resync/b1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "already_syncing");
    }

    #[tokio::test]
    async fn admin_cache_clear_succeeds_on_empty_store() {
        let (state, _store) = test_state("routes-cache-clear");
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/cache/clear")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
