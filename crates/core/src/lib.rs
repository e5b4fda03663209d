//! Three-tier read-through cache core: memory cache, durable store, and
//! upstream scraper, composed by `CacheManager`. Everything here is
//! framework-agnostic; `inkcache-jobs` builds the background sync engine on
//! top of it and `inkcache-api` exposes it over HTTP.

pub mod cache_manager;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod memory_cache;
pub mod model;
pub mod parser;
pub mod rate_limiter;
pub mod reconciliation;
pub mod singleflight;
pub mod store;
pub mod traits;

pub use cache_manager::CacheManager;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use fetcher::UpstreamFetcher;
pub use memory_cache::MemoryCache;
pub use model::{
    Book, BookId, BookStatus, Category, CategoryId, Chapter, ChapterContent, Job, JobState,
    PublicId, QueueStatus, SyncQueueEntry,
};
pub use parser::{ResponseParser, ScraperResponseParser, SelectorSet};
pub use rate_limiter::RateLimiter;
pub use singleflight::SingleflightGate;
pub use store::DurableStore;
pub use traits::{AccessTracker, BookSyncer, JobEnqueuer};
