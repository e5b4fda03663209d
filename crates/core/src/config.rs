use clap::Parser;

/// Every recognized configuration option, read from the environment (or CLI
/// flags) via `clap`'s `env` feature.
#[derive(Debug, Clone, Parser)]
#[command(name = "inkcached", about = "Novel-catalog cache and sync service")]
pub struct Config {
    /// Worker pool size for the background job engine.
    #[arg(long, env = "BG_JOB_WORKERS", default_value_t = 2)]
    pub bg_job_workers: usize,

    /// Seconds between consecutive job starts per worker.
    #[arg(long, env = "BG_JOB_RATE_LIMIT", default_value_t = 2)]
    pub bg_job_rate_limit_secs: u64,

    /// Nightly trigger hour (local time, 0-23).
    #[arg(long, env = "MIDNIGHT_SYNC_HOUR", default_value_t = 3)]
    pub midnight_sync_hour: u32,

    /// Nightly trigger minute (local time, 0-59).
    #[arg(long, env = "MIDNIGHT_SYNC_MINUTE", default_value_t = 0)]
    pub midnight_sync_minute: u32,

    /// Seconds between enqueues during the nightly sync pass.
    #[arg(long, env = "MIDNIGHT_SYNC_RATE_LIMIT", default_value_t = 5)]
    pub midnight_sync_rate_limit_secs: u64,

    /// MemoryCache default TTL, in seconds.
    #[arg(long, env = "CACHE_TTL_SECONDS", default_value_t = 60)]
    pub cache_ttl_seconds: u64,

    /// MemoryCache size ceiling, in entries.
    #[arg(long, env = "CACHE_MAX_ITEMS", default_value_t = 10_000)]
    pub cache_max_items: u64,

    /// Upstream origin, e.g. `https://example-catalog.test`.
    #[arg(long, env = "BASE_URL")]
    pub base_url: String,

    /// Durable-store (SQLite) file location.
    #[arg(long, env = "DB_PATH", default_value = "inkcache.db")]
    pub db_path: String,

    /// Comma-separated host bypass list for the blocked-page preflight check.
    #[arg(long, env = "NO_PROXY")]
    pub no_proxy: Option<String>,

    /// Host/port the HTTP server binds to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,
}

impl Config {
    pub fn cache_content_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_seconds * 5)
    }

    pub fn cache_default_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_seconds)
    }
}
