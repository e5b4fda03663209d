//! Process entry point: parses configuration, constructs the three-tier
//! cache core and background job engine, wires their cyclic dependencies
//! through the trait objects defined in `inkcache_core::traits`, and serves
//! the HTTP surface until shutdown.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use inkcache_api::ApiState;
use inkcache_core::{
    AccessTracker, BookSyncer, CacheManager, Config, DurableStore, JobEnqueuer, MemoryCache,
    RateLimiter, ResponseParser, ScraperResponseParser, SystemClock, UpstreamFetcher,
};
use inkcache_jobs::{DeferredScheduler, JobEngine};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::parse();

    let store = DurableStore::open(&config.db_path)
        .with_context(|| format!("failed to open durable store at {}", config.db_path))?;
    let memory = MemoryCache::new(
        config.cache_max_items,
        config.cache_default_ttl(),
        config.cache_content_ttl(),
    );
    let rate_limiter = Arc::new(RateLimiter::new(NonZeroU32::new(2).expect("nonzero")));
    let parser = Arc::new(ScraperResponseParser::default()) as Arc<dyn ResponseParser>;
    let fetcher = Arc::new(UpstreamFetcher::new(
        &config.base_url,
        rate_limiter,
        parser,
        config.no_proxy.as_deref(),
    )?);

    let cache = Arc::new(CacheManager::new(store.clone(), memory, fetcher));

    let job_engine = JobEngine::new(
        cache.clone() as Arc<dyn BookSyncer>,
        Arc::new(SystemClock),
        config.bg_job_workers,
        Duration::from_secs(config.bg_job_rate_limit_secs),
    );

    let scheduler = Arc::new(DeferredScheduler::new(
        store,
        Arc::new(job_engine.clone()) as Arc<dyn JobEnqueuer>,
        Arc::new(SystemClock),
        config.midnight_sync_hour,
        config.midnight_sync_minute,
        Duration::from_secs(config.midnight_sync_rate_limit_secs),
    ));

    cache.set_access_tracker(scheduler.clone() as Arc<dyn AccessTracker>);
    cache.set_job_enqueuer(Arc::new(job_engine.clone()) as Arc<dyn JobEnqueuer>);

    job_engine.spawn_workers();
    scheduler.clone().spawn_nightly_loop();
    scheduler.clone().spawn_completion_listener(job_engine.subscribe());

    let job_engine = Arc::new(job_engine);
    let job_engine_for_shutdown = job_engine.clone();
    let scheduler_for_shutdown = scheduler.clone();

    let state = ApiState::new(cache, job_engine, scheduler);
    let app = inkcache_api::app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "inkcached listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received, draining in-flight jobs");
            job_engine_for_shutdown.shutdown();
            scheduler_for_shutdown.shutdown();
        })
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
