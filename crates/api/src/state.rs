use std::sync::Arc;

use inkcache_core::CacheManager;
use inkcache_jobs::{DeferredScheduler, JobEngine};

/// The owned component graph handed to every axum handler, constructed
/// once at startup in `bin/inkcached`: no global statics, just `Clone`
/// handles to `Arc`-owned components threaded through
/// `axum::extract::State`.
#[derive(Clone)]
pub struct ApiState {
    pub cache: Arc<CacheManager>,
    pub jobs: Arc<JobEngine>,
    pub scheduler: Arc<DeferredScheduler>,
}

impl ApiState {
    pub fn new(cache: Arc<CacheManager>, jobs: Arc<JobEngine>, scheduler: Arc<DeferredScheduler>) -> Self {
        Self { cache, jobs, scheduler }
    }
}
