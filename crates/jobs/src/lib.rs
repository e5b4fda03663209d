//! Priority worker pool (`JobEngine`) and deferred, persistent scheduler
//! (`DeferredScheduler`) that keep `inkcache-core`'s cache fresh in the
//! background. Neither component depends on the other's concrete type;
//! they're wired together through the `BookSyncer`/`JobEnqueuer` interfaces
//! defined in `inkcache-core::traits`.

pub mod engine;
pub mod scheduler;

pub use engine::{ForceResyncOutcome, JobCompletion, JobEngine, JobOutcome, JobStats};
pub use scheduler::{DeferredScheduler, SchedulerStats, SyncPassStats};
