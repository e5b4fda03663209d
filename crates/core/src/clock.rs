use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Abstract time source. Every wall-clock read and every sleep in the core
/// goes through this trait so the scheduler and rate limiter can be driven
/// deterministically under test with a virtual clock.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: std::time::Duration) -> futures::future::BoxFuture<'static, ()>;
}

/// Production clock backed by the system wall clock and `tokio::time::sleep`.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: std::time::Duration) -> futures::future::BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Deterministic clock for tests: `now()` advances only when told to, and
/// `sleep` resolves immediately but records how long it was asked to wait so
/// assertions about minimum inter-enqueue spacing can be made without real
/// wall-clock delay.
#[derive(Clone)]
pub struct ManualClock {
    millis_since_epoch: Arc<AtomicI64>,
    sleeps: Arc<std::sync::Mutex<Vec<std::time::Duration>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis_since_epoch: Arc::new(AtomicI64::new(start.timestamp_millis())),
            sleeps: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn advance(&self, duration: std::time::Duration) {
        self.millis_since_epoch
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn recorded_sleeps(&self) -> Vec<std::time::Duration> {
        self.sleeps.lock().expect("lock poisoned").clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis_since_epoch.load(Ordering::SeqCst))
            .unwrap_or_else(Utc::now)
    }

    fn sleep(&self, duration: std::time::Duration) -> futures::future::BoxFuture<'static, ()> {
        self.sleeps.lock().expect("lock poisoned").push(duration);
        self.advance(duration);
        Box::pin(std::future::ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new(Utc::now());
        let start = clock.now();
        clock.sleep(std::time::Duration::from_secs(5)).await;
        let after = clock.now();
        assert_eq!((after - start).num_seconds(), 5);
        assert_eq!(clock.recorded_sleeps().len(), 1);
    }
}
