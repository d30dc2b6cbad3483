//! `Clock` abstraction so rate windows and warm-up day boundaries can be driven
//! deterministically from tests instead of `Instant::now()`/`Utc::now()` directly.
//! Mirrors the teacher's pattern of swapping `DnsResolver` for `handler::mock::Resolver`
//! under `#[cfg(test)]`.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

pub trait Clock: Send + Sync + 'static {
    /// Monotonic timestamp used for sliding rate windows. Must never go backwards.
    fn now_monotonic(&self) -> Instant;

    /// Wall-clock timestamp used for warm-up day-boundary resets and timestamps
    /// recorded on send attempts / dead letters.
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests: monotonic time advances only when told to,
/// wall-clock time is derived from an offset added to a fixed epoch.
#[derive(Clone)]
pub struct MockClock {
    base: Instant,
    offset_millis: Arc<AtomicI64>,
    wall_base: DateTime<Utc>,
}

impl MockClock {
    pub fn new(wall_base: DateTime<Utc>) -> Self {
        Self {
            base: Instant::now(),
            offset_millis: Arc::new(AtomicI64::new(0)),
            wall_base,
        }
    }

    pub fn advance(&self, duration: std::time::Duration) {
        self.offset_millis
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_monotonic(&self) -> Instant {
        self.base + std::time::Duration::from_millis(self.offset_millis.load(Ordering::SeqCst) as u64)
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.wall_base + chrono::Duration::milliseconds(self.offset_millis.load(Ordering::SeqCst))
    }
}
