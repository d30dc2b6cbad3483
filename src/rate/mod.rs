//! Rate Governor (spec §4.2): sliding-window admission control keyed by an
//! arbitrary string (SMTP account id or sender domain — two independent
//! governor instances share this implementation, spec says "sharing identical
//! semantics").

use crate::clock::Clock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error("rate governor window must be greater than zero")]
    ZeroWindow,
}

struct KeyState {
    /// FIFO deque of monotonic timestamps within the window (spec: "per key, a
    /// monotonically timestamped deque truncated on access to entries >= now -
    /// window"). Also used as a simple FIFO queue: a task blocks behind whatever
    /// is already queued for this key.
    timestamps: VecDeque<Instant>,
    /// Serializes admission per key so concurrent callers proceed in arrival order.
    queue: Arc<Mutex<()>>,
}

impl KeyState {
    fn new() -> Self {
        Self {
            timestamps: VecDeque::new(),
            queue: Arc::new(Mutex::new(())),
        }
    }
}

/// Sliding-window rate governor. `limit == 0` blocks all callers forever
/// (spec edge case); `window == 0` is rejected at construction.
pub struct Governor<C: Clock> {
    limit: u32,
    window: Duration,
    clock: Arc<C>,
    state: Mutex<HashMap<String, KeyState>>,
}

impl<C: Clock> Governor<C> {
    pub fn new(limit: u32, window: Duration, clock: Arc<C>) -> Result<Self, GovernorError> {
        if window.is_zero() {
            return Err(GovernorError::ZeroWindow);
        }
        Ok(Self {
            limit,
            window,
            clock,
            state: Mutex::new(HashMap::new()),
        })
    }

    /// Await until a slot is free for `key`, then reserve it. Returns
    /// immediately for a never-before-seen key below the limit.
    pub async fn acquire(&self, key: &str) {
        if self.limit == 0 {
            // Never releases — matches the spec edge case verbatim.
            std::future::pending::<()>().await;
            unreachable!();
        }

        let per_key_lock = {
            let mut state = self.state.lock().await;
            state
                .entry(key.to_string())
                .or_insert_with(KeyState::new)
                .queue
                .clone()
        };

        // Holding this per-key lock for the duration of acquisition gives FIFO
        // ordering for same-key callers while leaving distinct keys independent.
        let _permit = per_key_lock.lock().await;

        loop {
            let now = self.clock.now_monotonic();
            let wait = {
                let mut state = self.state.lock().await;
                let entry = state.entry(key.to_string()).or_insert_with(KeyState::new);
                while entry
                    .timestamps
                    .front()
                    .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
                {
                    entry.timestamps.pop_front();
                }

                if entry.timestamps.len() < self.limit as usize {
                    entry.timestamps.push_back(now);
                    None
                } else {
                    // Wait until the oldest entry falls outside the window.
                    let oldest = *entry.timestamps.front().unwrap();
                    Some(self.window.saturating_sub(now.saturating_duration_since(oldest)))
                }
            };

            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration.max(Duration::from_millis(1))).await,
            }
        }
    }

    /// Non-blocking check used by the Account Selector to skip accounts that
    /// are momentarily over their rate window (spec §4.4 step 2).
    pub async fn has_capacity(&self, key: &str) -> bool {
        if self.limit == 0 {
            return false;
        }
        let now = self.clock.now_monotonic();
        let mut state = self.state.lock().await;
        let entry = state.entry(key.to_string()).or_insert_with(KeyState::new);
        while entry
            .timestamps
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            entry.timestamps.pop_front();
        }
        entry.timestamps.len() < self.limit as usize
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::MockClock;
    use std::sync::Arc;

    #[tokio::test]
    async fn zero_window_rejected() {
        let clock = Arc::new(MockClock::new(chrono::Utc::now()));
        assert!(Governor::new(10, Duration::from_secs(0), clock).is_err());
    }

    #[tokio::test]
    async fn limit_zero_blocks_capacity_check() {
        let clock = Arc::new(MockClock::new(chrono::Utc::now()));
        let governor = Governor::new(0, Duration::from_secs(60), clock).unwrap();
        assert!(!governor.has_capacity("acct-1").await);
    }

    #[tokio::test]
    async fn independent_keys_do_not_interfere() {
        let clock = Arc::new(MockClock::new(chrono::Utc::now()));
        let governor = Governor::new(1, Duration::from_secs(60), clock).unwrap();
        assert!(governor.has_capacity("a").await);
        governor.acquire("a").await;
        assert!(!governor.has_capacity("a").await);
        assert!(governor.has_capacity("b").await);
    }

    #[tokio::test]
    async fn slides_out_after_window_elapses() {
        let clock = Arc::new(MockClock::new(chrono::Utc::now()));
        let governor = Governor::new(2, Duration::from_secs(60), clock.clone()).unwrap();
        governor.acquire("a").await;
        governor.acquire("a").await;
        assert!(!governor.has_capacity("a").await);
        clock.advance(Duration::from_secs(61));
        assert!(governor.has_capacity("a").await);
    }
}
