use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace};

use super::Quota;
use super::clock::{Clock, SystemClock};

/// Counter for one rate limit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    /// Requests observed in the current window, rejected ones included
    pub count: u32,
    pub window_start: Instant,
}

impl RateLimitState {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 1,
            window_start: now,
        }
    }
}

/// Outcome of [`RateLimitStore::check_and_increment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        count: u32,
        remaining: u32,
    },
    Denied {
        count: u32,
        /// Time until the current window closes (at least one second)
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Requests counted in the current window, including this one.
    pub fn count(&self) -> u32 {
        match self {
            Decision::Allowed { count, .. } | Decision::Denied { count, .. } => *count,
        }
    }
}

/// In-memory fixed-window counters keyed by identity.
///
/// The map is private: callers only get the atomic
/// [`check_and_increment`](Self::check_and_increment). Each call holds the
/// DashMap shard write lock for its key across the whole
/// read-check-increment-write sequence, so concurrent requests for one key
/// are serialized.
///
/// Counters live in this process only. Running several instances behind a
/// load balancer multiplies the effective quota; such deployments need a
/// shared external store instead.
#[derive(Debug)]
pub struct RateLimitStore {
    states: DashMap<String, RateLimitState>,
    clock: Arc<dyn Clock>,
}

impl RateLimitStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            states: DashMap::new(),
            clock,
        }
    }

    /// Count a request for `key` and decide whether it may proceed.
    ///
    /// A new key, or one whose window has elapsed, starts a fresh window with
    /// count 1. Otherwise the count is incremented even when the request ends
    /// up rejected.
    pub fn check_and_increment(&self, key: &str, quota: &Quota) -> Decision {
        let now = self.clock.now();
        let max = quota.max_requests();

        match self.states.entry(key.to_owned()) {
            Entry::Vacant(vacant) => {
                trace!(key, "Tracking new rate limit key");
                vacant.insert(RateLimitState::fresh(now));
                Decision::Allowed {
                    count: 1,
                    remaining: max - 1,
                }
            }
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                let elapsed = now.saturating_duration_since(state.window_start);

                if elapsed >= quota.window() {
                    *state = RateLimitState::fresh(now);
                    return Decision::Allowed {
                        count: 1,
                        remaining: max - 1,
                    };
                }

                state.count = state.count.saturating_add(1);
                if state.count > max {
                    let retry_after = (quota.window() - elapsed).max(Duration::from_secs(1));
                    Decision::Denied {
                        count: state.count,
                        retry_after,
                    }
                } else {
                    Decision::Allowed {
                        count: state.count,
                        remaining: max - state.count,
                    }
                }
            }
        }
    }

    /// Drop keys whose window started at least `window` ago.
    ///
    /// Returns the number of keys removed. Removing an expired key is
    /// equivalent to resetting it, so this never changes a decision.
    pub fn purge_expired(&self, window: Duration) -> usize {
        let now = self.clock.now();
        let before = self.states.len();
        self.states
            .retain(|_, state| now.saturating_duration_since(state.window_start) < window);
        let removed = before.saturating_sub(self.states.len());
        if removed > 0 {
            debug!(removed, remaining = self.states.len(), "Purged expired rate limit keys");
        }
        removed
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl Default for RateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::limiter::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn store_with_clock() -> (RateLimitStore, ManualClock) {
        let clock = ManualClock::new();
        (RateLimitStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_first_request_creates_state() {
        let (store, _) = store_with_clock();
        let quota = Quota::new(3, Duration::from_secs(60)).unwrap();

        let decision = store.check_and_increment("user:1", &quota);
        assert_eq!(
            decision,
            Decision::Allowed {
                count: 1,
                remaining: 2
            }
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_fixed_window_quota() {
        let (store, clock) = store_with_clock();
        let quota = Quota::new(3, Duration::from_secs(60)).unwrap();

        for _ in 0..3 {
            assert!(store.check_and_increment("k", &quota).is_allowed());
        }

        clock.advance(Duration::from_secs(20));
        let denied = store.check_and_increment("k", &quota);
        assert_eq!(
            denied,
            Decision::Denied {
                count: 4,
                retry_after: Duration::from_secs(40)
            }
        );
    }

    #[test]
    fn test_rejected_calls_still_count() {
        let (store, _) = store_with_clock();
        let quota = Quota::new(1, Duration::from_secs(60)).unwrap();

        store.check_and_increment("k", &quota);
        store.check_and_increment("k", &quota);
        let third = store.check_and_increment("k", &quota);
        assert_eq!(third.count(), 3);
        assert!(!third.is_allowed());
    }

    #[test]
    fn test_window_reset_after_expiry() {
        let (store, clock) = store_with_clock();
        let quota = Quota::new(3, Duration::from_secs(60)).unwrap();

        for _ in 0..4 {
            store.check_and_increment("k", &quota);
        }

        clock.advance(Duration::from_secs(60));
        let decision = store.check_and_increment("k", &quota);
        assert_eq!(
            decision,
            Decision::Allowed {
                count: 1,
                remaining: 2
            }
        );
    }

    #[test]
    fn test_keys_are_independent() {
        let (store, _) = store_with_clock();
        let quota = Quota::new(1, Duration::from_secs(60)).unwrap();

        assert!(store.check_and_increment("a", &quota).is_allowed());
        assert!(!store.check_and_increment("a", &quota).is_allowed());
        assert!(store.check_and_increment("b", &quota).is_allowed());
    }

    #[test]
    fn test_retry_after_at_least_one_second() {
        let (store, clock) = store_with_clock();
        let quota = Quota::new(1, Duration::from_secs(60)).unwrap();

        store.check_and_increment("k", &quota);
        clock.advance(Duration::from_millis(59_900));
        match store.check_and_increment("k", &quota) {
            Decision::Denied { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_secs(1))
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn test_purge_expired() {
        let (store, clock) = store_with_clock();
        let quota = Quota::new(5, Duration::from_secs(60)).unwrap();

        store.check_and_increment("old", &quota);
        clock.advance(Duration::from_secs(61));
        store.check_and_increment("new", &quota);

        assert_eq!(store.purge_expired(quota.window()), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_threads_admit_exactly_max() {
        let store = Arc::new(RateLimitStore::new());
        let quota = Quota::new(5, Duration::from_secs(3600)).unwrap();
        let allowed = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                let allowed = allowed.clone();
                std::thread::spawn(move || {
                    if store.check_and_increment("shared", &quota).is_allowed() {
                        allowed.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(allowed.load(Ordering::SeqCst), 5);
    }
}
