//! Fixed-window rate limiting state.
//!
//! # Algorithm
//!
//! Each key (an authenticated user or a client address) owns a counter and
//! the instant its current window started:
//!
//! ```text
//! request ──► no state, or now - window_start >= window ──► {count: 1, start: now}  allow
//!        └──► otherwise count += 1 ──► count > max ──► deny (count stays incremented)
//!                                  └──► count <= max ──► allow
//! ```
//!
//! This is a single-process approximation suited to development and
//! single-instance deployments. See [`RateLimitStore`] for the
//! concurrency guarantees.

mod clock;
mod store;

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{Decision, RateLimitState, RateLimitStore};

/// Error type for rate limit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// `max_requests` cannot be zero.
    ZeroMaxRequests,
    /// The window cannot be empty.
    ZeroWindow,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroMaxRequests => {
                write!(f, "max_requests must be greater than 0")
            }
            RateLimitError::ZeroWindow => write!(f, "window must be greater than 0"),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Requests allowed per fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    max_requests: NonZeroU32,
    window: Duration,
}

impl Quota {
    /// # Errors
    ///
    /// Returns [`RateLimitError`] if either value is zero.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, RateLimitError> {
        let max_requests = NonZeroU32::new(max_requests).ok_or(RateLimitError::ZeroMaxRequests)?;
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }
        Ok(Self {
            max_requests,
            window,
        })
    }

    pub fn per_window_secs(max_requests: u32, window_secs: u64) -> Result<Self, RateLimitError> {
        Self::new(max_requests, Duration::from_secs(window_secs))
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests.get()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_creation() {
        let quota = Quota::per_window_secs(100, 3600).unwrap();
        assert_eq!(quota.max_requests(), 100);
        assert_eq!(quota.window(), Duration::from_secs(3600));
    }

    #[test]
    fn test_quota_zero_max_returns_error() {
        assert_eq!(
            Quota::per_window_secs(0, 60),
            Err(RateLimitError::ZeroMaxRequests)
        );
    }

    #[test]
    fn test_quota_zero_window_returns_error() {
        assert_eq!(Quota::per_window_secs(5, 0), Err(RateLimitError::ZeroWindow));
    }
}
