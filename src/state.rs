//! Shared application state for Axum handlers.
//!
//! Holds the configuration, the rate limit store shared by the app's
//! limited endpoints, and the identity resolver.
//!
//! # Structured Concurrency
//!
//! The expired-key sweeper runs as a background task managed with
//! `tokio_util::task::TaskTracker` and `CancellationToken`. Call `shutdown()`
//! to stop it before application exit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::{Config, ConfigError};
use crate::http::Endpoint;
use crate::identity::{HeaderIdentityResolver, IdentityResolver};
use crate::limiter::{RateLimitError, RateLimitStore};
use crate::metrics;
use crate::middleware::{RateLimitLayer, RequestLogLayer, TrustedProxyConfig, log_requests};
use crate::pipeline::PipelineService;
use crate::validation::SensitiveFields;

/// Shared application state for Axum handlers.
///
/// Cloned per request; everything inside is behind an `Arc`.
///
/// # Lifecycle
///
/// Must be created inside a Tokio runtime when the sweeper is enabled.
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Counters for every endpoint limited through [`AppState::rate_limit_layer`]
    pub rate_limit_store: Arc<RateLimitStore>,
    /// Decides who is calling
    pub resolver: Arc<dyn IdentityResolver>,
    /// Timestamp when the application started
    pub started_at: Instant,
    sensitive_fields: SensitiveFields,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create the state and start the background sweeper.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `IDENTITY_HEADER` is not a valid
    /// header name.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let trusted_proxies = TrustedProxyConfig::new(&config.trusted_proxies);
        let resolver = HeaderIdentityResolver::new(&config.identity_header, trusted_proxies)
            .map_err(|e| ConfigError::Invalid {
                name: "IDENTITY_HEADER",
                reason: e.to_string(),
            })?;

        let state = Self {
            sensitive_fields: SensitiveFields::new(&config.sensitive_fields),
            config: Arc::new(config),
            rate_limit_store: Arc::new(RateLimitStore::new()),
            resolver: Arc::new(resolver),
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        if state.config.sweeper_enabled() {
            state.spawn_sweeper_task();
        }

        Ok(state)
    }

    /// Logging stage for `handler` using the configured sensitive fields.
    pub fn log_layer(&self, handler: &str) -> RequestLogLayer {
        log_requests(handler).with_sensitive_fields(self.sensitive_fields.clone())
    }

    /// Rate limiting stage with the configured quota, counting in the
    /// shared store.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError`] if the configured quota is zero.
    pub fn rate_limit_layer(&self) -> Result<RateLimitLayer, RateLimitError> {
        RateLimitLayer::with_store(
            self.rate_limit_store.clone(),
            self.config.rate_limit_max_requests,
            self.config.rate_limit_window,
        )
    }

    /// Bind a pipeline to this app's identity resolver and body limit.
    pub fn endpoint(&self, pipeline: PipelineService) -> Endpoint {
        Endpoint::new(pipeline, self.resolver.clone())
            .with_body_limit(self.config.max_request_body_size)
    }

    /// Spawn the task dropping keys whose window has expired.
    ///
    /// The limiter itself never evicts; without this the store grows with
    /// every identity ever seen.
    fn spawn_sweeper_task(&self) {
        let store = self.rate_limit_store.clone();
        let window = self.config.rate_limit_window;
        let every = self.config.rate_limit_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(every);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate limit sweeper received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        sweep(&store, window);
                    }
                }
            }

            debug!("Rate limit sweeper shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// Signals cancellation, closes the tracker, and waits for every task.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// One sweeper pass; returns how many keys were dropped.
///
/// The store logs what it purged.
pub fn sweep(store: &RateLimitStore, window: Duration) -> usize {
    let removed = store.purge_expired(window);
    metrics::set_tracked_keys(store.len());
    removed
}
