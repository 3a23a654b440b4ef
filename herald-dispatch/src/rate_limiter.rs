//! Per-SMTP-config rate limiting.
//!
//! Each SMTP configuration gets a fixed window of permits:
//! `rate_limit_max` sends per `rate_limit_window_secs`. Windows live in a
//! concurrent map keyed by scope; idle entries are swept after a TTL so the
//! map stays bounded no matter how many configurations come and go.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use herald_common::SmtpConfigId;
use serde::{Deserialize, Serialize};
use tracing::debug;

const fn default_rate_limit_max() -> u32 {
    100
}

const fn default_rate_limit_window() -> u64 {
    60
}

const fn default_scope_ttl() -> u64 {
    900
}

/// Configuration for per-scope rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Default permits per window for any SMTP configuration.
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,

    /// Window length in seconds.
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,

    /// How long an idle scope's window entry survives before the sweep
    /// drops it.
    #[serde(default = "default_scope_ttl")]
    pub scope_ttl_secs: u64,

    /// Per-scope overrides, keyed by SMTP configuration id.
    #[serde(default)]
    pub scope_limits: ahash::AHashMap<String, ScopeRateLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_secs: default_rate_limit_window(),
            scope_ttl_secs: default_scope_ttl(),
            scope_limits: ahash::AHashMap::default(),
        }
    }
}

/// Rate limit override for one SMTP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeRateLimit {
    /// Permits per window for this scope.
    pub rate_limit_max: u32,
    /// Window length in seconds for this scope.
    pub rate_limit_window_secs: u64,
}

/// Permit window for a single scope.
#[derive(Debug)]
struct Window {
    /// Permits consumed in the current window.
    used: u32,
    /// Permits per window.
    max: u32,
    /// Window length.
    length: Duration,
    /// When the current window started.
    started: Instant,
    /// Last acquisition attempt, for TTL sweeping.
    last_seen: Instant,
}

impl Window {
    fn new(max: u32, length: Duration) -> Self {
        let now = Instant::now();
        Self {
            used: 0,
            max,
            length,
            started: now,
            last_seen: now,
        }
    }

    /// Reset the window if it has elapsed.
    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.started) >= self.length {
            self.started = now;
            self.used = 0;
        }
    }

    /// Take one permit, or report how long until the window resets.
    fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.roll(now);
        self.last_seen = now;

        if self.used < self.max {
            self.used += 1;
            Ok(())
        } else {
            Err(self.length - now.duration_since(self.started))
        }
    }
}

/// Per-scope rate limiter manager.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<SmtpConfigId, Arc<parking_lot::Mutex<Window>>>,
}

impl RateLimiter {
    /// Create a rate limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    fn window_for(&self, scope: &SmtpConfigId) -> Arc<parking_lot::Mutex<Window>> {
        self.windows
            .entry(scope.clone())
            .or_insert_with(|| {
                let (max, length_secs) = self.config.scope_limits.get(scope.as_str()).map_or(
                    (
                        self.config.rate_limit_max,
                        self.config.rate_limit_window_secs,
                    ),
                    |limit| (limit.rate_limit_max, limit.rate_limit_window_secs),
                );

                Arc::new(parking_lot::Mutex::new(Window::new(
                    max,
                    Duration::from_secs(length_secs),
                )))
            })
            .clone()
    }

    /// Take one permit for `scope`.
    ///
    /// Returns `Ok(())` when the send may proceed, or `Err(wait)` with the
    /// time until the scope's window resets.
    pub fn check(&self, scope: &SmtpConfigId) -> Result<(), Duration> {
        let window = self.window_for(scope);
        let result = window.lock().try_acquire(Instant::now());

        if let Err(wait) = result {
            debug!(
                scope = %scope,
                wait_seconds = wait.as_secs_f64(),
                "Rate limit exceeded, must wait"
            );
        }
        result
    }

    /// Drop window entries idle for longer than the configured TTL.
    ///
    /// Returns how many entries were removed.
    pub fn sweep_expired(&self) -> usize {
        let ttl = Duration::from_secs(self.config.scope_ttl_secs);
        let before = self.windows.len();
        self.windows
            .retain(|_, window| window.lock().last_seen.elapsed() < ttl);
        before - self.windows.len()
    }

    /// Current window stats for a scope, if it has been used.
    #[must_use]
    pub fn stats(&self, scope: &SmtpConfigId) -> Option<RateLimitStats> {
        self.windows.get(scope).map(|window| {
            let mut window = window.lock();
            let now = Instant::now();
            window.roll(now);

            RateLimitStats {
                used: window.used,
                max: window.max,
                resets_in: window.length - now.duration_since(window.started),
            }
        })
    }
}

/// Point-in-time view of one scope's window.
#[derive(Debug, Clone)]
pub struct RateLimitStats {
    /// Permits consumed in the current window.
    pub used: u32,
    /// Permits per window.
    pub max: u32,
    /// Time until the window resets.
    pub resets_in: Duration,
}
