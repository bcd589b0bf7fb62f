//! Per-caller sliding-window admission control.
//!
//! Each caller owns a [`RateWindow`] of call timestamps. Timestamps older
//! than the tier's period are pruned lazily on every check, and a call is
//! admitted iff fewer than `calls` remain. A caller whose window empties is
//! dropped from the map. State is in-process only and is lost on restart.
//!
//! ```text
//! |<------------- period ------------->|
//!   x    x x      x         x     x   now   -> admit iff count < calls
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::AppError;

/// Tier name used when a caller's tier is not configured.
pub const DEFAULT_TIER: &str = "default";

/// Quotas for one caller tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    /// Calls allowed per period.
    pub calls: usize,
    pub period: Duration,
    /// Largest batch a caller of this tier may submit.
    pub max_batch: usize,
}

impl TierLimits {
    pub fn new(calls: usize, period: Duration, max_batch: usize) -> Self {
        Self {
            calls,
            period,
            max_batch,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Applied to any tier not present in `tiers`.
    pub fallback: TierLimits,
    pub tiers: HashMap<String, TierLimits>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let standard = TierLimits::new(100, Duration::from_secs(3600), 10);
        let premium = TierLimits::new(1000, Duration::from_secs(3600), 50);
        Self {
            fallback: standard,
            tiers: HashMap::from([
                (DEFAULT_TIER.to_string(), standard),
                ("premium".to_string(), premium),
            ]),
        }
    }
}

impl RateLimitConfig {
    pub fn with_tier(mut self, name: impl Into<String>, limits: TierLimits) -> Self {
        let name = name.into();
        if name == DEFAULT_TIER {
            self.fallback = limits;
        }
        self.tiers.insert(name, limits);
        self
    }

    /// Limits for `tier`, falling back to the default quota.
    pub fn limits(&self, tier: &str) -> TierLimits {
        self.tiers.get(tier).copied().unwrap_or(self.fallback)
    }

    /// Parse `name:calls:period_secs:max_batch` entries separated by commas,
    /// layered over the defaults.
    ///
    /// Example: `"default:100:3600:10,premium:1000:3600:50"`
    pub fn parse_tiers(spec: &str) -> Result<Self, AppError> {
        let mut config = Self::default();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let [name, calls, period, max_batch] = parts.as_slice() else {
                return Err(AppError::ConfigError(format!(
                    "Invalid rate tier '{entry}': expected name:calls:period_secs:max_batch"
                )));
            };
            let number = |field: &str, raw: &str| -> Result<u64, AppError> {
                raw.parse::<u64>().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid {field} '{raw}' in rate tier '{entry}'"
                    ))
                })
            };
            let limits = TierLimits::new(
                number("calls", calls)? as usize,
                Duration::from_secs(number("period_secs", period)?),
                number("max_batch", max_batch)? as usize,
            );
            if limits.period.is_zero() {
                return Err(AppError::ConfigError(format!(
                    "Rate tier '{name}' must have a non-zero period"
                )));
            }
            config = config.with_tier(*name, limits);
        }
        Ok(config)
    }
}

/// A caller's recent call timestamps, oldest first, under the period of the
/// tier they last called with.
#[derive(Debug)]
struct RateWindow {
    period: Duration,
    calls: VecDeque<Instant>,
}

impl RateWindow {
    fn new(period: Duration) -> Self {
        Self {
            period,
            calls: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.calls.front() {
            if now.saturating_duration_since(oldest) >= self.period {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window rate limiter. Clones share state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    windows: Arc<Mutex<HashMap<String, RateWindow>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Largest batch a caller of `tier` may submit.
    pub fn max_batch(&self, tier: &str) -> usize {
        self.config.limits(tier).max_batch
    }

    /// Check and record one call for `caller`.
    pub fn admit(&self, caller: &str, tier: &str) -> bool {
        self.admit_at(caller, tier, Instant::now())
    }

    pub fn admit_at(&self, caller: &str, tier: &str, now: Instant) -> bool {
        let limits = self.config.limits(tier);
        let mut windows = self.lock_windows();

        // Callers whose windows have emptied are forgotten.
        windows.retain(|_, window| {
            window.prune(now);
            !window.calls.is_empty()
        });

        let window = windows
            .entry(caller.to_string())
            .or_insert_with(|| RateWindow::new(limits.period));
        window.period = limits.period;
        window.prune(now);

        if window.calls.len() < limits.calls {
            window.calls.push_back(now);
            true
        } else {
            tracing::debug!(%caller, %tier, quota = limits.calls, "Call rejected by rate limiter");
            if window.calls.is_empty() {
                windows.remove(caller);
            }
            false
        }
    }

    #[cfg(test)]
    fn tracked_callers(&self) -> usize {
        self.lock_windows().len()
    }

    fn lock_windows(&self) -> MutexGuard<'_, HashMap<String, RateWindow>> {
        self.windows.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned rate limiter mutex");
            poisoned.into_inner()
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
