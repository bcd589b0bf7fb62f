use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::rate_limit::RateLimitConfig;

/// Retry and timing policy for the fetch strategy selector.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Static fetch attempts after the first one, on transient failures only.
    pub max_retries: u32,
    /// Delay before retry `n` is `backoff_base * 2^(n-1)`.
    pub backoff_base: Duration,
    /// Total navigation attempts for a dynamic fetch, retried on timeout only.
    pub nav_attempts: u32,
    pub page_load_timeout: Duration,
    /// How long to wait for the document body after navigation.
    pub ready_timeout: Duration,
    /// Pause after scrolling so late content can arrive.
    pub settle_delay: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            nav_attempts: 3,
            page_load_timeout: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(20),
            settle_delay: Duration::from_secs(2),
        }
    }
}

impl FetchConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_nav_attempts(mut self, attempts: u32) -> Self {
        self.nav_attempts = attempts.max(1);
        self
    }

    pub fn with_page_load_timeout(mut self, timeout: Duration) -> Self {
        self.page_load_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1 << exp)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Async tasks allowed in flight at once.
    pub worker_limit: usize,
    /// Ceiling on concurrent fetches within one batch.
    pub batch_concurrency_cap: usize,
    pub rate_limits: RateLimitConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_limit: 16,
            batch_concurrency_cap: 5,
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_worker_limit(mut self, limit: usize) -> Self {
        self.worker_limit = limit.max(1);
        self
    }

    pub fn with_rate_limits(mut self, rate_limits: RateLimitConfig) -> Self {
        self.rate_limits = rate_limits;
        self
    }
}

/// Shortest scheduler tick; `tokio::time::interval` rejects zero.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Due-check interval.
    pub tick_interval: Duration,
    pub reconcile_interval: Duration,
    /// Timeout applied to each scheduled fetch.
    pub fetch_timeout: Duration,
    /// Attempts at appending an execution record before giving up.
    pub record_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            reconcile_interval: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(60),
            record_attempts: 3,
        }
    }
}

impl SchedulerConfig {
    /// Clamped to at least [`MIN_TICK_INTERVAL`].
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(MIN_TICK_INTERVAL);
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

/// All tunables, grouped per component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SieveConfig {
    /// Default timeout for fetch requests that do not set their own.
    pub fetch_timeout: Option<Duration>,
    pub fetch: FetchConfig,
    pub orchestrator: OrchestratorConfig,
    pub scheduler: SchedulerConfig,
}

impl SieveConfig {
    /// Read configuration from environment variables.
    ///
    /// Every variable is optional; unset ones keep their defaults.
    ///
    /// - `SIEVE_FETCH_TIMEOUT_SECS`
    /// - `SIEVE_FETCH_RETRIES`
    /// - `SIEVE_BACKOFF_BASE_MS`
    /// - `SIEVE_NAV_RETRIES`
    /// - `SIEVE_PAGE_LOAD_TIMEOUT_SECS`
    /// - `SIEVE_WORKER_LIMIT`
    /// - `SIEVE_SCHEDULED_FETCH_TIMEOUT_SECS`
    /// - `SIEVE_SCHEDULER_TICK_MS`
    /// - `SIEVE_RECONCILE_SECS`
    /// - `SIEVE_RATE_TIERS` (`name:calls:period_secs:max_batch,...`)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` uses the process env.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "SIEVE_FETCH_TIMEOUT_SECS")? {
            config.fetch_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(retries) = parse_var::<u32, _>(&lookup, "SIEVE_FETCH_RETRIES")? {
            config.fetch.max_retries = retries;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SIEVE_BACKOFF_BASE_MS")? {
            config.fetch.backoff_base = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "SIEVE_NAV_RETRIES")? {
            config.fetch = config.fetch.with_nav_attempts(attempts);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SIEVE_PAGE_LOAD_TIMEOUT_SECS")? {
            config.fetch = config.fetch.with_page_load_timeout(Duration::from_secs(secs));
        }
        if let Some(limit) = parse_var::<usize, _>(&lookup, "SIEVE_WORKER_LIMIT")? {
            config.orchestrator = config.orchestrator.with_worker_limit(limit);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SIEVE_SCHEDULED_FETCH_TIMEOUT_SECS")? {
            config.scheduler = config.scheduler.with_fetch_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SIEVE_SCHEDULER_TICK_MS")? {
            if ms == 0 {
                return Err(AppError::ConfigError(
                    "SIEVE_SCHEDULER_TICK_MS must be at least 1".into(),
                ));
            }
            config.scheduler = config.scheduler.with_tick_interval(Duration::from_millis(ms));
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SIEVE_RECONCILE_SECS")? {
            if secs == 0 {
                return Err(AppError::ConfigError(
                    "SIEVE_RECONCILE_SECS must be at least 1".into(),
                ));
            }
            config.scheduler.reconcile_interval = Duration::from_secs(secs);
        }
        if let Some(tiers) = lookup("SIEVE_RATE_TIERS") {
            config.orchestrator.rate_limits = RateLimitConfig::parse_tiers(&tiers)?;
        }

        Ok(config)
    }
}

fn parse_var<T, L>(lookup: &L, key: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}': must be a non-negative integer"))
        }),
    }
}
