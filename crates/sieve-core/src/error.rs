use thiserror::Error;
use uuid::Uuid;

/// Application-wide error types for Sieve.
///
/// Cloneable so that recorded failures (task errors, mock responses) can be
/// handed out more than once.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// Fetch failed in a way worth retrying (429/5xx, connection reset).
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    /// Fetch failed and retrying cannot help (malformed URL, 4xx, DNS).
    #[error("Fetch error: {0}")]
    PermanentFetch(String),

    /// Request or navigation timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Target resolves to a private or reserved address. Never retried and
    /// never handed to another strategy.
    #[error("Blocked target: {0}")]
    BlockedTarget(String),

    /// Browser automation failed (launch, readiness, script, snapshot).
    #[error("Browser error: {0}")]
    Browser(String),

    /// Caller exceeded its tier's call quota for the active period.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Batch submission larger than the tier allows.
    #[error("Maximum {max} URLs allowed for tier, got {requested}")]
    BatchTooLarge { max: usize, requested: usize },

    /// Worker pool has no free slot for background work.
    #[error("Worker pool saturated, try again later")]
    PoolSaturated,

    #[error("Task {0} not found")]
    TaskNotFound(Uuid),

    #[error("Unauthorized access to task {0}")]
    TaskUnauthorized(Uuid),

    /// Caller supplied something the core cannot act on.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Notification delivery failed.
    #[error("Notification error: {0}")]
    NotificationError(String),

    /// Missing or malformed configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransientFetch(_) | AppError::Timeout(_))
    }

    /// Classify an HTTP status code returned by a static fetch.
    pub fn from_status(status: u16, url: &str) -> Self {
        let message = format!("HTTP {status} for {url}");
        match status {
            429 | 500 | 502 | 503 | 504 => AppError::TransientFetch(message),
            _ => AppError::PermanentFetch(message),
        }
    }
}

/// Failure while extracting a single element kind.
///
/// Never crosses the extractor boundary: it is downgraded to a null value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("invalid selector '{0}'")]
    InvalidSelector(String),

    #[error("failed to encode {kind}: {message}")]
    Encode { kind: String, message: String },

    #[error("extraction of {0} panicked")]
    Panicked(String),
}
