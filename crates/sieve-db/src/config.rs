use sieve_core::AppError;

/// Configuration for the database connection pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// How long a query waits for a free connection.
    pub acquire_timeout_secs: u64,
}

impl DatabaseConfig {
    /// Read configuration from environment variables.
    ///
    /// - `DATABASE_URL` (required)
    /// - `DATABASE_MAX_CONNECTIONS` (optional, defaults to 5)
    /// - `DATABASE_ACQUIRE_TIMEOUT_SECS` (optional, defaults to 10)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()).ok_or_else(|| {
            AppError::ConfigError("DATABASE_URL not set. Required for history and scheduling.".into())
        })?;

        let max_connections = positive(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?;
        let acquire_timeout_secs = positive(&lookup, "DATABASE_ACQUIRE_TIMEOUT_SECS", 10)?;

        Ok(Self {
            url,
            max_connections,
            acquire_timeout_secs,
        })
    }
}

fn positive<L, T>(lookup: &L, key: &str, default: T) -> Result<T, AppError>
where
    L: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialEq + From<u8>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::from(0) => Ok(value),
        _ => Err(AppError::ConfigError(format!(
            "Invalid {key} '{raw}': must be a positive integer"
        ))),
    }
}
