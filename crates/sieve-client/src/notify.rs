use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use sieve_core::error::AppError;
use sieve_core::traits::Notifier;

const DEFAULT_SMTP_PORT: u16 = 587;

/// SMTP relay settings for job notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Upgrade the connection with STARTTLS. Only disable for local relays.
    pub starttls: bool,
}

impl SmtpConfig {
    /// Read settings from the environment.
    ///
    /// Returns `Ok(None)` when `SMTP_HOST` or `SMTP_FROM` is missing, which
    /// means notifications are disabled.
    ///
    /// - `SMTP_HOST`, `SMTP_FROM` (required)
    /// - `SMTP_PORT` (default 587)
    /// - `SMTP_USERNAME`, `SMTP_PASSWORD` (both or neither)
    /// - `SMTP_STARTTLS` (`false` to disable)
    pub fn from_env() -> Result<Option<Self>, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Option<Self>, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let (Some(host), Some(from)) = (non_empty("SMTP_HOST"), non_empty("SMTP_FROM")) else {
            return Ok(None);
        };

        let port = match non_empty("SMTP_PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                AppError::ConfigError(format!("Invalid SMTP_PORT '{raw}': must be a port number"))
            })?,
            None => DEFAULT_SMTP_PORT,
        };

        let username = non_empty("SMTP_USERNAME");
        let password = non_empty("SMTP_PASSWORD");
        if username.is_some() != password.is_some() {
            return Err(AppError::ConfigError(
                "SMTP_USERNAME and SMTP_PASSWORD must be set together".into(),
            ));
        }

        let starttls = non_empty("SMTP_STARTTLS")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);

        Ok(Some(Self {
            host,
            port,
            from,
            username,
            password,
            starttls,
        }))
    }
}

/// Sends plain-text notification mail through an SMTP relay.
#[derive(Clone)]
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let from: Mailbox = config.from.parse().map_err(|e| {
            AppError::ConfigError(format!("Invalid SMTP_FROM '{}': {e}", config.from))
        })?;

        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| AppError::ConfigError(format!("Invalid SMTP relay: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        builder = builder.port(config.port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        tracing::info!(host = %config.host, port = config.port, "SMTP notifier configured");
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

impl Notifier for SmtpNotifier {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<(), AppError> {
        let to: Mailbox = recipient.parse().map_err(|e| {
            AppError::NotificationError(format!("Invalid recipient '{recipient}': {e}"))
        })?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| AppError::NotificationError(format!("Failed to build message: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::NotificationError(format!("SMTP send failed: {e}")))?;

        tracing::debug!(recipient, "Notification sent");
        Ok(())
    }
}
