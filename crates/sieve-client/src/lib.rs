#[cfg(feature = "browser")]
pub mod browser;
pub mod fetcher;
pub mod notify;

#[cfg(feature = "browser")]
pub use browser::{ChromeDriver, ChromeSession};
pub use fetcher::ReqwestFetcher;
pub use notify::{SmtpConfig, SmtpNotifier};
