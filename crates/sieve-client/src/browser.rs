use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use sieve_core::error::AppError;
use sieve_core::traits::{BrowserDriver, BrowserSession};
use tokio::sync::OnceCell;

use crate::fetcher::validate_url;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Environment override for the Chromium executable.
pub const CHROME_BIN_VAR: &str = "SIEVE_CHROME_BIN";

/// Browser driver backed by headless Chromium over the DevTools Protocol.
///
/// The Chromium process is launched on the first session request and shared
/// by every clone of the driver. Each session is one tab.
///
/// Navigation targets go through the same private-address guard as
/// [`crate::ReqwestFetcher`] unless [`allow_private_urls`](Self::allow_private_urls)
/// is set.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use sieve_client::ChromeDriver;
/// use sieve_core::traits::{BrowserDriver, BrowserSession};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let driver = ChromeDriver::new();
/// let mut session = driver.open_session().await?;
/// session.navigate("https://example.com", Duration::from_secs(30)).await?;
/// let html = session.rendered_html().await?;
/// session.close().await;
/// println!("{}", &html[..200]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChromeDriver {
    browser: Arc<OnceCell<Browser>>,
    executable: Option<PathBuf>,
    ssrf_protection: bool,
}

impl Default for ChromeDriver {
    fn default() -> Self {
        Self {
            browser: Arc::new(OnceCell::new()),
            executable: None,
            ssrf_protection: true,
        }
    }
}

impl ChromeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch this Chromium binary instead of searching for one.
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    /// Let sessions navigate to private/reserved addresses.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    async fn browser(&self) -> Result<&Browser, AppError> {
        self.browser
            .get_or_try_init(|| launch(self.resolve_executable()))
            .await
    }

    /// Explicit path first, then `SIEVE_CHROME_BIN`. `None` leaves the
    /// lookup to chromiumoxide.
    fn resolve_executable(&self) -> Option<PathBuf> {
        self.executable.clone().or_else(|| {
            std::env::var_os(CHROME_BIN_VAR)
                .map(PathBuf::from)
                .filter(|path| path.exists())
        })
    }
}

async fn launch(executable: Option<PathBuf>) -> Result<Browser, AppError> {
    let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();
    if let Some(bin) = executable {
        tracing::info!(binary = %bin.display(), "Using Chrome binary");
        builder = builder.chrome_executable(bin);
    }

    let config = builder
        .arg("--headless=new")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--no-first-run")
        .build()
        .map_err(|e| AppError::Browser(format!("Browser config error: {e}")))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| AppError::Browser(format!("Failed to launch browser: {e}")))?;

    // The CDP handler must be polled continuously for the connection to work.
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                tracing::warn!(error = %e, "Browser CDP handler error");
                break;
            }
        }
    });

    tracing::info!("Headless browser launched");
    Ok(browser)
}

impl BrowserDriver for ChromeDriver {
    type Session = ChromeSession;

    async fn open_session(&self) -> Result<ChromeSession, AppError> {
        let page = self
            .browser()
            .await?
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::Browser(format!("Failed to open tab: {e}")))?;
        Ok(ChromeSession {
            page: Some(page),
            ssrf_protection: self.ssrf_protection,
        })
    }
}

/// One browser tab. Closed explicitly via [`BrowserSession::close`], or in
/// the background when dropped.
pub struct ChromeSession {
    page: Option<Page>,
    ssrf_protection: bool,
}

impl ChromeSession {
    fn page(&self) -> Result<&Page, AppError> {
        self.page
            .as_ref()
            .ok_or_else(|| AppError::Browser("session already closed".into()))
    }
}

impl BrowserSession for ChromeSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }
        let page = self.page()?;
        match tokio::time::timeout(timeout, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(AppError::Browser(format!("Failed to navigate to {url}: {e}"))),
            Err(_) => Err(AppError::Timeout(timeout.as_secs())),
        }
    }

    async fn wait_for_ready(&mut self, timeout: Duration) -> Result<(), AppError> {
        let page = self.page()?;
        let poll = async {
            loop {
                if page.find_element("body").await.is_ok() {
                    return;
                }
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| AppError::Browser(format!("Page did not render <body> within {timeout:?}")))
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), AppError> {
        self.page()?
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .map(|_| ())
            .map_err(|e| AppError::Browser(format!("Scroll failed: {e}")))
    }

    async fn rendered_html(&mut self) -> Result<String, AppError> {
        self.page()?
            .content()
            .await
            .map_err(|e| AppError::Browser(format!("Failed to read page content: {e}")))
    }

    async fn close(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                tracing::debug!(error = %e, "Failed to close browser tab");
            }
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let _ = page.close().await;
                });
            }
            Err(_) => tracing::warn!("Browser tab dropped outside a runtime; it will leak"),
        }
    }
}
