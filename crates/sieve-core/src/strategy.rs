//! Strategy selection: static fetch, browser rendering, or static with
//! browser fallback.
//!
//! The selector never fails past its boundary. Whatever goes wrong ends up
//! in [`FetchResult::error`].

use std::time::Instant;

use crate::config::FetchConfig;
use crate::error::AppError;
use crate::extract::extract_html;
use crate::models::{FetchRequest, FetchResult, Strategy};
use crate::traits::{BrowserDriver, BrowserSession, Fetcher};
use crate::util::parse_target;

#[derive(Clone)]
pub struct FetchStrategySelector<F, B>
where
    F: Fetcher,
    B: BrowserDriver,
{
    fetcher: F,
    browser: B,
    config: FetchConfig,
}

impl<F, B> FetchStrategySelector<F, B>
where
    F: Fetcher,
    B: BrowserDriver,
{
    pub fn new(fetcher: F, browser: B, config: FetchConfig) -> Self {
        Self {
            fetcher,
            browser,
            config,
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Obtain the document with the requested strategy and extract from it.
    pub async fn fetch(&self, request: &FetchRequest) -> FetchResult {
        let start = Instant::now();

        let outcome = match parse_target(&request.url) {
            Ok(_) => self.obtain(request).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok((html, used)) => {
                let elements = extract_html(&html, &request.elements);
                tracing::debug!(
                    url = %request.url,
                    strategy = %used,
                    elements = elements.len(),
                    "Fetch succeeded"
                );
                FetchResult::success(elements, used, start.elapsed())
            }
            Err(e) => {
                tracing::warn!(
                    url = %request.url,
                    strategy = %request.strategy,
                    error = %e,
                    "Fetch failed"
                );
                FetchResult::failure(e.to_string(), start.elapsed())
            }
        }
    }

    async fn obtain(&self, request: &FetchRequest) -> Result<(String, Strategy), AppError> {
        let url = request.url.as_str();
        match request.strategy {
            Strategy::Static => {
                let html = self.fetch_static(url, request).await?;
                Ok((html, Strategy::Static))
            }
            Strategy::Dynamic => {
                let html = self.fetch_dynamic(url).await?;
                Ok((html, Strategy::Dynamic))
            }
            Strategy::Auto => match self.fetch_static(url, request).await {
                Ok(html) => Ok((html, Strategy::Static)),
                Err(e @ AppError::BlockedTarget(_)) => Err(e),
                Err(e) => {
                    tracing::info!(%url, error = %e, "Static fetch failed, falling back to browser");
                    let html = self.fetch_dynamic(url).await?;
                    Ok((html, Strategy::Dynamic))
                }
            },
        }
    }

    /// Plain GET, retrying transient failures with exponential backoff.
    async fn fetch_static(&self, url: &str, request: &FetchRequest) -> Result<String, AppError> {
        let mut retry = 0;
        loop {
            match self.fetcher.fetch(url, request.timeout).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && retry < self.config.max_retries => {
                    retry += 1;
                    let delay = self.config.backoff_for(retry);
                    tracing::debug!(
                        %url,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying static fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Render in a fresh browser session. The session is closed on every path.
    async fn fetch_dynamic(&self, url: &str) -> Result<String, AppError> {
        let mut session = self.browser.open_session().await?;
        let result = self.render(&mut session, url).await;
        session.close().await;
        result
    }

    async fn render(&self, session: &mut B::Session, url: &str) -> Result<String, AppError> {
        let mut attempt = 1;
        loop {
            match session.navigate(url, self.config.page_load_timeout).await {
                Ok(()) => break,
                Err(e @ AppError::Timeout(_)) if attempt < self.config.nav_attempts => {
                    tracing::debug!(%url, attempt, error = %e, "Navigation timed out, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }

        session.wait_for_ready(self.config.ready_timeout).await?;
        session.scroll_to_bottom().await?;
        tokio::time::sleep(self.config.settle_delay).await;
        session.rendered_html().await
    }
}
