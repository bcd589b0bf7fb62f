use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use sieve_core::error::AppError;
use sieve_core::traits::Fetcher;
use sieve_core::util::parse_target;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; Sieve/0.1; +https://github.com/sieve-rs/sieve)";

/// Static HTTP fetcher using reqwest.
///
/// Makes exactly one attempt per call and classifies failures: 429/5xx,
/// timeouts and dropped connections are transient, everything else
/// (other 4xx, DNS failure) is permanent. Private targets fail with
/// [`AppError::BlockedTarget`]. Retries belong to
/// [`sieve_core::strategy::FetchStrategySelector`].
///
/// SSRF protection is **enabled** by default: requests to private/reserved
/// IP ranges are blocked. Use [`allow_private_urls`](Self::allow_private_urls)
/// to disable this (e.g., for CLI usage where the user controls the machine).
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    ssrf_protection: bool,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    ///
    /// Only use this for CLI usage where the user controls the machine.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<String, AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_send_error(&e, url, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::from_status(status.as_u16(), url));
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(timeout.as_secs())
            } else {
                AppError::TransientFetch(format!("Failed to read response body from {url}: {e}"))
            }
        })
    }
}

fn classify_send_error(e: &reqwest::Error, url: &str, timeout: Duration) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout.as_secs())
    } else if e.is_connect() {
        if is_dns_failure(e) {
            AppError::PermanentFetch(format!("DNS resolution failed for {url}: {e}"))
        } else {
            AppError::TransientFetch(format!("Connection failed for {url}: {e}"))
        }
    } else if e.is_builder() || e.is_redirect() {
        AppError::PermanentFetch(format!("Request to {url} failed: {e}"))
    } else {
        AppError::TransientFetch(format!("Request to {url} failed: {e}"))
    }
}

/// hyper-util reports resolver failures as connect errors; the source
/// chain is the only place that tells them apart.
fn is_dns_failure(e: &reqwest::Error) -> bool {
    let chain = format!("{e:?}").to_lowercase();
    chain.contains("dns error") || chain.contains("failed to lookup address")
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Refuse targets that resolve to private/reserved addresses.
///
/// IP literals are checked directly; hostnames are resolved and every
/// returned address must be public. Shared with the browser driver.
pub(crate) async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed = parse_target(url)?;
    let host = parsed.host_str().unwrap_or_default();

    if let Ok(ip) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return ensure_public(host, ip);
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::PermanentFetch(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::PermanentFetch(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }
    addrs
        .iter()
        .try_for_each(|addr| ensure_public(host, addr.ip()))
}

fn ensure_public(host: &str, ip: IpAddr) -> Result<(), AppError> {
    if is_private_ip(ip) {
        return Err(AppError::BlockedTarget(format!(
            "{host} resolves to private/reserved IP {ip}"
        )));
    }
    Ok(())
}

/// Loopback, private, link-local (cloud metadata), CGN, documentation and
/// unspecified ranges, plus IPv4-mapped forms of those.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || (a == 100 && (b & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xFFC0) == 0xFE80
                || (first & 0xFE00) == 0xFC00
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}
