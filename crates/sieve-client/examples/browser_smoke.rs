/// Smoke-test for `ChromeDriver`.
///
/// Launches a headless Chromium, renders <https://example.com> through the
/// dynamic strategy, and verifies the extracted title and heading.
///
/// Run with:
///   cargo run --example browser_smoke --features browser
use sieve_client::{ChromeDriver, ReqwestFetcher};
use sieve_core::config::FetchConfig;
use sieve_core::models::{FetchRequest, Strategy};
use sieve_core::strategy::FetchStrategySelector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let selector =
        FetchStrategySelector::new(ReqwestFetcher::new()?, ChromeDriver::new(), FetchConfig::default());

    let url = "https://example.com";
    println!("Rendering {url} …");
    let result = selector
        .fetch(&FetchRequest::new(url).with_strategy(Strategy::Dynamic))
        .await;

    if let Some(err) = &result.error {
        anyhow::bail!("dynamic fetch failed: {err}");
    }
    assert_eq!(
        result.elements.get("title").and_then(|v| v.as_str()),
        Some("Example Domain"),
        "Unexpected title in rendered page"
    );

    println!("OK in {} ms", result.elapsed_ms);
    println!("{}", serde_json::to_string_pretty(&result.elements)?);
    Ok(())
}
