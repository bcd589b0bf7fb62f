use url::Url;

use crate::error::AppError;

/// Prefix `http://` onto a target that has no scheme.
///
/// Example: `"example.com/a"` → `"http://example.com/a"`
pub fn with_default_scheme(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

/// Parse a fetch target, accepting only absolute http(s) URLs with a host.
pub fn parse_target(raw: &str) -> Result<Url, AppError> {
    let url =
        Url::parse(raw).map_err(|e| AppError::PermanentFetch(format!("Invalid URL '{raw}': {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::PermanentFetch(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(AppError::PermanentFetch(format!("URL '{raw}' has no host")));
    }

    Ok(url)
}
