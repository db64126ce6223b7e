use crate::config::Config;
use crate::error::ProviderError;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Raw upstream answer: status plus body text. Bodies are parsed by the
/// provider that asked for them.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Shared client for all providers. The timeout applies to every call and is
/// the only deadline a provider request gets.
pub fn build_client(cfg: &Config) -> reqwest::Result<Client> {
    let mut default_headers = HeaderMap::new();
    if let Ok(ua) = HeaderValue::from_str(&cfg.user_agent) {
        default_headers.insert(USER_AGENT, ua);
    }
    default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    Client::builder()
        .default_headers(default_headers)
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .use_rustls_tls()
        .build()
}

/// One GET, no retries. Transport failures and timeouts map to
/// `ProviderError::Transport`; any HTTP status is returned as-is. `secret` is
/// the API key embedded in `url` and is masked wherever the URL is logged.
pub async fn get_text(
    client: &Client,
    url: &str,
    secret: &str,
) -> Result<RawResponse, ProviderError> {
    let res = client.get(url).send().await?;
    let status = res.status();
    let body = res.text().await?;
    debug!(
        "GET {} -> {} ({} bytes)",
        redact_url(url, secret),
        status,
        body.len()
    );
    Ok(RawResponse { status, body })
}

/// Keep only the last four characters of a secret for logs and alerts.
pub fn mask_key(key: &str) -> String {
    let n = key.chars().count();
    if n <= 4 {
        return "*".repeat(n);
    }
    let tail: String = key.chars().skip(n - 4).collect();
    format!("{}{}", "*".repeat(n - 4), tail)
}

/// Strip the query string and mask `secret` wherever it appears in the
/// path, raw or percent-encoded.
pub fn redact_url(url: &str, secret: &str) -> String {
    let base = url.split('?').next().unwrap_or(url);
    if secret.is_empty() {
        return base.to_string();
    }
    let masked = mask_key(secret);
    base.replace(&encode_path_segment(secret), &masked)
        .replace(secret, &masked)
}

pub fn encode_path_segment(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}
