use super::{positive_rate, ProviderId, ProviderKey, ProviderReply, RateProvider};
use crate::error::ProviderError;
use crate::http::{self, encode_path_segment};
use async_trait::async_trait;
use log::warn;
use reqwest::{Client, StatusCode};
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 2;

/// ExchangeRate-API v6 pair endpoint with a single key and one retry.
pub struct ExchangeRateApiProvider {
    client: Client,
    base_url: String,
    key: Option<ProviderKey>,
    timeout: Duration,
    retry_delay: Duration,
}

impl ExchangeRateApiProvider {
    pub fn new(
        client: Client,
        base_url: String,
        key: Option<String>,
        timeout: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.map(|k| ProviderKey::new(ProviderId::ExchangeRateApi, k)),
            timeout,
            retry_delay,
        }
    }

    async fn query(&self, key: &ProviderKey) -> Result<f64, ProviderError> {
        let url = format!(
            "{}/{}/pair/USD/JPY",
            self.base_url,
            encode_path_segment(&key.secret)
        );
        let raw = http::get_text(&self.client, &url, &key.secret).await?;
        parse_reply(raw.status, &raw.body).into_result()
    }
}

/// `error-type` values the API documents for a failed lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiErrorType {
    InvalidKey,
    InactiveAccount,
    QuotaReached,
    Other(String),
}

impl ApiErrorType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "invalid-key" => ApiErrorType::InvalidKey,
            "inactive-account" => ApiErrorType::InactiveAccount,
            "quota-reached" => ApiErrorType::QuotaReached,
            other => ApiErrorType::Other(other.to_string()),
        }
    }

    /// Key and quota problems are reported the way an HTTP API would report
    /// them; everything else is a schema-level rejection.
    fn into_reply(self) -> ProviderReply {
        match self {
            ApiErrorType::InvalidKey | ApiErrorType::InactiveAccount => {
                ProviderReply::HttpError(StatusCode::UNAUTHORIZED)
            }
            ApiErrorType::QuotaReached => ProviderReply::HttpError(StatusCode::TOO_MANY_REQUESTS),
            ApiErrorType::Other(raw) => ProviderReply::SchemaError(format!("error-type: {}", raw)),
        }
    }
}

/// Expected body: `{"result": "success", "conversion_rate": 151.2}`.
/// Errors come back as `{"result": "error", "error-type": "..."}`, often
/// with a 4xx status, so the body is inspected before the status.
pub fn parse_reply(status: StatusCode, body: &str) -> ProviderReply {
    let v: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) if !status.is_success() => return ProviderReply::HttpError(status),
        Err(e) => return ProviderReply::SchemaError(format!("body is not JSON: {}", e)),
    };
    if v.get("result").and_then(|r| r.as_str()) != Some("success") {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ProviderReply::HttpError(status);
        }
        let error_type = v
            .get("error-type")
            .and_then(|e| e.as_str())
            .unwrap_or("Unknown error");
        return ApiErrorType::parse(error_type).into_reply();
    }
    match v.get("conversion_rate").and_then(positive_rate) {
        Some(rate) => ProviderReply::Success(rate),
        None => ProviderReply::SchemaError("missing numeric conversion_rate".to_string()),
    }
}

#[async_trait]
impl RateProvider for ExchangeRateApiProvider {
    fn name(&self) -> &'static str {
        ProviderId::ExchangeRateApi.as_str()
    }

    fn max_latency(&self) -> Duration {
        if self.key.is_none() {
            return Duration::ZERO;
        }
        self.timeout * MAX_ATTEMPTS + self.retry_delay * (MAX_ATTEMPTS - 1)
    }

    async fn fetch_rate(&self) -> Result<f64, ProviderError> {
        let key = self.key.as_ref().ok_or(ProviderError::MissingKey)?;
        let mut attempt = 1;
        loop {
            match self.query(key).await {
                Ok(rate) => return Ok(rate),
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!(
                        "exchangerate_api attempt {} failed ({}): {}; retrying in {:?}",
                        attempt,
                        e.kind(),
                        e,
                        self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(ProviderError::Exhausted {
                        attempts: attempt as usize,
                        last: Box::new(e),
                    })
                }
            }
        }
    }
}
