use super::{positive_rate, KeySelectionPolicy, ProviderId, ProviderKey, ProviderReply, RateProvider};
use crate::error::ProviderError;
use crate::http::{self, mask_key};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Alpha Vantage `CURRENCY_EXCHANGE_RATE`, rotated across a pool of keys.
///
/// Each call starts from the full configured pool. A key that fails in any
/// way (429, bad body, transport) is dropped for the rest of that call and
/// is never retried within it.
pub struct AlphaVantageProvider {
    client: Client,
    base_url: String,
    keys: Vec<ProviderKey>,
    policy: Box<dyn KeySelectionPolicy>,
    timeout: Duration,
}

impl AlphaVantageProvider {
    pub fn new(
        client: Client,
        base_url: String,
        keys: Vec<String>,
        policy: Box<dyn KeySelectionPolicy>,
        timeout: Duration,
    ) -> Self {
        let keys = keys
            .into_iter()
            .map(|k| ProviderKey::new(ProviderId::AlphaVantage, k))
            .collect();
        Self {
            client,
            base_url,
            keys,
            policy,
            timeout,
        }
    }

    fn url_for(&self, key: &ProviderKey) -> Result<String, ProviderError> {
        let url = url::Url::parse_with_params(
            &self.base_url,
            &[
                ("function", "CURRENCY_EXCHANGE_RATE"),
                ("from_currency", "USD"),
                ("to_currency", "JPY"),
                ("apikey", key.secret.as_str()),
            ],
        )
        .map_err(|e| ProviderError::Transport(format!("invalid Alpha Vantage URL: {}", e)))?;
        Ok(url.into())
    }

    async fn query(&self, key: &ProviderKey) -> Result<f64, ProviderError> {
        let url = self.url_for(key)?;
        let raw = http::get_text(&self.client, &url, &key.secret).await?;
        parse_reply(raw.status, &raw.body).into_result()
    }
}

/// Expected body:
/// `{"Realtime Currency Exchange Rate": {"5. Exchange Rate": "151.2300", ...}}`.
/// Throttled or rejected keys get a 200 with an `Information` / `Note` text
/// instead, which is reported as a schema error.
pub fn parse_reply(status: StatusCode, body: &str) -> ProviderReply {
    if !status.is_success() {
        return ProviderReply::HttpError(status);
    }
    let v: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return ProviderReply::SchemaError(format!("body is not JSON: {}", e)),
    };
    let rate = v
        .get("Realtime Currency Exchange Rate")
        .and_then(|r| r.get("5. Exchange Rate"))
        .and_then(positive_rate);
    match rate {
        Some(rate) => ProviderReply::Success(rate),
        None => {
            let reason = ["Information", "Note", "Error Message"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|x| x.as_str()))
                .unwrap_or("Unknown error");
            ProviderReply::SchemaError(format!("missing exchange rate: {}", reason))
        }
    }
}

#[async_trait]
impl RateProvider for AlphaVantageProvider {
    fn name(&self) -> &'static str {
        ProviderId::AlphaVantage.as_str()
    }

    fn max_latency(&self) -> Duration {
        self.timeout * self.keys.len() as u32
    }

    async fn fetch_rate(&self) -> Result<f64, ProviderError> {
        if self.keys.is_empty() {
            return Err(ProviderError::MissingKey);
        }
        let mut pool: Vec<&ProviderKey> = self.keys.iter().collect();
        let mut attempts = 0usize;
        let mut last = None;
        while !pool.is_empty() {
            let idx = self.policy.pick(pool.len()).min(pool.len() - 1);
            let key = pool[idx];
            attempts += 1;
            debug!("alpha_vantage trying key {}", mask_key(&key.secret));
            match self.query(key).await {
                Ok(rate) => return Ok(rate),
                Err(e) => {
                    warn!(
                        "alpha_vantage key {} dropped ({}): {}",
                        mask_key(&key.secret),
                        e.kind(),
                        e
                    );
                    pool.remove(idx);
                    last = Some(e);
                }
            }
        }
        Err(ProviderError::Exhausted {
            attempts,
            last: Box::new(last.unwrap_or(ProviderError::MissingKey)),
        })
    }
}
