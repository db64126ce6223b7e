//! Upstream USD/JPY rate providers and the ordered chain over them.

pub mod alpha_vantage;
pub mod exchangerate_api;

use crate::config::{Config, KeySelection};
use crate::error::{FetchError, ProviderError, ProviderFailure};
use crate::types::{Provenance, RateSample};
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use reqwest::{Client, StatusCode};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub use alpha_vantage::AlphaVantageProvider;
pub use exchangerate_api::ExchangeRateApiProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderId {
    AlphaVantage,
    ExchangeRateApi,
}

impl ProviderId {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::AlphaVantage => "alpha_vantage",
            ProviderId::ExchangeRateApi => "exchangerate_api",
        }
    }
}

/// An API credential bound to the provider it belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderKey {
    pub secret: String,
    pub provider_id: ProviderId,
}

impl ProviderKey {
    pub fn new(provider_id: ProviderId, secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            provider_id,
        }
    }
}

// Never print the secret itself.
impl fmt::Debug for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderKey")
            .field("secret", &crate::http::mask_key(&self.secret))
            .field("provider_id", &self.provider_id)
            .finish()
    }
}

/// Parsed outcome of a single provider response.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderReply {
    Success(f64),
    SchemaError(String),
    HttpError(StatusCode),
}

impl ProviderReply {
    pub fn into_result(self) -> Result<f64, ProviderError> {
        match self {
            ProviderReply::Success(rate) => Ok(rate),
            ProviderReply::SchemaError(msg) => Err(ProviderError::InvalidResponse(msg)),
            ProviderReply::HttpError(StatusCode::TOO_MANY_REQUESTS) => {
                Err(ProviderError::QuotaExceeded)
            }
            ProviderReply::HttpError(status) => Err(ProviderError::Status(status)),
        }
    }
}

/// Parse a rate that upstream may send as a JSON number or a numeric string.
pub(crate) fn positive_rate(value: &serde_json::Value) -> Option<f64> {
    let rate = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

#[async_trait]
pub trait RateProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Worst-case wall time of one `fetch_rate` call.
    fn max_latency(&self) -> Duration;

    async fn fetch_rate(&self) -> Result<f64, ProviderError>;
}

/// Chooses which key of a pool to try next.
pub trait KeySelectionPolicy: Send + Sync + fmt::Debug {
    /// Index into a non-empty pool of `pool_len` keys.
    fn pick(&self, pool_len: usize) -> usize;
}

/// Uniform random choice; spreads quota use across keys.
#[derive(Debug, Default)]
pub struct RandomKey;

impl KeySelectionPolicy for RandomKey {
    fn pick(&self, pool_len: usize) -> usize {
        fastrand::usize(..pool_len)
    }
}

#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl KeySelectionPolicy for RoundRobin {
    fn pick(&self, pool_len: usize) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % pool_len
    }
}

#[derive(Debug, Default)]
pub struct FirstKey;

impl KeySelectionPolicy for FirstKey {
    fn pick(&self, _pool_len: usize) -> usize {
        0
    }
}

pub fn key_selection_policy(selection: KeySelection) -> Box<dyn KeySelectionPolicy> {
    match selection {
        KeySelection::Random => Box::new(RandomKey),
        KeySelection::RoundRobin => Box::new(RoundRobin::default()),
        KeySelection::First => Box::new(FirstKey),
    }
}

/// A live rate together with the failures of the higher-priority providers
/// that were tried before `provider` answered.
#[derive(Debug)]
pub struct LiveFetch {
    pub sample: RateSample,
    pub provider: &'static str,
    pub failures: Vec<ProviderFailure>,
}

/// Providers in priority order. The first valid rate wins.
pub struct ProviderChain {
    providers: Vec<Box<dyn RateProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Box<dyn RateProvider>>) -> Self {
        Self { providers }
    }

    /// Alpha Vantage (multi-key) first, ExchangeRate-API (single key) second.
    pub fn from_config(cfg: &Config, client: Client) -> Self {
        if cfg.alpha_vantage_keys.is_empty() {
            warn!("ALPHA_VANTAGE_KEYS not set; alpha_vantage will be skipped");
        }
        if cfg.exchangerate_api_key.is_none() {
            warn!("EXCHANGERATE_API_KEY not set; exchangerate_api will be skipped");
        }
        let alpha = AlphaVantageProvider::new(
            client.clone(),
            cfg.alpha_vantage_url.clone(),
            cfg.alpha_vantage_keys.clone(),
            key_selection_policy(cfg.key_selection),
            cfg.timeout(),
        );
        let exchangerate = ExchangeRateApiProvider::new(
            client,
            cfg.exchangerate_api_url.clone(),
            cfg.exchangerate_api_key.clone(),
            cfg.timeout(),
            cfg.retry_delay(),
        );
        Self::new(vec![Box::new(alpha), Box::new(exchangerate)])
    }

    /// Upper bound on one `fetch_live` call, and therefore on reply latency.
    pub fn latency_ceiling(&self) -> Duration {
        self.providers.iter().map(|p| p.max_latency()).sum()
    }

    pub async fn fetch_live(&self) -> Result<LiveFetch, FetchError> {
        let mut failures = Vec::new();
        for provider in &self.providers {
            let error = match provider.fetch_rate().await {
                Ok(rate) => match RateSample::new(rate, Utc::now(), Provenance::Live) {
                    Some(sample) => {
                        info!("live rate from {}: {}", provider.name(), rate);
                        return Ok(LiveFetch {
                            sample,
                            provider: provider.name(),
                            failures,
                        });
                    }
                    None => ProviderError::InvalidResponse(format!("unusable rate {}", rate)),
                },
                Err(error) => error,
            };
            warn!(
                "provider={} kind={} error={}",
                provider.name(),
                error.kind(),
                error
            );
            failures.push(ProviderFailure {
                provider: provider.name(),
                error,
            });
        }
        Err(FetchError { failures })
    }
}
