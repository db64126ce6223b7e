//! Single entry point for "what is 1 USD in JPY right now".

use crate::cache::TieredCache;
use crate::error::{summarize_failures, FailureKind, FetchError};
use crate::notify::{Alert, Fallback, Notifier};
use crate::providers::{LiveFetch, ProviderChain};
use crate::types::RateSample;
use chrono::Utc;
use log::{info, warn};
use std::time::Duration;

/// Owns all rate state for the process: cache tiers, provider chain and the
/// default. Constructed once and handed to the relay by `&mut`.
pub struct RateResolver {
    cache: TieredCache,
    chain: ProviderChain,
    notifier: Notifier,
    default_rate: f64,
}

impl RateResolver {
    pub fn new(
        cache: TieredCache,
        chain: ProviderChain,
        notifier: Notifier,
        default_rate: f64,
    ) -> Self {
        Self {
            cache,
            chain,
            notifier,
            default_rate,
        }
    }

    /// Always yields a usable rate: fresh cache, then live, then the stale
    /// file value, then the default. A degraded result raises one alert, as
    /// does a live result reached only after earlier providers failed.
    pub async fn resolve_rate(&mut self) -> RateSample {
        if let Some(sample) = self.cache.get() {
            return sample;
        }

        let failure = match self.chain.fetch_live().await {
            Ok(live) => {
                if let Some(alert) = recovered_alert(&live) {
                    self.notifier.notify(alert);
                }
                let sample = live.sample;
                if let Err(e) = self.cache.put(sample) {
                    warn!("failed to persist rate cache: {}", e);
                    self.notifier.notify(Alert::new(
                        FailureKind::FileError,
                        format!("Error saving rate cache: {}", e),
                    ));
                }
                return sample;
            }
            Err(e) => e,
        };

        let (sample, fallback) = match self.cache.stale() {
            Some(stale) => {
                let sample = stale.into_stale();
                info!(
                    "using stale {} rate {} observed at {}",
                    sample.provenance(),
                    sample.value(),
                    sample.observed_at()
                );
                let fallback = Fallback::StaleCache {
                    rate: sample.value(),
                    observed_at: sample.observed_at(),
                };
                (sample, fallback)
            }
            None => {
                let sample = RateSample::default_rate(self.default_rate, Utc::now());
                info!("using default rate {}", sample.value());
                let fallback = Fallback::Default {
                    rate: sample.value(),
                };
                (sample, fallback)
            }
        };
        self.notifier.notify(degraded_alert(&failure).with_fallback(fallback));
        sample
    }

    pub fn latency_ceiling(&self) -> Duration {
        self.chain.latency_ceiling()
    }

}

fn degraded_alert(failure: &FetchError) -> Alert {
    Alert::new(failure.primary_kind(), failure.to_string())
}

fn recovered_alert(live: &LiveFetch) -> Option<Alert> {
    let first = live.failures.first()?;
    Some(Alert::new(
        first.error.kind(),
        format!(
            "live rate obtained from {} after failures ({})",
            live.provider,
            summarize_failures(&live.failures)
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileTier;
    use crate::config::FileTierMode;
    use crate::error::ProviderError;
    use crate::providers::RateProvider;
    use crate::types::Provenance;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixed {
        rate: Option<f64>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RateProvider for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn max_latency(&self) -> Duration {
            Duration::from_secs(10)
        }

        async fn fetch_rate(&self) -> Result<f64, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.rate.ok_or(ProviderError::Transport("connection refused".into()))
        }
    }

    fn resolver(
        dir: &TempDir,
        rate: Option<f64>,
        mode: FileTierMode,
    ) -> (RateResolver, Arc<AtomicUsize>, tokio::sync::mpsc::UnboundedReceiver<Alert>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ProviderChain::new(vec![Box::new(Fixed {
            rate,
            calls: calls.clone(),
        })]);
        let cache = TieredCache::new(
            Duration::from_secs(300),
            FileTier::new(dir.path().join("rate_cache.json"), Duration::from_secs(3 * 3600)),
            mode,
        );
        let (notifier, rx) = Notifier::channel();
        (RateResolver::new(cache, chain, notifier, 150.0), calls, rx)
    }

    fn aged(value: f64, secs: i64) -> RateSample {
        RateSample::new(value, Utc::now() - chrono::Duration::seconds(secs), Provenance::Live)
            .unwrap()
    }

    #[tokio::test]
    async fn live_result_is_cached() {
        let dir = TempDir::new().unwrap();
        let (mut r, calls, mut rx) = resolver(&dir, Some(151.0), FileTierMode::ServeWhileFresh);
        let first = r.resolve_rate().await;
        assert_eq!(first.provenance(), Provenance::Live);
        let second = r.resolve_rate().await;
        assert_eq!(second.value(), 151.0);
        assert_eq!(second.provenance(), Provenance::CacheMemory);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
        assert!(dir.path().join("rate_cache.json").exists());
    }

    #[tokio::test]
    async fn fresh_memory_skips_providers() {
        let dir = TempDir::new().unwrap();
        let (mut r, calls, _rx) = resolver(&dir, Some(151.0), FileTierMode::ServeWhileFresh);
        r.cache.put(aged(109.50, 10)).unwrap();
        let s = r.resolve_rate().await;
        assert_eq!(s.value(), 109.50);
        assert_eq!(s.provenance(), Provenance::CacheMemory);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn total_failure_without_cache_uses_default_and_alerts_once() {
        let dir = TempDir::new().unwrap();
        let (mut r, _calls, mut rx) = resolver(&dir, None, FileTierMode::ServeWhileFresh);
        let s = r.resolve_rate().await;
        assert_eq!(s.value(), 150.0);
        assert_eq!(s.provenance(), Provenance::Default);
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.kind, FailureKind::ConnectionError);
        assert_eq!(alert.fallback, Some(Fallback::Default { rate: 150.0 }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fallback_only_mode_tries_live_before_file() {
        let dir = TempDir::new().unwrap();
        FileTier::new(dir.path().join("rate_cache.json"), Duration::from_secs(3 * 3600))
            .store(&aged(148.0, 2 * 3600))
            .unwrap();
        let (mut r, calls, mut rx) = resolver(&dir, None, FileTierMode::FallbackOnly);
        let s = r.resolve_rate().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.value(), 148.0);
        assert_eq!(s.provenance(), Provenance::CacheFile);
        assert!(s.is_stale());
        assert!(matches!(
            rx.try_recv().unwrap().fallback,
            Some(Fallback::StaleCache { .. })
        ));
    }

    #[tokio::test]
    async fn expired_file_is_stale_fallback() {
        let dir = TempDir::new().unwrap();
        FileTier::new(dir.path().join("rate_cache.json"), Duration::from_secs(3 * 3600))
            .store(&aged(147.0, 10 * 3600))
            .unwrap();
        let (mut r, calls, _rx) = resolver(&dir, None, FileTierMode::ServeWhileFresh);
        let s = r.resolve_rate().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(s.value(), 147.0);
        assert!(s.is_stale());
    }

    #[tokio::test]
    async fn persistence_failure_alerts_but_returns_live() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = TieredCache::new(
            Duration::from_secs(300),
            FileTier::new(dir.path().join("nope/rate_cache.json"), Duration::from_secs(3600)),
            FileTierMode::ServeWhileFresh,
        );
        let chain = ProviderChain::new(vec![Box::new(Fixed {
            rate: Some(152.0),
            calls,
        })]);
        let (notifier, mut rx) = Notifier::channel();
        let mut r = RateResolver::new(cache, chain, notifier, 150.0);
        let s = r.resolve_rate().await;
        assert!(s.is_live());
        assert_eq!(rx.try_recv().unwrap().kind, FailureKind::FileError);
        assert_eq!(r.resolve_rate().await.provenance(), Provenance::CacheMemory);
    }

    #[tokio::test]
    async fn recovery_by_a_later_provider_alerts_once() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ProviderChain::new(vec![
            Box::new(Fixed {
                rate: None,
                calls: calls.clone(),
            }),
            Box::new(Fixed {
                rate: Some(149.5),
                calls: calls.clone(),
            }),
        ]);
        let cache = TieredCache::new(
            Duration::from_secs(300),
            FileTier::new(dir.path().join("rate_cache.json"), Duration::from_secs(3600)),
            FileTierMode::ServeWhileFresh,
        );
        let (notifier, mut rx) = Notifier::channel();
        let mut r = RateResolver::new(cache, chain, notifier, 150.0);

        let s = r.resolve_rate().await;
        assert_eq!(s.value(), 149.5);
        assert!(s.is_live());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.kind, FailureKind::ConnectionError);
        assert_eq!(alert.fallback, None);
        assert!(alert.detail.contains("connection refused"));
        assert!(rx.try_recv().is_err());
    }
}
