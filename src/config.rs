use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ALPHA_VANTAGE_URL: &str = "https://www.alphavantage.co/query";
pub const DEFAULT_EXCHANGERATE_API_URL: &str = "https://v6.exchangerate-api.com/v6";
pub const DEFAULT_RATE: f64 = 150.0;

/// How the file tier participates in a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTierMode {
    /// A fresh file record is served (and promoted) without a live fetch.
    ServeWhileFresh,
    /// The file record is only used after every provider failed.
    FallbackOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySelection {
    Random,
    RoundRobin,
    First,
}

/// Runtime configuration for the relay.
/// Values are sourced from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub alpha_vantage_keys: Vec<String>,
    pub exchangerate_api_key: Option<String>,
    pub alpha_vantage_url: String,
    pub exchangerate_api_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub memory_ttl_secs: u64,
    pub file_ttl_hours: u64,
    pub file_tier_mode: FileTierMode,
    pub rate_cache_file: PathBuf,
    pub processed_ids_file: PathBuf,
    pub ledger_max_ids: Option<usize>,
    pub default_rate: f64,
    pub key_selection: KeySelection,
    pub ops_channel_id: Option<String>,
    pub ops_webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alpha_vantage_keys: Vec::new(),
            exchangerate_api_key: None,
            alpha_vantage_url: DEFAULT_ALPHA_VANTAGE_URL.to_string(),
            exchangerate_api_url: DEFAULT_EXCHANGERATE_API_URL.to_string(),
            user_agent: format!("fx-relay/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 10,
            retry_delay_ms: 1_000,
            memory_ttl_secs: 300,
            file_ttl_hours: 3,
            file_tier_mode: FileTierMode::ServeWhileFresh,
            rate_cache_file: PathBuf::from("rate_cache.json"),
            processed_ids_file: PathBuf::from("processed_message_ids.json"),
            ledger_max_ids: None,
            default_rate: DEFAULT_RATE,
            key_selection: KeySelection::Random,
            ops_channel_id: None,
            ops_webhook_url: None,
        }
    }
}

impl Config {
    /// Load configuration from environment.
    ///
    /// Env vars:
    /// - ALPHA_VANTAGE_KEYS (comma-separated) / EXCHANGERATE_API_KEY
    /// - ALPHA_VANTAGE_URL / EXCHANGERATE_API_URL (provider base URLs)
    /// - RATE_HTTP_TIMEOUT_SECS (default: 10)
    /// - RATE_RETRY_DELAY_MS (default: 1000)
    /// - RATE_MEMORY_TTL_SECS (default: 300)
    /// - RATE_FILE_TTL_HOURS (default: 3)
    /// - RATE_FILE_TIER_MODE (serve | fallback-only)
    /// - RATE_CACHE_FILE / PROCESSED_IDS_FILE
    /// - LEDGER_MAX_IDS (default: 0, unbounded)
    /// - DEFAULT_RATE (default: 150.0)
    /// - KEY_SELECTION (random | round-robin | first)
    /// - OPS_CHANNEL_ID / OPS_WEBHOOK_URL
    /// - FX_RELAY_USER_AGENT
    ///
    /// Missing provider keys are not an error here; the provider is reported
    /// as unconfigured and fails fast at resolution time.
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let alpha_vantage_keys = env::var("ALPHA_VANTAGE_KEYS")
            .map(|raw| parse_key_list(&raw))
            .unwrap_or_default();
        let exchangerate_api_key = non_empty_var("EXCHANGERATE_API_KEY");

        let default_rate = match non_empty_var("DEFAULT_RATE") {
            Some(raw) => {
                let rate = raw
                    .parse::<f64>()
                    .map_err(|_| format!("DEFAULT_RATE is not a number: {}", raw))?;
                if !rate.is_finite() || rate <= 0.0 {
                    return Err(format!("DEFAULT_RATE must be positive, got {}", raw));
                }
                rate
            }
            None => defaults.default_rate,
        };

        let file_tier_mode = match non_empty_var("RATE_FILE_TIER_MODE").as_deref() {
            None | Some("serve") => FileTierMode::ServeWhileFresh,
            Some("fallback-only") => FileTierMode::FallbackOnly,
            Some(other) => return Err(format!("Unknown RATE_FILE_TIER_MODE: {}", other)),
        };

        let key_selection = match non_empty_var("KEY_SELECTION").as_deref() {
            None | Some("random") => KeySelection::Random,
            Some("round-robin") => KeySelection::RoundRobin,
            Some("first") => KeySelection::First,
            Some(other) => return Err(format!("Unknown KEY_SELECTION: {}", other)),
        };

        let ledger_max_ids = parse_var::<usize>("LEDGER_MAX_IDS").filter(|n| *n > 0);

        Ok(Self {
            alpha_vantage_keys,
            exchangerate_api_key,
            alpha_vantage_url: non_empty_var("ALPHA_VANTAGE_URL")
                .unwrap_or(defaults.alpha_vantage_url),
            exchangerate_api_url: non_empty_var("EXCHANGERATE_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.exchangerate_api_url),
            user_agent: non_empty_var("FX_RELAY_USER_AGENT").unwrap_or(defaults.user_agent),
            timeout_secs: parse_var("RATE_HTTP_TIMEOUT_SECS").unwrap_or(defaults.timeout_secs),
            retry_delay_ms: parse_var("RATE_RETRY_DELAY_MS").unwrap_or(defaults.retry_delay_ms),
            memory_ttl_secs: parse_var("RATE_MEMORY_TTL_SECS")
                .unwrap_or(defaults.memory_ttl_secs),
            file_ttl_hours: parse_var("RATE_FILE_TTL_HOURS").unwrap_or(defaults.file_ttl_hours),
            file_tier_mode,
            rate_cache_file: non_empty_var("RATE_CACHE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.rate_cache_file),
            processed_ids_file: non_empty_var("PROCESSED_IDS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.processed_ids_file),
            ledger_max_ids,
            default_rate,
            key_selection,
            ops_channel_id: non_empty_var("OPS_CHANNEL_ID"),
            ops_webhook_url: non_empty_var("OPS_WEBHOOK_URL"),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn memory_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_ttl_secs)
    }

    pub fn file_ttl(&self) -> Duration {
        Duration::from_secs(self.file_ttl_hours * 3600)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    non_empty_var(key).and_then(|s| s.parse::<T>().ok())
}

/// Split a comma-separated key list, dropping blanks and duplicates.
pub fn parse_key_list(raw: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in raw.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_list_trims_and_dedups() {
        assert_eq!(parse_key_list(" a, b ,,a,c "), vec!["a", "b", "c"]);
        assert!(parse_key_list("").is_empty());
        assert!(parse_key_list(" , ").is_empty());
    }

    #[test]
    fn default_ttls() {
        let cfg = Config::default();
        assert_eq!(cfg.memory_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.file_ttl(), Duration::from_secs(3 * 3600));
        assert_eq!(cfg.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.default_rate, 150.0);
    }
}
