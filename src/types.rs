use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a rate sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provenance {
    Live,
    CacheMemory,
    CacheFile,
    Default,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Live => "LIVE",
            Provenance::CacheMemory => "CACHE_MEMORY",
            Provenance::CacheFile => "CACHE_FILE",
            Provenance::Default => "DEFAULT",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation of the USD/JPY rate. Fields are private so a sample can
/// only be built through the checked constructors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    value: f64,
    observed_at: DateTime<Utc>,
    provenance: Provenance,
    stale: bool,
}

impl RateSample {
    /// Returns `None` unless `value` is finite and strictly positive.
    pub fn new(value: f64, observed_at: DateTime<Utc>, provenance: Provenance) -> Option<Self> {
        if !value.is_finite() || value <= 0.0 {
            return None;
        }
        Some(Self {
            value,
            observed_at,
            provenance,
            stale: false,
        })
    }

    /// Sample with `Default` provenance. Falls back to the built-in rate when
    /// `value` is unusable.
    pub fn default_rate(value: f64, observed_at: DateTime<Utc>) -> Self {
        Self::new(value, observed_at, Provenance::Default).unwrap_or(Self {
            value: crate::config::DEFAULT_RATE,
            observed_at,
            provenance: Provenance::Default,
            stale: false,
        })
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// True when served past its tier TTL because every provider failed.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn is_live(&self) -> bool {
        self.provenance == Provenance::Live
    }

    pub(crate) fn with_provenance(self, provenance: Provenance) -> Self {
        Self { provenance, ..self }
    }

    pub(crate) fn into_stale(self) -> Self {
        Self {
            stale: true,
            ..self
        }
    }
}

/// Opaque message identifier. Chat platforms hand out numeric snowflakes, so
/// both JSON numbers and strings are accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawId", into = "String")]
pub struct MessageId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Str(String),
    Num(u64),
}

impl From<RawId> for MessageId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Str(s) => MessageId(s),
            RawId::Num(n) => MessageId(n.to_string()),
        }
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId(s.to_string())
    }
}

impl From<u64> for MessageId {
    fn from(n: u64) -> Self {
        MessageId(n.to_string())
    }
}

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
