use reqwest::StatusCode;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Classification attached to every provider failure and to ops alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InvalidKey,
    RateLimitExceeded,
    ConnectionError,
    InvalidResponse,
    Unknown,
    FileError,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::InvalidKey => "invalid_key",
            FailureKind::RateLimitExceeded => "rate_limit_exceeded",
            FailureKind::ConnectionError => "connection_error",
            FailureKind::InvalidResponse => "invalid_response",
            FailureKind::Unknown => "unknown",
            FailureKind::FileError => "file_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no API key configured")]
    MissingKey,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),
    #[error("all {attempts} attempt(s) failed; last error: {last}")]
    Exhausted {
        attempts: usize,
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProviderError::MissingKey => FailureKind::InvalidKey,
            ProviderError::QuotaExceeded => FailureKind::RateLimitExceeded,
            ProviderError::InvalidResponse(_) => FailureKind::InvalidResponse,
            ProviderError::Transport(_) => FailureKind::ConnectionError,
            ProviderError::Status(s) => match *s {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FailureKind::InvalidKey,
                StatusCode::TOO_MANY_REQUESTS => FailureKind::RateLimitExceeded,
                _ => FailureKind::Unknown,
            },
            ProviderError::Exhausted { last, .. } => last.kind(),
        }
    }
}

// The request URL carries the API key, so it is dropped before formatting.
impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        let e = e.without_url();
        let mut msg = e.to_string();
        let mut cause = std::error::Error::source(&e);
        while let Some(inner) = cause {
            msg.push_str(": ");
            msg.push_str(&inner.to_string());
            cause = inner.source();
        }
        ProviderError::Transport(msg)
    }
}

/// One provider's failure inside a chain run.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: &'static str,
    pub error: ProviderError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.provider, self.error.kind(), self.error)
    }
}

#[derive(Debug, Error)]
#[error("all rate providers failed ({})", summarize_failures(.failures))]
pub struct FetchError {
    pub failures: Vec<ProviderFailure>,
}

impl FetchError {
    /// Kind of the first failure in priority order; `Unknown` for an empty chain.
    pub fn primary_kind(&self) -> FailureKind {
        self.failures
            .first()
            .map(|f| f.error.kind())
            .unwrap_or(FailureKind::Unknown)
    }
}

/// One-line, `; `-separated account of provider failures.
pub fn summarize_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no providers configured".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
