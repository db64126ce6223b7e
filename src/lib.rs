pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod ledger;
pub mod notify;
pub mod providers;
pub mod relay;
pub mod resolver;
pub mod rewrite;
pub mod types;

pub use error::{FailureKind, FetchError, PersistenceError, ProviderError};
pub use resolver::RateResolver;
pub use types::{MessageId, Provenance, RateSample};
