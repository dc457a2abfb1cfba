//! The crate's error currency. See module docs on [`CacheError`] for the
//! propagation policy: almost every variant here degrades to cache-miss
//! semantics rather than failing a request that would have succeeded
//! without the cache.

use thiserror::Error;

/// A `Result` typedef to use with the [`CacheError`] type.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by the cache engine.
///
/// None of these (other than [`CacheError::Cancelled`]) should ever fail a
/// request that would have succeeded without caching — see spec §7.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Storage or origin I/O failure. Treated as a miss in `get*` paths; the
    /// entry is simply not cached in `store` paths.
    #[error("cache storage I/O error: {0}")]
    Io(#[source] std::io::Error),

    /// A storage backend reported a failure that isn't a plain `io::Error`
    /// (e.g. a `cacache` integrity error).
    #[error("cache backend error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A stored entry failed to (de)serialize. Treated as a miss.
    #[error("cache entry serialization error: {0}")]
    Serialization(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// `maxUpdateRetries` was exhausted on a CAS loop.
    #[error("gave up updating cache entry after repeated CAS conflicts")]
    CacheUpdateFailure,

    /// A malformed directive or header value. Value defaults absorb these;
    /// this variant exists mostly so the parser can report *why* it fell
    /// back, for logging.
    #[error("malformed cache-control or header value: {0}")]
    Protocol(String),

    /// The request/host pair cannot be turned into a cache key.
    #[error("cannot derive a cache key for this request: {0}")]
    InvalidUri(String),

    /// A header name or value could not be constructed.
    #[error("invalid header: {0}")]
    Header(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The caller cancelled the operation. Surfaced verbatim.
    #[error("operation cancelled")]
    Cancelled,
}

impl CacheError {
    /// True for every variant that the propagation policy (spec §7) says
    /// must degrade to a cache-miss instead of failing the caller's request.
    pub fn is_miss_equivalent(&self) -> bool {
        !matches!(self, CacheError::Cancelled)
    }
}

impl From<http::Error> for CacheError {
    fn from(e: http::Error) -> Self {
        CacheError::Header(Box::new(e))
    }
}

impl From<http::header::ToStrError> for CacheError {
    fn from(e: http::header::ToStrError) -> Self {
        CacheError::Header(Box::new(e))
    }
}

impl From<http::header::InvalidHeaderValue> for CacheError {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        CacheError::Header(Box::new(e))
    }
}

impl From<http::header::InvalidHeaderName> for CacheError {
    fn from(e: http::header::InvalidHeaderName) -> Self {
        CacheError::Header(Box::new(e))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(e)
    }
}

impl From<url::ParseError> for CacheError {
    fn from(e: url::ParseError) -> Self {
        CacheError::InvalidUri(e.to_string())
    }
}
