//! Recognized cache configuration options (spec §6 "Config").

use std::time::Duration;

/// Tuning knobs for the cache engine. Constructed via [`CacheConfig::default`]
/// and overridden field-by-field, the way the teacher crate's
/// `HttpCacheOptions` is used.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Responses larger than this are never cached.
    pub max_object_size: u64,
    /// Advisory entry count; enforced by the storage backend, not the engine.
    pub max_cache_entries: Option<usize>,
    /// CAS retry budget for `AbstractSerializingCacheStorage::update_entry`.
    pub max_update_retries: u32,
    /// Whether this cache instance behaves as a shared (vs. private) cache.
    pub shared_cache: bool,
    /// Never cache HTTP/1.0 responses to requests with a query string.
    pub never_cache_http10_responses_with_query: bool,
    /// HTTP/1.1 responses to requests with a query string require explicit
    /// freshness information to be cached.
    pub never_cache_http11_responses_with_query: bool,
    /// Default `stale-if-error` behavior when neither request nor response
    /// specifies a `stale-if-error` window.
    pub stale_if_error_enabled: bool,
    /// Number of background revalidation workers.
    pub asynchronous_workers: usize,
    /// Bound on outstanding scheduled revalidations.
    pub revalidation_queue_size: usize,
    /// Whether concurrent identical requests are collapsed into one origin
    /// fetch (C13).
    pub collapse_requests: bool,
    /// Product token used in the `Via` header on served responses.
    pub via_token: String,
    /// Whether to add the `x-cache`/`x-cache-lookup` telemetry headers.
    pub cache_status_headers: bool,
    /// Optional hard ceiling on freshness lifetime, applied after the normal
    /// RFC 9111 computation (e.g. for `IgnoreRules`-style deployments).
    pub max_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_object_size: 5 * 1024 * 1024,
            max_cache_entries: None,
            max_update_retries: 5,
            shared_cache: true,
            never_cache_http10_responses_with_query: true,
            never_cache_http11_responses_with_query: false,
            stale_if_error_enabled: false,
            asynchronous_workers: 4,
            revalidation_queue_size: 128,
            collapse_requests: true,
            via_token: "1.1 cache-core".to_string(),
            cache_status_headers: true,
            max_ttl: None,
        }
    }
}
