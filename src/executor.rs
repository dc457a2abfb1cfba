//! C15 — the top-level orchestrator (§4.15): request policy gate,
//! invalidation, collapsing, suitability dispatch, conditional revalidation
//! with the Date-older unconditional retry, and background scheduling.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use log::warn;

use crate::cache::{self, Cache};
use crate::cache_control::{self, RequestCacheControl, ResponseCacheControl};
use crate::collapser::{Collapser, Entered};
use crate::config::CacheConfig;
use crate::conditional;
use crate::entry::{header_append, header_get, header_get_all, CacheHit, HeaderList};
use crate::error::Result;
use crate::invalidator;
use crate::key::{self, KeyableRequest};
use crate::request_policy;
use crate::response_gen::{self, GeneratedResponse};
use crate::response_policy::{self, ResponsePolicyInput};
use crate::revalidator::Revalidator;
use crate::serializer::Serializer;
use crate::storage::RawStorage;
use crate::suitability::{self, CacheSuitability, SuitabilityConfig};
use crate::validity;

/// The engine's one external collaborator: whatever actually sends a
/// request to the origin server (out of scope per spec §1).
#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, request: http::Request<()>) -> Result<OriginFetch>;
}

pub struct OriginFetch {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct ExecutorResponse {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Option<Vec<u8>>,
}

/// `x-cache`/`x-cache-lookup` header: HIT if a response existed in cache
/// (regardless of freshness), MISS otherwise.
const XCACHE: &str = "x-cache";
const XCACHELOOKUP: &str = "x-cache-lookup";

fn tag_cache_status(resp: &mut ExecutorResponse, enabled: bool, cache_lookup_hit: bool, cache_hit: bool) {
    if !enabled {
        return;
    }
    header_append(&mut resp.headers, XCACHELOOKUP, if cache_lookup_hit { "HIT" } else { "MISS" });
    header_append(&mut resp.headers, XCACHE, if cache_hit { "HIT" } else { "MISS" });
}

fn combined_request_header<R: KeyableRequest>(request: &R, name: &str) -> String {
    request.header_all(name).join(", ")
}

fn combined_response_header(headers: &HeaderList, name: &str) -> String {
    header_get_all(headers, name).join(", ")
}

pub struct Executor<S: RawStorage, Ser: Serializer> {
    cache: Cache<S, Ser>,
    collapser: Collapser,
    revalidator: Arc<Revalidator>,
    config: CacheConfig,
    origin: Arc<dyn Origin>,
}

impl<S: RawStorage + 'static, Ser: Serializer + 'static> Executor<S, Ser> {
    pub fn new(cache: Cache<S, Ser>, config: CacheConfig, origin: Arc<dyn Origin>) -> Arc<Self> {
        let revalidator = Revalidator::with_queue_size(config.asynchronous_workers, config.revalidation_queue_size);
        Arc::new(Self { cache, collapser: Collapser::new(), revalidator, config, origin })
    }

    /// §4.15 top-level entry point.
    pub async fn handle(self: &Arc<Self>, host: &str, request: http::Request<()>) -> Result<ExecutorResponse> {
        let request_cc = cache_control::parse_request(&combined_request_header(&request, "cache-control"));

        invalidator::invalidate_request_side(&self.cache, host, &request).await?;

        if !request_policy::is_eligible(request.version(), &request, &request_cc) {
            let sent_at = SystemTime::now();
            let fetched = self.origin.fetch(request.clone()).await?;
            let received_at = SystemTime::now();
            return self.process_origin_response(host, &request, fetched, sent_at, received_at).await;
        }

        if !self.config.collapse_requests {
            return self.serve(host, &request, &request_cc).await;
        }

        let root_key = key::root_key(host, &request).unwrap_or_default();
        let entered = self.collapser.enter(&root_key);

        if let Entered::Follower(shared) = &entered {
            let (tx, rx) = tokio::sync::oneshot::channel();
            self.collapser.wait(shared, move || {
                let _ = tx.send(());
            });
            let _ = rx.await;
        }

        let result = self.serve(host, &request, &request_cc).await;

        if let Entered::Leader(leader) = entered {
            self.collapser.complete(leader);
        }

        result
    }

    async fn serve(
        self: &Arc<Self>,
        host: &str,
        request: &http::Request<()>,
        request_cc: &RequestCacheControl,
    ) -> Result<ExecutorResponse> {
        let now = SystemTime::now();
        let m = self.cache.match_request(host, request).await?;

        let Some(hit) = m.hit else {
            if request_cc.only_if_cached {
                return Ok(self.status_response(504));
            }
            let mut resp = self.fetch_and_maybe_store(host, request).await?;
            tag_cache_status(&mut resp, self.config.cache_status_headers, false, false);
            return Ok(resp);
        };

        let response_cc =
            cache_control::parse_response(&combined_response_header(&hit.entry.response_headers, "cache-control"));
        let suitability = suitability::assess(
            request,
            &hit.entry,
            request_cc,
            &response_cc,
            now,
            SuitabilityConfig { shared_cache: self.config.shared_cache, max_ttl: self.config.max_ttl },
        );

        let cache_status_headers = self.config.cache_status_headers;
        match suitability {
            CacheSuitability::Fresh | CacheSuitability::FreshEnough => {
                let mut resp = self.to_executor_response(response_gen::generate(&hit.entry, now, &self.config.via_token))?;
                tag_cache_status(&mut resp, cache_status_headers, true, true);
                Ok(resp)
            }
            CacheSuitability::StaleWhileRevalidated => {
                let mut resp = self.to_executor_response(response_gen::generate(&hit.entry, now, &self.config.via_token))?;
                header_append(&mut resp.headers, "Warning", "110 localhost \"Response is stale\"");
                tag_cache_status(&mut resp, cache_status_headers, true, true);
                self.schedule_background_revalidation(host, request, &hit, &response_cc);
                Ok(resp)
            }
            CacheSuitability::RevalidationRequired => {
                let mut resp = self.revalidate(host, request, &hit, &response_cc, now).await?;
                tag_cache_status(&mut resp, cache_status_headers, true, false);
                Ok(resp)
            }
            CacheSuitability::Stale => {
                if request_cc.only_if_cached {
                    Ok(self.status_response(504))
                } else {
                    let mut resp = self.fetch_and_maybe_store(host, request).await?;
                    tag_cache_status(&mut resp, cache_status_headers, true, false);
                    Ok(resp)
                }
            }
            CacheSuitability::Mismatch => {
                if request_cc.only_if_cached {
                    Ok(self.status_response(504))
                } else {
                    let mut resp = self.fetch_and_maybe_store(host, request).await?;
                    tag_cache_status(&mut resp, cache_status_headers, true, false);
                    Ok(resp)
                }
            }
        }
    }

    /// Synchronous entry point for callers without a `tokio` runtime of
    /// their own; blocks the calling thread on the same async path
    /// `handle` uses. There is no separate decision logic for the blocking
    /// surface.
    pub fn handle_blocking(self: &Arc<Self>, host: &str, request: http::Request<()>) -> Result<ExecutorResponse> {
        futures::executor::block_on(self.handle(host, request))
    }

    fn status_response(&self, status: u16) -> ExecutorResponse {
        ExecutorResponse { status, headers: Vec::new(), body: None }
    }

    fn to_executor_response(&self, generated: GeneratedResponse) -> Result<ExecutorResponse> {
        let body = match generated.resource {
            Some(r) => Some(r.get()?.to_vec()),
            None => None,
        };
        Ok(ExecutorResponse { status: generated.status, headers: generated.headers, body })
    }

    /// §4.15 step 7: conditional revalidation, including the 304 merge
    /// path, the stale-if-error fallback on a 5xx, and the retry-once-
    /// unconditional fallback when the origin's `Date` is older than the
    /// cached entry's.
    async fn revalidate(
        self: &Arc<Self>,
        host: &str,
        request: &http::Request<()>,
        hit: &CacheHit,
        response_cc: &ResponseCacheControl,
        now: SystemTime,
    ) -> Result<ExecutorResponse> {
        let (parts, _) = request.clone().into_parts();
        let conditional_parts = conditional::build_conditional(&parts, response_cc, &hit.entry)?;
        let conditional_request = http::Request::from_parts(conditional_parts, ());

        let sent_at = SystemTime::now();
        let fetched = self.origin.fetch(conditional_request).await?;
        let received_at = SystemTime::now();

        if fetched.status == 304 {
            let origin_response = cache::OriginResponse {
                status: 304,
                headers: fetched.headers,
                body: None,
                request_sent_at: sent_at,
                response_received_at: received_at,
            };
            let refreshed = self.cache.update(hit, &origin_response).await?;
            return self.to_executor_response(response_gen::generate(&refreshed.entry, now, &self.config.via_token));
        }

        if fetched.status >= 500 {
            let age = validity::current_age(&hit.entry.response_headers, hit.entry.response_received_at, now);
            let freshness = validity::apply_max_ttl(
                validity::freshness_lifetime(&hit.entry.response_headers, response_cc, self.config.shared_cache),
                self.config.max_ttl,
            );
            let stale = (age - freshness).max(0);
            if suitability::is_suitable_if_error(
                &RequestCacheControl::default(),
                response_cc,
                stale,
                self.config.stale_if_error_enabled,
            ) {
                let mut resp = self.to_executor_response(response_gen::generate(&hit.entry, now, &self.config.via_token))?;
                header_append(&mut resp.headers, "Warning", "111 localhost \"Revalidation failed\"");
                return Ok(resp);
            }
            return Ok(ExecutorResponse { status: fetched.status, headers: fetched.headers, body: fetched.body });
        }

        let fetched_date = header_get(&fetched.headers, "date").and_then(|v| httpdate::parse_http_date(v).ok());
        let stored_date = header_get(&hit.entry.response_headers, "date").and_then(|v| httpdate::parse_http_date(v).ok());
        if let (Some(fd), Some(sd)) = (fetched_date, stored_date) {
            if fd < sd {
                let unconditional_parts = conditional::build_unconditional(&parts)?;
                let unconditional_request = http::Request::from_parts(unconditional_parts, ());
                return self.fetch_and_maybe_store(host, &unconditional_request).await;
            }
        }

        self.process_origin_response(host, request, fetched, sent_at, received_at).await
    }

    async fn fetch_and_maybe_store(self: &Arc<Self>, host: &str, request: &http::Request<()>) -> Result<ExecutorResponse> {
        let sent_at = SystemTime::now();
        let fetched = self.origin.fetch(request.clone()).await?;
        let received_at = SystemTime::now();
        self.process_origin_response(host, request, fetched, sent_at, received_at).await
    }

    async fn process_origin_response(
        self: &Arc<Self>,
        host: &str,
        request: &http::Request<()>,
        fetched: OriginFetch,
        sent_at: SystemTime,
        received_at: SystemTime,
    ) -> Result<ExecutorResponse> {
        invalidator::invalidate_response_side(&self.cache, host, request, fetched.status, &fetched.headers).await?;

        let response_cc = cache_control::parse_response(&combined_response_header(&fetched.headers, "cache-control"));
        let policy_input = ResponsePolicyInput {
            request_method: request.method().as_str(),
            request_version: request.version(),
            request_has_query: request.uri().query().is_some(),
            request_has_authorization: request.headers().contains_key(http::header::AUTHORIZATION),
            response_status: fetched.status,
            response_headers: &fetched.headers,
            response_cc: &response_cc,
            content_length: fetched.body.as_ref().map(|b| b.len() as u64),
        };

        if response_policy::is_cacheable(&policy_input, &self.config) {
            let origin_response = cache::OriginResponse {
                status: fetched.status,
                headers: fetched.headers.clone(),
                body: fetched.body.clone(),
                request_sent_at: sent_at,
                response_received_at: received_at,
            };
            if let Err(e) = self.cache.store(host, request, origin_response).await {
                warn!("failed to store cache entry for {host:?}: {e}");
            }
        }

        Ok(ExecutorResponse { status: fetched.status, headers: fetched.headers, body: fetched.body })
    }

    /// §4.15 step 6 / §4.14: schedules the conditional exchange in the
    /// background; same-key calls while one is pending are no-ops.
    fn schedule_background_revalidation(
        self: &Arc<Self>,
        host: &str,
        request: &http::Request<()>,
        hit: &CacheHit,
        response_cc: &ResponseCacheControl,
    ) {
        let Ok(root_key) = key::root_key(host, request) else { return };
        let original_request = request.clone();
        let (parts, _) = request.clone().into_parts();
        let Ok(conditional_parts) = conditional::build_conditional(&parts, response_cc, &hit.entry) else { return };
        let conditional_request = http::Request::from_parts(conditional_parts, ());

        let this = self.clone();
        let hit = hit.clone();
        let host = host.to_string();

        self.revalidator.schedule_revalidation(root_key, move || async move {
            let sent_at = SystemTime::now();
            match this.origin.fetch(conditional_request).await {
                Ok(fetched) if fetched.status == 304 => {
                    let origin_response = cache::OriginResponse {
                        status: 304,
                        headers: fetched.headers.clone(),
                        body: None,
                        request_sent_at: sent_at,
                        response_received_at: SystemTime::now(),
                    };
                    let _ = this.cache.update(&hit, &origin_response).await;
                    (304, fetched.headers)
                }
                Ok(fetched) if (200..300).contains(&fetched.status) => {
                    let status = fetched.status;
                    let _ = this
                        .process_origin_response(&host, &original_request, fetched, sent_at, SystemTime::now())
                        .await;
                    (status, Vec::new())
                }
                Ok(fetched) => (fetched.status, fetched.headers),
                Err(_) => (599, Vec::new()),
            }
        });
    }
}
