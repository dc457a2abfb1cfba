//! C9 — evicts entries invalidated by an unsafe request or its response
//! (§4.9): the request's own root/variants, same-origin `Content-Location`/
//! `Location` targets, and the GET-against-stored-HEAD corner case.

use crate::cache::Cache;
use crate::entry::{header_get, HeaderList};
use crate::error::Result;
use crate::key::{self, KeyableRequest};
use crate::serializer::Serializer;
use crate::storage::RawStorage;

const SAFE_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS", "TRACE"];

fn is_unsafe_method(method: &str) -> bool {
    !SAFE_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method))
}

/// Resolves `location` against `(host, request)`'s canonical URI and
/// returns the normalized root key only if the result is same-origin.
fn resolve_same_origin_key<R: KeyableRequest>(host: &str, request: &R, location: &str) -> Option<String> {
    let base = key::root_key(host, request).ok()?;
    let base_url = url::Url::parse(&base).ok()?;
    let resolved = base_url.join(location.trim()).ok()?;

    if resolved.scheme() != base_url.scheme()
        || resolved.host_str() != base_url.host_str()
        || resolved.port_or_known_default() != base_url.port_or_known_default()
    {
        return None;
    }

    let port = resolved.port_or_known_default()?;
    let mut path = resolved.path().to_string();
    if let Some(q) = resolved.query() {
        path.push('?');
        path.push_str(q);
    }
    if path.is_empty() {
        path = "/".to_string();
    }
    Some(format!("{}://{}:{}{}", resolved.scheme(), resolved.host_str()?, port, path))
}

/// Removes `root_key` and, if it was a variant root, every entry its
/// `variant_map` lists — root first, variants second (§3's lifecycle note).
async fn evict_root_and_variants<S: RawStorage, Ser: Serializer>(cache: &Cache<S, Ser>, root_key: &str) -> Result<()> {
    let Some(root_se) = cache.restore_raw(root_key).await? else { return Ok(()) };
    cache.delete(root_key).await?;
    if let Some(variant_map) = root_se.variant_map {
        for entry_key in variant_map.values() {
            cache.delete(entry_key).await?;
        }
    }
    Ok(())
}

/// The request-side half of §4.9: called before the request is dispatched.
pub async fn invalidate_request_side<R: KeyableRequest, S: RawStorage, Ser: Serializer>(
    cache: &Cache<S, Ser>,
    host: &str,
    request: &R,
) -> Result<()> {
    let Ok(root_key) = key::root_key(host, request) else { return Ok(()) };

    if is_unsafe_method(request.method()) {
        evict_root_and_variants(cache, &root_key).await?;
        for header_name in ["content-location", "location"] {
            if let Some(location) = request.header(header_name) {
                if let Some(target_key) = resolve_same_origin_key(host, request, location) {
                    evict_root_and_variants(cache, &target_key).await?;
                }
            }
        }
        return Ok(());
    }

    if request.method().eq_ignore_ascii_case("GET") {
        if let Some(root_se) = cache.restore_raw(&root_key).await? {
            if root_se.request_method.eq_ignore_ascii_case("HEAD") {
                evict_root_and_variants(cache, &root_key).await?;
            }
        }
    }

    Ok(())
}

/// The response-side half of §4.9: called after a successful response to a
/// non-safe method. Evicts same-origin `Content-Location`/`Location`
/// targets, but only when the response isn't older than the stored entry
/// and the ETags actually differ.
pub async fn invalidate_response_side<R: KeyableRequest, S: RawStorage, Ser: Serializer>(
    cache: &Cache<S, Ser>,
    host: &str,
    request: &R,
    response_status: u16,
    response_headers: &HeaderList,
) -> Result<()> {
    if !is_unsafe_method(request.method()) || !(200..400).contains(&response_status) {
        return Ok(());
    }

    let response_date = header_get(response_headers, "date").and_then(|v| httpdate::parse_http_date(v).ok());
    let response_etag = header_get(response_headers, "etag");

    for header_name in ["content-location", "location"] {
        let Some(value) = header_get(response_headers, header_name) else { continue };
        let Some(target_key) = resolve_same_origin_key(host, request, value) else { continue };
        let Some(stored) = cache.restore_raw(&target_key).await? else { continue };

        let stored_date = header_get(&stored.response_headers, "date").and_then(|v| httpdate::parse_http_date(v).ok());
        let stored_etag = header_get(&stored.response_headers, "etag");

        let not_older = match (response_date, stored_date) {
            (Some(rd), Some(sd)) => rd >= sd,
            _ => true,
        };
        let etags_differ = response_etag != stored_etag;

        if not_older && etags_differ {
            evict_root_and_variants(cache, &target_key).await?;
        }
    }
    Ok(())
}
