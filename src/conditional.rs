//! C11 — builds conditional and unconditional revalidation requests from a
//! stale cache entry (§4.11). Works directly on [`http::request::Parts`]
//! since building an outgoing request is the one place this engine needs a
//! concrete request representation rather than the generic
//! [`crate::key::KeyableRequest`] view.

use http::header::{CACHE_CONTROL, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE, IF_UNMODIFIED_SINCE};
use http::request::Parts;
use http::HeaderValue;

use crate::cache_control::ResponseCacheControl;
use crate::entry::{header_get, CacheEntry};
use crate::error::Result;

/// Copies `parts`, adds `If-None-Match`/`If-Modified-Since` from `entry`'s
/// validators (whichever are present), and forces `max-age=0` when the
/// stored response demanded revalidation.
pub fn build_conditional(parts: &Parts, response_cc: &ResponseCacheControl, entry: &CacheEntry) -> Result<Parts> {
    let mut next = clone_parts(parts);

    if let Some(etag) = header_get(&entry.response_headers, "etag") {
        next.headers.insert(IF_NONE_MATCH, HeaderValue::from_str(etag)?);
    }
    if let Some(last_modified) = header_get(&entry.response_headers, "last-modified") {
        next.headers.insert(IF_MODIFIED_SINCE, HeaderValue::from_str(last_modified)?);
    }
    if response_cc.must_revalidate || response_cc.proxy_revalidate {
        next.headers.append(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    }

    Ok(next)
}

/// Copies `parts` and sets `If-None-Match` to the comma-joined list of
/// `etags`, for revalidating a variant root against every known variant at
/// once.
pub fn build_conditional_from_variants(parts: &Parts, etags: &[String]) -> Result<Parts> {
    let mut next = clone_parts(parts);
    let joined = etags.join(", ");
    next.headers.insert(IF_NONE_MATCH, HeaderValue::from_str(&joined)?);
    Ok(next)
}

/// Copies `parts`, strips every conditional-request header, and adds
/// `Cache-Control: no-cache`. Used when a conditional exchange turns out to
/// have an origin `Date` older than the cached entry's — the revalidation
/// is retried unconditionally (§4.15 step 7).
pub fn build_unconditional(parts: &Parts) -> Result<Parts> {
    let mut next = clone_parts(parts);
    for name in [IF_RANGE, IF_MATCH, IF_NONE_MATCH, IF_UNMODIFIED_SINCE, IF_MODIFIED_SINCE] {
        next.headers.remove(name);
    }
    next.headers.append(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(next)
}

fn clone_parts(parts: &Parts) -> Parts {
    let mut builder = http::Request::builder().method(parts.method.clone()).uri(parts.uri.clone()).version(parts.version);
    for (name, value) in &parts.headers {
        builder = builder.header(name, value);
    }
    builder.body(()).expect("cloned parts are always a valid request").into_parts().0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_parts() -> Parts {
        http::Request::builder().method("GET").uri("http://h/x").body(()).unwrap().into_parts().0
    }

    fn entry_with(headers: Vec<(&str, &str)>) -> CacheEntry {
        CacheEntry {
            storage_key: "k".into(),
            request_method: "GET".into(),
            request_uri: "http://h/x".into(),
            request_headers: vec![],
            status: 200,
            response_headers: headers.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            resource: None,
            request_sent_at: std::time::SystemTime::UNIX_EPOCH,
            response_received_at: std::time::SystemTime::UNIX_EPOCH,
            variant_map: None,
        }
    }

    #[test]
    fn build_conditional_sets_both_validators() {
        let entry = entry_with(vec![("ETag", "\"v1\""), ("Last-Modified", "Tue, 01 Jan 2030 00:00:00 GMT")]);
        let next = build_conditional(&base_parts(), &ResponseCacheControl::default(), &entry).unwrap();
        assert_eq!(next.headers.get(IF_NONE_MATCH).unwrap(), "\"v1\"");
        assert_eq!(next.headers.get(IF_MODIFIED_SINCE).unwrap(), "Tue, 01 Jan 2030 00:00:00 GMT");
        assert!(next.headers.get(CACHE_CONTROL).is_none());
    }

    #[test]
    fn build_conditional_forces_max_age_zero_on_must_revalidate() {
        let entry = entry_with(vec![("ETag", "\"v1\"")]);
        let cc = ResponseCacheControl { must_revalidate: true, ..Default::default() };
        let next = build_conditional(&base_parts(), &cc, &entry).unwrap();
        assert_eq!(next.headers.get(CACHE_CONTROL).unwrap(), "max-age=0");
    }

    #[test]
    fn build_conditional_from_variants_joins_etags() {
        let next = build_conditional_from_variants(&base_parts(), &["\"v1\"".to_string(), "\"v2\"".to_string()]).unwrap();
        assert_eq!(next.headers.get(IF_NONE_MATCH).unwrap(), "\"v1\", \"v2\"");
    }

    #[test]
    fn build_unconditional_strips_conditionals_and_adds_no_cache() {
        let mut parts = base_parts();
        parts.headers.insert(IF_NONE_MATCH, HeaderValue::from_static("\"v1\""));
        parts.headers.insert(IF_MATCH, HeaderValue::from_static("\"v1\""));
        let next = build_unconditional(&parts).unwrap();
        assert!(next.headers.get(IF_NONE_MATCH).is_none());
        assert!(next.headers.get(IF_MATCH).is_none());
        assert_eq!(next.headers.get(CACHE_CONTROL).unwrap(), "no-cache");
    }
}
