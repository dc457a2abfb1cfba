//! C4 — the freshness/suitability algorithm (§4.4), conditional matching
//! (§4.4.1), and stale-if-error eligibility (§4.4.2).

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

use crate::cache_control::{RequestCacheControl, ResponseCacheControl};
use crate::entry::{header_get, header_get_all, CacheEntry};
use crate::key::KeyableRequest;
use crate::validity::{apply_max_ttl, current_age, freshness_lifetime};

/// The verdict produced by [`assess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSuitability {
    Mismatch,
    Fresh,
    FreshEnough,
    Stale,
    StaleWhileRevalidated,
    RevalidationRequired,
}

/// Everything [`assess`] needs beyond the request/entry/now: whether this
/// cache instance is shared, which drives both freshness-lifetime selection
/// and the `proxy-revalidate` rule.
#[derive(Debug, Clone, Copy)]
pub struct SuitabilityConfig {
    pub shared_cache: bool,
    /// Hard ceiling on freshness lifetime from `CacheConfig::max_ttl`.
    pub max_ttl: Option<Duration>,
}

impl Default for SuitabilityConfig {
    fn default() -> Self {
        Self { shared_cache: true, max_ttl: None }
    }
}

/// Runs the §4.4 decision order against a candidate entry (already looked up
/// by root or variant key) and returns the first matching verdict.
pub fn assess<R: KeyableRequest>(
    request: &R,
    entry: &CacheEntry,
    request_cc: &RequestCacheControl,
    response_cc: &ResponseCacheControl,
    now: SystemTime,
    config: SuitabilityConfig,
) -> CacheSuitability {
    // 1. Method mismatch.
    let method = request.method().to_ascii_uppercase();
    let stored_method = entry.request_method.to_ascii_uppercase();
    let method_ok = method == stored_method || (method == "HEAD" && stored_method == "GET");
    if !method_ok {
        return CacheSuitability::Mismatch;
    }

    // 2 & 3 are handled by the caller via KeyGen root/variant key lookup plus
    // the Vary check below; a entry reaching this function already matched
    // on URI. Still check Vary explicitly, since `*` must MISMATCH.
    if let Some(vary_names) = vary_header_names(entry) {
        if vary_names.iter().any(|n| n == "*") {
            return CacheSuitability::Mismatch;
        }
        for name in &vary_names {
            let current = normalized_value_set(request_header_all(request, name));
            let stored = normalized_value_set(
                header_get_all(&entry.request_headers, name).into_iter().map(str::to_string).collect(),
            );
            if current != stored {
                return CacheSuitability::Mismatch;
            }
        }
    }

    // 4. Request no-cache.
    if request_cc.no_cache {
        return CacheSuitability::RevalidationRequired;
    }

    // 5. Response no-cache, qualified or not.
    if response_cc.no_cache {
        if response_cc.no_cache_fields.is_empty() {
            return CacheSuitability::RevalidationRequired;
        }
        let stored_has_any = response_cc
            .no_cache_fields
            .iter()
            .any(|f| header_get(&entry.response_headers, f).is_some());
        if stored_has_any {
            return CacheSuitability::RevalidationRequired;
        }
    }

    // 6. Unsupported conditional.
    if has_unsupported_conditional(request) {
        return CacheSuitability::RevalidationRequired;
    }

    // 7. Unconditional request against a 304-valued stored entry.
    let has_supported_conditional = has_supported_conditional(request);
    if entry.status == 304 && !has_supported_conditional {
        return CacheSuitability::RevalidationRequired;
    }

    // 8. Conditional request whose conditions do not all match.
    if has_supported_conditional && !conditions_match(request, entry, now) {
        return CacheSuitability::RevalidationRequired;
    }

    // 9. Freshness.
    let current_age = current_age(&entry.response_headers, entry.response_received_at, now);
    let freshness_lifetime = apply_max_ttl(
        freshness_lifetime(&entry.response_headers, response_cc, config.shared_cache),
        config.max_ttl,
    );
    let fresh = current_age < freshness_lifetime;

    // 10. must-revalidate / proxy-revalidate when not fresh.
    if !fresh && (response_cc.must_revalidate || (config.shared_cache && response_cc.proxy_revalidate)) {
        return CacheSuitability::RevalidationRequired;
    }

    // 11. Request max-age exceeded with no max-stale tolerance.
    if fresh
        && request_cc.max_age >= 0
        && current_age > request_cc.max_age
        && request_cc.max_stale_seconds().is_none()
        && !request_cc.has_max_stale()
    {
        return CacheSuitability::RevalidationRequired;
    }

    // 12. Request min-fresh not satisfied.
    if fresh && request_cc.min_fresh >= 0 && (freshness_lifetime - current_age) < request_cc.min_fresh {
        return CacheSuitability::RevalidationRequired;
    }

    // 13. Request max-stale tolerance.
    if request_cc.has_max_stale() {
        let stale = (current_age - freshness_lifetime).max(0);
        return match request_cc.max_stale_seconds() {
            Some(bound) if stale >= bound => CacheSuitability::RevalidationRequired,
            _ => CacheSuitability::FreshEnough,
        };
    }

    // 14. Fresh.
    if fresh {
        return CacheSuitability::Fresh;
    }

    // 15/16. Stale, possibly within stale-while-revalidate window.
    let stale = (current_age - freshness_lifetime).max(0);
    if response_cc.stale_while_revalidate >= 0 && stale < response_cc.stale_while_revalidate {
        CacheSuitability::StaleWhileRevalidated
    } else {
        CacheSuitability::Stale
    }
}

fn vary_header_names(entry: &CacheEntry) -> Option<Vec<String>> {
    let raw = header_get_all(&entry.response_headers, "vary");
    if raw.is_empty() {
        return None;
    }
    let mut names = BTreeSet::new();
    for value in raw {
        for part in value.split(',') {
            let part = part.trim();
            if !part.is_empty() {
                names.insert(part.to_ascii_lowercase());
            }
        }
    }
    Some(names.into_iter().collect())
}

fn request_header_all<R: KeyableRequest>(request: &R, name: &str) -> Vec<String> {
    request.header_all(name).into_iter().map(str::to_string).collect()
}

fn normalized_value_set(values: Vec<String>) -> BTreeSet<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn has_unsupported_conditional<R: KeyableRequest>(request: &R) -> bool {
    request.header("if-range").is_some()
        || request.header("if-match").is_some()
        || request.header("if-unmodified-since").is_some()
}

fn has_supported_conditional<R: KeyableRequest>(request: &R) -> bool {
    request.header("if-none-match").is_some() || request.header("if-modified-since").is_some()
}

/// §4.4.1 — both `If-None-Match` and `If-Modified-Since`, if present, must
/// match for the request's conditions to be satisfied.
fn conditions_match<R: KeyableRequest>(request: &R, entry: &CacheEntry, now: SystemTime) -> bool {
    let mut matched = true;
    if let Some(inm) = request.header("if-none-match") {
        matched &= etag_matches(inm, entry);
    }
    if let Some(ims) = request.header("if-modified-since") {
        matched &= if_modified_since_matches(ims, entry, now);
    }
    matched
}

fn etag_matches(if_none_match: &str, entry: &CacheEntry) -> bool {
    let stored = match header_get(&entry.response_headers, "etag") {
        Some(e) => e,
        None => return false,
    };
    let stored_strong = stored.strip_prefix("W/").unwrap_or(stored);
    if_none_match.split(',').map(str::trim).any(|candidate| {
        if candidate == "*" {
            return true;
        }
        let candidate_strong = candidate.strip_prefix("W/").unwrap_or(candidate);
        candidate_strong == stored_strong
    })
}

fn if_modified_since_matches(value: &str, entry: &CacheEntry, now: SystemTime) -> bool {
    let requested = match httpdate::parse_http_date(value.trim()) {
        Ok(t) => t,
        Err(_) => return false,
    };
    if requested > now {
        // "in the future is ignored (treated as no match)" (§8 boundary behavior).
        return false;
    }
    let last_modified = match header_get(&entry.response_headers, "last-modified").and_then(|v| httpdate::parse_http_date(v).ok()) {
        Some(t) => t,
        None => return false,
    };
    last_modified <= requested
}

/// §4.4.2 — is a stale entry eligible to be served under `stale-if-error`?
/// `stale_seconds` is `currentAge - freshnessLifetime`, clamped to `0`.
/// `default_enabled` is the engine-wide config fallback used only when
/// neither the request nor the response configured an explicit window.
pub fn is_suitable_if_error(
    request_cc: &RequestCacheControl,
    response_cc: &ResponseCacheControl,
    stale_seconds: i64,
    default_enabled: bool,
) -> bool {
    if request_cc.stale_if_error >= 0 {
        return stale_seconds <= request_cc.stale_if_error;
    }
    if response_cc.stale_if_error >= 0 {
        return stale_seconds <= response_cc.stale_if_error;
    }
    default_enabled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_control::{parse_request, parse_response};
    use std::time::Duration;

    struct Req {
        method: &'static str,
        headers: Vec<(&'static str, &'static str)>,
    }

    impl KeyableRequest for Req {
        fn method(&self) -> &str {
            self.method
        }
        fn scheme(&self) -> Option<&str> {
            Some("http")
        }
        fn authority(&self) -> Option<&str> {
            Some("h")
        }
        fn path(&self) -> &str {
            "/x"
        }
        fn header(&self, name: &str) -> Option<&str> {
            self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| *v)
        }
        fn header_all(&self, name: &str) -> Vec<&str> {
            self.headers.iter().filter(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| *v).collect()
        }
    }

    fn entry_at(t0: SystemTime, extra_headers: &[(&str, &str)]) -> CacheEntry {
        let mut headers = vec![("Date".to_string(), httpdate::fmt_http_date(t0))];
        for (k, v) in extra_headers {
            headers.push((k.to_string(), v.to_string()));
        }
        CacheEntry {
            storage_key: "http://h/x".into(),
            request_method: "GET".into(),
            request_uri: "http://h/x".into(),
            request_headers: vec![],
            status: 200,
            response_headers: headers,
            resource: None,
            request_sent_at: t0,
            response_received_at: t0,
            variant_map: None,
        }
    }

    #[test]
    fn fresh_within_max_age() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let entry = entry_at(t0, &[("Cache-Control", "max-age=600"), ("ETag", "\"v1\"")]);
        let req = Req { method: "GET", headers: vec![] };
        let verdict = assess(
            &req,
            &entry,
            &parse_request(""),
            &parse_response("max-age=600"),
            t0 + Duration::from_secs(300),
            SuitabilityConfig::default(),
        );
        assert_eq!(verdict, CacheSuitability::Fresh);
    }

    #[test]
    fn head_may_be_served_from_get() {
        let t0 = SystemTime::UNIX_EPOCH;
        let entry = entry_at(t0, &[("Cache-Control", "max-age=600")]);
        let req = Req { method: "HEAD", headers: vec![] };
        let verdict = assess(
            &req,
            &entry,
            &parse_request(""),
            &parse_response("max-age=600"),
            t0,
            SuitabilityConfig::default(),
        );
        assert_eq!(verdict, CacheSuitability::Fresh);
    }

    #[test]
    fn get_from_head_entry_is_mismatch() {
        let t0 = SystemTime::UNIX_EPOCH;
        let mut entry = entry_at(t0, &[("Cache-Control", "max-age=600")]);
        entry.request_method = "HEAD".into();
        let req = Req { method: "GET", headers: vec![] };
        let verdict = assess(
            &req,
            &entry,
            &parse_request(""),
            &parse_response("max-age=600"),
            t0,
            SuitabilityConfig::default(),
        );
        assert_eq!(verdict, CacheSuitability::Mismatch);
    }

    #[test]
    fn stale_while_revalidate_window() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let entry = entry_at(t0, &[("Cache-Control", "max-age=1, stale-while-revalidate=60")]);
        let req = Req { method: "GET", headers: vec![] };
        let verdict = assess(
            &req,
            &entry,
            &parse_request(""),
            &parse_response("max-age=1, stale-while-revalidate=60"),
            t0 + Duration::from_secs(30),
            SuitabilityConfig::default(),
        );
        assert_eq!(verdict, CacheSuitability::StaleWhileRevalidated);
    }

    #[test]
    fn request_no_cache_forces_revalidation() {
        let t0 = SystemTime::UNIX_EPOCH;
        let entry = entry_at(t0, &[("Cache-Control", "max-age=600")]);
        let req = Req { method: "GET", headers: vec![] };
        let verdict = assess(
            &req,
            &entry,
            &parse_request("no-cache"),
            &parse_response("max-age=600"),
            t0,
            SuitabilityConfig::default(),
        );
        assert_eq!(verdict, CacheSuitability::RevalidationRequired);
    }

    #[test]
    fn if_none_match_star_always_matches() {
        let t0 = SystemTime::UNIX_EPOCH;
        let entry = entry_at(t0, &[("Cache-Control", "max-age=0"), ("ETag", "\"v1\"")]);
        let req = Req { method: "GET", headers: vec![("If-None-Match", "*")] };
        let verdict = assess(
            &req,
            &entry,
            &parse_request(""),
            &parse_response("max-age=0"),
            t0,
            SuitabilityConfig::default(),
        );
        // Conditions match, so we fall through to the normal freshness check
        // rather than RevalidationRequired from rule 8.
        assert_ne!(verdict, CacheSuitability::RevalidationRequired);
    }

    #[test]
    fn if_modified_since_in_future_is_no_match() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let entry = entry_at(t0, &[("Cache-Control", "max-age=600"), ("Last-Modified", &httpdate::fmt_http_date(t0))]);
        let future = httpdate::fmt_http_date(t0 + Duration::from_secs(1_000_000));
        let req = Req { method: "GET", headers: vec![("If-Modified-Since", Box::leak(future.into_boxed_str()))] };
        let verdict = assess(
            &req,
            &entry,
            &parse_request(""),
            &parse_response("max-age=600"),
            t0 + Duration::from_secs(10),
            SuitabilityConfig::default(),
        );
        assert_eq!(verdict, CacheSuitability::RevalidationRequired);
    }

    #[test]
    fn max_stale_any_yields_fresh_enough_when_stale() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let entry = entry_at(t0, &[("Cache-Control", "max-age=1")]);
        let req = Req { method: "GET", headers: vec![] };
        let verdict = assess(
            &req,
            &entry,
            &parse_request("max-stale"),
            &parse_response("max-age=1"),
            t0 + Duration::from_secs(1000),
            SuitabilityConfig::default(),
        );
        assert_eq!(verdict, CacheSuitability::FreshEnough);
    }

    #[test]
    fn vary_star_is_mismatch() {
        let t0 = SystemTime::UNIX_EPOCH;
        let entry = entry_at(t0, &[("Cache-Control", "max-age=600"), ("Vary", "*")]);
        let req = Req { method: "GET", headers: vec![] };
        let verdict = assess(
            &req,
            &entry,
            &parse_request(""),
            &parse_response("max-age=600"),
            t0,
            SuitabilityConfig::default(),
        );
        assert_eq!(verdict, CacheSuitability::Mismatch);
    }

    #[test]
    fn stale_if_error_respects_request_window() {
        let cc_req = parse_request("stale-if-error=100");
        let cc_resp = parse_response("");
        assert!(is_suitable_if_error(&cc_req, &cc_resp, 50, false));
        assert!(!is_suitable_if_error(&cc_req, &cc_resp, 150, false));
    }

    #[test]
    fn stale_if_error_falls_back_to_config_default() {
        let cc_req = parse_request("");
        let cc_resp = parse_response("");
        assert!(is_suitable_if_error(&cc_req, &cc_resp, 99_999, true));
        assert!(!is_suitable_if_error(&cc_req, &cc_resp, 99_999, false));
    }
}
