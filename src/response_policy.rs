//! C6 — whether an origin response may be stored at all (§4.6).

use crate::cache_control::ResponseCacheControl;
use crate::config::CacheConfig;
use crate::entry::{header_get, HeaderList};

/// Statuses cacheable by default even without explicit freshness
/// information (RFC 9111 §4.2.2's heuristically-cacheable set).
const HEURISTICALLY_CACHEABLE_STATUSES: &[u16] = &[200, 203, 204, 206, 300, 301, 308, 404, 405, 410, 414, 451, 501];

/// Inputs to [`is_cacheable`], gathered once by the caller so this function
/// stays free of any particular request/response crate's types.
pub struct ResponsePolicyInput<'a> {
    pub request_method: &'a str,
    pub request_version: http::Version,
    pub request_has_query: bool,
    pub request_has_authorization: bool,
    pub response_status: u16,
    pub response_headers: &'a HeaderList,
    pub response_cc: &'a ResponseCacheControl,
    pub content_length: Option<u64>,
}

fn has_explicit_freshness(response_cc: &ResponseCacheControl, headers: &HeaderList) -> bool {
    response_cc.max_age >= 0 || response_cc.shared_max_age >= 0 || header_get(headers, "expires").is_some()
}

/// Returns whether `input` describes a response eligible for storage,
/// per §4.6.
pub fn is_cacheable(input: &ResponsePolicyInput, config: &CacheConfig) -> bool {
    let method = input.request_method.to_ascii_uppercase();
    if method != "GET" && method != "HEAD" {
        return false;
    }

    let explicit_freshness = has_explicit_freshness(input.response_cc, input.response_headers);
    if !HEURISTICALLY_CACHEABLE_STATUSES.contains(&input.response_status) && !explicit_freshness {
        return false;
    }

    if input.response_cc.no_store {
        return false;
    }

    if config.shared_cache && input.response_cc.cache_private {
        return false;
    }

    if input.request_has_authorization
        && !(input.response_cc.cache_public
            || input.response_cc.shared_max_age >= 0
            || input.response_cc.must_revalidate)
    {
        return false;
    }

    if let Some(len) = input.content_length {
        if len > config.max_object_size {
            return false;
        }
    }

    if input.request_has_query {
        if input.request_version == http::Version::HTTP_10 && config.never_cache_http10_responses_with_query {
            return false;
        }
        if input.request_version == http::Version::HTTP_11
            && config.never_cache_http11_responses_with_query
            && !explicit_freshness
        {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_control::parse_response;

    fn base_input(cc: &ResponseCacheControl, headers: &HeaderList) -> ResponsePolicyInput<'_> {
        ResponsePolicyInput {
            request_method: "GET",
            request_version: http::Version::HTTP_11,
            request_has_query: false,
            request_has_authorization: false,
            response_status: 200,
            response_headers: headers,
            response_cc: cc,
            content_length: Some(10),
        }
    }

    #[test]
    fn plain_200_with_max_age_is_cacheable() {
        let cc = parse_response("max-age=60");
        let headers = vec![];
        let input = base_input(&cc, &headers);
        assert!(is_cacheable(&input, &CacheConfig::default()));
    }

    #[test]
    fn no_store_is_never_cacheable() {
        let cc = parse_response("no-store, max-age=60");
        let headers = vec![];
        let input = base_input(&cc, &headers);
        assert!(!is_cacheable(&input, &CacheConfig::default()));
    }

    #[test]
    fn private_is_not_cacheable_when_shared() {
        let cc = parse_response("private, max-age=60");
        let headers = vec![];
        let input = base_input(&cc, &headers);
        assert!(!is_cacheable(&input, &CacheConfig::default()));
    }

    #[test]
    fn authorization_requires_explicit_sharing_directive() {
        let cc = parse_response("max-age=60");
        let headers = vec![];
        let mut input = base_input(&cc, &headers);
        input.request_has_authorization = true;
        assert!(!is_cacheable(&input, &CacheConfig::default()));

        let cc_public = parse_response("public, max-age=60");
        let mut input2 = base_input(&cc_public, &headers);
        input2.request_has_authorization = true;
        assert!(is_cacheable(&input2, &CacheConfig::default()));
    }

    #[test]
    fn oversized_response_is_rejected() {
        let cc = parse_response("max-age=60");
        let headers = vec![];
        let mut input = base_input(&cc, &headers);
        input.content_length = Some(10_000_000);
        assert!(!is_cacheable(&input, &CacheConfig::default()));
    }

    #[test]
    fn heuristically_cacheable_status_without_freshness_is_ok() {
        let cc = parse_response("");
        let headers = vec![];
        let mut input = base_input(&cc, &headers);
        input.response_status = 404;
        assert!(is_cacheable(&input, &CacheConfig::default()));
    }

    #[test]
    fn non_heuristic_status_needs_explicit_freshness() {
        let cc = parse_response("");
        let headers = vec![];
        let mut input = base_input(&cc, &headers);
        input.response_status = 200;
        // 200 IS heuristically cacheable, so flip to a status that isn't.
        input.response_status = 202;
        assert!(!is_cacheable(&input, &CacheConfig::default()));
    }

    #[test]
    fn http10_query_is_rejected_by_default() {
        let cc = parse_response("max-age=60");
        let headers = vec![];
        let mut input = base_input(&cc, &headers);
        input.request_version = http::Version::HTTP_10;
        input.request_has_query = true;
        assert!(!is_cacheable(&input, &CacheConfig::default()));
    }
}
