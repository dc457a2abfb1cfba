//! C5 — whether a request is eligible to be served from cache at all (§4.5).

use crate::cache_control::RequestCacheControl;
use crate::key::KeyableRequest;

/// `version == HTTP/1.1`, method is `GET`/`HEAD`, no `Pragma` header, and no
/// `Cache-Control: no-store`. A request `Cache-Control: no-cache` does NOT
/// disqualify here — it instead forces revalidation via suitability rule 4.
pub fn is_eligible<R: KeyableRequest>(
    version: http::Version,
    request: &R,
    request_cc: &RequestCacheControl,
) -> bool {
    if version != http::Version::HTTP_11 {
        return false;
    }
    let method = request.method().to_ascii_uppercase();
    if method != "GET" && method != "HEAD" {
        return false;
    }
    if request.header("pragma").is_some() {
        return false;
    }
    if request_cc.no_store {
        return false;
    }
    true
}
