//! C10 — merges a `304 Not Modified` response's headers into a stored
//! entry's headers (§4.10).

use std::collections::BTreeSet;

use crate::entry::{header_get, HeaderList};

/// Merge rule (§4.10): start from the stored headers, drop any name that
/// also appears on the 304 response (Content-Encoding/Content-Length are
/// forbidden on a 304 so this never drops them), drop stale (`1xx`)
/// `Warning` values, then append every 304 response header except
/// Content-Encoding/Content-Length. If the stored entry's `Date` is
/// strictly newer than the 304's, the stored headers are returned
/// unchanged — an out-of-order revalidation response is simply ignored.
pub fn merge(stored_headers: &HeaderList, response_headers: &HeaderList) -> HeaderList {
    let stored_date = header_get(stored_headers, "date").and_then(|v| httpdate::parse_http_date(v).ok());
    let response_date = header_get(response_headers, "date").and_then(|v| httpdate::parse_http_date(v).ok());
    if let (Some(sd), Some(rd)) = (stored_date, response_date) {
        if sd > rd {
            return stored_headers.clone();
        }
    }

    let response_names: BTreeSet<String> =
        response_headers.iter().map(|(n, _)| n.to_ascii_lowercase()).collect();

    let mut merged = Vec::new();
    for (name, value) in stored_headers {
        let lower = name.to_ascii_lowercase();
        if response_names.contains(&lower) {
            continue;
        }
        if lower == "warning" && value.trim_start().starts_with('1') {
            continue;
        }
        merged.push((name.clone(), value.clone()));
    }
    for (name, value) in response_headers {
        let lower = name.to_ascii_lowercase();
        if lower == "content-encoding" || lower == "content-length" {
            continue;
        }
        merged.push((name.clone(), value.clone()));
    }
    merged
}
