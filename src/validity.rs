//! C3 — `age`, `freshnessLifetime`, `currentAge` per RFC 9111 (§4.3).

use std::time::SystemTime;

use crate::cache_control::ResponseCacheControl;
use crate::entry::{header_get, HeaderList};

/// All ages/lifetimes saturate here rather than overflowing.
pub const MAX_AGE_SECONDS: i64 = i32::MAX as i64 + 1;

fn saturating_sum(parts: &[i64]) -> i64 {
    let mut total: i64 = 0;
    for p in parts {
        total = total.saturating_add(*p);
        if total > MAX_AGE_SECONDS {
            return MAX_AGE_SECONDS;
        }
    }
    total.max(0)
}

fn parse_http_date(value: Option<&str>) -> Option<SystemTime> {
    value.and_then(|v| httpdate::parse_http_date(v).ok())
}

fn secs_between(later: SystemTime, earlier: SystemTime) -> i64 {
    match later.duration_since(earlier) {
        Ok(d) => d.as_secs().min(MAX_AGE_SECONDS as u64) as i64,
        Err(_) => 0,
    }
}

fn parse_age_header(headers: &HeaderList) -> i64 {
    header_get(headers, "age")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|n| *n >= 0)
        .unwrap_or(0)
        .min(MAX_AGE_SECONDS)
}

/// The cache's current estimate of the response's age at `now` (§4.3):
/// `max(0, responseInstant - dateHeader) + max(0, now - responseInstant) + ageHeader`,
/// saturated at [`MAX_AGE_SECONDS`].
///
/// Missing or unparseable `Date` is treated as equal to `response_instant`
/// (contributing zero apparent age), so the computation always produces a
/// value rather than failing.
pub fn current_age(response_headers: &HeaderList, response_instant: SystemTime, now: SystemTime) -> i64 {
    let date = parse_http_date(header_get(response_headers, "date")).unwrap_or(response_instant);
    let apparent_age = secs_between(response_instant, date);
    let resident_time = secs_between(now, response_instant);
    let age_header = parse_age_header(response_headers);
    saturating_sum(&[apparent_age, resident_time, age_header])
}

/// Freshness lifetime per §4.3: explicit directives first (shared
/// `s-maxage` when `shared_cache`, then `max-age`, then `Expires - Date`),
/// falling back to the heuristic `10% of (Date - Last-Modified)` when both
/// are present, else `0`.
pub fn freshness_lifetime(
    response_headers: &HeaderList,
    response_cc: &ResponseCacheControl,
    shared_cache: bool,
) -> i64 {
    if shared_cache && response_cc.shared_max_age >= 0 {
        return response_cc.shared_max_age.min(MAX_AGE_SECONDS);
    }
    if response_cc.max_age >= 0 {
        return response_cc.max_age.min(MAX_AGE_SECONDS);
    }
    let date = parse_http_date(header_get(response_headers, "date"));
    if let (Some(date), Some(expires)) = (date, parse_http_date(header_get(response_headers, "expires"))) {
        return secs_between(expires, date);
    }
    if let (Some(date), Some(last_modified)) =
        (date, parse_http_date(header_get(response_headers, "last-modified")))
    {
        return (secs_between(date, last_modified) / 10).max(0);
    }
    0
}

/// Applies `CacheConfig::max_ttl` as a hard ceiling on top of the normal
/// §4.3 computation (supplements spec.md; not an RFC 9111 rule itself).
pub fn apply_max_ttl(freshness_lifetime: i64, max_ttl: Option<std::time::Duration>) -> i64 {
    match max_ttl {
        Some(ceiling) => freshness_lifetime.min(ceiling.as_secs() as i64),
        None => freshness_lifetime,
    }
}
