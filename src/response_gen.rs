//! C12 — builds a servable response from a cache entry: copies status and
//! headers, attaches the body, adds `Age`/`Via`, and trims metadata headers
//! for a locally-generated `304` (§4.12).

use std::sync::Arc;
use std::time::SystemTime;

use crate::entry::{header_append, header_remove, header_set, CacheEntry, HeaderList};
use crate::resource::Resource;
use crate::validity;

/// Response headers the RFC forbids on a `304`; a `304` we generate
/// ourselves (because the client's own conditional already matched) must
/// not carry them even though the stored entry does.
const NOT_MODIFIED_DROPPED: &[&str] =
    &["content-encoding", "content-language", "content-length", "content-md5", "content-range", "content-type"];

pub struct GeneratedResponse {
    pub status: u16,
    pub headers: HeaderList,
    pub resource: Option<Arc<dyn Resource>>,
}

/// Builds a normal response from `entry` — the cached status, headers, and
/// body, plus `Age` and `Via`.
pub fn generate(entry: &CacheEntry, now: SystemTime, via_token: &str) -> GeneratedResponse {
    build(entry, now, via_token, entry.status, false)
}

/// Builds a `304 Not Modified` from `entry`, for when the request's own
/// conditional validators already match the stored entry: only the
/// metadata headers the RFC allows on a `304` survive, and no body is
/// attached.
pub fn generate_not_modified(entry: &CacheEntry, now: SystemTime, via_token: &str) -> GeneratedResponse {
    build(entry, now, via_token, 304, true)
}

fn build(entry: &CacheEntry, now: SystemTime, via_token: &str, status: u16, trim_body_metadata: bool) -> GeneratedResponse {
    let mut headers = entry.response_headers.clone();
    if trim_body_metadata {
        for name in NOT_MODIFIED_DROPPED {
            header_remove(&mut headers, name);
        }
    }

    let age = validity::current_age(&entry.response_headers, entry.response_received_at, now).min(i32::MAX as i64);
    header_set(&mut headers, "age", age.to_string());
    header_append(&mut headers, "via", via_token.to_string());

    let resource = if trim_body_metadata { None } else { entry.resource.clone() };
    GeneratedResponse { status, headers, resource }
}
