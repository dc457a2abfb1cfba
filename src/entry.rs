//! §3 — the data model: cache entries, their serialized form, and the
//! lookup result types `CacheMatch`/`CacheHit`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::resource::Resource;

/// An ordered multi-map of header name/value pairs, case-insensitive on
/// lookup. Kept as a plain `Vec` (rather than `http::HeaderMap`) so it can be
/// serialized directly.
pub type HeaderList = Vec<(String, String)>;

pub fn header_get<'a>(headers: &'a HeaderList, name: &str) -> Option<&'a str> {
    headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
}

pub fn header_get_all<'a>(headers: &'a HeaderList, name: &str) -> Vec<&'a str> {
    headers.iter().filter(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str()).collect()
}

pub fn header_has(headers: &HeaderList, name: &str) -> bool {
    headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
}

/// Removes every value for `name`, then inserts a single new value.
pub fn header_set(headers: &mut HeaderList, name: &str, value: impl Into<String>) {
    header_remove(headers, name);
    headers.push((name.to_string(), value.into()));
}

pub fn header_remove(headers: &mut HeaderList, name: &str) {
    headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
}

pub fn header_append(headers: &mut HeaderList, name: impl Into<String>, value: impl Into<String>) {
    headers.push((name.into(), value.into()));
}

pub fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs()
}

pub fn from_unix_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

/// The serialized form of a [`CacheEntry`], as written and read by a
/// [`crate::serializer::Serializer`]. Carries its own logical key so that a
/// digest collision (two logical keys hashing to one storage key) can be
/// detected on read (§4.7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub storage_key: String,
    pub request_method: String,
    pub request_uri: String,
    pub request_headers: HeaderList,
    pub status: u16,
    pub response_headers: HeaderList,
    /// Absent for a variant-root entry; present (possibly empty) otherwise.
    pub body: Option<Vec<u8>>,
    pub request_sent_at: u64,
    pub response_received_at: u64,
    pub variant_map: Option<BTreeMap<String, String>>,
}

impl StorageEntry {
    pub fn is_variant_root(&self) -> bool {
        self.variant_map.as_ref().is_some_and(|m| !m.is_empty())
    }
}

/// The runtime form of a cache entry: same metadata as [`StorageEntry`] but
/// with a live [`Resource`] instead of raw bytes, so a file-backed body need
/// not be read into memory until something asks for it.
///
/// Invariant (§3): either `variant_map` is empty/absent and `resource` may be
/// `Some`, or `variant_map` is non-empty and `resource` is `None`.
#[derive(Clone)]
pub struct CacheEntry {
    pub storage_key: String,
    pub request_method: String,
    pub request_uri: String,
    pub request_headers: HeaderList,
    pub status: u16,
    pub response_headers: HeaderList,
    pub resource: Option<Arc<dyn Resource>>,
    pub request_sent_at: SystemTime,
    pub response_received_at: SystemTime,
    pub variant_map: Option<BTreeMap<String, String>>,
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("storage_key", &self.storage_key)
            .field("request_method", &self.request_method)
            .field("request_uri", &self.request_uri)
            .field("status", &self.status)
            .field("is_variant_root", &self.is_variant_root())
            .finish()
    }
}

impl CacheEntry {
    pub fn is_variant_root(&self) -> bool {
        self.variant_map.as_ref().is_some_and(|m| !m.is_empty())
    }

    /// Converts to the serializable form. Reads the full body into memory if
    /// a resource is present — callers on the hot HIT path should prefer
    /// [`CacheEntry::resource`] directly and only call this when persisting.
    pub fn to_storage(&self) -> crate::error::Result<StorageEntry> {
        let body = match &self.resource {
            Some(r) => Some(r.get()?.to_vec()),
            None => None,
        };
        Ok(StorageEntry {
            storage_key: self.storage_key.clone(),
            request_method: self.request_method.clone(),
            request_uri: self.request_uri.clone(),
            request_headers: self.request_headers.clone(),
            status: self.status,
            response_headers: self.response_headers.clone(),
            body,
            request_sent_at: unix_secs(self.request_sent_at),
            response_received_at: unix_secs(self.response_received_at),
            variant_map: self.variant_map.clone(),
        })
    }

    /// Reconstructs a runtime entry from a serialized one, wrapping any body
    /// bytes in an in-memory [`Resource`]. Callers that want file-backed
    /// bodies should not use this and instead build the `Arc<dyn Resource>`
    /// themselves from the storage backend's own body handle.
    pub fn from_storage_in_memory(se: StorageEntry) -> Self {
        let resource = se
            .body
            .map(|b| Arc::new(crate::resource::MemoryResource::new(b)) as Arc<dyn Resource>);
        Self {
            storage_key: se.storage_key,
            request_method: se.request_method,
            request_uri: se.request_uri,
            request_headers: se.request_headers,
            status: se.status,
            response_headers: se.response_headers,
            resource,
            request_sent_at: from_unix_secs(se.request_sent_at),
            response_received_at: from_unix_secs(se.response_received_at),
            variant_map: se.variant_map,
        }
    }
}

/// `{ rootKey, entryKey, entry }`; for non-variant entries `entry_key ==
/// root_key` (§3).
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub root_key: String,
    pub entry_key: String,
    pub entry: CacheEntry,
}

/// The result of [`crate::cache::Cache::match_request`]. A variant-root
/// lookup that finds the root but no matching variant yields
/// `{ hit: None, root: Some(root) }`.
#[derive(Debug, Clone, Default)]
pub struct CacheMatch {
    pub hit: Option<CacheHit>,
    pub root: Option<CacheHit>,
}
