//! C8 — the high-level cache operations: `match`, `store`, the 304 update
//! path, and negotiated cross-linking (§4.8), built on [`crate::storage`].

use std::time::SystemTime;

use crate::entry::{header_get_all, unix_secs, CacheEntry, CacheHit, CacheMatch, HeaderList, StorageEntry};
use crate::error::Result;
use crate::key::{self, KeyableRequest};
use crate::serializer::Serializer;
use crate::storage::{AbstractSerializingCacheStorage, RawStorage};
use crate::update_handler;

/// The `Vary` header-name list a stored response carries: lower-cased,
/// sorted, deduplicated (§4.1).
pub fn vary_header_names(response_headers: &HeaderList) -> Vec<String> {
    let mut names: Vec<String> = header_get_all(response_headers, "vary")
        .iter()
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Snapshots only the request headers Suitability's `Vary` comparison needs
/// (§4.4 rule 3). `KeyableRequest` exposes targeted lookups, not full header
/// enumeration, and nothing else reads `CacheEntry::request_headers`.
pub fn snapshot_vary_headers<R: KeyableRequest>(request: &R, vary_names: &[String]) -> HeaderList {
    let mut snapshot = Vec::new();
    for name in vary_names {
        for value in request.header_all(name) {
            snapshot.push((name.clone(), value.to_string()));
        }
    }
    snapshot
}

/// A freshly-received origin response, as handed to [`Cache::store`].
pub struct OriginResponse {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Option<Vec<u8>>,
    pub request_sent_at: SystemTime,
    pub response_received_at: SystemTime,
}

pub struct Cache<S: RawStorage, Ser: Serializer> {
    storage: AbstractSerializingCacheStorage<S, Ser>,
}

impl<S: RawStorage, Ser: Serializer> Cache<S, Ser> {
    pub fn new(backend: S, serializer: Ser, max_update_retries: u32) -> Self {
        Self { storage: AbstractSerializingCacheStorage::new(backend, serializer, max_update_retries) }
    }

    /// §4.8 `match(host, req)`.
    pub async fn match_request<R: KeyableRequest>(&self, host: &str, request: &R) -> Result<CacheMatch> {
        let root_key = match key::root_key(host, request) {
            Ok(k) => k,
            Err(_) => return Ok(CacheMatch::default()),
        };
        let Some(root_se) = self.storage.restore_entry(&root_key).await? else {
            return Ok(CacheMatch::default());
        };
        let root_hit = CacheHit {
            root_key: root_key.clone(),
            entry_key: root_key.clone(),
            entry: CacheEntry::from_storage_in_memory(root_se.clone()),
        };

        if !root_se.is_variant_root() {
            return Ok(CacheMatch { hit: Some(root_hit), root: None });
        }

        let vary_names = vary_header_names(&root_se.response_headers);
        let variant_key = key::variant_key(request, &vary_names);
        let variant_map = root_se.variant_map.clone().unwrap_or_default();
        let Some(entry_key) = variant_map.get(&variant_key) else {
            return Ok(CacheMatch { hit: None, root: Some(root_hit) });
        };

        match self.storage.restore_entry(entry_key).await? {
            Some(variant_se) => {
                let hit = CacheHit {
                    root_key,
                    entry_key: entry_key.clone(),
                    entry: CacheEntry::from_storage_in_memory(variant_se),
                };
                Ok(CacheMatch { hit: Some(hit), root: Some(root_hit) })
            }
            None => Ok(CacheMatch { hit: None, root: Some(root_hit) }),
        }
    }

    /// §4.8 `getVariants(rootHit)`.
    pub async fn get_variants(&self, root: &CacheHit) -> Result<Vec<CacheHit>> {
        let Some(variant_map) = &root.entry.variant_map else { return Ok(Vec::new()) };
        let mut out = Vec::with_capacity(variant_map.len());
        for entry_key in variant_map.values() {
            if let Some(se) = self.storage.restore_entry(entry_key).await? {
                out.push(CacheHit {
                    root_key: root.root_key.clone(),
                    entry_key: entry_key.clone(),
                    entry: CacheEntry::from_storage_in_memory(se),
                });
            }
        }
        Ok(out)
    }

    /// §4.8 `store(host, req, originResp, content, reqSent, respRecv)`.
    pub async fn store<R: KeyableRequest>(
        &self,
        host: &str,
        request: &R,
        response: OriginResponse,
    ) -> Result<CacheHit> {
        let root_key = key::root_key(host, request)?;
        let vary_names = vary_header_names(&response.headers);
        let request_headers = snapshot_vary_headers(request, &vary_names);
        let request_method = request.method().to_string();

        if vary_names.is_empty() {
            let se = StorageEntry {
                storage_key: root_key.clone(),
                request_method,
                request_uri: root_key.clone(),
                request_headers,
                status: response.status,
                response_headers: response.headers,
                body: response.body,
                request_sent_at: unix_secs(response.request_sent_at),
                response_received_at: unix_secs(response.response_received_at),
                variant_map: None,
            };
            self.storage.store_entry(&root_key, &se).await?;
            return Ok(CacheHit { root_key: root_key.clone(), entry_key: root_key, entry: CacheEntry::from_storage_in_memory(se) });
        }

        let variant_key = key::variant_key(request, &vary_names);
        let entry_key = key::variant_entry_key(&variant_key, &root_key);
        let request_sent_at = unix_secs(response.request_sent_at);
        let response_received_at = unix_secs(response.response_received_at);

        let variant_se = StorageEntry {
            storage_key: entry_key.clone(),
            request_method: request_method.clone(),
            request_uri: root_key.clone(),
            request_headers,
            status: response.status,
            response_headers: response.headers.clone(),
            body: response.body,
            request_sent_at,
            response_received_at,
            variant_map: None,
        };
        self.storage.store_entry(&entry_key, &variant_se).await?;

        let root_response_headers = response.headers.clone();
        let root_key_inner = root_key.clone();
        let entry_key_for_closure = entry_key.clone();
        let update_result = self
            .storage
            .update_entry(&root_key, move |existing| {
                let mut variant_map = existing.and_then(|e| e.variant_map).unwrap_or_default();
                variant_map.insert(variant_key.clone(), entry_key_for_closure.clone());
                StorageEntry {
                    storage_key: root_key_inner.clone(),
                    request_method: request_method.clone(),
                    request_uri: root_key_inner.clone(),
                    request_headers: Vec::new(),
                    status: response.status,
                    response_headers: root_response_headers.clone(),
                    body: None,
                    request_sent_at,
                    response_received_at,
                    variant_map: Some(variant_map),
                }
            })
            .await;

        // §7: CacheUpdateFailure drops the variant linkage, not the response
        // the caller already has in `variant_se`.
        if let Err(e) = update_result {
            log::warn!("cache root update failed for {root_key:?}, variant stored without root linkage: {e}");
        }

        Ok(CacheHit { root_key, entry_key, entry: CacheEntry::from_storage_in_memory(variant_se) })
    }

    /// §4.8 `update(stale, originResp, reqSent, respRecv)` — the 304 path.
    /// Merges `response.headers` into `stale`'s headers (§4.10) and stores
    /// the refreshed entry back under `stale.entry_key`. When `stale` was a
    /// variant, also refreshes the root's `Date` so `match_request` on the
    /// root alone reflects the revalidation.
    pub async fn update(&self, stale: &CacheHit, response: &OriginResponse) -> Result<CacheHit> {
        let merged_headers = update_handler::merge(&stale.entry.response_headers, &response.headers);
        let refreshed = StorageEntry {
            storage_key: stale.entry_key.clone(),
            request_method: stale.entry.request_method.clone(),
            request_uri: stale.entry.request_uri.clone(),
            request_headers: stale.entry.request_headers.clone(),
            status: stale.entry.status,
            response_headers: merged_headers,
            body: stale.entry.resource.as_ref().map(|r| r.get()).transpose()?.map(|b| b.to_vec()),
            request_sent_at: unix_secs(response.request_sent_at),
            response_received_at: unix_secs(response.response_received_at),
            variant_map: stale.entry.variant_map.clone(),
        };
        self.storage.store_entry(&stale.entry_key, &refreshed).await?;

        if stale.entry_key != stale.root_key {
            let response_date = response.headers.clone();
            let root_key = stale.root_key.clone();
            let _ = self
                .storage
                .update_entry(&stale.root_key, move |existing| {
                    let mut root = existing.unwrap_or_else(|| StorageEntry {
                        storage_key: root_key.clone(),
                        request_method: "GET".to_string(),
                        request_uri: root_key.clone(),
                        request_headers: Vec::new(),
                        status: 200,
                        response_headers: Vec::new(),
                        body: None,
                        request_sent_at: unix_secs(response.request_sent_at),
                        response_received_at: unix_secs(response.response_received_at),
                        variant_map: None,
                    });
                    root.response_headers = update_handler::merge(&root.response_headers, &response_date);
                    root
                })
                .await;
        }

        Ok(CacheHit {
            root_key: stale.root_key.clone(),
            entry_key: stale.entry_key.clone(),
            entry: CacheEntry::from_storage_in_memory(refreshed),
        })
    }

    /// §4.8 `storeFromNegotiated` — after a revalidation produces an
    /// equivalent body under a different variant key, assign the stale
    /// entry to the newly requested `(host, req)` key so future lookups for
    /// this exact request hit directly.
    pub async fn store_from_negotiated<R: KeyableRequest>(
        &self,
        host: &str,
        request: &R,
        negotiated: &CacheHit,
    ) -> Result<CacheHit> {
        let root_key = key::root_key(host, request)?;
        let vary_names = vary_header_names(&negotiated.entry.response_headers);

        if vary_names.is_empty() {
            let mut se = negotiated.entry.to_storage()?;
            se.storage_key = root_key.clone();
            self.storage.store_entry(&root_key, &se).await?;
            return Ok(CacheHit { root_key: root_key.clone(), entry_key: root_key, entry: CacheEntry::from_storage_in_memory(se) });
        }

        let variant_key = key::variant_key(request, &vary_names);
        let entry_key = key::variant_entry_key(&variant_key, &root_key);
        let mut se = negotiated.entry.to_storage()?;
        se.storage_key = entry_key.clone();
        self.storage.store_entry(&entry_key, &se).await?;

        let root_headers = negotiated.entry.response_headers.clone();
        let variant_key_for_closure = variant_key.clone();
        let entry_key_for_closure = entry_key.clone();
        let root_key_inner = root_key.clone();
        let _ = self
            .storage
            .update_entry(&root_key, move |existing| {
                let mut variant_map = existing.and_then(|e| e.variant_map).unwrap_or_default();
                variant_map.insert(variant_key_for_closure.clone(), entry_key_for_closure.clone());
                StorageEntry {
                    storage_key: root_key_inner.clone(),
                    request_method: "GET".to_string(),
                    request_uri: root_key_inner.clone(),
                    request_headers: Vec::new(),
                    status: se.status,
                    response_headers: root_headers.clone(),
                    body: None,
                    request_sent_at: se.request_sent_at,
                    response_received_at: se.response_received_at,
                    variant_map: Some(variant_map),
                }
            })
            .await;

        Ok(CacheHit { root_key, entry_key, entry: CacheEntry::from_storage_in_memory(se) })
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.storage.delete_entry(key).await
    }

    pub async fn restore_raw(&self, key: &str) -> Result<Option<StorageEntry>> {
        self.storage.restore_entry(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::PostcardSerializer;
    use crate::storage::memory::MemoryStorage;
    use std::time::SystemTime;

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

    fn cache() -> Cache<MemoryStorage, PostcardSerializer> {
        Cache::new(MemoryStorage::new(64), PostcardSerializer, 5)
    }

    fn response(status: u16, headers: Vec<(&str, &str)>, body: &[u8]) -> OriginResponse {
        OriginResponse {
            status,
            headers: headers.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            body: Some(body.to_vec()),
            request_sent_at: SystemTime::UNIX_EPOCH,
            response_received_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[tokio::test]
    async fn plain_store_then_match_round_trips() {
        let cache = cache();
        let req = Req { method: "GET", headers: vec![] };
        cache.store("h", &req, response(200, vec![("Cache-Control", "max-age=60")], b"A")).await.unwrap();

        let m = cache.match_request("h", &req).await.unwrap();
        let hit = m.hit.expect("hit");
        assert_eq!(hit.entry.resource.unwrap().get().unwrap(), bytes::Bytes::from_static(b"A"));
    }

    #[tokio::test]
    async fn variant_store_creates_root_and_links_entry() {
        let cache = cache();
        let gzip = Req { method: "GET", headers: vec![("Accept-Encoding", "gzip")] };
        let br = Req { method: "GET", headers: vec![("Accept-Encoding", "br")] };

        cache.store("h", &gzip, response(200, vec![("Vary", "Accept-Encoding")], b"G")).await.unwrap();
        cache.store("h", &br, response(200, vec![("Vary", "Accept-Encoding")], b"B")).await.unwrap();

        let m_gzip = cache.match_request("h", &gzip).await.unwrap();
        assert_eq!(m_gzip.hit.unwrap().entry.resource.unwrap().get().unwrap(), bytes::Bytes::from_static(b"G"));

        let m_br = cache.match_request("h", &br).await.unwrap();
        assert_eq!(m_br.hit.unwrap().entry.resource.unwrap().get().unwrap(), bytes::Bytes::from_static(b"B"));

        let identity = Req { method: "GET", headers: vec![("Accept-Encoding", "identity")] };
        let m_identity = cache.match_request("h", &identity).await.unwrap();
        assert!(m_identity.hit.is_none());
        assert!(m_identity.root.is_some());
    }

    #[tokio::test]
    async fn get_variants_returns_every_linked_entry() {
        let cache = cache();
        let gzip = Req { method: "GET", headers: vec![("Accept-Encoding", "gzip")] };
        let br = Req { method: "GET", headers: vec![("Accept-Encoding", "br")] };
        cache.store("h", &gzip, response(200, vec![("Vary", "Accept-Encoding")], b"G")).await.unwrap();
        cache.store("h", &br, response(200, vec![("Vary", "Accept-Encoding")], b"B")).await.unwrap();

        let m = cache.match_request("h", &gzip).await.unwrap();
        let variants = cache.get_variants(&m.root.unwrap()).await.unwrap();
        assert_eq!(variants.len(), 2);
    }

    #[tokio::test]
    async fn update_merges_304_headers_into_stale_entry() {
        let cache = cache();
        let req = Req { method: "GET", headers: vec![] };
        let hit = cache
            .store(
                "h",
                &req,
                response(200, vec![("ETag", "\"v1\""), ("Date", "Tue, 01 Jan 2030 00:00:00 GMT")], b"A"),
            )
            .await
            .unwrap();

        let not_modified = OriginResponse {
            status: 304,
            headers: vec![("Date".to_string(), "Tue, 01 Jan 2030 00:05:00 GMT".to_string())],
            body: None,
            request_sent_at: SystemTime::UNIX_EPOCH,
            response_received_at: SystemTime::UNIX_EPOCH,
        };
        let refreshed = cache.update(&hit, &not_modified).await.unwrap();
        assert_eq!(
            crate::entry::header_get(&refreshed.entry.response_headers, "etag"),
            Some("\"v1\"")
        );
        assert_eq!(
            crate::entry::header_get(&refreshed.entry.response_headers, "date"),
            Some("Tue, 01 Jan 2030 00:05:00 GMT")
        );
        assert_eq!(
            refreshed.entry.resource.unwrap().get().unwrap(),
            bytes::Bytes::from_static(b"A")
        );
    }
}
