//! C7 — the storage contract (§4.7): a pluggable key→blob store with CAS,
//! bulk read, and delete, plus the serializing layer built on top of it.

pub mod file;
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use log::{debug, warn};

use crate::entry::StorageEntry;
use crate::error::{CacheError, Result};
use crate::serializer::Serializer;

/// `digestToStorageKey` (§4.7): maps a logical cache key to the key a
/// backend actually stores under. Backends never see the raw URI-shaped
/// key, which keeps their namespace flat and bounds key length regardless
/// of how long a request URI gets.
fn digest_to_storage_key(key: &str) -> String {
    hex::encode(blake3::hash(key.as_bytes()).as_bytes())
}

/// The low-level, backend-specific half of the storage contract. `Cas` is an
/// opaque token obtained from [`RawStorage::get_for_update_cas`] and
/// consumed by exactly one [`RawStorage::update_cas`] call.
#[async_trait]
pub trait RawStorage: Send + Sync {
    type Cas: Clone + Send + Sync;

    /// Unconditional put.
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Plain read.
    async fn restore(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Read a CAS token. A present key with a null/absent CAS token and an
    /// absent key are distinguishable: both surface as `Ok(None)` here only
    /// when the key itself is absent.
    async fn get_for_update_cas(&self, key: &str) -> Result<Option<Self::Cas>>;

    /// Derive the value a CAS token was issued for.
    async fn get_storage_object(&self, key: &str, cas: &Self::Cas) -> Result<Vec<u8>>;

    /// Atomic replace; `false` on conflict (token no longer current).
    async fn update_cas(&self, key: &str, cas: &Self::Cas, value: Vec<u8>) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Reads every key that exists among `keys`; missing keys are simply
    /// absent from the result map.
    async fn bulk_restore(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>>;
}

/// The serializing layer over a [`RawStorage`] backend (§4.7). Adds
/// (de)serialization and the `updateEntry` CAS-retry loop; storage-key
/// collisions (two logical keys digesting to the same backend key) are
/// caught by comparing the deserialized entry's own `storage_key`.
pub struct AbstractSerializingCacheStorage<S: RawStorage, Ser: Serializer> {
    backend: S,
    serializer: Ser,
    max_update_retries: u32,
}

impl<S: RawStorage, Ser: Serializer> AbstractSerializingCacheStorage<S, Ser> {
    pub fn new(backend: S, serializer: Ser, max_update_retries: u32) -> Self {
        Self { backend, serializer, max_update_retries }
    }

    fn deserialize_checked(&self, key: &str, bytes: &[u8]) -> Result<Option<StorageEntry>> {
        let entry = self.serializer.deserialize(bytes)?;
        if entry.storage_key != key {
            warn!("cache storage key collision: requested {key:?}, stored entry claims {:?}", entry.storage_key);
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub async fn store_entry(&self, key: &str, entry: &StorageEntry) -> Result<()> {
        let bytes = self.serializer.serialize(entry)?;
        self.backend.store(&digest_to_storage_key(key), bytes).await
    }

    pub async fn restore_entry(&self, key: &str) -> Result<Option<StorageEntry>> {
        match self.backend.restore(&digest_to_storage_key(key)).await? {
            Some(bytes) => self.deserialize_checked(key, &bytes),
            None => Ok(None),
        }
    }

    pub async fn delete_entry(&self, key: &str) -> Result<()> {
        self.backend.delete(&digest_to_storage_key(key)).await
    }

    pub async fn bulk_restore_entries(&self, keys: &[String]) -> Result<HashMap<String, StorageEntry>> {
        let digests: HashMap<String, &String> = keys.iter().map(|k| (digest_to_storage_key(k), k)).collect();
        let digested_keys: Vec<String> = digests.keys().cloned().collect();
        let raw = self.backend.bulk_restore(&digested_keys).await?;
        let mut out = HashMap::with_capacity(raw.len());
        for (digested, bytes) in raw {
            let Some(&logical) = digests.get(&digested) else { continue };
            if let Some(entry) = self.deserialize_checked(logical, &bytes)? {
                out.insert(logical.clone(), entry);
            }
        }
        Ok(out)
    }

    /// Reads the current entry (if any), applies `f`, and atomically writes
    /// the result back, retrying on CAS conflict up to `max_update_retries`
    /// times (§4.7, §5). Fails with [`CacheError::CacheUpdateFailure`] once
    /// the retry budget is exhausted.
    pub async fn update_entry<F>(&self, key: &str, mut f: F) -> Result<StorageEntry>
    where
        F: FnMut(Option<StorageEntry>) -> StorageEntry + Send,
    {
        let storage_key = digest_to_storage_key(key);
        for attempt in 0..=self.max_update_retries {
            let cas = self.backend.get_for_update_cas(&storage_key).await?;
            let current = match &cas {
                Some(token) => {
                    let bytes = self.backend.get_storage_object(&storage_key, token).await?;
                    self.deserialize_checked(key, &bytes)?
                }
                None => None,
            };
            let updated = f(current);
            let bytes = self.serializer.serialize(&updated)?;

            let committed = match &cas {
                Some(token) => self.backend.update_cas(&storage_key, token, bytes).await?,
                None => {
                    self.backend.store(&storage_key, bytes).await?;
                    true
                }
            };

            if committed {
                return Ok(updated);
            }
            debug!("cache CAS conflict on {key:?}, attempt {attempt}");
        }
        Err(CacheError::CacheUpdateFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::PostcardSerializer;
    use crate::storage::memory::MemoryStorage;

    fn entry(key: &str, body: &[u8]) -> StorageEntry {
        StorageEntry {
            storage_key: key.to_string(),
            request_method: "GET".into(),
            request_uri: key.to_string(),
            request_headers: vec![],
            status: 200,
            response_headers: vec![],
            body: Some(body.to_vec()),
            request_sent_at: 0,
            response_received_at: 0,
            variant_map: None,
        }
    }

    #[tokio::test]
    async fn store_then_restore_roundtrips() {
        let storage = AbstractSerializingCacheStorage::new(MemoryStorage::new(16), PostcardSerializer, 5);
        storage.store_entry("k", &entry("k", b"A")).await.unwrap();
        let got = storage.restore_entry("k").await.unwrap().unwrap();
        assert_eq!(got.body.as_deref(), Some(&b"A"[..]));
    }

    #[tokio::test]
    async fn update_entry_creates_when_absent() {
        let storage = AbstractSerializingCacheStorage::new(MemoryStorage::new(16), PostcardSerializer, 5);
        let updated = storage
            .update_entry("k", |existing| {
                assert!(existing.is_none());
                entry("k", b"first")
            })
            .await
            .unwrap();
        assert_eq!(updated.body.as_deref(), Some(&b"first"[..]));
    }

    #[tokio::test]
    async fn update_entry_sees_prior_value() {
        let storage = AbstractSerializingCacheStorage::new(MemoryStorage::new(16), PostcardSerializer, 5);
        storage.store_entry("k", &entry("k", b"A")).await.unwrap();
        let updated = storage
            .update_entry("k", |existing| {
                let mut e = existing.expect("prior value");
                e.body = Some(b"B".to_vec());
                e
            })
            .await
            .unwrap();
        assert_eq!(updated.body.as_deref(), Some(&b"B"[..]));
    }

    #[tokio::test]
    async fn store_entry_digests_the_logical_key_before_reaching_the_backend() {
        let backend = MemoryStorage::new(16);
        let storage = AbstractSerializingCacheStorage::new(backend, PostcardSerializer, 5);
        storage.store_entry("http://example.test/a", &entry("http://example.test/a", b"A")).await.unwrap();

        assert!(storage.backend.restore("http://example.test/a").await.unwrap().is_none());
        let digested = digest_to_storage_key("http://example.test/a");
        assert!(storage.backend.restore(&digested).await.unwrap().is_some());
        assert_eq!(storage.restore_entry("http://example.test/a").await.unwrap().unwrap().body.as_deref(), Some(&b"A"[..]));
    }

    #[tokio::test]
    async fn bulk_restore_skips_missing_keys() {
        let storage = AbstractSerializingCacheStorage::new(MemoryStorage::new(16), PostcardSerializer, 5);
        storage.store_entry("a", &entry("a", b"1")).await.unwrap();
        let out = storage.bulk_restore_entries(&["a".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert!(out.contains_key("a"));
    }
}
