//! Bounded, LRU-evicting in-process [`RawStorage`] implementation, with an
//! optional eviction callback.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;

use crate::error::{CacheError, Result};

use super::RawStorage;

struct Slot {
    version: u64,
    value: Vec<u8>,
}

/// A process-local, capacity-bounded cache store. Eviction is plain LRU;
/// `on_evict`, when set, is invoked (synchronously, with the cache lock
/// already released) for every key capacity pressure forces out.
pub struct MemoryStorage {
    inner: Mutex<LruCache<String, Slot>>,
    next_version: AtomicU64,
    on_evict: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl MemoryStorage {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap()))),
            next_version: AtomicU64::new(1),
            on_evict: None,
        }
    }

    pub fn with_eviction_callback(capacity: usize, on_evict: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self { on_evict: Some(Box::new(on_evict)), ..Self::new(capacity) }
    }

    fn next_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl RawStorage for MemoryStorage {
    type Cas = u64;

    async fn store(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let version = self.next_version();
        let evicted = {
            let mut guard = self.inner.lock().unwrap();
            guard.push(key.to_string(), Slot { version, value })
        };
        if let Some((evicted_key, _)) = evicted {
            if evicted_key != key {
                if let Some(cb) = &self.on_evict {
                    cb(&evicted_key);
                }
            }
        }
        Ok(())
    }

    async fn restore(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut guard = self.inner.lock().unwrap();
        Ok(guard.get(key).map(|s| s.value.clone()))
    }

    async fn get_for_update_cas(&self, key: &str) -> Result<Option<u64>> {
        let mut guard = self.inner.lock().unwrap();
        Ok(guard.get(key).map(|s| s.version))
    }

    async fn get_storage_object(&self, key: &str, cas: &u64) -> Result<Vec<u8>> {
        let mut guard = self.inner.lock().unwrap();
        match guard.get(key) {
            Some(s) if s.version == *cas => Ok(s.value.clone()),
            _ => Err(CacheError::Storage(Box::new(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "CAS token no longer current",
            )))),
        }
    }

    async fn update_cas(&self, key: &str, cas: &u64, value: Vec<u8>) -> Result<bool> {
        let mut guard = self.inner.lock().unwrap();
        match guard.peek(key) {
            Some(s) if s.version == *cas => {
                let version = self.next_version.fetch_add(1, Ordering::SeqCst);
                guard.put(key.to_string(), Slot { version, value });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        guard.pop(key);
        Ok(())
    }

    async fn bulk_restore(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut guard = self.inner.lock().unwrap();
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(slot) = guard.get(key) {
                out.insert(key.clone(), slot.value.clone());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_restore() {
        let s = MemoryStorage::new(4);
        s.store("k", b"v".to_vec()).await.unwrap();
        assert_eq!(s.restore("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn cas_rejects_stale_token() {
        let s = MemoryStorage::new(4);
        s.store("k", b"v1".to_vec()).await.unwrap();
        let stale = s.get_for_update_cas("k").await.unwrap().unwrap();
        s.store("k", b"v2".to_vec()).await.unwrap();
        assert!(!s.update_cas("k", &stale, b"v3".to_vec()).await.unwrap());
        assert_eq!(s.restore("k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn cas_succeeds_with_current_token() {
        let s = MemoryStorage::new(4);
        s.store("k", b"v1".to_vec()).await.unwrap();
        let current = s.get_for_update_cas("k").await.unwrap().unwrap();
        assert!(s.update_cas("k", &current, b"v2".to_vec()).await.unwrap());
        assert_eq!(s.restore("k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn eviction_callback_fires_on_capacity_pressure() {
        use std::sync::{Arc, Mutex as StdMutex};
        let evicted = Arc::new(StdMutex::new(Vec::new()));
        let evicted2 = evicted.clone();
        let s = MemoryStorage::with_eviction_callback(1, move |k| evicted2.lock().unwrap().push(k.to_string()));
        s.store("a", b"1".to_vec()).await.unwrap();
        s.store("b", b"2".to_vec()).await.unwrap();
        assert_eq!(*evicted.lock().unwrap(), vec!["a".to_string()]);
    }
}
