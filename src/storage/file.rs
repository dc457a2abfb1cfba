//! Disk-backed [`RawStorage`] implementation using `cacache` as the
//! content-addressed blob store, with a small in-process index mapping
//! logical keys to content integrity for the CAS token.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use cacache::Integrity;
use tokio::sync::RwLock;

use crate::error::{CacheError, Result};

use super::RawStorage;

fn backend_err(e: cacache::Error) -> CacheError {
    CacheError::Storage(Box::new(e))
}

/// A disk-backed cache store. Bodies and entry metadata alike are opaque
/// blobs to this layer; `cacache` handles integrity-addressed writes and
/// reads, this layer only tracks which integrity a logical key currently
/// points at.
pub struct FileStorage {
    cache_dir: PathBuf,
    index: RwLock<HashMap<String, Integrity>>,
}

impl FileStorage {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self { cache_dir: cache_dir.into(), index: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl RawStorage for FileStorage {
    type Cas = Integrity;

    async fn store(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let integrity = cacache::write_hash(&self.cache_dir, &value).await.map_err(backend_err)?;
        self.index.write().await.insert(key.to_string(), integrity);
        Ok(())
    }

    async fn restore(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let integrity = { self.index.read().await.get(key).cloned() };
        match integrity {
            Some(sri) => Ok(Some(cacache::read_hash(&self.cache_dir, &sri).await.map_err(backend_err)?)),
            None => Ok(None),
        }
    }

    async fn get_for_update_cas(&self, key: &str) -> Result<Option<Integrity>> {
        Ok(self.index.read().await.get(key).cloned())
    }

    async fn get_storage_object(&self, _key: &str, cas: &Integrity) -> Result<Vec<u8>> {
        cacache::read_hash(&self.cache_dir, cas).await.map_err(backend_err)
    }

    async fn update_cas(&self, key: &str, cas: &Integrity, value: Vec<u8>) -> Result<bool> {
        let mut index = self.index.write().await;
        match index.get(key) {
            Some(current) if current == cas => {
                let new_integrity = cacache::write_hash(&self.cache_dir, &value).await.map_err(backend_err)?;
                index.insert(key.to_string(), new_integrity);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.index.write().await.remove(key);
        Ok(())
    }

    async fn bulk_restore(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(bytes) = self.restore(key).await? {
                out.insert(key.clone(), bytes);
            }
        }
        Ok(out)
    }
}
