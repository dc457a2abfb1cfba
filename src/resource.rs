//! §6 — the `Resource` contract: an opaque response body owned by a cache
//! entry. Two reference implementations are provided: an in-memory byte
//! buffer and a file-backed resource with explicit disposal.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use bytes::Bytes;

/// A cached response body. Implementations are shared only through immutable
/// views (`Arc<dyn Resource>`) and are disposed exactly once, when the owning
/// entry is evicted.
pub trait Resource: Send + Sync + std::fmt::Debug {
    /// Read the whole body into memory.
    fn get(&self) -> io::Result<Bytes>;

    /// Open a streaming reader over the body.
    fn stream(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Body length in bytes.
    fn length(&self) -> u64;

    /// A cheap size estimate, available before the body is necessarily
    /// materialized. Defaults to `length()`.
    fn content_length_hint(&self) -> Option<u64> {
        Some(self.length())
    }

    /// Release any backing storage (e.g. delete a temp file). Idempotent.
    fn dispose(&self);
}

/// An immutable in-memory resource.
#[derive(Debug, Clone)]
pub struct MemoryResource {
    bytes: Bytes,
}

impl MemoryResource {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self { bytes: bytes.into() }
    }
}

impl Resource for MemoryResource {
    fn get(&self) -> io::Result<Bytes> {
        Ok(self.bytes.clone())
    }

    fn stream(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(io::Cursor::new(self.bytes.clone())))
    }

    fn length(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn dispose(&self) {}
}

/// A file-backed resource. `dispose` removes the backing file; subsequent
/// reads after disposal fail with `NotFound`, which callers treat the same
/// as any other storage I/O error (degrade to miss).
#[derive(Debug)]
pub struct FileResource {
    path: PathBuf,
    length: u64,
}

impl FileResource {
    pub fn new(path: impl Into<PathBuf>, length: u64) -> Self {
        Self { path: path.into(), length }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Resource for FileResource {
    fn get(&self) -> io::Result<Bytes> {
        Ok(Bytes::from(fs::read(&self.path)?))
    }

    fn stream(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(&self.path)?))
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn dispose(&self) {
        let _ = fs::remove_file(&self.path);
    }
}
