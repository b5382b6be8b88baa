//! In-memory content-addressable store.
//!
//! Holds committed values in a map keyed by `(kind, digest)` and tracks keys
//! with an open write. A second `open_write` on a key that is already being
//! written fails, which is the same key-level serialization a disk-backed
//! object cache applies.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use super::{BufferedReader, CacheKey, CacheReader, CacheWriter, ContentAddressableCache, KeyKind};
use crate::Error;
use crate::digest::Digest;

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<(KeyKind, Digest), Bytes>,
    writing: HashSet<(KeyKind, Digest)>,
}

/// In-memory cache store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryCas {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value directly, bypassing the write protocol.
    pub fn insert(&self, digest: Digest, kind: KeyKind, value: impl Into<Bytes>) {
        self.inner.lock().entries.insert((kind, digest), value.into());
    }

    /// Store a response body under a URL's key, as the object cache would.
    pub fn insert_url(&self, url: &url::Url, body: impl Into<Bytes>) {
        self.insert(Digest::of_url(url), KeyKind::Url, body);
    }

    /// The URL recorded for a body digest, if any.
    pub fn get(&self, digest: &Digest) -> Option<Bytes> {
        self.entry(KeyKind::Content, digest)
    }

    fn entry(&self, kind: KeyKind, digest: &Digest) -> Option<Bytes> {
        self.inner.lock().entries.get(&(kind, *digest)).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentAddressableCache for MemoryCas {
    async fn open_write(&self, key: &CacheKey) -> Result<Box<dyn CacheWriter>, Error> {
        let digest = *key.digest();
        if !self.inner.lock().writing.insert((key.kind(), digest)) {
            return Err(Error::CacheUnavailable(format!("write already open for {digest}")));
        }

        Ok(Box::new(MemoryWriter {
            store: self.clone(),
            digest,
            kind: key.kind(),
            buf: BytesMut::new(),
            closed: false,
        }))
    }

    async fn open_read(&self, key: &CacheKey) -> Result<Box<dyn CacheReader>, Error> {
        let value = self
            .entry(key.kind(), key.digest())
            .ok_or_else(|| Error::CacheMiss(key.digest().to_hex()))?;
        Ok(Box::new(BufferedReader::new(value)))
    }
}

struct MemoryWriter {
    store: MemoryCas,
    digest: Digest,
    kind: KeyKind,
    buf: BytesMut,
    closed: bool,
}

#[async_trait]
impl CacheWriter for MemoryWriter {
    async fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        if self.closed {
            return Err(Error::CacheUnavailable(format!("write handle for {} already closed", self.digest)));
        }
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::CacheUnavailable(format!("write handle for {} already closed", self.digest)));
        }
        self.closed = true;
        let value = std::mem::take(&mut self.buf).freeze();
        self.store.insert(self.digest, self.kind, value);
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        self.store.inner.lock().writing.remove(&(self.kind, self.digest));
    }
}
