//! Fault-injecting cache for pipeline tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::future;
use metalink_core::{CacheKey, CacheReader, CacheWriter, ContentAddressableCache, Error, MemoryCas};

#[derive(Debug, Default)]
struct Faults {
    open_write: AtomicBool,
    open_read: AtomicBool,
    stall_open_read: AtomicBool,
    write: AtomicBool,
    read: AtomicBool,
    read_chunk: AtomicUsize,
    open_writes: AtomicUsize,
    open_reads: AtomicUsize,
}

/// A [`MemoryCas`] whose operations can be made to fail, and which counts opens.
#[derive(Debug, Clone, Default)]
pub(crate) struct FaultyCache {
    store: MemoryCas,
    faults: Arc<Faults>,
}

impl FaultyCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn store(&self) -> &MemoryCas {
        &self.store
    }

    pub(crate) fn fail_open_write(&self, fail: bool) {
        self.faults.open_write.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_open_read(&self, fail: bool) {
        self.faults.open_read.store(fail, Ordering::SeqCst);
    }

    /// Make `open_read` pend forever.
    pub(crate) fn stall_open_read(&self, stall: bool) {
        self.faults.stall_open_read.store(stall, Ordering::SeqCst);
    }

    pub(crate) fn fail_write(&self, fail: bool) {
        self.faults.write.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_read(&self, fail: bool) {
        self.faults.read.store(fail, Ordering::SeqCst);
    }

    /// Serve stored values `size` bytes per read.
    pub(crate) fn read_in_chunks(&self, size: usize) {
        self.faults.read_chunk.store(size, Ordering::SeqCst);
    }

    pub(crate) fn open_writes(&self) -> usize {
        self.faults.open_writes.load(Ordering::SeqCst)
    }

    pub(crate) fn open_reads(&self) -> usize {
        self.faults.open_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentAddressableCache for FaultyCache {
    async fn open_write(&self, key: &CacheKey) -> Result<Box<dyn CacheWriter>, Error> {
        self.faults.open_writes.fetch_add(1, Ordering::SeqCst);
        if self.faults.open_write.load(Ordering::SeqCst) {
            return Err(Error::CacheUnavailable("injected open_write failure".into()));
        }

        let inner = self.store.open_write(key).await?;
        if self.faults.write.load(Ordering::SeqCst) {
            return Ok(Box::new(FailingWriter { _inner: inner }));
        }
        Ok(inner)
    }

    async fn open_read(&self, key: &CacheKey) -> Result<Box<dyn CacheReader>, Error> {
        self.faults.open_reads.fetch_add(1, Ordering::SeqCst);
        if self.faults.open_read.load(Ordering::SeqCst) {
            return Err(Error::CacheUnavailable("injected open_read failure".into()));
        }
        if self.faults.stall_open_read.load(Ordering::SeqCst) {
            future::pending::<()>().await;
        }

        let mut inner = self.store.open_read(key).await?;
        if self.faults.read.load(Ordering::SeqCst) {
            return Ok(Box::new(FailingReader));
        }

        let size = self.faults.read_chunk.load(Ordering::SeqCst);
        if size == 0 {
            return Ok(inner);
        }
        let mut value = BytesMut::new();
        loop {
            let chunk = inner.read().await?;
            if chunk.is_empty() {
                break;
            }
            value.extend_from_slice(&chunk);
        }
        Ok(Box::new(ChunkedReader { value: value.freeze(), size }))
    }
}

struct FailingWriter {
    _inner: Box<dyn CacheWriter>,
}

#[async_trait]
impl CacheWriter for FailingWriter {
    async fn write(&mut self, _bytes: &[u8]) -> Result<usize, Error> {
        Err(Error::CacheUnavailable("injected write failure".into()))
    }

    async fn close(&mut self) -> Result<(), Error> {
        Err(Error::CacheUnavailable("injected close failure".into()))
    }
}

struct FailingReader;

#[async_trait]
impl CacheReader for FailingReader {
    async fn read(&mut self) -> Result<Bytes, Error> {
        Err(Error::CacheUnavailable("injected read failure".into()))
    }
}

struct ChunkedReader {
    value: Bytes,
    size: usize,
}

#[async_trait]
impl CacheReader for ChunkedReader {
    async fn read(&mut self) -> Result<Bytes, Error> {
        let n = self.size.min(self.value.len());
        Ok(self.value.split_to(n))
    }
}
