//! Content-addressable cache abstraction and stores.
//!
//! Keys are 32-byte digests: either the SHA-256 of a response body, or the
//! SHA-256 of a URL string (the key the object cache files that URL's
//! response under). Values are opaque bytes.
//!
//! Two stores implement [`ContentAddressableCache`]:
//!
//! - [`MemoryCas`]: in-process map with key-level write serialization
//! - [`CacheDb`]: persistent SQLite store using tokio-rusqlite, with
//!   schema versioning and operator purge queries

pub mod connection;
pub mod entries;
pub mod key;
pub mod memory;
mod migrations;

use async_trait::async_trait;
use bytes::Bytes;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::DedupRecord;
pub use key::{CacheKey, KeyKind};
pub use memory::MemoryCas;

/// Async key/value store consumed by the dedup pipeline.
///
/// Either open may fail at any time (another writer holds the key, the store
/// is unavailable, the key is absent); callers treat every failure as
/// non-fatal.
#[async_trait]
pub trait ContentAddressableCache: Send + Sync {
    /// Open `key` for writing. Nothing is visible to readers until
    /// [`CacheWriter::close`] succeeds.
    async fn open_write(&self, key: &CacheKey) -> Result<Box<dyn CacheWriter>, Error>;

    /// Open `key` for reading. A missing key is an error.
    async fn open_read(&self, key: &CacheKey) -> Result<Box<dyn CacheReader>, Error>;
}

/// An open write. Dropping it without `close` abandons the write.
#[async_trait]
pub trait CacheWriter: Send {
    /// Append bytes to the pending value, returning how many were accepted.
    async fn write(&mut self, bytes: &[u8]) -> Result<usize, Error>;

    /// Commit the value under the key it was opened with. The handle accepts
    /// no further writes or closes afterwards.
    async fn close(&mut self) -> Result<(), Error>;
}

/// An open read.
#[async_trait]
pub trait CacheReader: Send {
    /// Read the stored value. Returns an empty buffer once exhausted.
    async fn read(&mut self) -> Result<Bytes, Error>;
}

/// Reader over a value fetched in full when the read was opened.
#[derive(Debug)]
pub(crate) struct BufferedReader {
    value: Option<Bytes>,
}

impl BufferedReader {
    pub(crate) fn new(value: Bytes) -> Self {
        Self { value: Some(value) }
    }
}

#[async_trait]
impl CacheReader for BufferedReader {
    async fn read(&mut self) -> Result<Bytes, Error> {
        Ok(self.value.take().unwrap_or_default())
    }
}
