//! SHA-256 content digests.
//!
//! A [`Digest`] is both a cache key and, base64-encoded, the payload of a
//! `Digest: SHA-256=...` header. [`ContentDigester`] folds a body into a
//! digest one chunk at a time.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest as _, Sha256};

use crate::Error;

/// Length of a SHA-256 digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Length of a padded standard base64 encoding of [`DIGEST_LEN`] bytes.
pub const ENCODED_DIGEST_LEN: usize = 44;

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Build a digest from a slice that must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let array: [u8; DIGEST_LEN] = bytes
            .try_into()
            .map_err(|_| Error::InvalidDigest(format!("expected {DIGEST_LEN} bytes, got {}", bytes.len())))?;
        Ok(Self(array))
    }

    /// Digest of a complete byte sequence.
    pub fn of(bytes: &[u8]) -> Self {
        let mut digester = ContentDigester::new();
        digester.update(bytes);
        digester.finalize()
    }

    /// Digest of a URL's serialized form. This is the key under which the
    /// object cache stores the URL's own response.
    pub fn of_url(url: &url::Url) -> Self {
        Self::of(url.as_str().as_bytes())
    }

    /// Decode a standard, padded base64 digest.
    pub fn from_base64(encoded: &str) -> Result<Self, Error> {
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|e| Error::InvalidDigest(format!("base64: {e}")))?;
        Self::from_slice(&decoded)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental SHA-256 over a byte stream.
///
/// `finalize` consumes the digester, so a digest is produced at most once per
/// initialization.
#[derive(Clone, Default)]
pub struct ContentDigester {
    hasher: Sha256,
    bytes_seen: u64,
}

impl ContentDigester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard everything folded so far.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes_seen += chunk.len() as u64;
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    pub fn finalize(self) -> Digest {
        Digest(self.hasher.finalize().into())
    }
}

impl fmt::Debug for ContentDigester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentDigester")
            .field("bytes_seen", &self.bytes_seen)
            .finish_non_exhaustive()
    }
}
