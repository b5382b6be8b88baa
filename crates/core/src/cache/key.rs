//! Cache keys.

use std::fmt;

use crate::digest::Digest;
use crate::lease::{Lease, LeaseKind, Ledger};

/// What a key's digest was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// SHA-256 of a response body. The value is the URL it was recorded from.
    Content,
    /// SHA-256 of a URL string. The value is that URL's cached response.
    Url,
}

impl KeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Content => "content",
            KeyKind::Url => "url",
        }
    }
}

/// An owned cache key.
///
/// Each key holds a lease from the session's [`Ledger`]; dropping the key
/// releases it. Keys are deliberately not `Clone`.
pub struct CacheKey {
    digest: Digest,
    kind: KeyKind,
    _lease: Lease,
}

impl CacheKey {
    /// Key for a response body with the given digest.
    pub fn for_content(digest: Digest, ledger: &Ledger) -> Self {
        Self { digest, kind: KeyKind::Content, _lease: ledger.acquire(LeaseKind::CacheKey) }
    }

    /// Key for a URL's own cache entry.
    pub fn for_url(url: &url::Url, ledger: &Ledger) -> Self {
        Self { digest: Digest::of_url(url), kind: KeyKind::Url, _lease: ledger.acquire(LeaseKind::CacheKey) }
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKey")
            .field("kind", &self.kind)
            .field("digest", &self.digest)
            .finish()
    }
}
