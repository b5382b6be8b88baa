//! Resolution of announced locations against recorded digests.
//!
//! A lookup is two-phase, cheapest first:
//!
//! 1. URL phase: is the announced canonical URL itself already cached? If so
//!    the proxy serves it as-is and nothing is rewritten.
//! 2. Digest phase: was a body with the announced digest recorded before? If
//!    so, its recorded URL replaces the canonical-location header.
//!
//! With `verify_recorded_url` set, a third lookup confirms the recovered URL
//! still has its own cache entry before rewriting.

use std::fmt;

use bytes::{Bytes, BytesMut};
use metalink_core::location::parse_recorded;
use metalink_core::{CacheKey, CacheReader, DedupConfig, DedupContext, Digest, Error, Ledger};
use url::Url;

use crate::host::{ResponseHeaders, Resumed, SkipReason};
use crate::scanner::{Announcement, scan};

const STAGE: &str = "resolution";

/// Completion of one cache read operation.
pub enum CacheEvent {
    OpenRead(Result<Box<dyn CacheReader>, Error>),
    Read(Result<Bytes, Error>),
}

impl CacheEvent {
    fn name(&self) -> &'static str {
        match self {
            CacheEvent::OpenRead(_) => "open_read",
            CacheEvent::Read(_) => "read",
        }
    }
}

/// What to do with the response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Keep(SkipReason),
    Rewrite(Url),
}

/// Per-response resolution session.
///
/// Each state holds at most one [`CacheKey`]; moving to the next lookup
/// releases the previous key before taking a new one.
pub enum ResolveState {
    UrlPhase { key: CacheKey, digest: Digest },
    DigestPhase { key: CacheKey },
    Reading { key: CacheKey, reader: Box<dyn CacheReader>, buf: BytesMut },
    Verifying { key: CacheKey, recovered: Url },
    Done(Verdict),
}

impl ResolveState {
    /// Start with the URL-phase lookup for an announcement.
    pub fn start(announcement: &Announcement, ledger: &Ledger) -> Self {
        ResolveState::UrlPhase {
            key: CacheKey::for_url(&announcement.location_url, ledger),
            digest: announcement.digest,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResolveState::UrlPhase { .. } => "url_phase",
            ResolveState::DigestPhase { .. } => "digest_phase",
            ResolveState::Reading { .. } => "reading",
            ResolveState::Verifying { .. } => "verifying",
            ResolveState::Done(_) => "done",
        }
    }

    /// The key of the lookup currently in flight.
    pub fn key(&self) -> Option<&CacheKey> {
        match self {
            ResolveState::UrlPhase { key, .. }
            | ResolveState::DigestPhase { key }
            | ResolveState::Reading { key, .. }
            | ResolveState::Verifying { key, .. } => Some(key),
            ResolveState::Done(_) => None,
        }
    }

    /// Fold a cache completion into the session.
    pub fn on_event(self, event: CacheEvent, config: &DedupConfig, ledger: &Ledger) -> Result<Self, Error> {
        let next = match (self, event) {
            (ResolveState::UrlPhase { key, .. }, CacheEvent::OpenRead(Ok(_reader))) => {
                tracing::debug!(key = ?key, "announced location already cached");
                ResolveState::Done(Verdict::Keep(SkipReason::UrlCached))
            }
            (ResolveState::UrlPhase { key, digest }, CacheEvent::OpenRead(Err(_))) => {
                drop(key);
                ResolveState::DigestPhase { key: CacheKey::for_content(digest, ledger) }
            }
            (ResolveState::DigestPhase { key }, CacheEvent::OpenRead(Ok(reader))) => {
                ResolveState::Reading { key, reader, buf: BytesMut::new() }
            }
            (ResolveState::DigestPhase { key }, CacheEvent::OpenRead(Err(err))) => {
                tracing::debug!(digest = %key.digest(), %err, "no recorded url for digest");
                ResolveState::Done(Verdict::Keep(SkipReason::DigestUnknown))
            }
            (ResolveState::Reading { key, reader, mut buf }, CacheEvent::Read(Ok(chunk))) => {
                if chunk.is_empty() {
                    drop(reader);
                    drop(key);
                    recovered(&buf, config, ledger)
                } else if buf.len() + chunk.len() > config.max_recorded_url_bytes {
                    tracing::debug!(digest = %key.digest(), "recorded url exceeds size limit");
                    ResolveState::Done(Verdict::Keep(SkipReason::InvalidRecordedUrl))
                } else {
                    buf.extend_from_slice(&chunk);
                    ResolveState::Reading { key, reader, buf }
                }
            }
            (ResolveState::Reading { key, .. }, CacheEvent::Read(Err(err))) => {
                tracing::debug!(digest = %key.digest(), %err, "recorded url read failed");
                ResolveState::Done(Verdict::Keep(SkipReason::ReadFailed))
            }
            (ResolveState::Verifying { recovered, .. }, CacheEvent::OpenRead(Ok(_reader))) => {
                ResolveState::Done(Verdict::Rewrite(recovered))
            }
            (ResolveState::Verifying { recovered, .. }, CacheEvent::OpenRead(Err(_))) => {
                tracing::debug!(url = %recovered, "recorded url no longer cached");
                ResolveState::Done(Verdict::Keep(SkipReason::RecordedUrlNotCached))
            }
            (state, event) => {
                return Err(Error::UnexpectedEvent { stage: STAGE, state: state.name(), event: event.name() });
            }
        };
        Ok(next)
    }

    pub fn into_verdict(self) -> Result<Verdict, Error> {
        match self {
            ResolveState::Done(verdict) => Ok(verdict),
            state => Err(Error::UnexpectedEvent { stage: STAGE, state: state.name(), event: "finish" }),
        }
    }
}

fn recovered(value: &[u8], config: &DedupConfig, ledger: &Ledger) -> ResolveState {
    match parse_recorded(value, config.max_recorded_url_bytes) {
        Ok(url) if config.verify_recorded_url => {
            ResolveState::Verifying { key: CacheKey::for_url(&url, ledger), recovered: url }
        }
        Ok(url) => ResolveState::Done(Verdict::Rewrite(url)),
        Err(err) => {
            tracing::debug!(%err, "recorded value is not a usable url");
            ResolveState::Done(Verdict::Keep(SkipReason::InvalidRecordedUrl))
        }
    }
}

impl fmt::Debug for ResolveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ResolveState");
        s.field("state", &self.name());
        if let Some(key) = self.key() {
            s.field("key", key);
        }
        if let ResolveState::Done(verdict) = self {
            s.field("verdict", verdict);
        }
        s.finish()
    }
}

/// Run the lookups for one announcement and return the verdict.
pub async fn lookup(announcement: &Announcement, ctx: &DedupContext) -> Verdict {
    let (config, ledger, cache) = (ctx.config(), ctx.ledger(), ctx.cache());
    let mut state = ResolveState::start(announcement, ledger);

    loop {
        let event = match &mut state {
            ResolveState::UrlPhase { key, .. }
            | ResolveState::DigestPhase { key }
            | ResolveState::Verifying { key, .. } => CacheEvent::OpenRead(cache.open_read(key).await),
            ResolveState::Reading { reader, .. } => CacheEvent::Read(reader.read().await),
            ResolveState::Done(_) => break,
        };
        state = match state.on_event(event, config, ledger) {
            Ok(next) => next,
            Err(err) => {
                tracing::error!(%err, "resolution aborted");
                return Verdict::Keep(SkipReason::InvariantViolation);
            }
        };
    }

    state.into_verdict().unwrap_or_else(|err| {
        tracing::error!(%err, "resolution aborted");
        Verdict::Keep(SkipReason::InvariantViolation)
    })
}

/// Scan, look up and, on a hit, rewrite the canonical-location header.
///
/// Every header reference and key taken here is released before returning.
pub async fn resolve<H>(headers: &mut H, ctx: &DedupContext) -> Resumed
where
    H: ResponseHeaders + ?Sized,
{
    let announcement = match scan(headers, ctx.config(), ctx.ledger()) {
        Ok(announcement) => announcement,
        Err(reason) => return Resumed::Unmodified(reason),
    };

    match lookup(&announcement, ctx).await {
        Verdict::Keep(reason) => Resumed::Unmodified(reason),
        Verdict::Rewrite(url) => match headers.replace_field(announcement.location.name(), url.as_str()) {
            Ok(()) => {
                tracing::info!(
                    from = %announcement.location_url,
                    to = %url,
                    digest = %announcement.digest,
                    "rewrote canonical location"
                );
                Resumed::Rewritten(url)
            }
            Err(err) => {
                tracing::warn!(%err, url = %url, "host rejected location rewrite");
                Resumed::Unmodified(SkipReason::HeaderRejected)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::{HeaderMap, HeaderValue};
    use metalink_core::{KeyKind, LeaseKind, MemoryCas};

    use super::*;
    use crate::testing::FaultyCache;

    const ORIGINAL: &str = "https://origin.example/pub/a.iso";
    const MIRROR: &str = "https://mirror.example/dist/a.iso";

    fn announce(location: &str, body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("location", HeaderValue::from_str(location).unwrap());
        headers.insert("digest", HeaderValue::from_str(&format!("SHA-256={}", Digest::of(body).to_base64())).unwrap());
        headers
    }

    fn context(cache: &FaultyCache, config: DedupConfig) -> DedupContext {
        DedupContext::new(config, Arc::new(cache.clone()))
    }

    fn record(cache: &FaultyCache, body: &[u8], url: &str) {
        cache.store().insert(Digest::of(body), KeyKind::Content, url.as_bytes().to_vec());
    }

    #[tokio::test]
    async fn test_rewrites_to_recorded_url() {
        let cache = FaultyCache::new();
        record(&cache, b"body", ORIGINAL);
        let ctx = context(&cache, DedupConfig::default());
        let mut headers = announce(MIRROR, b"body");

        let resumed = resolve(&mut headers, &ctx).await;

        assert_eq!(resumed, Resumed::Rewritten(Url::parse(ORIGINAL).unwrap()));
        assert_eq!(headers.get("location").unwrap(), ORIGINAL);
        assert_eq!(cache.open_reads(), 2);
        assert!(ctx.ledger().is_balanced());
        assert_eq!(ctx.ledger().acquired(LeaseKind::CacheKey), 2);
    }

    #[tokio::test]
    async fn test_url_already_cached_skips_digest_phase() {
        let cache = FaultyCache::new();
        record(&cache, b"body", ORIGINAL);
        cache.store().insert_url(&Url::parse(MIRROR).unwrap(), "cached body");
        let ctx = context(&cache, DedupConfig::default());
        let mut headers = announce(MIRROR, b"body");

        let resumed = resolve(&mut headers, &ctx).await;

        assert_eq!(resumed, Resumed::Unmodified(SkipReason::UrlCached));
        assert_eq!(headers.get("location").unwrap(), MIRROR);
        assert_eq!(cache.open_reads(), 1);
        assert!(ctx.ledger().is_balanced());
    }

    #[tokio::test]
    async fn test_unknown_digest_keeps_headers() {
        let cache = FaultyCache::new();
        let ctx = context(&cache, DedupConfig::default());
        let mut headers = announce(MIRROR, b"body");

        assert_eq!(resolve(&mut headers, &ctx).await, Resumed::Unmodified(SkipReason::DigestUnknown));
        assert_eq!(headers.get("location").unwrap(), MIRROR);
        assert!(ctx.ledger().is_balanced());
    }

    #[tokio::test]
    async fn test_malformed_digest_never_reads_cache() {
        let cache = FaultyCache::new();
        let ctx = context(&cache, DedupConfig::default());

        let bad_values = [
            "SHA-256=tooshort".to_owned(),
            format!("MD5={}", Digest::of(b"body").to_base64()),
            format!("SHA-256={}", "*".repeat(44)),
        ];
        for value in bad_values {
            let mut headers = HeaderMap::new();
            headers.insert("location", HeaderValue::from_static(MIRROR));
            headers.insert("digest", HeaderValue::from_str(&value).unwrap());

            assert_eq!(resolve(&mut headers, &ctx).await, Resumed::Unmodified(SkipReason::NoDigest));
            assert_eq!(headers.get("location").unwrap(), MIRROR);
        }
        assert_eq!(cache.open_reads(), 0);
        assert!(ctx.ledger().is_balanced());
    }

    #[tokio::test]
    async fn test_missing_location_never_reads_cache() {
        let cache = FaultyCache::new();
        let ctx = context(&cache, DedupConfig::default());
        let mut headers = HeaderMap::new();
        headers.insert("digest", HeaderValue::from_str(&format!("SHA-256={}", Digest::of(b"x").to_base64())).unwrap());

        assert_eq!(resolve(&mut headers, &ctx).await, Resumed::Unmodified(SkipReason::NoLocation));
        assert_eq!(cache.open_reads(), 0);
    }

    #[tokio::test]
    async fn test_garbage_recorded_value_keeps_headers() {
        let cache = FaultyCache::new();
        record(&cache, b"body", "not a url");
        let ctx = context(&cache, DedupConfig::default());
        let mut headers = announce(MIRROR, b"body");

        assert_eq!(resolve(&mut headers, &ctx).await, Resumed::Unmodified(SkipReason::InvalidRecordedUrl));
        assert_eq!(headers.get("location").unwrap(), MIRROR);
        assert!(ctx.ledger().is_balanced());
    }

    #[tokio::test]
    async fn test_oversized_recorded_value_is_rejected() {
        let cache = FaultyCache::new();
        cache.read_in_chunks(8);
        let long = format!("https://origin.example/{}", "a".repeat(64));
        record(&cache, b"body", &long);
        let config = DedupConfig { max_recorded_url_bytes: 32, ..Default::default() };
        let ctx = context(&cache, config);
        let mut headers = announce(MIRROR, b"body");

        assert_eq!(resolve(&mut headers, &ctx).await, Resumed::Unmodified(SkipReason::InvalidRecordedUrl));
        assert!(ctx.ledger().is_balanced());
    }

    #[tokio::test]
    async fn test_recorded_value_read_in_pieces() {
        let cache = FaultyCache::new();
        cache.read_in_chunks(5);
        record(&cache, b"body", ORIGINAL);
        let ctx = context(&cache, DedupConfig::default());
        let mut headers = announce(MIRROR, b"body");

        assert_eq!(resolve(&mut headers, &ctx).await, Resumed::Rewritten(Url::parse(ORIGINAL).unwrap()));
        assert!(ctx.ledger().is_balanced());
    }

    #[tokio::test]
    async fn test_read_failure_keeps_headers() {
        let cache = FaultyCache::new();
        cache.fail_read(true);
        record(&cache, b"body", ORIGINAL);
        let ctx = context(&cache, DedupConfig::default());
        let mut headers = announce(MIRROR, b"body");

        assert_eq!(resolve(&mut headers, &ctx).await, Resumed::Unmodified(SkipReason::ReadFailed));
        assert_eq!(headers.get("location").unwrap(), MIRROR);
        assert!(ctx.ledger().is_balanced());
    }

    #[tokio::test]
    async fn test_open_read_failure_is_a_miss() {
        let cache = FaultyCache::new();
        cache.fail_open_read(true);
        record(&cache, b"body", ORIGINAL);
        let ctx = context(&cache, DedupConfig::default());
        let mut headers = announce(MIRROR, b"body");

        assert_eq!(resolve(&mut headers, &ctx).await, Resumed::Unmodified(SkipReason::DigestUnknown));
        assert_eq!(cache.open_reads(), 2);
        assert!(ctx.ledger().is_balanced());
    }

    #[tokio::test]
    async fn test_dropping_resolution_releases_leases() {
        let cache = FaultyCache::new();
        cache.stall_open_read(true);
        let ctx = context(&cache, DedupConfig::default());
        let mut headers = announce(MIRROR, b"body");

        {
            let mut in_flight = std::pin::pin!(resolve(&mut headers, &ctx));
            assert!(futures_util::poll!(in_flight.as_mut()).is_pending());
            assert_eq!(ctx.ledger().outstanding(LeaseKind::CacheKey), 1);
            assert_eq!(ctx.ledger().outstanding(LeaseKind::HeaderField), 2);
        }

        assert!(ctx.ledger().is_balanced());
        assert_eq!(headers.get("location").unwrap(), MIRROR);
    }

    #[tokio::test]
    async fn test_verify_requires_recorded_url_entry() {
        let cache = FaultyCache::new();
        record(&cache, b"body", ORIGINAL);
        let config = DedupConfig { verify_recorded_url: true, ..Default::default() };
        let ctx = context(&cache, config);

        let mut headers = announce(MIRROR, b"body");
        assert_eq!(resolve(&mut headers, &ctx).await, Resumed::Unmodified(SkipReason::RecordedUrlNotCached));
        assert_eq!(cache.open_reads(), 3);

        cache.store().insert_url(&Url::parse(ORIGINAL).unwrap(), "cached body");
        let mut headers = announce(MIRROR, b"body");
        assert_eq!(resolve(&mut headers, &ctx).await, Resumed::Rewritten(Url::parse(ORIGINAL).unwrap()));
        assert!(ctx.ledger().is_balanced());
    }

    #[test]
    fn test_transitions_release_previous_key() {
        let ledger = Ledger::new();
        let config = DedupConfig::default();
        let announcement = scan(&announce(MIRROR, b"body"), &config, &ledger).unwrap();

        let state = ResolveState::start(&announcement, &ledger);
        assert_eq!(ledger.outstanding(LeaseKind::CacheKey), 1);

        let miss = CacheEvent::OpenRead(Err(Error::CacheMiss("url".into())));
        let state = state.on_event(miss, &config, &ledger).unwrap();
        assert_eq!(state.name(), "digest_phase");
        assert_eq!(state.key().unwrap().kind(), KeyKind::Content);
        assert_eq!(ledger.outstanding(LeaseKind::CacheKey), 1);
        assert_eq!(ledger.acquired(LeaseKind::CacheKey), 2);

        drop(state);
        drop(announcement);
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_unexpected_event_is_invariant_violation() {
        let ledger = Ledger::new();
        let config = DedupConfig::default();
        let announcement = scan(&announce(MIRROR, b"body"), &config, &ledger).unwrap();
        let state = ResolveState::start(&announcement, &ledger);

        let err = state.on_event(CacheEvent::Read(Ok(Bytes::new())), &config, &ledger).unwrap_err();
        assert!(err.is_invariant_violation());
        assert_eq!(err.to_string(), "INVARIANT_VIOLATION: resolution got read while url_phase");
        assert_eq!(ledger.outstanding(LeaseKind::CacheKey), 0);

        let done = ResolveState::Done(Verdict::Keep(SkipReason::NoDigest));
        assert!(done.on_event(CacheEvent::Read(Ok(Bytes::new())), &config, &ledger).is_err());
    }
}
