//! Body capture.
//!
//! [`CaptureStream`] relays the origin response body to the client chunk by
//! chunk while folding the same bytes into a [`ContentDigester`]. Once the
//! body ends, a background task commits `digest -> request URL` to the cache.
//!
//! The work is split the same way as resolution: [`CaptureState`] holds the
//! session and its pure transitions, [`commit`] issues the cache I/O.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, ready};
use metalink_core::{CacheKey, CacheWriter, ContentAddressableCache, ContentDigester, DedupContext, Digest, Error, Ledger};
use tokio::sync::oneshot;

const STAGE: &str = "body_capture";

/// A body-side notification from the host.
#[derive(Debug, Clone, Copy)]
pub enum BodyEvent<'a> {
    /// Bytes became available. May be empty.
    Data(&'a [u8]),
    /// Upstream has no more bytes due.
    End,
    /// Upstream failed before the body was complete.
    Failed,
}

impl BodyEvent<'_> {
    fn name(&self) -> &'static str {
        match self {
            BodyEvent::Data(_) => "data",
            BodyEvent::End => "end",
            BodyEvent::Failed => "failed",
        }
    }
}

/// Completion of one cache write operation.
pub enum WriteEvent {
    Opened(Result<Box<dyn CacheWriter>, Error>),
    Written(Result<usize, Error>),
    Closed(Result<(), Error>),
}

impl WriteEvent {
    fn name(&self) -> &'static str {
        match self {
            WriteEvent::Opened(_) => "open_write",
            WriteEvent::Written(_) => "write",
            WriteEvent::Closed(_) => "close",
        }
    }
}

/// Why a body was relayed without recording it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSkip {
    Disabled,
    CacheUnavailable,
    MissingRequestUrl,
    WriteFailed,
    InvariantViolation,
}

impl CaptureSkip {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureSkip::Disabled => "disabled",
            CaptureSkip::CacheUnavailable => "cache_unavailable",
            CaptureSkip::MissingRequestUrl => "missing_request_url",
            CaptureSkip::WriteFailed => "write_failed",
            CaptureSkip::InvariantViolation => "invariant_violation",
        }
    }
}

/// Final result of one capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// `digest -> request_url` was committed.
    Recorded { digest: Digest, request_url: String, bytes: u64 },
    /// The body was relayed in full but nothing was committed.
    Skipped { digest: Option<Digest>, reason: CaptureSkip },
    /// Upstream failed or the relay was dropped before end of stream.
    Aborted { bytes: u64 },
}

/// Receives the outcome once the session finishes.
pub type CaptureReceipt = oneshot::Receiver<CaptureOutcome>;

/// Per-response capture session.
///
/// `AwaitingFirstBytes -> Streaming -> Finalizing -> CacheOpening -> Writing -> Done`.
/// At most one [`CacheKey`] is held, and only while the write is opening.
pub enum CaptureState {
    AwaitingFirstBytes,
    Streaming { digester: ContentDigester },
    Finalizing { digest: Digest, bytes: u64 },
    CacheOpening { key: CacheKey, bytes: u64 },
    Writing { writer: Box<dyn CacheWriter>, digest: Digest, request_url: String, bytes: u64, written: bool },
    Done(CaptureOutcome),
}

impl CaptureState {
    pub fn new() -> Self {
        CaptureState::AwaitingFirstBytes
    }

    pub fn name(&self) -> &'static str {
        match self {
            CaptureState::AwaitingFirstBytes => "awaiting_first_bytes",
            CaptureState::Streaming { .. } => "streaming",
            CaptureState::Finalizing { .. } => "finalizing",
            CaptureState::CacheOpening { .. } => "cache_opening",
            CaptureState::Writing { .. } => "writing",
            CaptureState::Done(_) => "done",
        }
    }

    /// Bytes observed so far.
    pub fn bytes(&self) -> u64 {
        match self {
            CaptureState::AwaitingFirstBytes | CaptureState::Done(_) => 0,
            CaptureState::Streaming { digester } => digester.bytes_seen(),
            CaptureState::Finalizing { bytes, .. }
            | CaptureState::CacheOpening { bytes, .. }
            | CaptureState::Writing { bytes, .. } => *bytes,
        }
    }

    /// Fold a body event into the session.
    pub fn on_body(self, event: BodyEvent<'_>) -> Result<Self, Error> {
        let next = match (self, event) {
            (CaptureState::AwaitingFirstBytes, BodyEvent::Data([])) => CaptureState::AwaitingFirstBytes,
            (CaptureState::AwaitingFirstBytes, BodyEvent::Data(chunk)) => {
                let mut digester = ContentDigester::new();
                digester.update(chunk);
                CaptureState::Streaming { digester }
            }
            (CaptureState::Streaming { mut digester }, BodyEvent::Data(chunk)) => {
                digester.update(chunk);
                CaptureState::Streaming { digester }
            }
            (CaptureState::AwaitingFirstBytes, BodyEvent::End) => {
                CaptureState::Finalizing { digest: ContentDigester::new().finalize(), bytes: 0 }
            }
            (CaptureState::Streaming { digester }, BodyEvent::End) => {
                let bytes = digester.bytes_seen();
                CaptureState::Finalizing { digest: digester.finalize(), bytes }
            }
            (state @ (CaptureState::AwaitingFirstBytes | CaptureState::Streaming { .. }), BodyEvent::Failed) => {
                CaptureState::Done(CaptureOutcome::Aborted { bytes: state.bytes() })
            }
            (state, event) => {
                return Err(Error::UnexpectedEvent { stage: STAGE, state: state.name(), event: event.name() });
            }
        };
        Ok(next)
    }

    /// Take the write key for a finalized digest.
    pub fn begin_commit(self, ledger: &Ledger) -> Result<Self, Error> {
        match self {
            CaptureState::Finalizing { digest, bytes } => {
                Ok(CaptureState::CacheOpening { key: CacheKey::for_content(digest, ledger), bytes })
            }
            state => Err(Error::UnexpectedEvent { stage: STAGE, state: state.name(), event: "commit" }),
        }
    }

    /// Fold a cache write completion into the session.
    ///
    /// `request_url` is consulted once the write has opened; an absent or
    /// empty URL abandons the open write.
    pub fn on_write(self, event: WriteEvent, request_url: Option<&str>) -> Result<Self, Error> {
        let next = match (self, event) {
            (CaptureState::CacheOpening { key, bytes }, WriteEvent::Opened(opened)) => {
                let digest = *key.digest();
                drop(key);
                match (opened, request_url.filter(|url| !url.is_empty())) {
                    (Ok(writer), Some(url)) => {
                        CaptureState::Writing { writer, digest, request_url: url.to_owned(), bytes, written: false }
                    }
                    (Ok(_writer), None) => {
                        tracing::warn!(%digest, error = %Error::MissingRequestUrl, "cannot record body");
                        skipped(digest, CaptureSkip::MissingRequestUrl)
                    }
                    (Err(err), _) => {
                        tracing::debug!(%digest, %err, "cache write unavailable");
                        skipped(digest, CaptureSkip::CacheUnavailable)
                    }
                }
            }
            (
                CaptureState::Writing { writer, digest, request_url, bytes, written: false },
                WriteEvent::Written(result),
            ) => match result {
                Ok(n) if n == request_url.len() => {
                    CaptureState::Writing { writer, digest, request_url, bytes, written: true }
                }
                Ok(n) => {
                    tracing::debug!(%digest, accepted = n, expected = request_url.len(), "short cache write");
                    skipped(digest, CaptureSkip::WriteFailed)
                }
                Err(err) => {
                    tracing::debug!(%digest, %err, "cache write failed");
                    skipped(digest, CaptureSkip::WriteFailed)
                }
            },
            (CaptureState::Writing { writer, digest, request_url, bytes, written: true }, WriteEvent::Closed(result)) => {
                drop(writer);
                match result {
                    Ok(()) => {
                        tracing::debug!(%digest, url = %request_url, bytes, "recorded body digest");
                        CaptureState::Done(CaptureOutcome::Recorded { digest, request_url, bytes })
                    }
                    Err(err) => {
                        tracing::debug!(%digest, %err, "cache close failed");
                        skipped(digest, CaptureSkip::WriteFailed)
                    }
                }
            }
            (state, event) => {
                return Err(Error::UnexpectedEvent { stage: STAGE, state: state.name(), event: event.name() });
            }
        };
        Ok(next)
    }

    pub fn into_outcome(self) -> Result<CaptureOutcome, Error> {
        match self {
            CaptureState::Done(outcome) => Ok(outcome),
            state => Err(Error::UnexpectedEvent { stage: STAGE, state: state.name(), event: "finish" }),
        }
    }
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureState")
            .field("state", &self.name())
            .field("bytes", &self.bytes())
            .finish()
    }
}

fn skipped(digest: Digest, reason: CaptureSkip) -> CaptureState {
    CaptureState::Done(CaptureOutcome::Skipped { digest: Some(digest), reason })
}

fn invariant_violation(err: &Error) -> CaptureOutcome {
    tracing::error!(%err, "body capture aborted");
    CaptureOutcome::Skipped { digest: None, reason: CaptureSkip::InvariantViolation }
}

/// Drive a finalized session through open, write and close.
pub async fn commit(
    state: CaptureState, cache: &dyn ContentAddressableCache, ledger: &Ledger, request_url: Option<&str>,
) -> CaptureOutcome {
    let mut state = match state.begin_commit(ledger) {
        Ok(state) => state,
        Err(err) => return invariant_violation(&err),
    };

    loop {
        let event = match &mut state {
            CaptureState::CacheOpening { key, .. } => WriteEvent::Opened(cache.open_write(key).await),
            CaptureState::Writing { writer, request_url, written: false, .. } => {
                WriteEvent::Written(writer.write(request_url.as_bytes()).await)
            }
            CaptureState::Writing { writer, written: true, .. } => WriteEvent::Closed(writer.close().await),
            _ => break,
        };
        state = match state.on_write(event, request_url) {
            Ok(next) => next,
            Err(err) => return invariant_violation(&err),
        };
    }

    state.into_outcome().unwrap_or_else(|err| invariant_violation(&err))
}

/// Pass-through body that records what it relays.
///
/// Items are yielded exactly as the inner stream produced them.
pub struct CaptureStream<S> {
    inner: S,
    session: Option<CaptureState>,
    ctx: DedupContext,
    request_url: Option<String>,
    report: Option<oneshot::Sender<CaptureOutcome>>,
}

impl<S> CaptureStream<S> {
    pub fn new(inner: S, ctx: DedupContext, request_url: Option<String>) -> (Self, CaptureReceipt) {
        let (tx, rx) = oneshot::channel();
        let mut stream = Self { inner, session: None, ctx, request_url, report: Some(tx) };

        if stream.ctx.config().record_enabled {
            stream.session = Some(CaptureState::new());
        } else {
            stream.finish(CaptureOutcome::Skipped { digest: None, reason: CaptureSkip::Disabled });
        }
        (stream, rx)
    }

    fn finish(&mut self, outcome: CaptureOutcome) {
        if let Some(tx) = self.report.take() {
            let _ = tx.send(outcome);
        }
    }

    fn advance(&mut self, event: BodyEvent<'_>) {
        let Some(session) = self.session.take() else {
            return;
        };

        match session.on_body(event) {
            Ok(finalizing @ CaptureState::Finalizing { .. }) => self.spawn_commit(finalizing),
            Ok(CaptureState::Done(outcome)) => {
                tracing::debug!(?outcome, "body capture ended early");
                self.finish(outcome);
            }
            Ok(next) => self.session = Some(next),
            Err(err) => {
                let outcome = invariant_violation(&err);
                self.finish(outcome);
            }
        }
    }

    fn spawn_commit(&mut self, finalizing: CaptureState) {
        let Some(tx) = self.report.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime for cache write; body not recorded");
            let digest = match &finalizing {
                CaptureState::Finalizing { digest, .. } => Some(*digest),
                _ => None,
            };
            let _ = tx.send(CaptureOutcome::Skipped { digest, reason: CaptureSkip::CacheUnavailable });
            return;
        };

        let ctx = self.ctx.clone();
        let request_url = self.request_url.take();
        runtime.spawn(async move {
            let outcome = commit(finalizing, ctx.cache(), ctx.ledger(), request_url.as_deref()).await;
            let _ = tx.send(outcome);
        });
    }
}

impl<S, E> Stream for CaptureStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = ready!(Pin::new(&mut this.inner).poll_next(cx));

        let event = match &item {
            Some(Ok(chunk)) => BodyEvent::Data(chunk),
            Some(Err(_)) => BodyEvent::Failed,
            None => BodyEvent::End,
        };
        this.advance(event);

        Poll::Ready(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S> Drop for CaptureStream<S> {
    fn drop(&mut self) {
        if self.report.is_some() {
            let bytes = self.session.as_ref().map_or(0, CaptureState::bytes);
            self.finish(CaptureOutcome::Aborted { bytes });
        }
    }
}

impl<S> fmt::Debug for CaptureStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureStream")
            .field("session", &self.session)
            .field("request_url", &self.request_url)
            .finish_non_exhaustive()
    }
}
