//! Host proxy integration types.
//!
//! The proxy owns header storage and the transaction; the filter sees them
//! through [`ResponseHeaders`] and [`ResumeHandle`].

use http::{HeaderMap, HeaderName, HeaderValue};
use metalink_core::{Error, Lease, LeaseKind, Ledger};
use tokio::sync::oneshot;
use url::Url;

/// Why a response went out without a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    NoLocation,
    InvalidLocation,
    NoDigest,
    UrlCached,
    DigestUnknown,
    ReadFailed,
    InvalidRecordedUrl,
    RecordedUrlNotCached,
    HeaderRejected,
    InvariantViolation,
    Abandoned,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::NoLocation => "no_location",
            SkipReason::InvalidLocation => "invalid_location",
            SkipReason::NoDigest => "no_digest",
            SkipReason::UrlCached => "url_cached",
            SkipReason::DigestUnknown => "digest_unknown",
            SkipReason::ReadFailed => "read_failed",
            SkipReason::InvalidRecordedUrl => "invalid_recorded_url",
            SkipReason::RecordedUrlNotCached => "recorded_url_not_cached",
            SkipReason::HeaderRejected => "header_rejected",
            SkipReason::InvariantViolation => "invariant_violation",
            SkipReason::Abandoned => "abandoned",
        }
    }
}

/// How a transaction was handed back to the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resumed {
    /// A hook that never touches headers finished its work.
    Continue,
    /// Headers left exactly as the origin sent them.
    Unmodified(SkipReason),
    /// The canonical-location header now points at this URL.
    Rewritten(Url),
}

/// Receiving end held by the host; completes once the transaction resumes.
pub type Resumption = oneshot::Receiver<Resumed>;

/// Permission to resume one host transaction.
///
/// `resume` consumes the handle, so it runs at most once. A handle dropped
/// without resuming (task aborted, session torn down) resumes the
/// transaction unmodified, so it also runs at least once.
#[derive(Debug)]
pub struct ResumeHandle {
    tx: Option<oneshot::Sender<Resumed>>,
}

impl ResumeHandle {
    pub fn new() -> (Self, Resumption) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn resume(mut self, outcome: Resumed) {
        if let Some(tx) = self.tx.take() {
            // The host may already have torn the transaction down.
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for ResumeHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::warn!("transaction handle dropped without resume; continuing unmodified");
            let _ = tx.send(Resumed::Unmodified(SkipReason::Abandoned));
        }
    }
}

/// Response header accessor provided by the host.
pub trait ResponseHeaders {
    /// First value of a field, if present and representable as text.
    fn field_value(&self, name: &str) -> Option<String>;

    /// Every value of a field, across duplicate field instances and
    /// comma-separated lists, in header order.
    fn field_values(&self, name: &str) -> Vec<String>;

    /// Clear every value of a field and set a single new one.
    fn replace_field(&mut self, name: &str, value: &str) -> Result<(), Error>;
}

impl ResponseHeaders for HeaderMap {
    fn field_value(&self, name: &str) -> Option<String> {
        self.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned)
    }

    fn field_values(&self, name: &str) -> Vec<String> {
        self.get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
            .collect()
    }

    fn replace_field(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::InvalidInput(e.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|e| Error::InvalidInput(e.to_string()))?;
        self.insert(name, value);
        Ok(())
    }
}

/// A held reference to one header field value.
#[derive(Debug)]
pub struct FieldLoc {
    name: String,
    index: usize,
    _lease: Lease,
}

impl FieldLoc {
    pub fn acquire(name: &str, index: usize, ledger: &Ledger) -> Self {
        Self { name: name.to_owned(), index, _lease: ledger.acquire(LeaseKind::HeaderField) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }
}
