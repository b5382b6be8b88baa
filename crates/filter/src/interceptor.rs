//! Hook dispatch.
//!
//! The host calls into [`ResponseInterceptor`] at two points of every
//! transaction. Each call consumes the transaction's [`ResumeHandle`], so the
//! transaction resumes exactly once per hook whichever branch is taken.

use metalink_core::DedupContext;

use crate::capture::{CaptureReceipt, CaptureStream};
use crate::host::{ResponseHeaders, ResumeHandle, Resumed, SkipReason};
use crate::resolve::resolve;

/// A host hook firing, with what the host hands over for it.
pub enum HookEvent<'a, S, H: ?Sized> {
    /// Origin response headers were read; the body is about to stream.
    ReadResponseHeaders { request_url: Option<String>, body: S, resume: ResumeHandle },
    /// Final response headers are about to be sent to the client.
    SendResponseHeaders { headers: &'a mut H, resume: ResumeHandle },
}

/// What the host gets back from [`ResponseInterceptor::dispatch`].
pub enum HookOutcome<S> {
    /// Relay this body in place of the origin body.
    BodyAttached(CaptureStream<S>, CaptureReceipt),
    /// Headers are final; the transaction was resumed with this outcome.
    HeadersSent(Resumed),
}

impl<S> std::fmt::Debug for HookOutcome<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookOutcome::BodyAttached(stream, _) => f.debug_tuple("BodyAttached").field(stream).finish(),
            HookOutcome::HeadersSent(resumed) => f.debug_tuple("HeadersSent").field(resumed).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseInterceptor {
    ctx: DedupContext,
}

impl ResponseInterceptor {
    pub fn new(ctx: DedupContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &DedupContext {
        &self.ctx
    }

    /// Attach body capture to an origin response and let the transaction continue.
    pub fn on_read_response<S>(
        &self, request_url: Option<String>, body: S, resume: ResumeHandle,
    ) -> (CaptureStream<S>, CaptureReceipt) {
        let attached = CaptureStream::new(body, self.ctx.clone(), request_url);
        resume.resume(Resumed::Continue);
        attached
    }

    /// Resolve the announcement in outgoing headers, then resume.
    pub async fn on_send_response<H>(&self, headers: &mut H, resume: ResumeHandle) -> Resumed
    where
        H: ResponseHeaders + ?Sized,
    {
        let outcome = if self.ctx.config().resolve_enabled {
            resolve(headers, &self.ctx).await
        } else {
            Resumed::Unmodified(SkipReason::Disabled)
        };

        tracing::debug!(?outcome, "resuming transaction");
        resume.resume(outcome.clone());
        outcome
    }

    pub async fn dispatch<S, H>(&self, event: HookEvent<'_, S, H>) -> HookOutcome<S>
    where
        H: ResponseHeaders + ?Sized,
    {
        match event {
            HookEvent::ReadResponseHeaders { request_url, body, resume } => {
                let (stream, receipt) = self.on_read_response(request_url, body, resume);
                HookOutcome::BodyAttached(stream, receipt)
            }
            HookEvent::SendResponseHeaders { headers, resume } => {
                HookOutcome::HeadersSent(self.on_send_response(headers, resume).await)
            }
        }
    }
}
