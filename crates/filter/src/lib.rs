//! Response-path dedup filter for a caching proxy.
//!
//! When an origin announces content with a canonical-location header and a
//! `Digest: SHA-256=...` value, the filter rewrites the location to a URL
//! already known to serve byte-identical content, so the object cache keeps
//! one copy. Bodies relayed from the origin are digested on the way through
//! and recorded under their digest, which is what later rewrites resolve
//! against.
//!
//! - [`capture`]: pass-through body digesting and `digest -> URL` recording
//! - [`scanner`]: announcement detection in response headers
//! - [`resolve`]: URL-phase and digest-phase cache lookups, header rewrite
//! - [`interceptor`]: hook dispatch and transaction resumption
//! - [`host`]: the types the host proxy implements or receives

pub mod capture;
pub mod host;
pub mod interceptor;
pub mod resolve;
pub mod scanner;

#[cfg(test)]
mod testing;

pub use capture::{CaptureOutcome, CaptureReceipt, CaptureSkip, CaptureStream};
pub use host::{FieldLoc, ResponseHeaders, ResumeHandle, Resumed, Resumption, SkipReason};
pub use interceptor::{HookEvent, HookOutcome, ResponseInterceptor};
pub use resolve::{Verdict, resolve};
pub use scanner::{Announcement, scan};
