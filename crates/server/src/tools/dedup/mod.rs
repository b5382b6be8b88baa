//! Dedup store MCP tools.
//!
//! This module provides tools for inspecting and maintaining the dedup store,
//! and for exercising the filter against it.

pub mod lookup;
pub mod purge;
pub mod record;
pub mod resolve;

pub use lookup::{DedupLookupParams, lookup_impl};
pub use purge::{DedupPurgeParams, purge_impl};
pub use record::{DedupRecordParams, record_impl};
pub use resolve::{DedupResolveParams, resolve_impl};
