//! Core types and shared functionality for metalink-dedup.
//!
//! This crate provides:
//! - SHA-256 content digests and incremental digesting
//! - Cache keys with lease accounting
//! - The content-addressable cache abstraction, with in-memory and SQLite stores
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod context;
pub mod digest;
pub mod error;
pub mod lease;
pub mod location;

pub use cache::{CacheDb, CacheKey, CacheReader, CacheWriter, ContentAddressableCache, KeyKind, MemoryCas};
pub use config::DedupConfig;
pub use context::DedupContext;
pub use digest::{ContentDigester, Digest};
pub use error::Error;
pub use lease::{Lease, LeaseKind, Ledger};
