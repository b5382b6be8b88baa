//! MCP tool implementations.
//!
//! This module contains all tools exposed by the metalink-dedup server.

pub mod dedup;
