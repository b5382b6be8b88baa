//! dedup_purge tool implementation.
//!
//! Deletes dedup records by age or by recorded-URL domain.

use metalink_core::{CacheDb, Error};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the dedup_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DedupPurgeParams {
    /// Purge records committed more than this many days ago.
    pub older_than_days: Option<i64>,

    /// Purge records whose recorded URL matches this domain pattern.
    pub domain: Option<String>,
}

/// Output from the dedup_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DedupPurgeOutput {
    /// Number of records deleted.
    pub deleted: u64,
}

/// Implementation of the dedup_purge tool.
pub async fn purge_impl(db: &CacheDb, params: DedupPurgeParams) -> Result<CallToolResult, McpError> {
    if params.older_than_days.is_none() && params.domain.is_none() {
        return Err(Error::InvalidInput("At least one of older_than_days or domain must be specified".to_string()).into());
    }

    let mut deleted_total = 0u64;

    if let Some(days) = params.older_than_days {
        if days < 0 {
            return Err(Error::InvalidInput("older_than_days cannot be negative".to_string()).into());
        }
        deleted_total += db.purge_records_older_than(days).await?;
    }

    if let Some(domain) = params.domain {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(Error::InvalidInput("domain cannot be empty".to_string()).into());
        }
        deleted_total += db.purge_records_by_domain(domain).await?;
    }

    tracing::info!(deleted = deleted_total, "purged dedup records");

    let output = DedupPurgeOutput { deleted: deleted_total };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}
