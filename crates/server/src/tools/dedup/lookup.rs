//! dedup_lookup tool implementation.
//!
//! Retrieves the URL recorded for a content digest.

use metalink_core::{CacheDb, Digest, Error, KeyKind};
use metalink_filter::scanner::{SHA256_PREFIX, parse_digest_value};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the dedup_lookup tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DedupLookupParams {
    /// SHA-256 digest, as bare base64 or as a `SHA-256=<base64>` Digest header value.
    pub digest: String,
}

/// Output from the dedup_lookup tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DedupLookupOutput {
    /// Base64 digest that was looked up.
    pub digest: String,
    /// URL recorded for this content.
    pub url: String,
    /// When the record was committed (RFC 3339).
    pub recorded_at: String,
}

/// Parse a digest given either bare or with its algorithm token.
pub(crate) fn parse_digest_param(input: &str) -> Result<Digest, Error> {
    let trimmed = input.trim();
    let prefixed = trimmed
        .get(..SHA256_PREFIX.len())
        .is_some_and(|p| p.eq_ignore_ascii_case(SHA256_PREFIX));

    if prefixed {
        parse_digest_value(trimmed).ok_or_else(|| Error::InvalidDigest(format!("not a SHA-256 digest: {trimmed}")))
    } else {
        Digest::from_base64(trimmed)
    }
}

/// Implementation of the dedup_lookup tool.
pub async fn lookup_impl(db: &CacheDb, params: DedupLookupParams) -> Result<CallToolResult, McpError> {
    let digest = parse_digest_param(&params.digest)?;

    let record = db
        .get_record(KeyKind::Content, &digest)
        .await?
        .ok_or_else(|| Error::CacheMiss(digest.to_base64()))?;

    let output = DedupLookupOutput { digest: record.digest, url: record.value, recorded_at: record.created_at };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize record: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_of(result: &CallToolResult) -> DedupLookupOutput {
        let content_val = serde_json::to_value(&result.content[0]).unwrap();
        let text = content_val
            .get("text")
            .and_then(|v| v.as_str())
            .expect("Expected text field in content");
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_parse_digest_param_forms() {
        let digest = Digest::of(b"body");
        let bare = digest.to_base64();

        assert_eq!(parse_digest_param(&bare).unwrap(), digest);
        assert_eq!(parse_digest_param(&format!("SHA-256={bare}")).unwrap(), digest);
        assert_eq!(parse_digest_param(&format!(" sha-256={bare} ")).unwrap(), digest);
        assert!(parse_digest_param("SHA-256=short").is_err());
        assert!(parse_digest_param("").is_err());
    }

    #[tokio::test]
    async fn test_lookup_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let params = DedupLookupParams { digest: Digest::of(b"nothing").to_base64() };

        let err = lookup_impl(&db, params).await.unwrap_err();
        assert_eq!(err.code.0, -32001);
    }

    #[tokio::test]
    async fn test_lookup_found() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let digest = Digest::of(b"body");
        db.put_entry(digest, KeyKind::Content, b"https://example.com/a".to_vec())
            .await
            .unwrap();

        let params = DedupLookupParams { digest: format!("SHA-256={}", digest.to_base64()) };
        let output = output_of(&lookup_impl(&db, params).await.unwrap());

        assert_eq!(output.url, "https://example.com/a");
        assert_eq!(output.digest, digest.to_base64());
    }

    #[tokio::test]
    async fn test_lookup_ignores_url_entries() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let digest = Digest::of(b"https://example.com/a");
        db.put_entry(digest, KeyKind::Url, b"cached body".to_vec()).await.unwrap();

        let params = DedupLookupParams { digest: digest.to_base64() };
        assert!(lookup_impl(&db, params).await.is_err());
    }

    #[tokio::test]
    async fn test_lookup_bad_digest() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let params = DedupLookupParams { digest: "not base64!".into() };

        let err = lookup_impl(&db, params).await.unwrap_err();
        assert_eq!(err.code.0, -32004);
    }
}
