//! dedup_resolve tool implementation.
//!
//! Runs announcement scanning and resolution over a synthetic response
//! header set and reports where the canonical location ends up.

use http::{HeaderMap, HeaderName, HeaderValue};
use metalink_core::Error;
use metalink_filter::{ResponseHeaders, ResponseInterceptor, ResumeHandle, Resumed};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the dedup_resolve tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DedupResolveParams {
    /// Announced canonical location.
    pub location: String,

    /// Digest header values, e.g. `SHA-256=<base64>`. Each entry may itself be a
    /// comma-separated list.
    #[serde(default)]
    pub digests: Vec<String>,
}

/// Output from the dedup_resolve tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DedupResolveOutput {
    /// Canonical location after resolution.
    pub location: String,
    /// Whether the location was rewritten.
    pub rewritten: bool,
    /// Why the location was left alone, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn header_name(name: &str) -> Result<HeaderName, Error> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::InvalidInput(format!("header name {name}: {e}")))
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value).map_err(|e| Error::InvalidInput(format!("header value {value:?}: {e}")))
}

/// Implementation of the dedup_resolve tool.
pub async fn resolve_impl(
    interceptor: &ResponseInterceptor, params: DedupResolveParams,
) -> Result<CallToolResult, McpError> {
    let config = interceptor.context().config();

    let mut headers = HeaderMap::new();
    headers.insert(header_name(&config.location_header)?, header_value(&params.location)?);
    let digest_name = header_name(&config.digest_header)?;
    for digest in &params.digests {
        headers.append(digest_name.clone(), header_value(digest)?);
    }

    let (resume, _resumption) = ResumeHandle::new();
    let resumed = interceptor.on_send_response(&mut headers, resume).await;

    let location = headers.field_value(&config.location_header).unwrap_or_default();
    let output = match resumed {
        Resumed::Rewritten(_) => DedupResolveOutput { location, rewritten: true, reason: None },
        Resumed::Unmodified(reason) => {
            DedupResolveOutput { location, rewritten: false, reason: Some(reason.as_str().to_string()) }
        }
        Resumed::Continue => DedupResolveOutput { location, rewritten: false, reason: None },
    };

    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use metalink_core::{CacheDb, DedupConfig, DedupContext, Digest, KeyKind};

    use super::*;

    async fn interceptor() -> (CacheDb, ResponseInterceptor) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let ctx = DedupContext::new(DedupConfig::default(), Arc::new(db.clone()));
        (db, ResponseInterceptor::new(ctx))
    }

    fn output_of(result: &CallToolResult) -> DedupResolveOutput {
        let content_val = serde_json::to_value(&result.content[0]).unwrap();
        let text = content_val
            .get("text")
            .and_then(|v| v.as_str())
            .expect("Expected text field in content");
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_rewrites_known_digest() {
        let (db, interceptor) = interceptor().await;
        let digest = Digest::of(b"image");
        db.put_entry(digest, KeyKind::Content, b"https://origin.example/a.iso".to_vec())
            .await
            .unwrap();

        let params = DedupResolveParams {
            location: "https://mirror.example/a.iso".into(),
            digests: vec![format!("MD5=abc, SHA-256={}", digest.to_base64())],
        };
        let output = output_of(&resolve_impl(&interceptor, params).await.unwrap());

        assert!(output.rewritten);
        assert_eq!(output.location, "https://origin.example/a.iso");
    }

    #[tokio::test]
    async fn test_resolve_unknown_digest() {
        let (_db, interceptor) = interceptor().await;
        let params = DedupResolveParams {
            location: "https://mirror.example/a.iso".into(),
            digests: vec![format!("SHA-256={}", Digest::of(b"image").to_base64())],
        };
        let output = output_of(&resolve_impl(&interceptor, params).await.unwrap());

        assert!(!output.rewritten);
        assert_eq!(output.location, "https://mirror.example/a.iso");
        assert_eq!(output.reason.as_deref(), Some("digest_unknown"));
    }

    #[tokio::test]
    async fn test_resolve_without_digest() {
        let (_db, interceptor) = interceptor().await;
        let params = DedupResolveParams { location: "https://mirror.example/a.iso".into(), digests: vec![] };
        let output = output_of(&resolve_impl(&interceptor, params).await.unwrap());

        assert_eq!(output.reason.as_deref(), Some("no_digest"));
    }

    #[tokio::test]
    async fn test_resolve_rejects_unencodable_header() {
        let (_db, interceptor) = interceptor().await;
        let params = DedupResolveParams { location: "https://a.example/\n".into(), digests: vec![] };

        let err = resolve_impl(&interceptor, params).await.unwrap_err();
        assert_eq!(err.code.0, -32602);
    }
}
