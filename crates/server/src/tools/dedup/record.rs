//! dedup_record tool implementation.
//!
//! Relays a body through the capture stage as if it were an origin response
//! for `url`, recording `digest -> url`.

use std::convert::Infallible;

use bytes::Bytes;
use futures_util::{StreamExt, stream};
use metalink_core::location::parse_absolute;
use metalink_core::{Digest, Error};
use metalink_filter::{CaptureOutcome, ResponseInterceptor, ResumeHandle};
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the dedup_record tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DedupRecordParams {
    /// Request URL the body was served for.
    pub url: String,

    /// Response body, as text.
    pub body: String,
}

/// Output from the dedup_record tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DedupRecordOutput {
    /// `Digest` header value an origin would announce for this body.
    pub digest_header: String,
    /// Number of body bytes relayed.
    pub bytes: u64,
    /// Whether the mapping was committed.
    pub recorded: bool,
    /// Why nothing was committed, if so.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Implementation of the dedup_record tool.
pub async fn record_impl(
    interceptor: &ResponseInterceptor, params: DedupRecordParams,
) -> Result<CallToolResult, McpError> {
    let url = parse_absolute(&params.url).map_err(Error::from)?;
    let body = Bytes::from(params.body);
    let body_len = body.len() as u64;
    let fallback_digest = Digest::of(&body);

    let origin = stream::iter([Ok::<_, Infallible>(body)]);
    let (resume, _resumption) = ResumeHandle::new();
    let (relay, receipt) = interceptor.on_read_response(Some(url.to_string()), origin, resume);

    let _relayed: Vec<_> = relay.collect().await;
    let outcome = receipt
        .await
        .map_err(|e| McpError::internal_error(format!("capture did not report: {e}"), None))?;

    let output = match outcome {
        CaptureOutcome::Recorded { digest, bytes, .. } => {
            DedupRecordOutput { digest_header: header_value(&digest), bytes, recorded: true, reason: None }
        }
        CaptureOutcome::Skipped { digest, reason } => DedupRecordOutput {
            digest_header: header_value(&digest.unwrap_or(fallback_digest)),
            bytes: body_len,
            recorded: false,
            reason: Some(reason.as_str().to_string()),
        },
        CaptureOutcome::Aborted { bytes } => DedupRecordOutput {
            digest_header: header_value(&fallback_digest),
            bytes,
            recorded: false,
            reason: Some("aborted".to_string()),
        },
    };

    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn header_value(digest: &Digest) -> String {
    format!("SHA-256={}", digest.to_base64())
}
