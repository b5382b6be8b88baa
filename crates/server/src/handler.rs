//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use crate::tools::dedup::{
    DedupLookupParams, DedupPurgeParams, DedupRecordParams, DedupResolveParams, lookup_impl, purge_impl, record_impl,
    resolve_impl,
};

use std::sync::Arc;

use metalink_core::{CacheDb, DedupConfig, DedupContext};
use metalink_filter::ResponseInterceptor;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for metalink-dedup.
#[derive(Clone)]
pub struct MetalinkServer {
    db: CacheDb,
    interceptor: ResponseInterceptor,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl MetalinkServer {
    /// Create a new server handler over an opened dedup store.
    pub fn new(db: CacheDb, config: DedupConfig) -> Self {
        let ctx = DedupContext::new(config, Arc::new(db.clone()));
        Self { db, interceptor: ResponseInterceptor::new(ctx), tool_router: Self::tool_router() }
    }

    #[tool(description = "Look up the URL recorded for a SHA-256 content digest (bare base64 or SHA-256=<base64>).")]
    async fn dedup_lookup(&self, params: Parameters<DedupLookupParams>) -> Result<CallToolResult, McpError> {
        lookup_impl(&self.db, params.0).await
    }

    /// Record a body as if it had been relayed from the origin for `url`.
    #[tool(description = "Digest a response body and record digest -> url. Returns the Digest header value.")]
    async fn dedup_record(&self, params: Parameters<DedupRecordParams>) -> Result<CallToolResult, McpError> {
        record_impl(&self.interceptor, params.0).await
    }

    /// Resolve a Metalink announcement against recorded digests.
    ///
    /// No network requests are made; only the dedup store is consulted.
    #[tool(
        description = "Resolve an announced Location and Digest values against recorded digests. Returns the final Location."
    )]
    async fn dedup_resolve(&self, params: Parameters<DedupResolveParams>) -> Result<CallToolResult, McpError> {
        resolve_impl(&self.interceptor, params.0).await
    }

    #[tool(description = "Delete dedup records older than N days or whose recorded URL matches a domain.")]
    async fn dedup_purge(&self, params: Parameters<DedupPurgeParams>) -> Result<CallToolResult, McpError> {
        purge_impl(&self.db, params.0).await
    }
}

impl ServerHandler for MetalinkServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "metalink-dedup".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
