//! MCP server over stdio.
//!
//! Adapts the [`ToolRegistry`] to the MCP JSON-RPC protocol so agent hosts
//! (Claude Desktop, Cursor, ...) can launch `sop serve mcp` as a
//! subprocess. Stdout carries protocol frames only; all logging goes to
//! stderr.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "sop": {
//!       "command": "sop",
//!       "args": ["--config", "/path/to/sop.toml", "serve", "mcp"]
//!     }
//!   }
//! }
//! ```

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};
use tracing::info;

use crate::tools::{validate_params, ToolContext, ToolRegistry};

#[derive(Clone)]
pub struct McpBridge {
    ctx: ToolContext,
    tools: Arc<ToolRegistry>,
}

impl McpBridge {
    pub fn new(ctx: ToolContext, tools: Arc<ToolRegistry>) -> Self {
        Self { ctx, tools }
    }

    fn to_mcp_tool(tool: &dyn crate::tools::Tool) -> Tool {
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> =
            match tool.parameters_schema() {
                serde_json::Value::Object(map) => Arc::new(map),
                _ => Arc::new(serde_json::Map::new()),
            };

        Tool {
            name: Cow::Owned(tool.name().to_string()),
            title: None,
            description: Some(Cow::Owned(tool.description().to_string())),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(tool.read_only())),
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "sop-harness".to_string(),
                title: Some("SOP Harness".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Standard operating procedure library. Use search_sop_documents to find \
                 relevant passages, get_sop_guidance to gather the procedures that apply to a \
                 situation, and list_sop_categories to see which SOP categories exist. \
                 The index is built on first use, so the first call may take a while."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .tools
            .tools()
            .iter()
            .map(|t| Self::to_mcp_tool(t.as_ref()))
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools.find(name).map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let tool = self.tools.find(&request.name).ok_or_else(|| {
            McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            )
        })?;

        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
        let params = validate_params(&tool.parameters_schema(), &params)
            .map_err(|e| McpError::invalid_params(e.to_string(), None))?;

        match tool.execute(params, &self.ctx).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!("{:#}", e))])),
        }
    }
}

/// Serve the SOP tools on stdin/stdout until the client disconnects.
pub async fn run_stdio(ctx: ToolContext) -> anyhow::Result<()> {
    let bridge = McpBridge::new(ctx, Arc::new(ToolRegistry::with_builtins()));
    info!("SOP MCP server ready on stdio");
    let service = bridge.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
