//! Model Context Protocol (MCP) client integration.
//!
//! External tool servers are configured in [`config`], connected and
//! managed by the [`manager`], and their discovered tools exposed to the
//! runtime through the [`adapter`]. Transports: stdio subprocess, SSE and
//! streamable HTTP via `rmcp` (WebSocket is accepted in configuration but
//! reports an unsupported-transport error at connect time).

/// Adapter exposing MCP tools as registry tools.
pub mod adapter;
/// Server configuration and layered loading.
pub mod config;
/// Connection lifecycle, discovery and tool calls.
pub mod manager;

pub use adapter::McpToolAdapter;
pub use config::{McpServerConfig, McpSettings, McpTransport};
pub use manager::{McpCallResult, McpClientManager, McpServerStatus, McpToolInfo};

use crate::tools::{infer_capabilities, ToolCapability, ToolRegistration, ToolRegistry};
use crate::types::Result;
use std::sync::Arc;
use tracing::info;

/// Priority assigned to MCP tools in the registry.
const MCP_TOOL_PRIORITY: u8 = 60;

impl McpClientManager {
    /// Connect a server and register its filtered tools in the registry.
    ///
    /// Returns the registry names of the tools that were added. The
    /// manager is taken by `Arc` because each adapter keeps a shared
    /// reference for routing calls.
    pub async fn add_server(
        manager: &Arc<Self>,
        server_name: &str,
        config: McpServerConfig,
        registry: &ToolRegistry,
    ) -> Result<Vec<String>> {
        let trusted = config.trust;
        manager.connect(server_name, config).await?;

        let tools = manager.server_tools(server_name).await;
        let mut registered = Vec::with_capacity(tools.len());
        for info in tools {
            let mut capabilities = vec![ToolCapability::External, ToolCapability::Mcp];
            capabilities.extend(infer_capabilities(&info.original_name, &info.description));

            let name = info.name.clone();
            let adapter = McpToolAdapter::new(info, manager.clone(), trusted);
            registry.register(
                ToolRegistration::new(Arc::new(adapter))
                    .capabilities(capabilities)
                    .tags(["mcp", server_name])
                    .priority(MCP_TOOL_PRIORITY),
            );
            registered.push(name);
        }

        info!(
            server = %server_name,
            tools = registered.len(),
            "Registered MCP server tools"
        );
        Ok(registered)
    }

    /// Unregister a server's tools and disconnect it.
    pub async fn remove_server(manager: &Arc<Self>, server_name: &str, registry: &ToolRegistry) {
        for info in manager.server_tools(server_name).await {
            registry.unregister(&info.name);
        }
        manager.disconnect(server_name).await;
        info!(server = %server_name, "Removed MCP server");
    }
}
