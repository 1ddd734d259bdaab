//! MCP client lifecycle: connect, discover, call, disconnect.
//!
//! The manager owns every server connection (subprocess handles included)
//! and is the only component that talks to `rmcp` directly. Adapters and
//! the registry refer to servers by name, never by handle.
//!
//! Connection state follows a 4-state machine per server:
//! disconnected → connecting → (connected | error). Status listeners are
//! notified on every change.

use crate::mcp::config::{McpServerConfig, McpTransport};
use crate::types::{AgentError, Result};
use parking_lot::RwLock as SyncRwLock;
use rmcp::model::CallToolRequestParam;
use rmcp::service::RunningService;
use rmcp::transport::{SseClientTransport, StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Maximum length of a sanitized tool name.
const MAX_TOOL_NAME_LEN: usize = 63;

/// Status of an MCP server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpServerStatus {
    /// No live connection.
    Disconnected,
    /// Transport/session setup in progress.
    Connecting,
    /// Session initialized and tools discovered.
    Connected,
    /// The last connect or discovery attempt failed.
    Error,
}

/// Listener for server status changes.
pub type StatusListener = Arc<dyn Fn(&str, McpServerStatus) + Send + Sync>;

/// A tool discovered on an MCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct McpToolInfo {
    /// Sanitized, registry-facing name (`<server>__<tool>`).
    pub name: String,
    /// Human-facing name.
    pub display_name: String,
    /// Description from the server.
    pub description: String,
    /// Parameter schema as reported by the server.
    pub parameters: Value,
    /// Owning server.
    pub server_name: String,
    /// Original tool name on the server.
    pub original_name: String,
}

/// Outcome of one MCP tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct McpCallResult {
    /// The server's content array, item by item.
    pub content: Vec<Value>,
    /// Whether the server flagged the result as an error.
    pub is_error: bool,
}

impl McpCallResult {
    /// Concatenated `text` fields of the content array.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

type ClientService = RunningService<RoleClient, ()>;

struct McpConnection {
    config: McpServerConfig,
    service: Option<Arc<ClientService>>,
    status: McpServerStatus,
    tools: Vec<McpToolInfo>,
}

impl McpConnection {
    fn new(config: McpServerConfig) -> Self {
        Self {
            config,
            service: None,
            status: McpServerStatus::Disconnected,
            tools: Vec::new(),
        }
    }
}

/// Manages MCP server connections and tool discovery.
#[derive(Default)]
pub struct McpClientManager {
    // Map guarded separately from per-server state so connects to distinct
    // servers proceed in parallel while operations on one server serialize.
    connections: RwLock<HashMap<String, Arc<Mutex<McpConnection>>>>,
    status_listeners: SyncRwLock<Vec<StatusListener>>,
    trusted_servers: SyncRwLock<HashSet<String>>,
    trusted_tools: SyncRwLock<HashSet<String>>,
}

impl McpClientManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for server status changes.
    pub fn add_status_listener(&self, listener: StatusListener) {
        self.status_listeners.write().push(listener);
    }

    fn notify_status(&self, server_name: &str, status: McpServerStatus) {
        for listener in self.status_listeners.read().iter() {
            listener(server_name, status);
        }
    }

    /// Current status of a server; `Disconnected` when unknown.
    pub async fn status(&self, server_name: &str) -> McpServerStatus {
        match self.connections.read().await.get(server_name) {
            Some(entry) => entry.lock().await.status,
            None => McpServerStatus::Disconnected,
        }
    }

    /// Status of every known server.
    pub async fn all_statuses(&self) -> HashMap<String, McpServerStatus> {
        let entries: Vec<(String, Arc<Mutex<McpConnection>>)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect();

        let mut statuses = HashMap::new();
        for (name, entry) in entries {
            statuses.insert(name, entry.lock().await.status);
        }
        statuses
    }

    async fn entry(&self, server_name: &str) -> Option<Arc<Mutex<McpConnection>>> {
        self.connections.read().await.get(server_name).cloned()
    }

    async fn entry_or_insert(
        &self,
        server_name: &str,
        config: McpServerConfig,
    ) -> Arc<Mutex<McpConnection>> {
        let mut map = self.connections.write().await;
        let entry = map
            .entry(server_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(McpConnection::new(config.clone()))))
            .clone();
        drop(map);
        // Refresh the stored config on reconnect.
        entry.lock().await.config = config;
        entry
    }

    /// Connect to a server: open the transport, initialize the protocol
    /// session, and discover tools.
    ///
    /// On any failure the partial connection is torn down and the server
    /// transitions to `Error`.
    pub async fn connect(&self, server_name: &str, config: McpServerConfig) -> Result<()> {
        let config = config.substituted();
        let call_timeout = config.timeout();
        let transport = config.transport()?;

        let entry = self.entry_or_insert(server_name, config).await;
        let mut conn = entry.lock().await;

        conn.status = McpServerStatus::Connecting;
        self.notify_status(server_name, McpServerStatus::Connecting);

        let service = match Self::open_session(transport).await {
            Ok(service) => service,
            Err(error) => {
                error!(server = %server_name, %error, "Failed to connect to MCP server");
                conn.service = None;
                conn.tools.clear();
                conn.status = McpServerStatus::Error;
                self.notify_status(server_name, McpServerStatus::Error);
                return Err(error);
            }
        };

        match Self::list_tools(&service, server_name, &conn.config, call_timeout).await {
            Ok(tools) => {
                info!(
                    server = %server_name,
                    tools = tools.len(),
                    "Connected to MCP server"
                );
                conn.tools = tools;
                conn.service = Some(Arc::new(service));
                conn.status = McpServerStatus::Connected;
                self.notify_status(server_name, McpServerStatus::Connected);
                Ok(())
            }
            Err(error) => {
                error!(server = %server_name, %error, "Tool discovery failed");
                let _ = service.cancel().await;
                conn.service = None;
                conn.tools.clear();
                conn.status = McpServerStatus::Error;
                self.notify_status(server_name, McpServerStatus::Error);
                Err(error)
            }
        }
    }

    async fn open_session(transport: McpTransport) -> Result<ClientService> {
        match transport {
            McpTransport::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                let mut cmd = tokio::process::Command::new(&command);
                cmd.args(&args);
                for (key, value) in &env {
                    cmd.env(key, value);
                }
                if let Some(cwd) = &cwd {
                    cmd.current_dir(cwd);
                }
                let transport = TokioChildProcess::new(cmd)
                    .map_err(|e| AgentError::Mcp(format!("failed to spawn '{command}': {e}")))?;
                ().serve(transport)
                    .await
                    .map_err(|e| AgentError::Mcp(format!("stdio session init failed: {e}")))
            }
            McpTransport::Sse { url } => {
                let transport = SseClientTransport::start(url.clone())
                    .await
                    .map_err(|e| AgentError::Mcp(format!("SSE connect to '{url}' failed: {e}")))?;
                ().serve(transport)
                    .await
                    .map_err(|e| AgentError::Mcp(format!("SSE session init failed: {e}")))
            }
            McpTransport::StreamableHttp { url, headers } => {
                if !headers.is_empty() {
                    // Carried in config for forward compatibility; the
                    // transport constructor does not accept them yet.
                    warn!(%url, "Ignoring custom headers for streamable HTTP transport");
                }
                let transport = StreamableHttpClientTransport::from_uri(url.clone());
                ().serve(transport)
                    .await
                    .map_err(|e| AgentError::Mcp(format!("HTTP session init failed: {e}")))
            }
            McpTransport::WebSocket { url } => Err(AgentError::Mcp(format!(
                "WebSocket transport ('{url}') is not supported by this build"
            ))),
        }
    }

    async fn list_tools(
        service: &ClientService,
        server_name: &str,
        config: &McpServerConfig,
        call_timeout: std::time::Duration,
    ) -> Result<Vec<McpToolInfo>> {
        let listed = timeout(call_timeout, service.list_tools(Default::default()))
            .await
            .map_err(|_| AgentError::Mcp(format!("listTools on '{server_name}' timed out")))?
            .map_err(|e| AgentError::Mcp(format!("listTools on '{server_name}' failed: {e}")))?;

        let mut tools = Vec::new();
        for tool in listed.tools {
            let original_name = tool.name.to_string();
            if !config.allows_tool(&original_name) {
                debug!(server = %server_name, tool = %original_name, "Filtered out MCP tool");
                continue;
            }
            let parameters = serde_json::to_value(tool.input_schema.as_ref())
                .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}));
            tools.push(McpToolInfo {
                name: sanitize_tool_name(&original_name, server_name),
                display_name: format!("{original_name} ({server_name})"),
                description: tool
                    .description
                    .as_deref()
                    .unwrap_or_default()
                    .to_string(),
                parameters,
                server_name: server_name.to_string(),
                original_name,
            });
        }
        Ok(tools)
    }

    /// Re-run tool discovery for a connected server.
    ///
    /// Idempotent: the server's tool list is cleared and reloaded.
    pub async fn discover(&self, server_name: &str) -> Result<Vec<McpToolInfo>> {
        let entry = self
            .entry(server_name)
            .await
            .ok_or_else(|| AgentError::NotFound(format!("MCP server '{server_name}'")))?;
        let mut conn = entry.lock().await;

        let service = conn
            .service
            .clone()
            .ok_or_else(|| AgentError::Mcp(format!("server '{server_name}' is not connected")))?;

        conn.tools.clear();
        let tools =
            Self::list_tools(&service, server_name, &conn.config, conn.config.timeout()).await?;
        conn.tools = tools.clone();
        Ok(tools)
    }

    /// Call a tool (by original name) on a connected server.
    ///
    /// The per-call timeout from the server configuration applies.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        args: Value,
    ) -> Result<McpCallResult> {
        let (service, call_timeout) = {
            let entry = self
                .entry(server_name)
                .await
                .ok_or_else(|| AgentError::NotFound(format!("MCP server '{server_name}'")))?;
            let conn = entry.lock().await;
            let service = conn.service.clone().ok_or_else(|| {
                AgentError::Mcp(format!("server '{server_name}' is not connected"))
            })?;
            (service, conn.config.timeout())
        };

        let arguments = match args {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                warn!(
                    server = %server_name,
                    tool = %tool_name,
                    args = %other,
                    "Tool arguments are not a JSON object; sending none"
                );
                None
            }
        };

        let request = CallToolRequestParam {
            name: tool_name.to_string().into(),
            arguments,
        };

        let result = timeout(call_timeout, service.call_tool(request))
            .await
            .map_err(|_| {
                AgentError::Mcp(format!(
                    "call to '{tool_name}' on '{server_name}' timed out"
                ))
            })?
            .map_err(|e| {
                AgentError::Mcp(format!(
                    "call to '{tool_name}' on '{server_name}' failed: {e}"
                ))
            })?;

        // Convert through the protocol's serialized shape so this stays
        // insulated from struct changes in the SDK.
        let value = serde_json::to_value(&result)
            .map_err(|e| AgentError::Mcp(format!("unserializable tool result: {e}")))?;
        let content = value
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let is_error = value
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(McpCallResult { content, is_error })
    }

    /// Disconnect a server: close the session, clear the tool list, and
    /// transition to `Disconnected`.
    pub async fn disconnect(&self, server_name: &str) {
        let Some(entry) = self.entry(server_name).await else {
            return;
        };
        let mut conn = entry.lock().await;

        if let Some(service) = conn.service.take() {
            match Arc::try_unwrap(service) {
                Ok(service) => {
                    if let Err(error) = service.cancel().await {
                        warn!(server = %server_name, %error, "Error closing MCP session");
                    }
                }
                // An in-flight call still holds the service; dropping our
                // handle lets the last holder tear it down.
                Err(shared) => drop(shared),
            }
        }
        conn.tools.clear();
        conn.status = McpServerStatus::Disconnected;
        self.notify_status(server_name, McpServerStatus::Disconnected);
        debug!(server = %server_name, "Disconnected MCP server");
    }

    /// Disconnect every server in parallel and wait for all of them.
    pub async fn disconnect_all(&self) {
        let names: Vec<String> = self.connections.read().await.keys().cloned().collect();
        futures::future::join_all(names.iter().map(|name| self.disconnect(name))).await;
    }

    /// Connect to several servers in parallel, logging failures.
    pub async fn connect_all(&self, servers: HashMap<String, McpServerConfig>) {
        let results = futures::future::join_all(
            servers
                .into_iter()
                .map(|(name, config)| async move { (name.clone(), self.connect(&name, config).await) }),
        )
        .await;

        for (name, result) in results {
            if let Err(error) = result {
                error!(server = %name, %error, "Failed to connect to MCP server");
            }
        }
    }

    /// Tools discovered on one server.
    pub async fn server_tools(&self, server_name: &str) -> Vec<McpToolInfo> {
        match self.entry(server_name).await {
            Some(entry) => entry.lock().await.tools.clone(),
            None => Vec::new(),
        }
    }

    /// All discovered tools, grouped by server.
    pub async fn all_tools(&self) -> HashMap<String, Vec<McpToolInfo>> {
        let entries: Vec<(String, Arc<Mutex<McpConnection>>)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect();

        let mut tools = HashMap::new();
        for (name, entry) in entries {
            tools.insert(name, entry.lock().await.tools.clone());
        }
        tools
    }

    // ============= Trust bookkeeping =============

    /// Trust every tool on a server for the rest of the session.
    pub fn trust_server(&self, server_name: &str) {
        info!(server = %server_name, "Trusting MCP server for this session");
        self.trusted_servers.write().insert(server_name.to_string());
    }

    /// Trust one tool (original name) for the rest of the session.
    pub fn trust_tool(&self, server_name: &str, tool_name: &str) {
        info!(server = %server_name, tool = %tool_name, "Trusting MCP tool for this session");
        self.trusted_tools
            .write()
            .insert(trust_key(server_name, tool_name));
    }

    /// Whether a server is trusted.
    pub fn is_server_trusted(&self, server_name: &str) -> bool {
        self.trusted_servers.read().contains(server_name)
    }

    /// Whether a specific tool is trusted.
    pub fn is_tool_trusted(&self, server_name: &str, tool_name: &str) -> bool {
        self.trusted_tools
            .read()
            .contains(&trust_key(server_name, tool_name))
    }

    /// Forget every session trust decision.
    pub fn reset_trust(&self) {
        self.trusted_servers.write().clear();
        self.trusted_tools.write().clear();
        info!("Reset all MCP trust decisions");
    }
}

fn trust_key(server_name: &str, tool_name: &str) -> String {
    format!("{server_name}.{tool_name}")
}

/// Sanitize a discovered tool name for registry use.
///
/// Disallowed characters become `_`, the server name is prefixed to avoid
/// collisions, and overlong names are truncated preserving head and tail.
pub fn sanitize_tool_name(name: &str, server_name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let qualified = format!("{server_name}__{cleaned}");
    let chars: Vec<char> = qualified.chars().collect();
    if chars.len() <= MAX_TOOL_NAME_LEN {
        return qualified;
    }

    let head: String = chars[..28].iter().collect();
    let tail: String = chars[chars.len() - 32..].iter().collect();
    format!("{head}___{tail}")
}
