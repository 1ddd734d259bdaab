//! MCP server configuration: transports, filtering, layered loading.
//!
//! A server entry names exactly one transport (stdio subprocess, SSE,
//! streamable HTTP, or WebSocket) plus trust and filtering options.
//! Entries are merged from five layers, highest precedence first:
//! runtime injection, the `RUDDER_MCP_SERVERS` environment variable
//! (JSON), the workspace config, the user config, and the system config.
//! Later (higher-precedence) layers override earlier ones per server key;
//! disabled servers are removed, not merged.

use crate::types::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default per-call timeout for MCP operations: 10 minutes.
pub const DEFAULT_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// Environment variable holding a JSON map of server configurations.
pub const MCP_SERVERS_ENV: &str = "RUDDER_MCP_SERVERS";

/// The transport a server configuration resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpTransport {
    /// Spawn a subprocess and speak JSON-RPC over stdio.
    Stdio {
        /// Executable to spawn.
        command: String,
        /// Arguments.
        args: Vec<String>,
        /// Extra environment variables.
        env: HashMap<String, String>,
        /// Working directory.
        cwd: Option<PathBuf>,
    },
    /// Server-sent events endpoint.
    Sse {
        /// Endpoint URL.
        url: String,
    },
    /// Streamable HTTP endpoint.
    StreamableHttp {
        /// Endpoint URL.
        url: String,
        /// Extra request headers.
        headers: HashMap<String, String>,
    },
    /// WebSocket endpoint (accepted in config, not implemented).
    WebSocket {
        /// Endpoint URL.
        url: String,
    },
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McpServerConfig {
    /// Stdio transport: executable to spawn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Stdio transport: arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Stdio transport: extra environment variables.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Stdio transport: working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// SSE transport endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Streamable HTTP transport endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_url: Option<String>,
    /// Extra headers for the HTTP transport.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// WebSocket transport endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,

    /// Per-call timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Skip confirmation for every tool on this server.
    #[serde(default)]
    pub trust: bool,

    /// Only expose these tools (original names). Empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_tools: Vec<String>,
    /// Never expose these tools (original names).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_tools: Vec<String>,

    /// Human description for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Disabled servers are dropped during layering.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl McpServerConfig {
    /// Resolve the configured transport.
    ///
    /// Exactly one transport must be present.
    pub fn transport(&self) -> Result<McpTransport> {
        let configured = [
            self.command.is_some(),
            self.url.is_some(),
            self.http_url.is_some(),
            self.ws_url.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();

        if configured == 0 {
            return Err(AgentError::Configuration(
                "MCP server must specify one transport: command (stdio), url (SSE), \
                 http_url (HTTP), or ws_url (WebSocket)"
                    .to_string(),
            ));
        }
        if configured > 1 {
            return Err(AgentError::Configuration(
                "MCP server must specify exactly one transport".to_string(),
            ));
        }

        if let Some(command) = &self.command {
            return Ok(McpTransport::Stdio {
                command: command.clone(),
                args: self.args.clone(),
                env: self.env.clone(),
                cwd: self.cwd.as_ref().map(PathBuf::from),
            });
        }
        if let Some(url) = &self.url {
            return Ok(McpTransport::Sse { url: url.clone() });
        }
        if let Some(url) = &self.http_url {
            return Ok(McpTransport::StreamableHttp {
                url: url.clone(),
                headers: self.headers.clone(),
            });
        }
        match &self.ws_url {
            Some(url) => Ok(McpTransport::WebSocket { url: url.clone() }),
            None => Err(AgentError::Configuration(
                "MCP server transport could not be resolved".to_string(),
            )),
        }
    }

    /// Per-call timeout, falling back to the default.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// Whether a discovered tool (original name) passes the filters.
    pub fn allows_tool(&self, original_name: &str) -> bool {
        if self.exclude_tools.iter().any(|t| t == original_name) {
            return false;
        }
        if self.include_tools.is_empty() {
            return true;
        }
        self.include_tools.iter().any(|t| t == original_name)
    }

    /// A copy with `${VAR}` / `$VAR` references substituted from the
    /// process environment in every string field.
    pub fn substituted(&self) -> Self {
        let mut out = self.clone();
        out.command = out.command.map(|v| substitute_env_vars(&v));
        out.args = out.args.iter().map(|v| substitute_env_vars(v)).collect();
        out.env = out
            .env
            .iter()
            .map(|(k, v)| (k.clone(), substitute_env_vars(v)))
            .collect();
        out.cwd = out.cwd.map(|v| substitute_env_vars(&v));
        out.url = out.url.map(|v| substitute_env_vars(&v));
        out.http_url = out.http_url.map(|v| substitute_env_vars(&v));
        out.headers = out
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), substitute_env_vars(v)))
            .collect();
        out.ws_url = out.ws_url.map(|v| substitute_env_vars(&v));
        out.description = out.description.map(|v| substitute_env_vars(&v));
        out
    }
}

/// Substitute `${VAR}` and `$VAR` references from the process environment.
///
/// Unknown variables are left verbatim so configuration errors stay
/// visible.
pub fn substitute_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }

        match chars.peek() {
            Some((_, '{')) => {
                if let Some(end) = input[index..].find('}') {
                    let name = &input[index + 2..index + end];
                    if !name.is_empty() {
                        match std::env::var(name) {
                            Ok(value) => out.push_str(&value),
                            Err(_) => out.push_str(&input[index..=index + end]),
                        }
                        // Skip past the closing brace.
                        while let Some((i, _)) = chars.peek() {
                            if *i > index + end {
                                break;
                            }
                            chars.next();
                        }
                        continue;
                    }
                }
                out.push(ch);
            }
            Some((_, c)) if c.is_ascii_alphabetic() || *c == '_' => {
                let mut name = String::new();
                while let Some((_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match std::env::var(&name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push('$');
                        out.push_str(&name);
                    }
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

/// Wrapper shape for config files: `{ "mcp_servers": { ... } }`.
///
/// Unknown top-level keys are rejected so bare-map JSON files fall through
/// to the direct-map parse instead of silently yielding nothing.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct McpFileSettings {
    #[serde(default)]
    mcp_servers: HashMap<String, McpServerConfig>,
}

/// Layered MCP server settings.
#[derive(Debug, Default, Clone)]
pub struct McpSettings {
    servers: HashMap<String, McpServerConfig>,
}

impl McpSettings {
    /// Load and merge all configuration layers.
    ///
    /// `runtime` entries (e.g. from the embedding application) take the
    /// highest precedence. `workspace_dir` is where workspace files are
    /// looked up, usually the working directory.
    pub fn load(
        runtime: HashMap<String, McpServerConfig>,
        workspace_dir: &Path,
    ) -> Self {
        let mut settings = Self::default();

        // Lowest precedence first; later merges override per server key.
        settings.merge_file(Path::new("/etc/rudder/mcp.toml"), "system");
        settings.merge_file(Path::new("/etc/rudder/mcp.json"), "system");
        if let Some(home) = home_dir() {
            settings.merge_file(&home.join(".rudder/mcp.toml"), "user");
            settings.merge_file(&home.join(".rudder/mcp.json"), "user");
        }
        settings.merge_file(&workspace_dir.join(".rudder/mcp.toml"), "workspace");
        settings.merge_file(&workspace_dir.join(".rudder.json"), "workspace");
        settings.merge_env();
        settings.merge_layer(runtime, "runtime");

        settings.servers.retain(|name, config| {
            if !config.enabled {
                debug!(server = %name, "Dropping disabled MCP server");
            }
            config.enabled
        });
        settings
    }

    /// Servers after layering, with environment substitution applied.
    pub fn servers(&self) -> HashMap<String, McpServerConfig> {
        self.servers
            .iter()
            .map(|(name, config)| (name.clone(), config.substituted()))
            .collect()
    }

    /// Configuration for one server, substituted.
    pub fn server(&self, name: &str) -> Option<McpServerConfig> {
        self.servers.get(name).map(McpServerConfig::substituted)
    }

    fn merge_file(&mut self, path: &Path, layer: &str) {
        if !path.exists() {
            return;
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) => {
                warn!(path = %path.display(), %error, "Failed to read MCP config file");
                return;
            }
        };

        let parsed = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            toml::from_str::<McpFileSettings>(&content)
                .map_err(|error| error.to_string())
        } else {
            // JSON files may use the wrapper shape or a bare server map.
            serde_json::from_str::<McpFileSettings>(&content)
                .or_else(|_| {
                    serde_json::from_str::<HashMap<String, McpServerConfig>>(&content)
                        .map(|mcp_servers| McpFileSettings { mcp_servers })
                })
                .map_err(|error| error.to_string())
        };

        match parsed {
            Ok(file_settings) => {
                debug!(
                    path = %path.display(),
                    layer,
                    servers = file_settings.mcp_servers.len(),
                    "Loaded MCP config layer"
                );
                self.merge_layer(file_settings.mcp_servers, layer);
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "Failed to parse MCP config file");
            }
        }
    }

    fn merge_env(&mut self) {
        let Ok(raw) = std::env::var(MCP_SERVERS_ENV) else {
            return;
        };
        match serde_json::from_str::<HashMap<String, McpServerConfig>>(&raw) {
            Ok(servers) => self.merge_layer(servers, "environment"),
            Err(error) => {
                warn!(%error, "Failed to parse {MCP_SERVERS_ENV}");
            }
        }
    }

    fn merge_layer(&mut self, layer: HashMap<String, McpServerConfig>, source: &str) {
        for (name, config) in layer {
            debug!(server = %name, source, "Merging MCP server config");
            self.servers.insert(name, config);
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
