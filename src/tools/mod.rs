//! Tool infrastructure: the polymorphic capability interface and registry.
//!
//! A [`Tool`] is anything the model can invoke: validate parameters,
//! describe the invocation for a confirmation prompt, optionally demand
//! user confirmation, then execute. Concrete tool implementations (file
//! I/O, shell, HTTP, database adapters) live outside the core runtime;
//! out-of-process MCP tools are adapted in [`crate::mcp`].
//!
//! # Module Structure
//!
//! - [`registry`] - Tool registration and capability-based discovery
//! - [`schema`] - Parameter schema sanitization for model consumption

/// Tool registry with capability and tag indices.
pub mod registry;
/// Parameter schema sanitization.
pub mod schema;

pub use registry::{ToolInfo, ToolRegistration, ToolRegistry};
pub use schema::sanitize_parameters;

use crate::signal::AbortSignal;
use crate::types::{ConfirmationDetails, ConfirmationOutcome, Result, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Sink for streaming progress output from a running tool.
///
/// Tools with internal parallelism must serialize calls into the sink.
pub type OutputSink = Arc<dyn Fn(String) + Send + Sync>;

/// Abstract capability tags used for programmatic tool discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCapability {
    /// Query data without mutating it.
    Query,
    /// Mutate data or system state.
    Modify,
    /// Read files or resources.
    Read,
    /// Write files or resources.
    Write,
    /// Search content (local or web).
    Search,
    /// Explore structure (directories, schemas, endpoints).
    Explore,
    /// Analyze or profile data.
    Analyze,
    /// Export data out of the system.
    Export,
    /// Import data into the system.
    Import,
    /// Persist knowledge across turns.
    Memory,
    /// Execute code or commands.
    CodeExecution,
    /// Reach out to the network.
    WebAccess,
    /// Operate on the filesystem.
    FileOperation,
    /// Provided by an external integration.
    External,
    /// Provided by an MCP server.
    Mcp,
}

/// A capability the model can invoke.
///
/// Implementations must be cheap to share (`Arc<dyn Tool>`) and must honor
/// the abort signal at every I/O point inside
/// [`execute`](Tool::execute).
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable identifier, unique within a registry.
    fn name(&self) -> &str;

    /// Human-facing name shown in confirmation prompts.
    fn display_name(&self) -> &str {
        self.name()
    }

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments.
    fn parameter_schema(&self) -> Value;

    /// Cheap, synchronous parameter validation.
    ///
    /// Returns an error message when the arguments are unusable; `None`
    /// means valid.
    fn validate_params(&self, _args: &Value) -> Option<String> {
        None
    }

    /// One-line human summary of a concrete invocation.
    fn describe_invocation(&self, args: &Value) -> String {
        format!("{} {}", self.name(), args)
    }

    /// Whether this invocation needs user confirmation.
    ///
    /// `Ok(None)` means auto-proceed. Implementations may auto-allow based
    /// on internal trust state.
    async fn should_confirm(
        &self,
        _args: &Value,
        _signal: &AbortSignal,
    ) -> Result<Option<ConfirmationDetails>> {
        Ok(None)
    }

    /// Observe the user's confirmation decision.
    ///
    /// Called by the scheduler for every resolved confirmation; tools that
    /// maintain trust state (MCP adapters) widen it on the
    /// `proceed_always*` outcomes. Default is a no-op.
    fn record_confirmation_outcome(&self, _outcome: ConfirmationOutcome) {}

    /// Execute the tool.
    ///
    /// `output` receives streaming progress chunks when the host wants
    /// them. Internal errors may be surfaced either as a `ToolResult` with
    /// a non-empty `error` or as an `Err`; the scheduler normalizes both.
    async fn execute(
        &self,
        args: Value,
        signal: &AbortSignal,
        output: Option<OutputSink>,
    ) -> Result<ToolResult>;
}

/// Infer capability hints from a tool's name and description.
///
/// Used for discovered tools (MCP) that arrive without registration
/// metadata. Plain keyword matching, deliberately conservative.
pub fn infer_capabilities(name: &str, description: &str) -> Vec<ToolCapability> {
    let haystack = format!("{} {}", name.to_lowercase(), description.to_lowercase());
    let mut capabilities = Vec::new();

    let keyword_map: &[(&[&str], ToolCapability)] = &[
        (
            &["file", "read", "write", "directory", "path"],
            ToolCapability::FileOperation,
        ),
        (
            &["sql", "query", "database", "table", "schema"],
            ToolCapability::Query,
        ),
        (
            &["http", "api", "web", "url", "fetch", "request"],
            ToolCapability::WebAccess,
        ),
        (
            &["execute", "run", "eval", "compile"],
            ToolCapability::CodeExecution,
        ),
        (&["search", "find", "grep"], ToolCapability::Search),
    ];

    for (keywords, capability) in keyword_map {
        if keywords.iter().any(|kw| haystack.contains(kw)) {
            capabilities.push(*capability);
        }
    }

    capabilities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_capabilities_from_name() {
        let caps = infer_capabilities("read_file", "Reads a file from disk");
        assert!(caps.contains(&ToolCapability::FileOperation));
        assert!(!caps.contains(&ToolCapability::WebAccess));
    }

    #[test]
    fn test_infer_capabilities_from_description() {
        let caps = infer_capabilities("lookup", "Run a SQL query against the warehouse");
        assert!(caps.contains(&ToolCapability::Query));
        assert!(caps.contains(&ToolCapability::CodeExecution));
    }

    #[test]
    fn test_infer_capabilities_empty_for_opaque_tools() {
        let caps = infer_capabilities("frobnicate", "Does something mysterious");
        assert!(caps.is_empty());
    }

    #[test]
    fn test_capability_serde_names() {
        let value = serde_json::to_value(ToolCapability::CodeExecution).unwrap();
        assert_eq!(value, serde_json::json!("code_execution"));
    }
}
