//! Core types used throughout the RUDDER runtime.
//!
//! This module contains the common data structures used for:
//! - Model-facing content (parts, messages, roles)
//! - Tool calls, tool results and confirmation details
//! - Tool declarations sent to the model
//! - Error handling

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

// ============= Content Types =============

/// Role of a message in model-facing history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message from the user.
    User,
    /// Response from the model.
    Model,
    /// Tool results fed back to the model.
    Function,
}

/// One content fragment of a message.
///
/// Serialized with external tagging so the wire shape matches the
/// model-facing format, e.g. `{"functionResponse": {"id": ..., ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Inline binary data (images, files) with a mime type.
    #[serde(rename_all = "camelCase")]
    InlineData {
        /// MIME type of the data.
        mime_type: String,
        /// Base64-encoded payload.
        data: String,
    },
    /// A reference to externally hosted data.
    #[serde(rename_all = "camelCase")]
    FileData {
        /// MIME type of the referenced file.
        mime_type: String,
        /// URI of the file.
        file_uri: String,
    },
    /// A function call requested by the model.
    FunctionCall {
        /// Call identifier, unique within a batch.
        id: String,
        /// Name of the tool to invoke.
        name: String,
        /// Arguments as a JSON object.
        args: Value,
    },
    /// The structured reply for one tool call.
    FunctionResponse {
        /// Identifier of the originating call.
        id: String,
        /// Name of the tool that produced the response.
        name: String,
        /// Response payload (`{"output": ...}` or `{"error": ...}`).
        response: Value,
    },
    /// Model reasoning, distinguished from user-visible content.
    Thought {
        /// The reasoning text.
        text: String,
    },
    /// Code the model proposes to run.
    ExecutableCode {
        /// Language of the code.
        language: String,
        /// The code itself.
        code: String,
    },
    /// The outcome of executed code.
    CodeExecutionResult {
        /// Outcome tag (e.g. "ok", "error").
        outcome: String,
        /// Captured output.
        output: String,
    },
}

impl Part {
    /// Convenience constructor for a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// Returns the text content if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }

    /// True for a text part that is empty or whitespace-only.
    pub fn is_blank_text(&self) -> bool {
        matches!(self, Part::Text { text } if text.trim().is_empty())
    }
}

/// A message in model-facing history: a role plus an ordered part list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    /// Who produced this message.
    pub role: Role,
    /// Ordered content fragments.
    pub parts: Vec<Part>,
}

impl Content {
    /// Build a user message from parts.
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    /// Build a model message from parts.
    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Model,
            parts,
        }
    }

    /// Build a function-role message from parts.
    pub fn function(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Function,
            parts,
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

// ============= Tool Declaration Types =============

/// Definition of a tool as presented to the model.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolDefinition {
    /// Unique name of the tool.
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema defining the tool's parameters (sanitized).
    pub parameters: Value,
}

// ============= Tool Call Types =============

/// A request to invoke a named tool, as extracted from a model turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique identifier for this call within its batch.
    pub call_id: String,
    /// Name of the tool to call.
    pub name: String,
    /// Arguments as a JSON object.
    pub args: Value,
    /// True when the host (not the model) initiated the call.
    #[serde(default)]
    pub is_client_initiated: bool,
    /// Identifier of the prompt that produced this call.
    #[serde(default)]
    pub prompt_id: String,
}

/// The materialized outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    /// Identifier of the originating call.
    pub call_id: String,
    /// Parts fed back to the model (always contains the function response).
    pub parts: Vec<Part>,
    /// Optional display content for the host UI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_display: Option<String>,
    /// Error text when the call failed or was cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result returned by tool execution.
///
/// `llm_content` is what the model sees; `return_display` is what the host
/// renders. They may differ.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolResult {
    /// Optional one-line summary.
    pub summary: Option<String>,
    /// Content fed back to the model.
    pub llm_content: Vec<Part>,
    /// Renderable content for the host UI.
    pub return_display: Option<String>,
    /// Error text; non-empty marks the execution as failed.
    pub error: Option<String>,
}

impl ToolResult {
    /// A successful result whose model-facing content is plain text.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            llm_content: vec![Part::text(content)],
            ..Default::default()
        }
    }

    /// A failed result carrying an error message.
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            llm_content: vec![Part::text(message.clone())],
            error: Some(message),
            ..Default::default()
        }
    }

    /// Concatenated text of the model-facing content.
    pub fn llm_text(&self) -> String {
        self.llm_content
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============= Confirmation Types =============

/// User decision on a pending tool confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    /// Approve this single invocation.
    ProceedOnce,
    /// Approve this and all future invocations of the tool.
    ProceedAlways,
    /// Approve all future tools from the same server.
    ProceedAlwaysServer,
    /// Approve all future invocations of this exact tool.
    ProceedAlwaysTool,
    /// Approve after the user edited the arguments.
    ModifyWithEditor,
    /// Reject the invocation.
    Cancel,
}

/// Coarse risk estimate attached to a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Read-only or trivially reversible.
    Low,
    /// Mutates state but is recoverable.
    Moderate,
    /// Destructive or hard to reverse.
    High,
}

/// What the host must show the user before a tool may run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfirmationDetails {
    /// A command or statement the tool is about to execute.
    Execute {
        /// Prompt title.
        title: String,
        /// The full command/statement.
        command: String,
        /// The root operation (e.g. first word) for trust decisions.
        root_command: String,
        /// Optional risk estimate.
        #[serde(skip_serializing_if = "Option::is_none")]
        risk: Option<RiskLevel>,
    },
    /// An out-of-process MCP tool invocation.
    McpTool {
        /// Prompt title.
        title: String,
        /// Server the tool belongs to.
        server_name: String,
        /// Original (unsanitized) tool name on that server.
        tool_name: String,
        /// Arguments as the server will receive them.
        args: Value,
    },
    /// Anything else worth a yes/no.
    Generic {
        /// Prompt title.
        title: String,
        /// One-line description of the operation.
        description: String,
    },
}

impl ConfirmationDetails {
    /// Prompt title, independent of variant.
    pub fn title(&self) -> &str {
        match self {
            ConfirmationDetails::Execute { title, .. }
            | ConfirmationDetails::McpTool { title, .. }
            | ConfirmationDetails::Generic { title, .. } => title,
        }
    }
}

// ============= Error Types =============

/// Runtime-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Model provider failed.
    #[error("Model error: {0}")]
    Model(String),

    /// Requested resource was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input validation failed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation was cancelled through an abort signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A tool failed during execution.
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution {
        /// Name of the failing tool.
        tool: String,
        /// Failure description.
        message: String,
    },

    /// The scheduler rejected an operation in its current state.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// MCP transport or protocol failure.
    #[error("MCP error: {0}")]
    Mcp(String),

    /// External transport call failed; carries retry metadata when known.
    #[error("External service error: {message}")]
    External {
        /// Failure description.
        message: String,
        /// HTTP-like status code when known (429, 503, ...).
        status: Option<u16>,
        /// Server-requested retry delay when present.
        retry_after: Option<Duration>,
    },

    /// Internal runtime error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// External error with just a message.
    pub fn external(message: impl Into<String>) -> Self {
        AgentError::External {
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    /// External error with a status code.
    pub fn external_status(message: impl Into<String>, status: u16) -> Self {
        AgentError::External {
            message: message.into(),
            status: Some(status),
            retry_after: None,
        }
    }
}

/// A specialized Result type for RUDDER operations.
pub type Result<T> = std::result::Result<T, AgentError>;

// ============= Misc =============

/// Arbitrary metadata attached to registry entries.
pub type Metadata = HashMap<String, Value>;
