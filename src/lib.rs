//! # RUDDER - Runtime for User-Directed Dialog & Execution Routing
//!
//! A production-grade agent core runtime: the subsystem that takes a user
//! turn, streams a model response, materializes tool-call requests, drives
//! each tool through a validation → confirmation → execution → completion
//! state machine, feeds results back into the model, and repeats until the
//! model yields control.
//!
//! ## Overview
//!
//! RUDDER is a library. It deliberately has no opinion about the pieces
//! around it: model providers implement [`ModelProvider`], tools implement
//! [`Tool`], and the host drives the event stream and confirmation
//! prompts. Out-of-process tools speak MCP through the built-in client.
//!
//! ### Basic usage
//!
//! ```rust,ignore
//! use rudder::{AbortSignal, AgentClient, AgentConfig, ToolRegistry};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! # async fn run(provider: Arc<dyn rudder::ModelProvider>) -> rudder::Result<()> {
//! let config = Arc::new(AgentConfig::load(None)?);
//! let registry = Arc::new(ToolRegistry::new());
//! let client = Arc::new(AgentClient::new(config, provider, registry)?);
//!
//! let signal = AbortSignal::new();
//! let events = client.send_message_stream(
//!     vec![rudder::Part::text("what time is it?")],
//!     signal.clone(),
//!     "prompt-1".to_string(),
//!     None,
//! );
//! futures::pin_mut!(events);
//! while let Some(event) = events.next().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### MCP servers
//!
//! ```rust,ignore
//! use rudder::mcp::{McpClientManager, McpSettings};
//! use std::collections::HashMap;
//!
//! # async fn run(registry: &rudder::ToolRegistry) -> rudder::Result<()> {
//! let settings = McpSettings::load(HashMap::new(), std::path::Path::new("."));
//! let manager = std::sync::Arc::new(McpClientManager::new());
//! for (name, server) in settings.servers() {
//!     McpClientManager::add_server(&manager, &name, server, registry).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`agent`] - The turn loop: client, turn streaming, chat history
//! - [`scheduler`] - Tool call state machine and concurrent execution
//! - [`tools`] - Tool trait, registry, schema sanitization
//! - [`mcp`] - Model Context Protocol client integration
//! - [`llm`] - Model provider abstraction and transport retry
//! - [`prompts`] - System prompt assembly and environment context
//! - [`types`] - Shared types and error handling

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// The turn loop: client orchestration, turns and chat history.
pub mod agent;
/// Runtime configuration.
pub mod config;
/// Model provider abstraction and retry.
pub mod llm;
/// Model Context Protocol (MCP) client integration.
#[cfg(feature = "mcp")]
pub mod mcp;
/// System prompt assembly and environment context.
pub mod prompts;
/// Tool call scheduling state machine.
pub mod scheduler;
/// Cooperative cancellation.
pub mod signal;
/// Tool trait, registry and schema handling.
pub mod tools;
/// Core types (content, tool calls, errors).
pub mod types;

// Re-export commonly used types
pub use agent::{AgentClient, AgentEvent, Chat, CurationPolicy, NextSpeaker, Turn};
pub use config::AgentConfig;
pub use llm::{ModelChunk, ModelProvider, ModelRequest, StreamFinishReason, TokenUsage};
pub use scheduler::{ToolCall, ToolCallPhase, ToolScheduler};
pub use signal::AbortSignal;
pub use tools::{Tool, ToolCapability, ToolRegistration, ToolRegistry};
pub use types::{
    AgentError, ConfirmationDetails, ConfirmationOutcome, Content, Part, Result, Role,
    ToolCallRequest, ToolCallResponse, ToolDefinition, ToolResult,
};
