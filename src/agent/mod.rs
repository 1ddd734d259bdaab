//! The turn loop: client orchestration, single-turn streaming, and
//! conversation history.
//!
//! Data flow for one user input: [`AgentClient::send_message_stream`]
//! appends the user content, runs a [`Turn`] that streams model chunks,
//! collects any tool-call requests, drives them through the scheduler,
//! appends the function responses, and recursively starts another turn
//! with those responses as input. The loop terminates when a turn produces
//! no tool calls and the next-speaker judgment picks the user.

/// Conversation history and curation.
pub mod chat;
/// The client orchestrator.
pub mod client;
/// Single model-response streaming.
pub mod turn;

pub use chat::{Chat, CompressionInfo, CurationPolicy, DefaultCurationPolicy};
pub use client::{AgentClient, NextSpeaker};
pub use turn::{AgentEvent, Turn};
