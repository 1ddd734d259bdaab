//! Adapter exposing a discovered MCP tool as a [`Tool`].

use crate::mcp::manager::{McpClientManager, McpToolInfo};
use crate::signal::AbortSignal;
use crate::tools::{OutputSink, Tool};
use crate::types::{
    ConfirmationDetails, ConfirmationOutcome, Result, ToolResult,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Wraps one discovered MCP tool as a registry [`Tool`].
///
/// Holds the manager by shared reference and routes calls by server name;
/// the subprocess/transport handle stays owned by the manager.
pub struct McpToolAdapter {
    info: McpToolInfo,
    manager: Arc<McpClientManager>,
    /// Trust from server configuration; skips confirmation entirely.
    trusted_by_config: bool,
    description: String,
}

impl McpToolAdapter {
    /// Create an adapter for a discovered tool.
    pub fn new(info: McpToolInfo, manager: Arc<McpClientManager>, trusted_by_config: bool) -> Self {
        let description = Self::enhance_description(&info);
        Self {
            info,
            manager,
            trusted_by_config,
            description,
        }
    }

    /// Discovery info for this adapter.
    pub fn info(&self) -> &McpToolInfo {
        &self.info
    }

    fn enhance_description(info: &McpToolInfo) -> String {
        let base = if info.description.is_empty() {
            "No description provided"
        } else {
            info.description.as_str()
        };
        format!(
            "{base}\n\n[MCP tool from '{server}' server]\nOriginal name: {original}",
            server = info.server_name,
            original = info.original_name,
        )
    }

    fn is_trusted(&self) -> bool {
        self.trusted_by_config
            || self.manager.is_server_trusted(&self.info.server_name)
            || self
                .manager
                .is_tool_trusted(&self.info.server_name, &self.info.original_name)
    }

    fn check_type(value: &Value, expected: &str) -> bool {
        match expected {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        }
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn display_name(&self) -> &str {
        &self.info.display_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameter_schema(&self) -> Value {
        self.info.parameters.clone()
    }

    fn validate_params(&self, args: &Value) -> Option<String> {
        let schema = &self.info.parameters;
        let properties = schema.get("properties").and_then(Value::as_object);

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if args.get(name).is_none() {
                    return Some(format!("Missing required parameter: {name}"));
                }
            }
        }

        if let (Some(args), Some(properties)) = (args.as_object(), properties) {
            for (name, value) in args {
                let Some(expected) = properties
                    .get(name)
                    .and_then(|p| p.get("type"))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                if !Self::check_type(value, expected) {
                    return Some(format!(
                        "Parameter '{name}' has invalid type. Expected: {expected}"
                    ));
                }
            }
        }

        None
    }

    fn describe_invocation(&self, args: &Value) -> String {
        let rendered = args
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(key, value)| {
                        let mut text = value.to_string();
                        if text.len() > 50 {
                            text.truncate(47);
                            text.push_str("...");
                        }
                        format!("{key}={text}")
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        if rendered.is_empty() {
            format!("Execute MCP tool '{}'", self.info.original_name)
        } else {
            format!(
                "Execute MCP tool '{}' with {rendered}",
                self.info.original_name
            )
        }
    }

    async fn should_confirm(
        &self,
        args: &Value,
        _signal: &AbortSignal,
    ) -> Result<Option<ConfirmationDetails>> {
        if self.is_trusted() {
            return Ok(None);
        }

        Ok(Some(ConfirmationDetails::McpTool {
            title: format!("Confirm MCP tool: {}", self.info.display_name),
            server_name: self.info.server_name.clone(),
            tool_name: self.info.original_name.clone(),
            args: args.clone(),
        }))
    }

    fn record_confirmation_outcome(&self, outcome: ConfirmationOutcome) {
        match outcome {
            ConfirmationOutcome::ProceedAlwaysServer => {
                self.manager.trust_server(&self.info.server_name);
            }
            ConfirmationOutcome::ProceedAlways | ConfirmationOutcome::ProceedAlwaysTool => {
                self.manager
                    .trust_tool(&self.info.server_name, &self.info.original_name);
            }
            _ => {}
        }
    }

    async fn execute(
        &self,
        args: Value,
        signal: &AbortSignal,
        _output: Option<OutputSink>,
    ) -> Result<ToolResult> {
        signal.check()?;

        let result = self
            .manager
            .call_tool(&self.info.server_name, &self.info.original_name, args)
            .await?;

        let mut text = result.text();
        if text.is_empty() {
            text = "Tool executed successfully".to_string();
        }

        if result.is_error {
            Ok(ToolResult {
                llm_content: vec![crate::types::Part::text(format!("MCP tool error: {text}"))],
                error: Some(text),
                ..Default::default()
            })
        } else {
            Ok(ToolResult {
                summary: Some(format!(
                    "MCP tool '{}' executed",
                    self.info.original_name
                )),
                return_display: Some(text.clone()),
                llm_content: vec![crate::types::Part::text(text)],
                error: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_info() -> McpToolInfo {
        McpToolInfo {
            name: "local__echo".to_string(),
            display_name: "echo (local)".to_string(),
            description: "Echo text back".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
            server_name: "local".to_string(),
            original_name: "echo".to_string(),
        }
    }

    fn adapter(trusted: bool) -> McpToolAdapter {
        McpToolAdapter::new(sample_info(), Arc::new(McpClientManager::new()), trusted)
    }

    #[test]
    fn test_description_names_server_and_original() {
        let adapter = adapter(false);
        assert!(adapter.description().contains("Echo text back"));
        assert!(adapter.description().contains("'local' server"));
        assert!(adapter.description().contains("Original name: echo"));
    }

    #[test]
    fn test_validate_params() {
        let adapter = adapter(false);
        assert!(adapter.validate_params(&json!({"text": "hi"})).is_none());

        let missing = adapter.validate_params(&json!({})).unwrap();
        assert!(missing.contains("text"));

        let wrong_type = adapter.validate_params(&json!({"text": 7})).unwrap();
        assert!(wrong_type.contains("invalid type"));
    }

    #[tokio::test]
    async fn test_confirmation_for_untrusted_tool() {
        let adapter = adapter(false);
        let signal = AbortSignal::new();

        let details = adapter
            .should_confirm(&json!({"text": "hi"}), &signal)
            .await
            .unwrap()
            .expect("untrusted tool must confirm");

        match details {
            ConfirmationDetails::McpTool {
                server_name,
                tool_name,
                ..
            } => {
                assert_eq!(server_name, "local");
                assert_eq!(tool_name, "echo");
            }
            other => panic!("unexpected confirmation details: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_config_trust_skips_confirmation() {
        let adapter = adapter(true);
        let signal = AbortSignal::new();
        let details = adapter.should_confirm(&json!({}), &signal).await.unwrap();
        assert!(details.is_none());
    }

    #[tokio::test]
    async fn test_proceed_always_outcomes_update_trust() {
        let manager = Arc::new(McpClientManager::new());
        let adapter = McpToolAdapter::new(sample_info(), manager.clone(), false);
        let signal = AbortSignal::new();

        adapter.record_confirmation_outcome(ConfirmationOutcome::ProceedAlwaysTool);
        assert!(manager.is_tool_trusted("local", "echo"));
        assert!(adapter
            .should_confirm(&json!({}), &signal)
            .await
            .unwrap()
            .is_none());

        manager.reset_trust();
        assert!(adapter
            .should_confirm(&json!({}), &signal)
            .await
            .unwrap()
            .is_some());

        adapter.record_confirmation_outcome(ConfirmationOutcome::ProceedAlwaysServer);
        assert!(manager.is_server_trusted("local"));
    }

    #[test]
    fn test_describe_invocation_truncates_long_values() {
        let adapter = adapter(false);
        let long = "a".repeat(80);
        let described = adapter.describe_invocation(&json!({"text": long}));
        assert!(described.contains("..."));
        assert!(described.len() < 120);
    }
}
