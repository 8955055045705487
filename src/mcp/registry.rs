//! Live MCP server registry and tool dispatch.
//!
//! The registry owns one stdio client per configured server plus the tool
//! list each server advertised at startup. Lookups scan servers in
//! configuration order, so when two servers export the same tool name the
//! first one wins.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use rust_mcp_schema::{CallToolResult, ContentBlock, Tool};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::api::{ChatToolCall, ChatToolDefinition};
use crate::core::config::McpServerConfig;
use crate::mcp::client::StdioClient;

/// Failures surfaced by tool dispatch. Every variant renders to a
/// human-readable line that doubles as the tool-result content handed back
/// to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    UnknownTool { tool_name: String },
    ServerUnavailable { server: String, message: String },
    InvalidArguments { tool_name: String, message: String },
    Execution { tool_name: String, message: String },
    ChainLimit,
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::UnknownTool { tool_name } => {
                write!(f, "Tool '{tool_name}' not found in active servers")
            }
            ToolError::ServerUnavailable { server, message } => {
                write!(f, "MCP server '{server}' is unavailable: {message}")
            }
            ToolError::InvalidArguments { tool_name, message } => {
                write!(f, "Invalid arguments for tool '{tool_name}': {message}")
            }
            ToolError::Execution { tool_name, message } => {
                write!(f, "Tool '{tool_name}' failed: {message}")
            }
            ToolError::ChainLimit => write!(f, "Maximum tool turns reached"),
        }
    }
}

impl StdError for ToolError {}

enum ServerLink {
    Ready(Arc<StdioClient>),
    Failed(String),
}

struct ServerHandle {
    name: String,
    link: ServerLink,
    tools: Vec<Tool>,
}

/// Snapshot of one server's state for display.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub name: String,
    pub connected: bool,
    pub tools: Vec<String>,
    pub error: Option<String>,
}

#[derive(Default)]
pub struct McpRegistry {
    inner: RwLock<Vec<ServerHandle>>,
}

impl McpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active server set with freshly launched processes for
    /// every enabled entry. The swap happens after all launches settle, so
    /// readers never observe a half-built set; previous clients drop here,
    /// which closes their stdin and lets the old processes exit.
    pub async fn apply(&self, servers: &[McpServerConfig]) {
        let launches = servers
            .iter()
            .filter(|server| server.enabled)
            .map(Self::launch);
        let handles = futures_util::future::join_all(launches).await;
        *self.inner.write().await = handles;
    }

    async fn launch(config: &McpServerConfig) -> ServerHandle {
        match Self::bring_up(config).await {
            Ok((client, tools)) => {
                debug!(server = %config.name, tools = tools.len(), "MCP server ready");
                ServerHandle {
                    name: config.name.clone(),
                    link: ServerLink::Ready(client),
                    tools,
                }
            }
            Err(message) => {
                warn!(server = %config.name, error = %message, "MCP server failed to start");
                ServerHandle {
                    name: config.name.clone(),
                    link: ServerLink::Failed(message),
                    tools: Vec::new(),
                }
            }
        }
    }

    async fn bring_up(config: &McpServerConfig) -> Result<(Arc<StdioClient>, Vec<Tool>), String> {
        let client = StdioClient::connect(config).await?;
        client.initialize().await?;
        let tools = client.list_tools().await?;
        Ok((client, tools))
    }

    /// Advertised tools in wire format for the chat request, deduplicated
    /// with first-server-wins. `None` when no server exports anything.
    pub async fn tool_definitions(&self) -> Option<Vec<ChatToolDefinition>> {
        let inner = self.inner.read().await;
        let mut seen = HashSet::new();
        let mut definitions = Vec::new();
        for handle in inner.iter() {
            for tool in &handle.tools {
                if !seen.insert(tool.name.clone()) {
                    continue;
                }
                let parameters = serde_json::to_value(&tool.input_schema)
                    .unwrap_or_else(|_| json!({"type": "object"}));
                definitions.push(ChatToolDefinition::function(
                    tool.name.clone(),
                    tool.description.clone(),
                    parameters,
                ));
            }
        }
        if definitions.is_empty() {
            None
        } else {
            Some(definitions)
        }
    }

    /// Dispatches one tool call and returns the flattened text result.
    pub async fn invoke(&self, tool_call: &ChatToolCall) -> Result<String, ToolError> {
        let tool_name = tool_call.function.name.clone();
        let lookup = {
            let inner = self.inner.read().await;
            inner.iter().find_map(|handle| {
                let tool = handle.tools.iter().find(|tool| tool.name == tool_name)?;
                let ServerLink::Ready(client) = &handle.link else {
                    return None;
                };
                Some((
                    client.clone(),
                    serde_json::to_value(&tool.input_schema).ok(),
                    handle.name.clone(),
                ))
            })
        };
        let Some((client, schema, server)) = lookup else {
            return Err(ToolError::UnknownTool { tool_name });
        };

        let arguments =
            parse_arguments(&tool_call.function.arguments).map_err(|message| {
                ToolError::InvalidArguments {
                    tool_name: tool_name.clone(),
                    message,
                }
            })?;
        if let Some(schema) = &schema {
            let instance = arguments
                .clone()
                .map(Value::Object)
                .unwrap_or_else(|| json!({}));
            validate_arguments(schema, &instance).map_err(|message| {
                ToolError::InvalidArguments {
                    tool_name: tool_name.clone(),
                    message,
                }
            })?;
        }

        debug!(server = %server, tool = %tool_name, "Dispatching tool call");
        let result = client
            .call_tool(&tool_name, arguments)
            .await
            .map_err(|message| ToolError::ServerUnavailable { server, message })?;
        let text = flatten_tool_result(&result);
        if result.is_error == Some(true) {
            let message = if text.trim().is_empty() {
                "Tool reported an error.".to_string()
            } else {
                text
            };
            return Err(ToolError::Execution { tool_name, message });
        }
        Ok(text)
    }

    pub async fn server_statuses(&self) -> Vec<ServerStatus> {
        let inner = self.inner.read().await;
        inner
            .iter()
            .map(|handle| ServerStatus {
                name: handle.name.clone(),
                connected: matches!(handle.link, ServerLink::Ready(_)),
                tools: handle.tools.iter().map(|tool| tool.name.clone()).collect(),
                error: match &handle.link {
                    ServerLink::Ready(_) => None,
                    ServerLink::Failed(message) => Some(message.clone()),
                },
            })
            .collect()
    }

    #[cfg(test)]
    fn with_handles(handles: Vec<ServerHandle>) -> Self {
        Self {
            inner: RwLock::new(handles),
        }
    }
}

fn parse_arguments(raw: &str) -> Result<Option<serde_json::Map<String, Value>>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(Value::Null) => Ok(None),
        Ok(other) => Err(format!("expected a JSON object, got {other}")),
        Err(err) => Err(err.to_string()),
    }
}

fn validate_arguments(schema: &Value, instance: &Value) -> Result<(), String> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(validator) => validator,
        // A schema the validator cannot compile is the server's problem,
        // not grounds to block the call.
        Err(_) => return Ok(()),
    };
    validator
        .validate(instance)
        .map_err(|err| err.to_string())
}

fn flatten_tool_result(result: &CallToolResult) -> String {
    let mut parts = Vec::new();
    for block in &result.content {
        if let ContentBlock::TextContent(text) = block {
            parts.push(text.text.clone());
        }
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, schema: Value) -> Tool {
        serde_json::from_value(json!({"name": name, "inputSchema": schema})).unwrap()
    }

    fn failed_handle(name: &str, tools: Vec<Tool>) -> ServerHandle {
        ServerHandle {
            name: name.to_string(),
            link: ServerLink::Failed("spawn failed".to_string()),
            tools,
        }
    }

    #[tokio::test]
    async fn unknown_tools_resolve_to_a_typed_error() {
        let registry = McpRegistry::new();
        let call = ChatToolCall::new("call_1", "run_python", "{}");
        let err = registry.invoke(&call).await.unwrap_err();
        assert_eq!(
            err,
            ToolError::UnknownTool {
                tool_name: "run_python".to_string()
            }
        );
        assert_eq!(
            err.to_string(),
            "Tool 'run_python' not found in active servers"
        );
    }

    #[tokio::test]
    async fn first_server_wins_when_tool_names_collide() {
        let registry = McpRegistry::with_handles(vec![
            failed_handle("alpha", vec![tool("echo", json!({"type": "object"}))]),
            failed_handle("beta", vec![tool("echo", json!({"type": "object"}))]),
            failed_handle("gamma", vec![tool("count", json!({"type": "object"}))]),
        ]);
        let definitions = registry.tool_definitions().await.unwrap();
        let names: Vec<&str> = definitions
            .iter()
            .map(|def| def.function.name.as_str())
            .collect();
        assert_eq!(names, vec!["echo", "count"]);
    }

    #[tokio::test]
    async fn empty_registry_advertises_no_tools() {
        let registry = McpRegistry::new();
        assert!(registry.tool_definitions().await.is_none());
    }

    #[tokio::test]
    async fn statuses_report_launch_failures() {
        let registry = McpRegistry::with_handles(vec![failed_handle("alpha", Vec::new())]);
        let statuses = registry.server_statuses().await;
        assert_eq!(statuses.len(), 1);
        assert!(!statuses[0].connected);
        assert_eq!(statuses[0].error.as_deref(), Some("spawn failed"));
    }

    #[test]
    fn arguments_must_be_json_objects() {
        assert_eq!(parse_arguments("").unwrap(), None);
        assert_eq!(parse_arguments("null").unwrap(), None);
        let map = parse_arguments(r#"{"code": "1+1"}"#).unwrap().unwrap();
        assert_eq!(map.get("code"), Some(&json!("1+1")));
        assert!(parse_arguments("[1, 2]").is_err());
        assert!(parse_arguments("{not json").is_err());
    }

    #[test]
    fn schema_validation_rejects_wrong_shapes() {
        let schema = json!({
            "type": "object",
            "properties": {"code": {"type": "string"}},
            "required": ["code"]
        });
        assert!(validate_arguments(&schema, &json!({"code": "print(1)"})).is_ok());
        assert!(validate_arguments(&schema, &json!({"code": 42})).is_err());
        assert!(validate_arguments(&schema, &json!({})).is_err());
    }

    #[test]
    fn uncompilable_schemas_do_not_block_dispatch() {
        let schema = json!({"type": "definitely-not-a-type"});
        assert!(validate_arguments(&schema, &json!({})).is_ok());
    }

    #[test]
    fn tool_results_flatten_to_text_blocks() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "image", "data": "aGk=", "mimeType": "image/png"},
                {"type": "text", "text": "line two"}
            ]
        }))
        .unwrap();
        assert_eq!(flatten_tool_result(&result), "line one\nline two");
    }

    #[test]
    fn dispatch_errors_render_their_context() {
        let unavailable = ToolError::ServerUnavailable {
            server: "run_python".to_string(),
            message: "MCP stdio request timed out.".to_string(),
        };
        assert_eq!(
            unavailable.to_string(),
            "MCP server 'run_python' is unavailable: MCP stdio request timed out."
        );
        let invalid = ToolError::InvalidArguments {
            tool_name: "echo".to_string(),
            message: "expected a JSON object, got 3".to_string(),
        };
        assert_eq!(
            invalid.to_string(),
            "Invalid arguments for tool 'echo': expected a JSON object, got 3"
        );
        assert_eq!(ToolError::ChainLimit.to_string(), "Maximum tool turns reached");
    }
}
