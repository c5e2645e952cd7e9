//! # `OpenAI` Message Converter
//!
//! Converts between the uniform message model and Chat Completions format.
//!
//! - Assistant tool calls → separate `tool_calls` array, arguments JSON-encoded
//! - Tool results → one `role: "tool"` message per call id
//! - Reply `tool_calls` → [`ToolCall`]s with decoded argument objects

use serde_json::{Map, Value, json};
use vigil_core::messages::{Message, ToolCall};
use vigil_core::tools::ToolDefinition;

use crate::provider::{ProviderError, ProviderResult};

use super::types::{ChatMessage, ChatTool, WireFunction, WireToolCall};

/// Convert messages into Chat Completions messages.
#[must_use]
pub fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|msg| match msg {
            Message::System { content } => plain("system", content),
            Message::User { content } => plain("user", content),
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => ChatMessage {
                role: "assistant".into(),
                content: content.clone(),
                tool_calls: tool_calls.iter().map(to_wire_call).collect(),
                tool_call_id: None,
            },
            Message::Tool {
                tool_call_id,
                content,
                ..
            } => ChatMessage {
                role: "tool".into(),
                content: Some(content.clone()),
                tool_calls: Vec::new(),
                tool_call_id: Some(tool_call_id.clone()),
            },
        })
        .collect()
}

fn plain(role: &str, content: &str) -> ChatMessage {
    ChatMessage {
        role: role.into(),
        content: Some(content.to_owned()),
        tool_calls: Vec::new(),
        tool_call_id: None,
    }
}

fn to_wire_call(call: &ToolCall) -> WireToolCall {
    WireToolCall {
        id: call.id.clone(),
        call_type: "function".into(),
        function: WireFunction {
            name: call.name.clone(),
            arguments: Value::Object(call.arguments.clone()).to_string(),
        },
    }
}

/// Convert tool definitions.
#[must_use]
pub fn convert_tools(tools: &[ToolDefinition]) -> Vec<ChatTool> {
    tools
        .iter()
        .map(|t| ChatTool {
            tool_type: "function".into(),
            function: json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters.to_value(),
            }),
        })
        .collect()
}

/// Decode reply tool calls. Argument strings must hold a JSON object
/// (an empty string counts as `{}`).
pub fn parse_tool_calls(wire: &[WireToolCall]) -> ProviderResult<Vec<ToolCall>> {
    wire.iter()
        .map(|call| {
            if call.id.is_empty() || call.function.name.is_empty() {
                return Err(ProviderError::Malformed {
                    message: "tool call without id or function name".into(),
                });
            }
            let raw = call.function.arguments.trim();
            let arguments = if raw.is_empty() {
                Map::new()
            } else {
                match serde_json::from_str::<Value>(raw) {
                    Ok(Value::Object(map)) => map,
                    Ok(other) => {
                        return Err(ProviderError::Malformed {
                            message: format!("arguments of {} are not an object: {other}", call.id),
                        });
                    }
                    Err(e) => {
                        return Err(ProviderError::Malformed {
                            message: format!("arguments of {} are not valid JSON: {e}", call.id),
                        });
                    }
                }
            };
            Ok(ToolCall::new(call.id.clone(), call.function.name.clone(), arguments))
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn wire(id: &str, name: &str, args: &str) -> WireToolCall {
        WireToolCall {
            id: id.into(),
            call_type: "function".into(),
            function: WireFunction {
                name: name.into(),
                arguments: args.into(),
            },
        }
    }

    #[test]
    fn one_tool_message_per_call_id() {
        let mut args = Map::new();
        let _ = args.insert("key".into(), json!("Enter"));
        let msgs = convert_messages(&[
            Message::system("sys"),
            Message::user("go"),
            Message::assistant_with_tools(None, vec![
                ToolCall::new("call_1", "press_key", args),
                ToolCall::new("call_2", "snapshot", Map::new()),
            ]),
            Message::tool_result("call_1", "press_key", "pressed", false),
            Message::tool_result("call_2", "snapshot", "tree", false),
        ]);
        assert_eq!(msgs.len(), 5);
        assert_eq!(msgs[0].role, "system");
        let assistant = serde_json::to_value(&msgs[2]).unwrap();
        assert!(assistant["content"].is_null());
        assert_eq!(assistant["tool_calls"][0]["type"], "function");
        assert_eq!(assistant["tool_calls"][0]["function"]["arguments"], r#"{"key":"Enter"}"#);
        assert_eq!(msgs[3].role, "tool");
        assert_eq!(msgs[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msgs[4].tool_call_id.as_deref(), Some("call_2"));
    }

    #[test]
    fn plain_messages_omit_tool_fields() {
        let v = serde_json::to_value(&convert_messages(&[Message::user("hi")])[0]).unwrap();
        assert!(v.get("tool_calls").is_none());
        assert!(v.get("tool_call_id").is_none());
    }

    #[test]
    fn parse_arguments_object() {
        let calls = parse_tool_calls(&[wire("c1", "type", r#"{"text": "hello", "ref": "e4"}"#)]).unwrap();
        assert_eq!(calls[0].argument("text"), Some(&json!("hello")));
    }

    #[test]
    fn empty_arguments_are_empty_object() {
        let calls = parse_tool_calls(&[wire("c1", "snapshot", "")]).unwrap();
        assert!(calls[0].arguments.is_empty());
    }

    #[test]
    fn invalid_arguments_are_malformed() {
        assert_matches!(
            parse_tool_calls(&[wire("c1", "click", "{not json")]),
            Err(ProviderError::Malformed { .. })
        );
        assert_matches!(
            parse_tool_calls(&[wire("c1", "click", "[1,2]")]),
            Err(ProviderError::Malformed { .. })
        );
    }

    #[test]
    fn tools_wrap_function_schema() {
        let tools = convert_tools(&[ToolDefinition {
            name: "snapshot".into(),
            description: "Capture page state".into(),
            parameters: vigil_core::tools::ToolParameterSchema::empty(),
        }]);
        let v = serde_json::to_value(&tools).unwrap();
        assert_eq!(v[0]["type"], "function");
        assert_eq!(v[0]["function"]["name"], "snapshot");
        assert_eq!(v[0]["function"]["parameters"]["type"], "object");
    }
}
