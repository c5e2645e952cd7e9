//! # Message Converter
//!
//! Converts the uniform [`Message`] list into Anthropic Messages API format:
//! - System messages are lifted into the top-level `system` string
//! - Assistant text and `tool_use` blocks share one assistant turn
//! - Consecutive tool results are batched into one user turn of
//!   `tool_result` blocks, and adjacent user turns are merged so roles
//!   alternate

use serde_json::{Map, Value, json};
use vigil_core::messages::Message;
use vigil_core::tools::ToolDefinition;

use super::types::{AnthropicMessageParam, AnthropicTool};

/// Convert messages into `(system, messages)`.
pub fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessageParam>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut result: Vec<AnthropicMessageParam> = Vec::new();

    for msg in messages {
        match msg {
            Message::System { content } => system_parts.push(content),
            Message::User { content } => {
                push_blocks(&mut result, "user", vec![json!({"type": "text", "text": content})]);
            }
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => {
                let mut blocks = Vec::with_capacity(tool_calls.len() + 1);
                if let Some(text) = content.as_deref().filter(|t| !t.is_empty()) {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                for call in tool_calls {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": Value::Object(call.arguments.clone()),
                    }));
                }
                // An empty assistant turn is rejected by the API
                if !blocks.is_empty() {
                    push_blocks(&mut result, "assistant", blocks);
                }
            }
            Message::Tool {
                tool_call_id,
                content,
                is_error,
                ..
            } => {
                let mut block = Map::new();
                let _ = block.insert("type".into(), json!("tool_result"));
                let _ = block.insert("tool_use_id".into(), json!(tool_call_id));
                let _ = block.insert("content".into(), json!(content));
                if *is_error == Some(true) {
                    let _ = block.insert("is_error".into(), json!(true));
                }
                push_blocks(&mut result, "user", vec![Value::Object(block)]);
            }
        }
    }

    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
    (system, result)
}

/// Append blocks, merging into the previous turn when the role repeats.
fn push_blocks(result: &mut Vec<AnthropicMessageParam>, role: &str, blocks: Vec<Value>) {
    if let Some(last) = result.last_mut() {
        if last.role == role {
            last.content.extend(blocks);
            return;
        }
    }
    result.push(AnthropicMessageParam {
        role: role.into(),
        content: blocks,
    });
}

/// Convert tool definitions.
pub fn convert_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|t| AnthropicTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.parameters.to_value(),
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::messages::ToolCall;
    use vigil_core::tools::ToolParameterSchema;

    fn call(id: &str, name: &str) -> ToolCall {
        let mut args = Map::new();
        let _ = args.insert("ref".into(), json!("e1"));
        ToolCall::new(id, name, args)
    }

    #[test]
    fn system_messages_are_lifted() {
        let (system, msgs) = convert_messages(&[
            Message::system("You test web apps."),
            Message::system("App: shop"),
            Message::user("open the cart"),
        ]);
        assert_eq!(system.as_deref(), Some("You test web apps.\n\nApp: shop"));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, "user");
    }

    #[test]
    fn tool_results_are_batched_into_one_user_turn() {
        let (_, msgs) = convert_messages(&[
            Message::user("go"),
            Message::assistant_with_tools(Some("working".into()), vec![call("a", "click"), call("b", "snapshot")]),
            Message::tool_result("a", "click", "clicked", false),
            Message::tool_result("b", "snapshot", "tree", true),
        ]);
        assert_eq!(msgs.len(), 3);
        let assistant = &msgs[1];
        assert_eq!(assistant.role, "assistant");
        assert_eq!(assistant.content[0]["type"], "text");
        assert_eq!(assistant.content[1]["type"], "tool_use");
        assert_eq!(assistant.content[1]["input"]["ref"], "e1");
        assert_eq!(assistant.content[2]["id"], "b");

        let results = &msgs[2];
        assert_eq!(results.role, "user");
        assert_eq!(results.content.len(), 2);
        assert_eq!(results.content[0]["tool_use_id"], "a");
        assert!(results.content[0].get("is_error").is_none());
        assert_eq!(results.content[1]["is_error"], true);
    }

    #[test]
    fn user_after_tool_results_merges_into_same_turn() {
        let (_, msgs) = convert_messages(&[
            Message::user("go"),
            Message::assistant_with_tools(None, vec![call("a", "click")]),
            Message::tool_result("a", "click", "ok", false),
            Message::user("Step 2: verify the banner"),
        ]);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2].content.len(), 2);
        assert_eq!(msgs[2].content[0]["type"], "tool_result");
        assert_eq!(msgs[2].content[1]["type"], "text");
    }

    #[test]
    fn empty_assistant_is_dropped() {
        let (_, msgs) = convert_messages(&[
            Message::user("go"),
            Message::assistant_with_tools(None, Vec::new()),
        ]);
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn tools_use_input_schema() {
        let tools = convert_tools(&[ToolDefinition {
            name: "navigate".into(),
            description: "Open a URL".into(),
            parameters: ToolParameterSchema::empty().property("url", json!({"type": "string"}), true),
        }]);
        let v = serde_json::to_value(&tools).unwrap();
        assert_eq!(v[0]["input_schema"]["required"][0], "url");
    }
}
