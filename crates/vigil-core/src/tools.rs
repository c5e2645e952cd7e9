//! Tool definition and outcome types.
//!
//! [`ToolDefinition`] is what providers advertise to the model.
//! [`ToolOutcome`] is what the automation subprocess returns for one call.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Tool schema
// ─────────────────────────────────────────────────────────────────────────────

/// JSON Schema-compatible parameter definition for a tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolParameterSchema {
    /// Top-level JSON Schema type (always `object` for tools).
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Property definitions.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Required property names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl ToolParameterSchema {
    /// An object schema with no properties.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            schema_type: "object".into(),
            properties: Map::new(),
            required: Vec::new(),
        }
    }

    /// Add a property. Builder style.
    #[must_use]
    pub fn property(mut self, name: &str, schema: Value, required: bool) -> Self {
        let _ = self.properties.insert(name.to_owned(), schema);
        if required {
            self.required.push(name.to_owned());
        }
        self
    }

    /// The schema as a JSON value, the shape every provider expects.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// A tool definition that can be sent to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (unique identifier).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Parameter schema.
    pub parameters: ToolParameterSchema,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool outcome
// ─────────────────────────────────────────────────────────────────────────────

/// Result of one tool call against the automation subprocess.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Whether the tool succeeded.
    pub success: bool,
    /// Short status message.
    #[serde(default)]
    pub message: String,
    /// Full textual payload (page snapshot, extracted text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// File path produced by the tool (screenshots).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ToolOutcome {
    /// A successful outcome with a message.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            content: None,
            path: None,
        }
    }

    /// A failed outcome with a message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            content: None,
            path: None,
        }
    }

    /// Attach content. Builder style.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Attach a path. Builder style.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Text fed back to the model as the tool message body.
    #[must_use]
    pub fn conversation_text(&self) -> String {
        match (&self.content, self.success) {
            (Some(content), true) if !content.is_empty() => content.clone(),
            (_, true) => self.message.clone(),
            (_, false) => format!("Error: {}", self.message),
        }
    }

    /// One-line summary for execution logs, bounded to `max_chars`.
    #[must_use]
    pub fn summary(&self, max_chars: usize) -> String {
        let status = if self.success { "ok" } else { "error" };
        let line = self.message.lines().next().unwrap_or_default();
        let mut out = format!("{status}: {line}");
        if out.chars().count() > max_chars {
            out = out.chars().take(max_chars).collect::<String>() + "...";
        }
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
