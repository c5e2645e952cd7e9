//! Wire format of the automation subprocess.
//!
//! Each message is one JSON object on one line.
//!
//! ```text
//! → {"version":"1","id":7,"method":"call-tool","params":{"name":"click","arguments":{...}}}
//! ← {"version":"1","id":7,"result":{"success":true,"message":"clicked"}}
//! ← {"version":"1","id":8,"error":{"code":-32000,"message":"no such element"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use vigil_core::tools::ToolOutcome;

/// Protocol version sent with every request.
pub const PROTOCOL_VERSION: &str = "1";

/// Handshake method. Must complete before any tool call.
pub const METHOD_INITIALIZE: &str = "initialize";

/// Tool invocation method.
pub const METHOD_CALL_TOOL: &str = "call-tool";

/// Outgoing request.
#[derive(Debug, Serialize)]
pub struct RequestEnvelope<'a> {
    /// Protocol version.
    pub version: &'static str,
    /// Monotonic per-process id.
    pub id: u64,
    /// Method name.
    pub method: &'a str,
    /// Method parameters.
    pub params: Value,
}

impl<'a> RequestEnvelope<'a> {
    /// Build a request for `method`.
    #[must_use]
    pub fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id,
            method,
            params,
        }
    }

    /// Encode as one line, newline included.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Error object in a response.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RemoteError {
    /// Error code.
    #[serde(default)]
    pub code: i64,
    /// Error text.
    #[serde(default)]
    pub message: String,
}

/// Incoming response.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ResponseEnvelope {
    /// Protocol version reported by the subprocess.
    #[serde(default)]
    pub version: Option<String>,
    /// Id of the answered request.
    pub id: u64,
    /// Success payload.
    #[serde(default)]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default)]
    pub error: Option<RemoteError>,
}

impl ResponseEnvelope {
    /// Parse one stdout line. `None` for blank or non-response lines.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }

    /// Interpret a `call-tool` response as a tool outcome.
    ///
    /// A remote error or an unreadable result is a failed tool call, not a
    /// transport failure.
    #[must_use]
    pub fn into_outcome(self, tool_name: &str) -> ToolOutcome {
        if let Some(err) = self.error {
            return ToolOutcome::failure(format!("{tool_name}: {}", err.message));
        }
        match self.result {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                ToolOutcome::failure(format!("{tool_name}: unreadable result: {e}"))
            }),
            None => ToolOutcome::failure(format!("{tool_name}: empty response")),
        }
    }
}

/// Parameters of a `call-tool` request.
#[must_use]
pub fn call_tool_params(name: &str, arguments: &Map<String, Value>) -> Value {
    json!({ "name": name, "arguments": arguments })
}

/// Parameters of the `initialize` request.
#[must_use]
pub fn initialize_params() -> Value {
    json!({
        "client": vigil_core::constants::NAME,
        "clientVersion": vigil_core::constants::VERSION,
        "protocolVersion": PROTOCOL_VERSION,
    })
}
