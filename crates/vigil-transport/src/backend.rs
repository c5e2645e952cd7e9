//! The seam between the agent loop and tool execution.

use async_trait::async_trait;
use serde_json::{Map, Value};
use vigil_core::tools::ToolOutcome;

use crate::errors::TransportResult;

/// Executes one tool call.
///
/// `Ok` with `success == false` is a tool error (fed back to the model);
/// `Err` is a transport failure that ends the invocation.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Run `name` with `arguments`.
    async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> TransportResult<ToolOutcome>;
}
