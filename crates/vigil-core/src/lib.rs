//! # vigil-core
//!
//! Foundation types shared by every Vigil crate:
//!
//! - **Messages**: [`Message`](messages::Message) with `System`, `User`, `Assistant`, `Tool` roles
//!   and the call/result pairing check
//! - **Tools**: [`ToolDefinition`](tools::ToolDefinition) sent to providers and the
//!   [`ToolOutcome`](tools::ToolOutcome) returned by the automation subprocess
//! - **Branded IDs**: [`ExecutionId`](ids::ExecutionId) keying per-run resources
//! - **Errors**: the [`ErrorKind`](errors::ErrorKind) taxonomy and message sanitizing
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod tools;
