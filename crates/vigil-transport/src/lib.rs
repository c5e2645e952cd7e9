//! # vigil-transport
//!
//! Executes tool calls against the browser automation subprocess.
//!
//! One [`ToolTransport`] per execution context owns a child process and
//! speaks a newline-delimited JSON request/response protocol over its
//! stdio. A dead child is respawned and the call retried once.
//! [`TransportRegistry`] hands out clients keyed by [`ExecutionId`].
//!
//! [`ExecutionId`]: vigil_core::ids::ExecutionId

#![deny(unsafe_code)]

pub mod backend;
pub mod client;
pub mod errors;
pub mod protocol;
pub mod registry;

pub use backend::ToolBackend;
pub use client::{ToolTransport, TransportConfig};
pub use errors::{TransportError, TransportResult};
pub use registry::TransportRegistry;
