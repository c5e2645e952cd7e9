//! Content-block style provider (Anthropic Messages API).

pub mod message_converter;
pub mod provider;
pub mod types;

pub use provider::AnthropicProvider;
pub use types::AnthropicConfig;
