//! # vigil-llm
//!
//! Provider abstraction for tool-calling chat models.
//!
//! Every backend implements [`Provider`]: one call takes the uniform message
//! list and tool catalog and returns a [`ProviderTurn`], either tool calls to
//! run (incomplete) or final text (complete).
//!
//! - [`anthropic`]: content-block wire style, tool results batched into one user turn
//! - [`openai`]: function-call wire style, one `tool` message per call id
//! - [`factory`]: [`ProviderRegistry`] selecting a provider by configuration string

#![deny(unsafe_code)]

pub mod anthropic;
pub mod factory;
pub mod openai;
pub mod provider;

pub use factory::ProviderRegistry;
pub use provider::{
    Provider, ProviderError, ProviderOptions, ProviderResult, ProviderTurn, TokenUsage,
};
