//! Function-call style provider (`OpenAI` Chat Completions API).

pub mod message_converter;
pub mod provider;
pub mod types;

pub use provider::OpenAiProvider;
pub use types::OpenAiConfig;
