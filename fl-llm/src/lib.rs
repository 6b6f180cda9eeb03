//! Chat-completions client for flightlens.
//!
//! Pure HTTP client speaking the OpenAI wire format, against either an Azure
//! OpenAI deployment or the public OpenAI endpoint.

mod client;
mod error;
mod openai;
mod types;

pub use client::{ChatModel, LlmClient, Provider, validate_tool_name};
pub use error::{LlmError, Result};
pub use types::{ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition, Usage};
