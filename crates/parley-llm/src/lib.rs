//! # parley-llm
//!
//! Minimal LLM client used by Parley's language-model classifier.
//!
//! - [`types`] -- provider-agnostic messages, requests and responses.
//! - [`client`] -- HTTP client for the Anthropic and OpenAI chat APIs.

pub mod client;
pub mod error;
pub mod types;

pub use client::{LlmClient, LlmClientConfig, LlmProvider};
pub use error::{LlmError, Result};
pub use types::{ChatRequest, LlmResponse, Message, Role, Usage};
