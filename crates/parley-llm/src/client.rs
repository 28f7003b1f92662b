//! Multi-provider LLM client.
//!
//! Speaks the **Anthropic Messages API** and the **OpenAI Chat Completions
//! API** (including OpenAI-compatible endpoints such as Ollama or vLLM) in
//! non-streaming mode. Classifiers only ever need one short JSON answer, so
//! there is no streaming or tool-use support.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::error::{LlmError, Result};
use crate::types::{ChatRequest, LlmResponse, Message, Role, Usage};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_MAX_TOKENS: u32 = 1024;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Provider enum
// ---------------------------------------------------------------------------

/// Identifies which wire format the client should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic,
    /// OpenAI and OpenAI-compatible endpoints.
    OpenAI,
}

impl LlmProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "openai_compatible" | "ollama" => Ok(Self::OpenAI),
            other => Err(LlmError::UnknownProvider {
                name: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Configuration for one provider endpoint.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    /// Base URL for the API (e.g. `https://api.anthropic.com`).
    pub base_url: String,
    pub default_model: String,
    /// Default maximum tokens per response.
    pub max_tokens: u32,
    /// Whole-request HTTP timeout.
    pub request_timeout: Duration,
}

impl LlmClientConfig {
    /// Configuration for the Anthropic API.
    pub fn anthropic(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_owned(),
            default_model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Configuration for the OpenAI API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_owned(),
            default_model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Configuration for any OpenAI-compatible API.
    pub fn openai_compatible(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::openai(api_key, model)
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A cheaply cloneable client for one provider.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: Arc<LlmClientConfig>,
    http: reqwest::Client,
}

impl LlmClient {
    /// Create a new client. Fails when the API key is empty.
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey {
                provider: config.provider.as_str().into(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    /// Send a chat request and return the complete response.
    pub async fn chat(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let (url, body, headers) = match self.config.provider {
            LlmProvider::Anthropic => (
                format!("{}/v1/messages", self.config.base_url),
                self.build_anthropic_request_body(request),
                self.anthropic_headers()?,
            ),
            LlmProvider::OpenAI => (
                format!("{}/chat/completions", self.config.base_url),
                self.build_openai_request_body(request),
                self.openai_headers()?,
            ),
        };

        tracing::debug!(
            url = %url,
            model = %body["model"],
            provider = self.config.provider.as_str(),
            "sending LLM request"
        );

        let resp = self
            .http
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| LlmError::RequestFailed {
            reason: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(LlmError::RequestFailed {
                reason: format!("API returned {status}: {text}"),
            });
        }

        let v: Value = serde_json::from_str(&text).map_err(|e| LlmError::ParseFailed {
            reason: format!("invalid JSON response: {e}"),
        })?;

        match self.config.provider {
            LlmProvider::Anthropic => parse_anthropic_response(&v),
            LlmProvider::OpenAI => parse_openai_response(&v),
        }
    }

    // -- Anthropic -----------------------------------------------------------

    fn build_anthropic_request_body(&self, request: &ChatRequest) -> Value {
        let (system_text, messages) = messages_to_anthropic(&request.messages);

        let mut body = json!({
            "model": self.model_for(request),
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": messages,
        });

        if let Some(system) = system_text {
            body["system"] = json!(system);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        body
    }

    fn anthropic_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|e| LlmError::RequestFailed {
                reason: format!("invalid API key header: {e}"),
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    // -- OpenAI --------------------------------------------------------------

    fn build_openai_request_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model_for(request),
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": messages_to_openai(&request.messages),
        });

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        body
    }

    fn openai_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", self.config.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value).map_err(|e| LlmError::RequestFailed {
                reason: format!("invalid authorization header: {e}"),
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn model_for<'a>(&'a self, request: &'a ChatRequest) -> &'a str {
        if request.model.is_empty() {
            &self.config.default_model
        } else {
            &request.model
        }
    }
}

// ===========================================================================
// Wire format conversion (free functions)
// ===========================================================================

/// Split out system messages, which Anthropic takes as a top-level field.
fn messages_to_anthropic(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = None;
    let mut wire_messages: Vec<Value> = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => match &mut system {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(&msg.content);
                }
                None => system = Some(msg.content.clone()),
            },
            Role::User | Role::Assistant => {
                wire_messages.push(json!({
                    "role": role_str(msg.role),
                    "content": msg.content,
                }));
            }
        }
    }

    (system, wire_messages)
}

/// OpenAI keeps system messages inline in the `messages` array.
fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            json!({
                "role": role_str(msg.role),
                "content": msg.content,
            })
        })
        .collect()
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn parse_anthropic_response(v: &Value) -> Result<LlmResponse> {
    let content = v["content"]
        .as_array()
        .ok_or_else(|| LlmError::ParseFailed {
            reason: "missing `content` array in response".into(),
        })?;

    let text = content
        .iter()
        .filter(|block| block["type"] == "text")
        .filter_map(|block| block["text"].as_str())
        .collect::<String>();

    Ok(LlmResponse {
        text,
        usage: Usage {
            input_tokens: token_count(&v["usage"]["input_tokens"]),
            output_tokens: token_count(&v["usage"]["output_tokens"]),
        },
        stop_reason: v["stop_reason"].as_str().map(str::to_owned),
    })
}

fn parse_openai_response(v: &Value) -> Result<LlmResponse> {
    let choice = &v["choices"][0];
    let message = &choice["message"];

    if message.is_null() {
        return Err(LlmError::ParseFailed {
            reason: "missing `choices[0].message` in response".into(),
        });
    }

    Ok(LlmResponse {
        text: message["content"].as_str().unwrap_or_default().to_owned(),
        usage: Usage {
            input_tokens: token_count(&v["usage"]["prompt_tokens"]),
            output_tokens: token_count(&v["usage"]["completion_tokens"]),
        },
        stop_reason: choice["finish_reason"].as_str().map(str::to_owned),
    })
}

fn token_count(v: &Value) -> u32 {
    v.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_anthropic_request_body_basic() {
        let config = LlmClientConfig::anthropic("test-key", "claude-haiku");
        let client = LlmClient::new(config).unwrap();

        let request = ChatRequest::new(vec![
            Message::system("Clasifica."),
            Message::system("Responde en JSON."),
            Message::user("crear tarea"),
        ])
        .with_temperature(0.0)
        .with_max_tokens(256);

        let body = client.build_anthropic_request_body(&request);

        assert_eq!(body["model"], "claude-haiku");
        assert_eq!(body["system"], "Clasifica.\nResponde en JSON.");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["temperature"].as_f64().unwrap(), 0.0);

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "crear tarea");
    }

    #[test]
    fn build_openai_request_body_keeps_system_inline() {
        let config = LlmClientConfig::openai("sk-test", "gpt-4o-mini");
        let client = LlmClient::new(config).unwrap();

        let mut request = ChatRequest::new(vec![Message::system("sys"), Message::user("hola")]);
        request.model = "gpt-4o".into();

        let body = client.build_openai_request_body(&request);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert!(body.get("temperature").is_none());

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hola");
    }

    #[test]
    fn empty_api_key_returns_error() {
        let result = LlmClient::new(LlmClientConfig::anthropic("", "claude-haiku"));
        assert!(matches!(result, Err(LlmError::MissingApiKey { .. })));

        let result = LlmClient::new(LlmClientConfig::openai("", "gpt-4o"));
        assert!(matches!(result, Err(LlmError::MissingApiKey { .. })));
    }

    #[test]
    fn openai_compatible_config_construction() {
        let config =
            LlmClientConfig::openai_compatible("local-key", "llama3", "http://localhost:11434/v1");
        assert_eq!(config.provider, LlmProvider::OpenAI);
        assert_eq!(config.default_model, "llama3");
        assert_eq!(config.base_url, "http://localhost:11434/v1");
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn provider_parsing() {
        assert_eq!("Anthropic".parse::<LlmProvider>().unwrap(), LlmProvider::Anthropic);
        assert_eq!("ollama".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAI);
        assert!("gemini".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn parse_anthropic_text_response() {
        let v = json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "text", "text": "{\"intent\":"},
                {"type": "text", "text": "\"greeting\"}"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });

        let resp = parse_anthropic_response(&v).unwrap();
        assert_eq!(resp.text, "{\"intent\":\"greeting\"}");
        assert_eq!(resp.usage.input_tokens, 10);
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn parse_anthropic_response_without_content_fails() {
        let v = json!({"type": "error"});
        assert!(matches!(
            parse_anthropic_response(&v),
            Err(LlmError::ParseFailed { .. })
        ));
    }

    #[test]
    fn parse_openai_text_response() {
        let v = json!({
            "id": "chatcmpl-abc",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hola"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });

        let resp = parse_openai_response(&v).unwrap();
        assert_eq!(resp.text, "hola");
        assert_eq!(resp.usage.output_tokens, 3);
        assert_eq!(resp.stop_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn parse_openai_response_without_choices_fails() {
        assert!(parse_openai_response(&json!({"choices": []})).is_err());
    }
}
