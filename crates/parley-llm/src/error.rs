//! LLM client error types.

/// Errors surfaced by [`crate::LlmClient`].
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    // -- Transport errors ----------------------------------------------------
    /// An HTTP request to the provider failed or returned a non-2xx status.
    #[error("llm request failed: {reason}")]
    RequestFailed { reason: String },

    /// The provider's response could not be parsed.
    #[error("llm response parse error: {reason}")]
    ParseFailed { reason: String },

    // -- Configuration errors ------------------------------------------------
    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    /// The provider name is not one this client speaks.
    #[error("unknown llm provider: {name}")]
    UnknownProvider { name: String },

    // -- Serialization -------------------------------------------------------
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LlmError>;

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        Self::RequestFailed {
            reason: err.to_string(),
        }
    }
}
