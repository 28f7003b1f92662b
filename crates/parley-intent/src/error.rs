//! Intent engine error types.
//!
//! Classifiers surface failures through [`IntentError`]. The dispatcher
//! treats every variant the same way, as an unclassifiable message.

/// Unified error type for the intent crate.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    // -- Classifier errors ---------------------------------------------------
    /// The model's answer could not be turned into a classification.
    #[error("failed to parse classification: {reason}")]
    ParseFailed { reason: String },

    /// A built-in keyword pattern failed to compile.
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // -- Upstream crate errors -----------------------------------------------
    #[error("llm error: {0}")]
    Llm(#[from] parley_llm::LlmError),

    // -- Serialization -------------------------------------------------------
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the intent crate.
pub type Result<T> = std::result::Result<T, IntentError>;
