//! Intent vocabulary and classifiers for Parley.
//!
//! - [`intent`] -- [`UserIntent`], [`Classification`] and the follow-up
//!   vocabulary ([`ContextualAction`], [`ContextualDecision`]).
//! - [`classifier`] -- the two async seams the dispatcher consumes.
//! - [`keyword`] -- deterministic Spanish rules (phrases + regex).
//! - [`llm_classifier`] -- model-backed classification with lenient JSON
//!   parsing.
//! - [`tiered`] -- keyword first, model only when the rules are unsure.

pub mod classifier;
pub mod error;
pub mod intent;
pub mod keyword;
pub mod llm_classifier;
pub mod tiered;

pub use classifier::{ContextualClassifier, IntentClassifier};
pub use error::{IntentError, Result};
pub use intent::{
    Classification, ContextualAction, ContextualDecision, UserIntent, clamp_confidence,
};
pub use keyword::{KeywordClassifier, extract_priority};
pub use llm_classifier::LlmClassifier;
pub use tiered::{DEFAULT_FAST_PATH_THRESHOLD, TieredClassifier};
