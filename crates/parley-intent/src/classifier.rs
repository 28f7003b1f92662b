//! Classifier seams consumed by the dispatcher.
//!
//! Classifiers are untrusted: the dispatcher bounds every call with a
//! timeout and treats any `Err` as an unclassifiable message.

use async_trait::async_trait;

use crate::error::Result;
use crate::intent::{Classification, ContextualDecision};

/// Classifies a fresh message into a [`crate::UserIntent`].
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// `history_summary` is the rendered recent history of the conversation.
    async fn classify(&self, text: &str, history_summary: &str) -> Result<Classification>;
}

/// Decides whether a message refers to the conversation's current context.
#[async_trait]
pub trait ContextualClassifier: Send + Sync {
    /// `pending_tag` is the live pending action's type, or `"ninguna"`.
    async fn classify_contextual(
        &self,
        text: &str,
        history_summary: &str,
        active_summary: &str,
        pending_tag: &str,
    ) -> Result<ContextualDecision>;
}
