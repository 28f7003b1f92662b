//! Two-tier classification: keyword rules first, a slower classifier only
//! when the rules are not confident enough.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::classifier::{ContextualClassifier, IntentClassifier};
use crate::error::Result;
use crate::intent::{Classification, ContextualDecision};
use crate::keyword::KeywordClassifier;

/// Keyword results at or above this confidence skip the slow tier.
pub const DEFAULT_FAST_PATH_THRESHOLD: f64 = 0.75;

/// Runs [`KeywordClassifier`] first and falls back to `S`.
///
/// A failing slow tier never fails the call: the keyword answer is used.
pub struct TieredClassifier<S> {
    fast: Arc<KeywordClassifier>,
    slow: Arc<S>,
    threshold: f64,
}

impl<S> TieredClassifier<S> {
    pub fn new(fast: Arc<KeywordClassifier>, slow: Arc<S>) -> Self {
        Self {
            fast,
            slow,
            threshold: DEFAULT_FAST_PATH_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

#[async_trait]
impl<S: IntentClassifier> IntentClassifier for TieredClassifier<S> {
    async fn classify(&self, text: &str, history_summary: &str) -> Result<Classification> {
        let fast = self.fast.classify_text(text);
        if fast.confidence >= self.threshold {
            debug!(intent = %fast.intent, confidence = fast.confidence, "fast path");
            return Ok(fast);
        }

        match self.slow.classify(text, history_summary).await {
            Ok(slow) => Ok(slow),
            Err(e) => {
                warn!(error = %e, "slow classifier failed, using keyword result");
                Ok(fast)
            }
        }
    }
}

#[async_trait]
impl<S: ContextualClassifier> ContextualClassifier for TieredClassifier<S> {
    async fn classify_contextual(
        &self,
        text: &str,
        history_summary: &str,
        active_summary: &str,
        pending_tag: &str,
    ) -> Result<ContextualDecision> {
        let fast = self.fast.classify_contextual_text(text);
        if fast.is_contextual {
            debug!(action = %fast.action, "contextual fast path");
            return Ok(fast);
        }

        match self
            .slow
            .classify_contextual(text, history_summary, active_summary, pending_tag)
            .await
        {
            Ok(slow) => Ok(slow),
            Err(e) => {
                warn!(error = %e, "slow contextual classifier failed, using keyword result");
                Ok(fast)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
