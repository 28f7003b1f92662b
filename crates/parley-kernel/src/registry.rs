//! Enricher registry.
//!
//! Maps each [`UserIntent`] to the enricher that claims it. Registration
//! happens once at startup (`&mut self`); afterwards the registry is shared
//! read-only behind an `Arc` and [`EnricherRegistry::dispatch`] is called
//! concurrently.
//!
//! Dispatch never fails: a missing enricher, a low-confidence request, an
//! enricher error, a panic and a timeout all come back as `None`.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parley_intent::UserIntent;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::enricher::{Enricher, EnrichmentRequest, EnrichmentResult};

/// Snapshot of what is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_enrichers: usize,
    pub total_intents: usize,
    /// Enricher names in registration order.
    pub enrichers: Vec<String>,
}

/// Intent → enricher routing table.
#[derive(Default)]
pub struct EnricherRegistry {
    by_intent: HashMap<UserIntent, Arc<dyn Enricher>>,
    registered: Vec<Arc<dyn Enricher>>,
    timeout: Option<Duration>,
}

impl EnricherRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every enrichment call by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Claim every intent `enricher` declares.
    ///
    /// An intent that is already claimed is reassigned to `enricher` (last
    /// registration wins) and the override is logged.
    pub fn register(&mut self, enricher: Arc<dyn Enricher>) {
        for intent in enricher.intents() {
            if let Some(previous) = self.by_intent.insert(*intent, Arc::clone(&enricher)) {
                warn!(
                    intent = %intent,
                    previous = previous.name(),
                    replacement = enricher.name(),
                    "intent already claimed, overriding enricher"
                );
            }
        }

        info!(
            enricher = enricher.name(),
            intents = enricher.intents().len(),
            "enricher registered"
        );
        self.registered.push(enricher);
    }

    pub fn get(&self, intent: UserIntent) -> Option<Arc<dyn Enricher>> {
        self.by_intent.get(&intent).cloned()
    }

    /// Run the enricher for `request.intent`, if any.
    pub async fn dispatch(&self, request: &EnrichmentRequest) -> Option<EnrichmentResult> {
        let enricher = self.get(request.intent)?;
        let name = enricher.name().to_string();

        if request.confidence < enricher.min_confidence() {
            debug!(
                enricher = %name,
                confidence = request.confidence,
                min_confidence = enricher.min_confidence(),
                "confidence below enricher threshold, skipping"
            );
            return None;
        }

        let call = AssertUnwindSafe(enricher.enrich(request)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(enricher = %name, timeout_ms = limit.as_millis() as u64, "enricher timed out");
                    return None;
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(mut result)) => {
                if result.enricher_name.is_empty() {
                    result.enricher_name = name;
                }
                debug!(enricher = %result.enricher_name, "enrichment complete");
                Some(result)
            }
            Ok(Err(e)) => {
                error!(enricher = %name, error = %e, "enricher failed");
                None
            }
            Err(panic) => {
                error!(enricher = %name, panic = %panic_message(panic.as_ref()), "enricher panicked");
                None
            }
        }
    }

    /// Every claimed intent, sorted by tag.
    pub fn list_intents(&self) -> Vec<UserIntent> {
        let mut intents: Vec<_> = self.by_intent.keys().copied().collect();
        intents.sort_by_key(|i| i.as_str());
        intents
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_enrichers: self.registered.len(),
            total_intents: self.by_intent.len(),
            enrichers: self.registered.iter().map(|e| e.name().to_string()).collect(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
