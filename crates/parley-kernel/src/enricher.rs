//! The enricher seam.
//!
//! An enricher takes a classified message and attaches domain analysis to
//! it: complexity and subtasks for a task, a purchase analysis for an
//! expense, starter tasks for a project. Enrichers are black boxes to the
//! kernel and are reached only through [`crate::EnricherRegistry`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use parley_intent::UserIntent;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Everything an enricher gets to look at.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentRequest {
    pub user_id: String,
    pub intent: UserIntent,
    pub confidence: f64,
    /// The raw user message.
    pub text: String,
    /// Entities extracted by the classifier.
    pub entities: HashMap<String, String>,
    /// [`parley_store::ConversationContext::context_summary`] at dispatch
    /// time.
    pub context_summary: String,
}

impl EnrichmentRequest {
    pub fn new(user_id: impl Into<String>, intent: UserIntent, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            intent,
            confidence: 1.0,
            text: text.into(),
            entities: HashMap::new(),
            context_summary: String::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_entities(mut self, entities: HashMap<String, String>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_context_summary(mut self, summary: impl Into<String>) -> Self {
        self.context_summary = summary.into();
        self
    }

    /// The named entity, or `None` when absent or blank.
    pub fn entity(&self, key: &str) -> Option<&str> {
        self.entities
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Complexity analysis of a unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complexity {
    /// `quick`, `standard`, `heavy` or `epic`.
    pub level: String,
    pub estimated_minutes: u32,
    /// `low`, `medium` or `high`.
    pub energy_required: String,
    pub should_divide: bool,
    pub requires_research: bool,
}

/// Suggested start ("do") and due dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SuggestedDates {
    pub do_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

/// A reminder an enricher proposes; the host decides whether to schedule it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSuggestion {
    /// Local wall-clock time, `YYYY-MM-DD HH:MM`.
    pub at: String,
    pub message: String,
}

/// Domain analysis attached to a classified message.
///
/// Every field is optional; an enricher fills only what its domain knows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub complexity: Option<Complexity>,
    pub estimated_minutes: Option<u32>,
    pub energy_required: Option<String>,

    pub suggested_priority: Option<String>,
    pub suggested_context: Option<String>,
    pub suggested_dates: Option<SuggestedDates>,

    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub reminders: Vec<ReminderSuggestion>,

    pub financial_analysis: Option<Value>,
    pub workout_data: Option<Value>,
    pub nutrition_data: Option<Value>,

    pub project_match: Option<Value>,
    #[serde(default)]
    pub project_suggestions: Vec<String>,

    pub planning_data: Option<Value>,
    #[serde(default)]
    pub schedule_suggestions: Vec<Value>,

    #[serde(default)]
    pub enricher_name: String,
    #[serde(default)]
    pub agents_used: Vec<String>,
}

impl EnrichmentResult {
    pub fn named(enricher_name: impl Into<String>) -> Self {
        Self {
            enricher_name: enricher_name.into(),
            ..Self::default()
        }
    }

    /// Flatten into an entity map, emitting only populated keys.
    ///
    /// Keys are `_`-prefixed so they never collide with classifier
    /// entities. `priority` is the exception and replaces the classifier's.
    pub fn to_entities_map(&self) -> Map<String, Value> {
        let mut out = Map::new();

        if let Some(complexity) = &self.complexity {
            out.insert("_complexity".into(), json!(complexity));
        }
        if !self.subtasks.is_empty() {
            out.insert("_subtasks".into(), json!(self.subtasks));
        }
        if !self.blockers.is_empty() {
            out.insert("_blockers".into(), json!(self.blockers));
        }
        if let Some(priority) = self.suggested_priority.as_deref().filter(|p| !p.is_empty()) {
            out.insert("priority".into(), json!(priority));
        }
        if let Some(context) = self.suggested_context.as_deref().filter(|c| !c.is_empty()) {
            out.insert("_context".into(), json!(context));
        }
        if let Some(dates) = &self.suggested_dates {
            out.insert("_dates".into(), json!(dates));
        }
        if !self.reminders.is_empty() {
            out.insert("_reminders".into(), json!(self.reminders));
        }

        let opaque = [
            ("_financial", &self.financial_analysis),
            ("_workout", &self.workout_data),
            ("_nutrition", &self.nutrition_data),
            ("_project", &self.project_match),
            ("_planning", &self.planning_data),
        ];
        for (key, value) in opaque {
            if let Some(v) = value.as_ref().filter(|v| !v.is_null()) {
                out.insert(key.into(), v.clone());
            }
        }

        if !self.project_suggestions.is_empty() {
            out.insert("_project_suggestions".into(), json!(self.project_suggestions));
        }
        if !self.schedule_suggestions.is_empty() {
            out.insert("_schedule".into(), json!(self.schedule_suggestions));
        }

        out
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A domain enrichment procedure.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Stable name used in logs and stats.
    fn name(&self) -> &str;

    /// The intents this enricher claims.
    fn intents(&self) -> &[UserIntent];

    /// Requests classified below this confidence are not enriched.
    fn min_confidence(&self) -> f64 {
        0.0
    }

    async fn enrich(&self, request: &EnrichmentRequest) -> Result<EnrichmentResult>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_has_no_entities() {
        assert!(EnrichmentResult::default().to_entities_map().is_empty());
    }

    #[test]
    fn entities_map_prefixes_keys_except_priority() {
        let result = EnrichmentResult {
            subtasks: vec!["a".into(), "b".into()],
            blockers: vec!["x".into()],
            suggested_priority: Some("high".into()),
            suggested_context: Some("trabajo".into()),
            financial_analysis: Some(json!({"amount": "3000"})),
            ..EnrichmentResult::named("test")
        };

        let map = result.to_entities_map();
        assert_eq!(map["_subtasks"], json!(["a", "b"]));
        assert_eq!(map["_blockers"], json!(["x"]));
        assert_eq!(map["priority"], json!("high"));
        assert_eq!(map["_context"], json!("trabajo"));
        assert_eq!(map["_financial"]["amount"], json!("3000"));
        assert!(!map.contains_key("_workout"));
        assert!(!map.contains_key("enricher_name"));
    }

    #[test]
    fn blank_priority_is_not_emitted() {
        let result = EnrichmentResult {
            suggested_priority: Some(String::new()),
            ..EnrichmentResult::default()
        };
        assert!(!result.to_entities_map().contains_key("priority"));
    }

    #[test]
    fn request_entity_ignores_blank_values() {
        let mut entities = HashMap::new();
        entities.insert("task".to_string(), "  ".to_string());
        entities.insert("amount".to_string(), "3000".to_string());
        let req = EnrichmentRequest::new("u", UserIntent::TaskCreate, "x").with_entities(entities);

        assert_eq!(req.entity("task"), None);
        assert_eq!(req.entity("amount"), Some("3000"));
        assert_eq!(req.entity("missing"), None);
    }
}
