//! What a turn returns to the host.

use std::collections::HashMap;

use parley_intent::UserIntent;
use parley_store::Choice;
use serde::Serialize;

use crate::enricher::EnrichmentResult;

/// Action tag reported when a follow-up could not be applied, e.g. no
/// active entity to change.
pub const ERROR_ACTION: &str = "error";

/// The outcome of one [`crate::Dispatcher::process`] call.
///
/// `message` is `None` when the kernel leaves composition to the host's
/// renderer, which then works from `intent`, `entities` and `enrichment`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub message: Option<String>,
    pub intent: UserIntent,
    pub confidence: f64,
    /// `true` when the contextual resolver answered and no classifier or
    /// enricher ran.
    pub already_handled: bool,
    /// Rows of choices to render as buttons.
    pub suggested_choices: Option<Vec<Vec<Choice>>>,
    pub contextual_action: Option<String>,
    pub entities: HashMap<String, String>,
    pub enrichment: Option<EnrichmentResult>,
    pub processing_time_ms: u64,
    pub agents_used: Vec<String>,
}

impl Response {
    pub fn new(intent: UserIntent, confidence: f64) -> Self {
        Self {
            message: None,
            intent,
            confidence,
            already_handled: false,
            suggested_choices: None,
            contextual_action: None,
            entities: HashMap::new(),
            enrichment: None,
            processing_time_ms: 0,
            agents_used: Vec::new(),
        }
    }

    /// A reply produced by the contextual resolver.
    pub fn contextual(
        intent: UserIntent,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: Some(message.into()),
            already_handled: true,
            contextual_action: Some(action.into()),
            ..Self::new(intent, 1.0)
        }
    }

    /// A resolver reply for a follow-up that needed an entity and had none.
    pub fn missing_entity(message: impl Into<String>) -> Self {
        Self::contextual(UserIntent::Unknown, ERROR_ACTION, message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_choices(mut self, rows: Vec<Vec<Choice>>) -> Self {
        self.suggested_choices = Some(rows);
        self
    }

    /// Text recorded in history for this reply: the message, or a
    /// `[intent]` placeholder when the host composes it.
    pub fn history_text(&self, max_chars: usize) -> String {
        match &self.message {
            Some(message) => parley_store::truncate_chars(message, max_chars).to_string(),
            None => format!("[{}]", self.intent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contextual_reply_is_handled() {
        let r = Response::contextual(UserIntent::TaskUpdate, "reschedule", "listo");
        assert!(r.already_handled);
        assert_eq!(r.contextual_action.as_deref(), Some("reschedule"));
        assert_eq!(r.message.as_deref(), Some("listo"));
    }

    #[test]
    fn history_text_truncates_or_uses_placeholder() {
        let long = Response::new(UserIntent::Help, 0.9).with_message("á".repeat(300));
        assert_eq!(long.history_text(200).chars().count(), 200);

        let silent = Response::new(UserIntent::ExpenseAnalyze, 0.8);
        assert_eq!(silent.history_text(200), "[expense_analyze]");
    }

    #[test]
    fn serializes_intent_as_tag() {
        let json = serde_json::to_value(Response::new(UserIntent::PlanToday, 0.8)).unwrap();
        assert_eq!(json["intent"], "plan_today");
        assert_eq!(json["message"], serde_json::Value::Null);
    }
}
