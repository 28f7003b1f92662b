//! Per-user conversation state.
//!
//! A [`ConversationContext`] holds everything the dispatcher needs to make
//! sense of a follow-up message: the bounded message history, the entity
//! currently under discussion, and at most one action awaiting a yes/no or
//! a choice from the user.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of history entries retained per context.
pub const MAX_HISTORY: usize = 20;

/// Minutes of inactivity after which a context is considered expired.
pub const DEFAULT_CONTEXT_TTL_MINUTES: i64 = 30;

/// Minutes a pending action stays answerable.
pub const PENDING_ACTION_TTL_MINUTES: i64 = 5;

/// Version stamped on every persisted context payload.
pub const CONTEXT_SCHEMA_VERSION: u32 = 1;

const SUMMARY_WINDOW: usize = 5;
const SUMMARY_ENTRY_CHARS: usize = 100;

/// The default inactivity TTL as a [`Duration`].
pub fn default_context_ttl() -> Duration {
    Duration::minutes(DEFAULT_CONTEXT_TTL_MINUTES)
}

/// Return at most `max` characters of `text`, respecting UTF-8 boundaries.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Where the conversation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingConfirmation,
    AwaitingSelection,
    AwaitingInput,
    EditingEntity,
    ReviewingSubtasks,
}

/// Author of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Kind of domain object an entity or pending action refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Task,
    Project,
    Reminder,
    Expense,
    Workout,
    Nutrition,
    Debt,
    #[default]
    None,
}

impl EntityType {
    /// Wire tag, e.g. `"task"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Project => "project",
            Self::Reminder => "reminder",
            Self::Expense => "expense",
            Self::Workout => "workout",
            Self::Nutrition => "nutrition",
            Self::Debt => "debt",
            Self::None => "none",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Normal,
    Low,
}

impl Priority {
    /// Wire tag, e.g. `"urgent"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    /// Label shown to the user.
    pub fn label(self) -> &'static str {
        match self {
            Self::Urgent => "Urgente",
            Self::High => "Alta",
            Self::Normal => "Normal",
            Self::Low => "Baja",
        }
    }

    /// Parse a wire tag. Returns `None` for anything unrecognised.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "urgent" => Some(Self::Urgent),
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_tag: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub entities: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Active entity
// ---------------------------------------------------------------------------

/// Typed attributes of the entity under discussion, one variant per
/// [`EntityType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityDetails {
    Task {
        #[serde(default)]
        priority: Option<Priority>,
        #[serde(default)]
        scheduled_for: Option<NaiveDate>,
        #[serde(default)]
        status: Option<String>,
    },
    Project {
        #[serde(default)]
        project_type: Option<String>,
        #[serde(default)]
        priority: Option<Priority>,
        #[serde(default)]
        scheduled_for: Option<NaiveDate>,
    },
    Reminder {
        #[serde(default)]
        remind_at: Option<DateTime<Utc>>,
    },
    Expense {
        #[serde(default)]
        amount: Option<f64>,
        #[serde(default)]
        category: Option<String>,
    },
    Workout {
        #[serde(default)]
        exercise: Option<String>,
    },
    Nutrition {
        #[serde(default)]
        meal: Option<String>,
    },
    Debt {
        #[serde(default)]
        creditor: Option<String>,
        #[serde(default)]
        amount: Option<f64>,
    },
}

impl EntityDetails {
    /// Empty task details.
    pub fn task() -> Self {
        Self::Task {
            priority: None,
            scheduled_for: None,
            status: None,
        }
    }

    /// Project details with an optional type tag.
    pub fn project(project_type: Option<String>) -> Self {
        Self::Project {
            project_type,
            priority: None,
            scheduled_for: None,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Task { .. } => EntityType::Task,
            Self::Project { .. } => EntityType::Project,
            Self::Reminder { .. } => EntityType::Reminder,
            Self::Expense { .. } => EntityType::Expense,
            Self::Workout { .. } => EntityType::Workout,
            Self::Nutrition { .. } => EntityType::Nutrition,
            Self::Debt { .. } => EntityType::Debt,
        }
    }

    pub fn priority(&self) -> Option<Priority> {
        match self {
            Self::Task { priority, .. } | Self::Project { priority, .. } => *priority,
            _ => None,
        }
    }

    /// Set the priority. Returns `false` when the variant has no priority.
    pub fn set_priority(&mut self, value: Priority) -> bool {
        match self {
            Self::Task { priority, .. } | Self::Project { priority, .. } => {
                *priority = Some(value);
                true
            }
            _ => false,
        }
    }

    /// Move the entity to `date`. Returns `false` when the variant carries
    /// no date.
    pub fn set_schedule(&mut self, date: NaiveDate) -> bool {
        match self {
            Self::Task { scheduled_for, .. } | Self::Project { scheduled_for, .. } => {
                *scheduled_for = Some(date);
                true
            }
            Self::Reminder { remind_at } => match date.and_hms_opt(9, 0, 0) {
                Some(at) => {
                    *remind_at = Some(at.and_utc());
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}

/// The domain object that follow-up references ("esa tarea", "la 3")
/// resolve against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveEntity {
    pub details: EntityDetails,
    #[serde(default)]
    pub entity_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub suggested_items: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    /// Opaque enrichment attachment.
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl ActiveEntity {
    pub fn new(details: EntityDetails, name: impl Into<String>) -> Self {
        Self {
            details,
            entity_id: None,
            name: name.into(),
            items: Vec::new(),
            suggested_items: Vec::new(),
            blockers: Vec::new(),
            payload: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn with_suggested_items(mut self, items: Vec<String>) -> Self {
        self.suggested_items = items;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn entity_type(&self) -> EntityType {
        self.details.entity_type()
    }
}

// ---------------------------------------------------------------------------
// Pending action
// ---------------------------------------------------------------------------

/// A button-style option offered to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    pub action: String,
}

impl Choice {
    pub fn new(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: action.into(),
        }
    }
}

/// What a pending action will do once confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingKind {
    /// Commit `items` as the active entity's subtasks.
    CreateSubtasks { items: Vec<String> },
    /// Drop the active entity.
    DeleteEntity,
    /// Anything a domain handler defines on its own.
    Custom {
        action_type: String,
        #[serde(default)]
        data: Value,
    },
}

impl PendingKind {
    /// Stable tag used in summaries and logs.
    pub fn action_type(&self) -> &str {
        match self {
            Self::CreateSubtasks { .. } => "create_subtasks",
            Self::DeleteEntity => "delete_entity",
            Self::Custom { action_type, .. } => action_type,
        }
    }
}

/// Something awaiting a yes/no or a choice, with a deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: Uuid,
    pub kind: PendingKind,
    pub target_entity_type: EntityType,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub options: Vec<Choice>,
    pub expires_at: DateTime<Utc>,
}

impl PendingAction {
    /// Create a pending action that expires [`PENDING_ACTION_TTL_MINUTES`]
    /// from now.
    pub fn new(kind: PendingKind, target_entity_type: EntityType) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            target_entity_type,
            target_id: None,
            options: Vec::new(),
            expires_at: Utc::now() + Duration::minutes(PENDING_ACTION_TTL_MINUTES),
        }
    }

    pub fn with_target_id(mut self, target_id: Option<String>) -> Self {
        self.target_id = target_id;
        self
    }

    pub fn with_options(mut self, options: Vec<Choice>) -> Self {
        self.options = options;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn action_type(&self) -> &str {
        self.kind.action_type()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether this action may be applied to `entity`. Actions without a
    /// target id apply to whatever is active.
    pub fn applies_to(&self, entity: Option<&ActiveEntity>) -> bool {
        match &self.target_id {
            None => true,
            Some(id) => entity.and_then(|e| e.entity_id.as_ref()) == Some(id),
        }
    }
}

// ---------------------------------------------------------------------------
// ConversationContext
// ---------------------------------------------------------------------------

fn current_schema_version() -> u32 {
    CONTEXT_SCHEMA_VERSION
}

/// Complete per-user conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    pub user_id: String,
    #[serde(default)]
    pub state: ConversationState,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub active_entity: Option<ActiveEntity>,
    #[serde(default)]
    pub pending_action: Option<PendingAction>,
    #[serde(default)]
    pub last_intent_tag: Option<String>,
    pub last_activity: DateTime<Utc>,
}

impl ConversationContext {
    /// A fresh, idle context for `user_id`.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            schema_version: CONTEXT_SCHEMA_VERSION,
            user_id: user_id.into(),
            state: ConversationState::Idle,
            history: Vec::new(),
            active_entity: None,
            pending_action: None,
            last_intent_tag: None,
            last_activity: Utc::now(),
        }
    }

    // -- History ----------------------------------------------------------

    /// Append a message, keeping only the most recent [`MAX_HISTORY`].
    pub fn add_message(
        &mut self,
        role: Role,
        text: impl Into<String>,
        intent_tag: Option<String>,
        entities: HashMap<String, String>,
    ) {
        let now = Utc::now();
        if role == Role::User && intent_tag.is_some() {
            self.last_intent_tag.clone_from(&intent_tag);
        }
        self.history.push(HistoryEntry {
            role,
            text: text.into(),
            timestamp: now,
            intent_tag,
            entities,
        });
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.last_activity = now;
    }

    /// The last `limit` history entries, oldest first.
    pub fn recent_history(&self, limit: usize) -> &[HistoryEntry] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }

    /// Compact rendering of the recent history for classifier prompts.
    pub fn history_summary(&self) -> String {
        if self.history.is_empty() {
            return "Sin historial de conversación.".to_string();
        }

        self.recent_history(SUMMARY_WINDOW)
            .iter()
            .map(|entry| {
                let who = match entry.role {
                    Role::User => "Usuario",
                    Role::Assistant => "Asistente",
                };
                let text = truncate_chars(&entry.text, SUMMARY_ENTRY_CHARS);
                if text.len() < entry.text.len() {
                    format!("{who}: {text}...")
                } else {
                    format!("{who}: {text}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// One-line rendering of the entity, pending action and last intent.
    pub fn context_summary(&self) -> String {
        let mut parts = Vec::new();

        if let Some(entity) = &self.active_entity {
            parts.push(format!(
                "Entidad activa: {} - {}",
                entity.entity_type(),
                entity.name
            ));
            if !entity.items.is_empty() {
                parts.push(format!("Subtareas: {}", entity.items.join(", ")));
            }
            if !entity.suggested_items.is_empty() {
                parts.push(format!(
                    "Subtareas sugeridas: {}",
                    entity.suggested_items.join(", ")
                ));
            }
        }

        if let Some(pending) = self.live_pending_action() {
            parts.push(format!("Acción pendiente: {}", pending.action_type()));
        }

        if let Some(tag) = &self.last_intent_tag {
            parts.push(format!("Última intención: {tag}"));
        }

        if parts.is_empty() {
            "Sin contexto activo".to_string()
        } else {
            parts.join(" | ")
        }
    }

    // -- Entity and pending action -----------------------------------------

    /// Make `entity` the subject of follow-ups.
    ///
    /// A pending action bound to the previous entity's id is dropped and
    /// the conversation returns to idle; it is returned for logging.
    pub fn set_active_entity(&mut self, entity: ActiveEntity) -> Option<PendingAction> {
        self.active_entity = Some(entity);
        self.last_activity = Utc::now();

        let stale = self
            .pending_action
            .as_ref()
            .is_some_and(|p| !p.applies_to(self.active_entity.as_ref()));
        if !stale {
            return None;
        }
        self.state = ConversationState::Idle;
        self.pending_action.take()
    }

    /// Drop the active entity and return to idle.
    pub fn clear_active_entity(&mut self) {
        self.active_entity = None;
        self.state = ConversationState::Idle;
    }

    /// Install `action`, replacing any existing one. Returns the replaced
    /// action so callers can log the overwrite.
    pub fn set_pending_action(&mut self, action: PendingAction) -> Option<PendingAction> {
        self.last_activity = Utc::now();
        self.pending_action.replace(action)
    }

    pub fn clear_pending_action(&mut self) -> Option<PendingAction> {
        self.pending_action.take()
    }

    /// The pending action, if any, that has not passed its deadline.
    pub fn live_pending_action(&self) -> Option<&PendingAction> {
        self.pending_action.as_ref().filter(|p| !p.is_expired())
    }

    // -- Expiry -------------------------------------------------------------

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.is_expired_at(Utc::now(), ttl)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_activity > ttl
    }

    /// Clear entity and pending action and return to idle. History and
    /// `last_activity` are kept.
    pub fn reset(&mut self) {
        self.active_entity = None;
        self.pending_action = None;
        self.state = ConversationState::Idle;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
