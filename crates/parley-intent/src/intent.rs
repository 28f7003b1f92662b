//! Intent vocabulary and classifier outputs.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// UserIntent
// ---------------------------------------------------------------------------

/// Everything a user message can be classified as.
///
/// Parsing never fails: unrecognised tags become [`UserIntent::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserIntent {
    // Tasks
    TaskCreate,
    TaskUpdate,
    TaskDelete,
    TaskQuery,
    TaskStatusChange,

    // Capture
    Idea,
    Note,

    // Reminders
    ReminderCreate,
    ReminderQuery,

    // Planning
    PlanToday,
    PlanTomorrow,
    PlanWeek,
    Prioritize,
    Reschedule,
    WorkloadCheck,

    // Finance
    ExpenseLog,
    ExpenseAnalyze,
    DebtQuery,

    // Fitness
    GymLog,
    GymQuery,
    NutritionLog,
    NutritionQuery,

    // Projects and study
    ProjectCreate,
    ProjectUpdate,
    ProjectDelete,
    ProjectQuery,
    StudySession,

    // General
    Greeting,
    Help,
    Status,
    #[serde(other)]
    Unknown,
}

impl UserIntent {
    /// Every variant, in declaration order.
    pub const ALL: [UserIntent; 31] = [
        Self::TaskCreate,
        Self::TaskUpdate,
        Self::TaskDelete,
        Self::TaskQuery,
        Self::TaskStatusChange,
        Self::Idea,
        Self::Note,
        Self::ReminderCreate,
        Self::ReminderQuery,
        Self::PlanToday,
        Self::PlanTomorrow,
        Self::PlanWeek,
        Self::Prioritize,
        Self::Reschedule,
        Self::WorkloadCheck,
        Self::ExpenseLog,
        Self::ExpenseAnalyze,
        Self::DebtQuery,
        Self::GymLog,
        Self::GymQuery,
        Self::NutritionLog,
        Self::NutritionQuery,
        Self::ProjectCreate,
        Self::ProjectUpdate,
        Self::ProjectDelete,
        Self::ProjectQuery,
        Self::StudySession,
        Self::Greeting,
        Self::Help,
        Self::Status,
        Self::Unknown,
    ];

    /// The snake_case wire tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreate => "task_create",
            Self::TaskUpdate => "task_update",
            Self::TaskDelete => "task_delete",
            Self::TaskQuery => "task_query",
            Self::TaskStatusChange => "task_status_change",
            Self::Idea => "idea",
            Self::Note => "note",
            Self::ReminderCreate => "reminder_create",
            Self::ReminderQuery => "reminder_query",
            Self::PlanToday => "plan_today",
            Self::PlanTomorrow => "plan_tomorrow",
            Self::PlanWeek => "plan_week",
            Self::Prioritize => "prioritize",
            Self::Reschedule => "reschedule",
            Self::WorkloadCheck => "workload_check",
            Self::ExpenseLog => "expense_log",
            Self::ExpenseAnalyze => "expense_analyze",
            Self::DebtQuery => "debt_query",
            Self::GymLog => "gym_log",
            Self::GymQuery => "gym_query",
            Self::NutritionLog => "nutrition_log",
            Self::NutritionQuery => "nutrition_query",
            Self::ProjectCreate => "project_create",
            Self::ProjectUpdate => "project_update",
            Self::ProjectDelete => "project_delete",
            Self::ProjectQuery => "project_query",
            Self::StudySession => "study_session",
            Self::Greeting => "greeting",
            Self::Help => "help",
            Self::Status => "status",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for UserIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserIntent {
    type Err = Infallible;

    /// Accepts the canonical tag, the space-separated form, and the Spanish
    /// aliases models tend to answer with.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(' ', "_");

        if let Some(intent) = Self::ALL.iter().find(|i| i.as_str() == normalized) {
            return Ok(*intent);
        }

        let intent = match normalized.as_str() {
            "create_task" | "nueva_tarea" => Self::TaskCreate,
            "nota" => Self::Note,
            "create_reminder" | "recordatorio" => Self::ReminderCreate,
            "compra" => Self::ExpenseAnalyze,
            "create_project" | "nuevo_proyecto" => Self::ProjectCreate,
            "planificar_manana" => Self::PlanTomorrow,
            "planificar_semana" => Self::PlanWeek,
            "priorizar" => Self::Prioritize,
            "reprogramar" => Self::Reschedule,
            "carga_trabajo" => Self::WorkloadCheck,
            "saludo" => Self::Greeting,
            "ayuda" => Self::Help,
            "estado" => Self::Status,
            _ => Self::Unknown,
        };
        Ok(intent)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Output of an [`crate::IntentClassifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: UserIntent,
    /// In `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub entities: HashMap<String, String>,
}

impl Classification {
    /// Build a classification, clamping `confidence` into `[0, 1]`.
    pub fn new(intent: UserIntent, confidence: f64, entities: HashMap<String, String>) -> Self {
        Self {
            intent,
            confidence: clamp_confidence(confidence),
            entities,
        }
    }

    /// What a failed or timed-out classification degrades to.
    pub fn unknown() -> Self {
        Self {
            intent: UserIntent::Unknown,
            confidence: 0.0,
            entities: HashMap::new(),
        }
    }
}

/// Clamp into `[0, 1]`, mapping NaN to 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Contextual decisions
// ---------------------------------------------------------------------------

/// What a follow-up message wants to do with the active entity or pending
/// action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextualAction {
    ModifySubtasks,
    Confirm,
    Reject,
    AddBlocker,
    RemoveBlocker,
    ChangePriority,
    Reschedule,
    RequestExtension,
    EditEntity,
    DeleteEntity,
    #[default]
    #[serde(other)]
    None,
}

impl ContextualAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ModifySubtasks => "modify_subtasks",
            Self::Confirm => "confirm",
            Self::Reject => "reject",
            Self::AddBlocker => "add_blocker",
            Self::RemoveBlocker => "remove_blocker",
            Self::ChangePriority => "change_priority",
            Self::Reschedule => "reschedule",
            Self::RequestExtension => "request_extension",
            Self::EditEntity => "edit_entity",
            Self::DeleteEntity => "delete_entity",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ContextualAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextualAction {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s.trim().to_lowercase().replace(' ', "_").as_str() {
            "modify_subtasks" => Self::ModifySubtasks,
            "confirm" => Self::Confirm,
            "reject" => Self::Reject,
            "add_blocker" => Self::AddBlocker,
            "remove_blocker" => Self::RemoveBlocker,
            "change_priority" => Self::ChangePriority,
            "reschedule" => Self::Reschedule,
            "request_extension" => Self::RequestExtension,
            "edit_entity" => Self::EditEntity,
            "delete_entity" => Self::DeleteEntity,
            _ => Self::None,
        };
        Ok(action)
    }
}

/// Output of a [`crate::ContextualClassifier`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextualDecision {
    pub is_contextual: bool,
    pub action: ContextualAction,
    /// Free-text item references, e.g. `"la 3"` or `"las primeras 2"`.
    #[serde(default)]
    pub referenced_items: String,
    /// Free-text modification details, e.g. new subtasks to add.
    #[serde(default)]
    pub details: String,
}

impl ContextualDecision {
    /// A decision saying the message is not about the current context.
    pub fn not_contextual() -> Self {
        Self::default()
    }

    pub fn action(action: ContextualAction) -> Self {
        Self {
            is_contextual: action != ContextualAction::None,
            action,
            ..Self::default()
        }
    }

    pub fn with_references(mut self, referenced_items: impl Into<String>) -> Self {
        self.referenced_items = referenced_items.into();
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
