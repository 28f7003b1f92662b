//! Task enrichment: urgency, priority, work context, complexity, subtasks,
//! dates and reminders, all from keyword heuristics.

use async_trait::async_trait;
use chrono::{Datelike, Days, Local, NaiveDate, Weekday};
use parley_intent::UserIntent;

use crate::enricher::{
    Complexity, Enricher, EnrichmentRequest, EnrichmentResult, ReminderSuggestion, SuggestedDates,
};
use crate::error::Result;
use crate::vocabulary::tokenize;

const URGENCY_WORDS: &[(&str, u32)] = &[
    ("urgente", 3),
    ("asap", 3),
    ("deadline", 3),
    ("crítico", 3),
    ("critico", 3),
    ("ya", 2),
    ("ahora", 2),
    ("hoy", 2),
    ("entrega", 2),
    ("cliente", 2),
    ("importante", 2),
    ("bloqueado", 2),
    ("mañana", 1),
    ("pronto", 1),
];

const MAX_URGENCY: u32 = 10;

const WORK_CONTEXTS: &[(&str, &[&str])] = &[
    ("trabajo", &["trabajo", "oficina", "jefe", "reunión", "reunion", "equipo"]),
    ("freelance", &["freelance", "cliente", "workana", "upwork", "factura"]),
    ("estudio", &["estudiar", "aprender", "curso", "tutorial", "examen"]),
    ("personal", &["personal", "casa", "familia", "propio"]),
];

const HEAVY_WORDS: &[&str] = &[
    "migrar",
    "implementar",
    "desarrollar",
    "diseñar",
    "integrar",
    "refactorizar",
    "automatizar",
    "construir",
    "sistema",
    "plataforma",
];

const RESEARCH_WORDS: &[&str] = &["investigar", "aprender", "evaluar", "analizar", "comparar"];

const BLOCKER_HINTS: &[(&str, &str)] = &[
    ("cliente", "Esperando respuesta del cliente"),
    ("aprobación", "Falta aprobación"),
    ("aprobacion", "Falta aprobación"),
    ("acceso", "Accesos o credenciales pendientes"),
    ("credenciales", "Accesos o credenciales pendientes"),
    ("proveedor", "Dependencia de un proveedor"),
];

/// Heuristic enricher for task intents.
#[derive(Debug, Default)]
pub struct TaskEnricher;

impl TaskEnricher {
    pub const NAME: &'static str = "TaskEnricher";

    const INTENTS: &'static [UserIntent] = &[
        UserIntent::TaskCreate,
        UserIntent::TaskUpdate,
        UserIntent::TaskStatusChange,
    ];

    pub fn new() -> Self {
        Self
    }

    fn analyze(&self, request: &EnrichmentRequest, today: NaiveDate) -> EnrichmentResult {
        let title = request.entity("task").unwrap_or(request.text.as_str());
        let tokens = tokenize(&request.text);
        let lowered = request.text.to_lowercase();

        let mut result = EnrichmentResult::named(Self::NAME);

        let complexity = complexity_for(title);
        result.estimated_minutes = Some(complexity.estimated_minutes);
        result.energy_required = Some(complexity.energy_required.clone());
        if complexity.should_divide {
            result.subtasks = subtasks_for(title);
        }
        result.blockers = blockers_for(&lowered);

        let urgency = urgency_score(&tokens);
        let priority = request
            .entity("priority")
            .map(str::to_string)
            .unwrap_or_else(|| priority_for(urgency).to_string());
        result.suggested_priority = Some(priority.clone());
        result.suggested_context = Some(context_for(&tokens).to_string());

        let dates = suggest_dates(urgency, &complexity.level, today);
        if let Some(due) = dates.due_date {
            result.reminders = reminders_for(title, &priority, due);
        }
        if dates.do_date.is_some() || dates.due_date.is_some() {
            result.suggested_dates = Some(dates);
        }

        result.complexity = Some(complexity);
        result.agents_used = vec!["complexity".into(), "urgency".into()];
        result
    }
}

#[async_trait]
impl Enricher for TaskEnricher {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn intents(&self) -> &[UserIntent] {
        Self::INTENTS
    }

    async fn enrich(&self, request: &EnrichmentRequest) -> Result<EnrichmentResult> {
        Ok(self.analyze(request, Local::now().date_naive()))
    }
}

// ---------------------------------------------------------------------------
// Heuristics
// ---------------------------------------------------------------------------

pub(super) fn urgency_score(tokens: &[String]) -> u32 {
    let score: u32 = URGENCY_WORDS
        .iter()
        .filter(|(word, _)| tokens.iter().any(|t| t == word))
        .map(|(_, points)| points)
        .sum();
    score.min(MAX_URGENCY)
}

fn priority_for(urgency: u32) -> &'static str {
    match urgency {
        7.. => "urgent",
        4..=6 => "high",
        _ => "normal",
    }
}

fn context_for(tokens: &[String]) -> &'static str {
    WORK_CONTEXTS
        .iter()
        .find(|(_, words)| words.iter().any(|w| tokens.iter().any(|t| t == w)))
        .map_or("personal", |(context, _)| *context)
}

pub(super) fn complexity_for(title: &str) -> Complexity {
    let tokens = tokenize(title);
    let heavy = tokens.iter().any(|t| HEAVY_WORDS.contains(&t.as_str()));
    let research = tokens.iter().any(|t| RESEARCH_WORDS.contains(&t.as_str()));

    let (level, minutes, energy) = if heavy && tokens.len() > 8 {
        ("epic", 480, "high")
    } else if heavy {
        ("heavy", 180, "high")
    } else if research || tokens.len() > 6 {
        ("standard", 60, "medium")
    } else {
        ("quick", 15, "low")
    };

    Complexity {
        level: level.to_string(),
        estimated_minutes: minutes,
        energy_required: energy.to_string(),
        should_divide: matches!(level, "heavy" | "epic"),
        requires_research: research,
    }
}

fn subtasks_for(title: &str) -> Vec<String> {
    vec![
        format!("Definir alcance: {title}"),
        "Preparar entorno y recursos".to_string(),
        "Ejecutar la parte principal".to_string(),
        "Revisar y probar".to_string(),
        "Cerrar y comunicar resultado".to_string(),
    ]
}

fn blockers_for(lowered: &str) -> Vec<String> {
    let mut blockers: Vec<String> = Vec::new();
    for (hint, blocker) in BLOCKER_HINTS {
        if lowered.contains(hint) && !blockers.iter().any(|b| b == blocker) {
            blockers.push((*blocker).to_string());
        }
    }
    blockers
}

/// Start and due dates from urgency and size, counted from the next
/// working day.
fn suggest_dates(urgency: u32, level: &str, today: NaiveDate) -> SuggestedDates {
    let skip = match today.weekday() {
        Weekday::Sat => 2,
        Weekday::Sun => 1,
        _ => 0,
    };
    let start = today.checked_add_days(Days::new(skip)).unwrap_or(today);
    let offset = |days: u64| start.checked_add_days(Days::new(days));

    let (do_in, due_in) = if urgency >= 7 {
        (0, 1)
    } else if urgency >= 4 {
        (1, 3)
    } else if matches!(level, "heavy" | "epic") {
        (2, 7)
    } else {
        return SuggestedDates::default();
    };

    SuggestedDates {
        do_date: offset(do_in),
        due_date: offset(due_in),
    }
}

fn reminders_for(title: &str, priority: &str, due: NaiveDate) -> Vec<ReminderSuggestion> {
    let mut reminders = Vec::new();
    if let Some(eve) = due.checked_sub_days(Days::new(1)) {
        reminders.push(ReminderSuggestion {
            at: format!("{} 09:00", eve.format("%Y-%m-%d")),
            message: format!("Mañana vence: {title}"),
        });
    }
    if matches!(priority, "urgent" | "high") {
        reminders.push(ReminderSuggestion {
            at: format!("{} 07:00", due.format("%Y-%m-%d")),
            message: format!("HOY vence: {title}"),
        });
    }
    reminders
}
