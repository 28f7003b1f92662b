//! Planning enrichment: day and week plans, task prioritization,
//! rescheduling and study sessions.
//!
//! There is no task source behind the planner, so day plans are time blocks
//! shaped by the user's stated energy, and prioritization ranks only the
//! tasks named in the message.

use std::cmp::Reverse;

use async_trait::async_trait;
use chrono::{Datelike, Days, Local, NaiveDate, Weekday};
use parley_intent::UserIntent;
use serde_json::{Value, json};

use super::task::{complexity_for, urgency_score};
use crate::enricher::{Enricher, EnrichmentRequest, EnrichmentResult};
use crate::error::Result;
use crate::vocabulary::{ListEdits, date_from_text, tokenize};

const DAY_NAMES: [&str; 7] = [
    "lunes",
    "martes",
    "miércoles",
    "jueves",
    "viernes",
    "sábado",
    "domingo",
];

const LOW_ENERGY_WORDS: &[&str] = &["cansado", "cansada", "agotado", "agotada", "desvelado", "desvelada"];
const HIGH_ENERGY_WORDS: &[&str] = &["motivado", "motivada", "energía", "energia", "activo", "activa"];

/// `(time, focus, minutes)` per energy level.
type Block = (&'static str, &'static str, u32);

const HIGH_ENERGY_BLOCKS: &[Block] = &[
    ("09:00-11:00", "Trabajo profundo: la tarea más difícil", 120),
    ("11:00-13:00", "Tareas de seguimiento", 120),
    ("15:00-17:00", "Trabajo profundo: segunda tarea", 120),
    ("17:00-17:30", "Revisión y cierre del día", 30),
];
const NORMAL_ENERGY_BLOCKS: &[Block] = &[
    ("09:00-11:00", "Tarea principal", 120),
    ("11:00-12:00", "Correos y pendientes cortos", 60),
    ("15:00-17:00", "Tareas de seguimiento", 120),
    ("17:00-17:30", "Planear el día siguiente", 30),
];
const LOW_ENERGY_BLOCKS: &[Block] = &[
    ("10:00-11:00", "Tareas rápidas para arrancar", 60),
    ("11:00-12:00", "Tarea principal en bloque corto", 60),
    ("16:00-17:00", "Pendientes administrativos", 60),
];

/// Days ahead considered by the week plan.
const WEEK_HORIZON_DAYS: u64 = 7;

/// Heuristic enricher for planning intents.
pub struct PlanningEnricher {
    edits: ListEdits,
}

impl PlanningEnricher {
    pub const NAME: &'static str = "PlanningEnricher";

    const INTENTS: &'static [UserIntent] = &[
        UserIntent::PlanToday,
        UserIntent::PlanTomorrow,
        UserIntent::PlanWeek,
        UserIntent::Prioritize,
        UserIntent::Reschedule,
        UserIntent::WorkloadCheck,
        UserIntent::StudySession,
    ];

    pub fn new() -> Result<Self> {
        Ok(Self {
            edits: ListEdits::new()?,
        })
    }

    fn analyze(&self, request: &EnrichmentRequest, today: NaiveDate) -> EnrichmentResult {
        let mut result = EnrichmentResult::named(Self::NAME);

        match request.intent {
            UserIntent::PlanToday => plan_day(request, today, "today_plan", &mut result),
            UserIntent::PlanTomorrow => {
                let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
                plan_day(request, tomorrow, "tomorrow_plan", &mut result);
            }
            UserIntent::PlanWeek => {
                result.schedule_suggestions = working_days(today);
                result.planning_data = Some(json!({
                    "type": "week_plan",
                    "week_start": today.format("%Y-%m-%d").to_string(),
                    "working_days": result.schedule_suggestions.len(),
                }));
            }
            UserIntent::Prioritize => {
                let tasks = self.named_tasks(request);
                if tasks.is_empty() {
                    result.planning_data = Some(json!({
                        "type": "prioritization",
                        "needs_input": true,
                        "message": "Necesito saber qué tareas quieres priorizar",
                    }));
                } else {
                    result.planning_data = Some(prioritize(&tasks));
                    result.agents_used.push("prioritizer".into());
                }
            }
            UserIntent::Reschedule => {
                let new_date = request
                    .entity("date")
                    .map(str::to_string)
                    .or_else(|| {
                        date_from_text(&request.text, today)
                            .map(|d| d.format("%Y-%m-%d").to_string())
                    });
                result.planning_data = Some(json!({
                    "type": "reschedule",
                    "task": request.entity("task").unwrap_or_default(),
                    "new_date": new_date,
                }));
            }
            UserIntent::WorkloadCheck => {
                result.planning_data = Some(json!({
                    "type": "workload_check",
                    "context": request.context_summary,
                }));
            }
            UserIntent::StudySession => {
                result.planning_data = Some(json!({
                    "type": "study_session",
                    "needs_setup": true,
                    "message": "No hay proyectos de estudio configurados",
                }));
            }
            _ => {}
        }

        result
    }

    /// Tasks listed in the `tasks` entity, or after a colon in the text
    /// ("prioriza: a, b y c").
    fn named_tasks(&self, request: &EnrichmentRequest) -> Vec<String> {
        let listed = request
            .entity("tasks")
            .or_else(|| request.text.split_once(':').map(|(_, rest)| rest));
        listed.map_or_else(Vec::new, |list| self.edits.extract_new_items(list))
    }
}

#[async_trait]
impl Enricher for PlanningEnricher {
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

fn day_name(date: NaiveDate) -> &'static str {
    DAY_NAMES[date.weekday().num_days_from_monday() as usize]
}

fn energy_level(request: &EnrichmentRequest) -> String {
    if let Some(energy) = request.entity("energy") {
        return energy.to_lowercase();
    }
    let tokens = tokenize(&request.text);
    let has = |words: &[&str]| tokens.iter().any(|t| words.contains(&t.as_str()));
    let level = if has(LOW_ENERGY_WORDS) {
        "low"
    } else if has(HIGH_ENERGY_WORDS) {
        "high"
    } else {
        "normal"
    };
    level.to_string()
}

fn plan_day(
    request: &EnrichmentRequest,
    date: NaiveDate,
    kind: &str,
    result: &mut EnrichmentResult,
) {
    let energy = energy_level(request);
    let blocks = match energy.as_str() {
        "low" | "baja" => LOW_ENERGY_BLOCKS,
        "high" | "alta" => HIGH_ENERGY_BLOCKS,
        _ => NORMAL_ENERGY_BLOCKS,
    };

    result.schedule_suggestions = blocks
        .iter()
        .map(|(time, focus, minutes)| json!({ "time": time, "focus": focus, "minutes": minutes }))
        .collect();

    let mut warnings = Vec::new();
    if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        warnings.push("Es fin de semana: considera un plan ligero");
    }
    if blocks == LOW_ENERGY_BLOCKS {
        warnings.push("Energía baja: deja lo difícil para otro día si puedes");
    }

    result.planning_data = Some(json!({
        "type": kind,
        "date": date.format("%Y-%m-%d").to_string(),
        "day_of_week": day_name(date),
        "energy": energy,
        "focus_minutes": blocks.iter().map(|(_, _, m)| m).sum::<u32>(),
        "warnings": warnings,
    }));
    result.agents_used.push("planner".into());
}

/// Weekdays in the coming week, starting tomorrow.
fn working_days(today: NaiveDate) -> Vec<Value> {
    (1..=WEEK_HORIZON_DAYS)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
        .map(|day| {
            json!({
                "date": day.format("%Y-%m-%d").to_string(),
                "day": day_name(day),
                "status": "disponible",
            })
        })
        .collect()
}

/// Most urgent first; ties go to the quicker task.
fn prioritize(tasks: &[String]) -> Value {
    let mut scored: Vec<(&String, u32, u32, bool)> = tasks
        .iter()
        .map(|task| {
            let complexity = complexity_for(task);
            (
                task,
                urgency_score(&tokenize(task)),
                complexity.estimated_minutes,
                complexity.level == "quick",
            )
        })
        .collect();
    scored.sort_by_key(|(_, urgency, minutes, _)| (Reverse(*urgency), *minutes));

    let ranked: Vec<&String> = scored.iter().map(|(task, ..)| *task).collect();
    let quick_wins: Vec<&String> = scored
        .iter()
        .filter(|(.., quick)| *quick)
        .map(|(task, ..)| *task)
        .collect();

    json!({
        "type": "prioritization",
        "ranked_tasks": ranked,
        "rationale": "Primero lo urgente; a igual urgencia, lo más rápido.",
        "quick_wins": quick_wins,
    })
}
