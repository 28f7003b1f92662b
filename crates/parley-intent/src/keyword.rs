//! Keyword classifier.
//!
//! Resolves messages without a model, using the same two deterministic
//! levels as a phrase router:
//!
//! | Level | Technique | Typical Latency |
//! |-------|-----------|-----------------|
//! | 1 | Phrase match via [`aho_corasick`] on word boundaries | < 0.01 ms |
//! | 2 | Pattern match via compiled [`regex`] with named captures | < 0.1 ms |
//!
//! Rules are evaluated in registration order; the first rule whose phrases
//! or patterns hit wins. Anything unmatched is [`UserIntent::Unknown`] with a
//! low confidence so a [`crate::TieredClassifier`] can hand it to a model.

use std::collections::{BTreeSet, HashMap};

use aho_corasick::AhoCorasick;
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::classifier::{ContextualClassifier, IntentClassifier};
use crate::error::{IntentError, Result};
use crate::intent::{Classification, ContextualAction, ContextualDecision, UserIntent};

/// Confidence reported when no rule matched.
const UNMATCHED_CONFIDENCE: f64 = 0.3;

/// Explicit rules at or above this confidence make a message a fresh
/// request rather than a follow-up.
const EXPLICIT_CONFIDENCE: f64 = 0.8;

// ---------------------------------------------------------------------------
// Rule tables
// ---------------------------------------------------------------------------

struct RuleSpec {
    intent: UserIntent,
    confidence: f64,
    phrases: &'static [&'static str],
    patterns: &'static [&'static str],
}

const fn phrases(
    intent: UserIntent,
    confidence: f64,
    phrases: &'static [&'static str],
) -> RuleSpec {
    RuleSpec {
        intent,
        confidence,
        phrases,
        patterns: &[],
    }
}

static INTENT_RULES: &[RuleSpec] = &[
    phrases(
        UserIntent::Greeting,
        0.9,
        &["hola", "hey", "hi", "buenos días", "buenos dias", "buenas", "qué tal", "que tal"],
    ),
    phrases(UserIntent::Help, 0.9, &["ayuda", "help", "qué puedes hacer", "que puedes hacer"]),
    phrases(UserIntent::Status, 0.85, &["estado del sistema", "status"]),
    RuleSpec {
        intent: UserIntent::ExpenseLog,
        confidence: 0.8,
        phrases: &["gasté", "gaste", "pagué", "compré"],
        patterns: &[],
    },
    RuleSpec {
        intent: UserIntent::ExpenseAnalyze,
        confidence: 0.8,
        phrases: &["quiero comprar", "vale la pena comprar"],
        patterns: &[
            r"\$\s*(?P<amount>\d[\d,]*(?:\.\d{2})?)",
            r"(?P<amount>\d[\d,]*)\s*(?:pesos|mxn)",
        ],
    },
    phrases(UserIntent::DebtQuery, 0.8, &["deuda", "deudas", "cuánto debo", "cuanto debo"]),
    phrases(
        UserIntent::GymQuery,
        0.75,
        &["cuánto levanto", "cuanto levanto", "historial de gym", "mis entrenamientos"],
    ),
    phrases(
        UserIntent::GymLog,
        0.7,
        &["gym", "entreno", "entrené", "entrenamiento", "workout", "ejercicio", "pesas"],
    ),
    phrases(
        UserIntent::NutritionQuery,
        0.75,
        &["qué he comido", "que he comido", "mi alimentación", "mi alimentacion"],
    ),
    phrases(
        UserIntent::NutritionLog,
        0.7,
        &["comí", "desayuné", "almorcé", "cené", "comida", "desayuno", "cena"],
    ),
    phrases(UserIntent::ReminderQuery, 0.8, &["mis recordatorios", "qué recordatorios"]),
    phrases(
        UserIntent::ReminderCreate,
        0.85,
        &["recuérdame", "recuerdame", "ponme un recordatorio", "recordatorio"],
    ),
    phrases(
        UserIntent::PlanTomorrow,
        0.8,
        &["qué hago mañana", "que hago mañana", "planifica mañana", "plan de mañana"],
    ),
    phrases(
        UserIntent::PlanWeek,
        0.8,
        &["mi semana", "esta semana", "planifica la semana"],
    ),
    phrases(
        UserIntent::PlanToday,
        0.8,
        &[
            "planifica mi día",
            "planifica mi dia",
            "qué hago hoy",
            "que hago hoy",
            "organiza mi día",
            "organiza mi dia",
            "ayúdame a planificar",
        ],
    ),
    phrases(
        UserIntent::Prioritize,
        0.8,
        &["qué hago primero", "que hago primero", "priorizar", "prioriza"],
    ),
    phrases(
        UserIntent::WorkloadCheck,
        0.8,
        &["cuánto tengo pendiente", "cuanto tengo pendiente", "sobrecargado", "carga de trabajo"],
    ),
    phrases(UserIntent::ProjectQuery, 0.8, &["mis proyectos"]),
    phrases(
        UserIntent::ProjectCreate,
        0.85,
        &["crear proyecto", "crea proyecto", "nuevo proyecto", "iniciar proyecto", "crea un proyecto"],
    ),
    phrases(
        UserIntent::StudySession,
        0.75,
        &["sesión de estudio", "sesion de estudio", "deep work", "quiero estudiar"],
    ),
    phrases(
        UserIntent::TaskQuery,
        0.8,
        &["mis tareas", "qué tengo pendiente", "que tengo pendiente", "tareas pendientes"],
    ),
    phrases(UserIntent::Idea, 0.8, &["tengo una idea", "idea:"]),
    phrases(UserIntent::Note, 0.8, &["nota:", "anota"]),
    phrases(
        UserIntent::TaskCreate,
        0.85,
        &[
            "crear tarea",
            "crea tarea",
            "crea una tarea",
            "nueva tarea",
            "añade tarea",
            "agrega tarea",
            "añade una tarea",
            "agrega una tarea",
        ],
    ),
    phrases(
        UserIntent::TaskCreate,
        0.6,
        &["tengo que", "debo", "necesito", "hacer", "terminar", "completar", "tarea"],
    ),
];

/// Prefixes stripped from a task-creation message to get the task name.
const TASK_PREFIX: &str = r"(?i)^\s*(?:crear?|nueva|añade|agrega)\s+(?:una\s+)?tarea\s*:?\s*";

/// Prefixes stripped from a reminder message to get the reminder text.
const REMINDER_PREFIX: &str =
    r"(?i)^\s*(?:recuérdame|recuerdame|ponme un recordatorio(?:\s+(?:de|para))?)\s*:?\s*";

const PROJECT_NAME_PATTERNS: &[&str] = &[
    r#"(?i)(?:crear?|nuevo|iniciar)\s+(?:un\s+)?proyecto\s+["']?(?P<name>[^"',-]+)["']?"#,
    r#"(?i)proyecto\s+["']?(?P<name>[^"',-]+)["']?"#,
];

const AMOUNT_PATTERNS: &[&str] = &[
    r"\$\s*(?P<amount>\d[\d,]*(?:\.\d{2})?)",
    r"(?i)(?P<amount>\d[\d,]*)\s*pesos",
    r"(?i)(?P<amount>\d[\d,]*)\s*mxn",
];

const PROJECT_TYPES: &[(&str, &[&str])] = &[
    ("trabajo", &["trabajo", "work", "oficina"]),
    ("freelance", &["freelance", "cliente", "workana"]),
    ("personal", &["personal", "casa", "propio"]),
    ("estudio", &["estudio", "aprender", "curso", "estudiar"]),
    ("side_project", &["side project", "hobby", "experimento"]),
];

/// Priority keywords, most urgent first.
const PRIORITY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "urgent",
        &[
            "urgente",
            "crítico",
            "critico",
            "inmediato",
            "asap",
            "ya mismo",
            "cuanto antes",
            "emergencia",
        ],
    ),
    (
        "high",
        &["importante", "alta prioridad", "prioridad alta", "pronto", "lo antes posible"],
    ),
    (
        "low",
        &[
            "baja prioridad",
            "prioridad baja",
            "cuando pueda",
            "sin prisa",
            "no urgente",
            "algún día",
            "algun dia",
        ],
    ),
];

/// Detect a priority tag (`urgent`, `high`, `low`) from free text.
pub fn extract_priority(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    // "no urgente" must not read as urgent.
    if PRIORITY_KEYWORDS[2].1.iter().any(|kw| lowered.contains(kw)) {
        return Some("low");
    }
    PRIORITY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lowered.contains(kw)))
        .map(|(tag, _)| *tag)
}

// -- Contextual rules -------------------------------------------------------

struct ContextRuleSpec {
    action: ContextualAction,
    pattern: &'static str,
}

static CONTEXT_RULES: &[ContextRuleSpec] = &[
    ContextRuleSpec {
        action: ContextualAction::Confirm,
        pattern: r"^(?:sí|si|ok|okay|dale|perfecto|listo|adelante|correcto|está bien|esta bien)\W*$",
    },
    ContextRuleSpec {
        action: ContextualAction::Reject,
        pattern: r"^(?:no|mejor no|cancela|cancelar|olvídalo|olvidalo|dejalo|déjalo|nada)\W*$",
    },
    ContextRuleSpec {
        action: ContextualAction::RemoveBlocker,
        pattern: r"\b(?:quita|quitar|elimina|borra|saca)\s+(?:el\s+|los\s+)?blockers?\b(?P<refs>.*)$",
    },
    ContextRuleSpec {
        action: ContextualAction::AddBlocker,
        pattern: r"\b(?:añade|agrega|pon)\s+(?:un\s+)?blocker\b|\bestoy bloquead[oa]\b|\bbloqueada por\b",
    },
    ContextRuleSpec {
        action: ContextualAction::DeleteEntity,
        pattern: r"^(?:elimina|borra|eliminar|borrar)\s+(?:la\s+|esta\s+|esa\s+|el\s+|este\s+|ese\s+)?(?:tarea|proyecto|recordatorio)\b|^(?:elimínala|elimínalo|eliminala|eliminalo|bórrala|bórralo|borrala|borralo)\b",
    },
    ContextRuleSpec {
        action: ContextualAction::ModifySubtasks,
        pattern: r"\b(?:quita|quitar|elimina|borra|saca|sin)\s+(?:la\s+|las\s+|el\s+|los\s+)?(?P<refs>(?:\d+|primer\w*|segund\w*|tercer\w*|cuart\w*|quint\w*|últim\w*|ultim\w*)[^,]*?)(?:\s+y\s+(?:añade|agrega|incluye)\b.*)?$",
    },
    ContextRuleSpec {
        action: ContextualAction::ModifySubtasks,
        pattern: r"^(?:añade|agrega|incluye)\b",
    },
    ContextRuleSpec {
        action: ContextualAction::RequestExtension,
        pattern: r"\b(?:más tiempo|mas tiempo|extensión|extension|prórroga|prorroga)\b",
    },
    ContextRuleSpec {
        action: ContextualAction::ChangePriority,
        pattern: r"\b(?:prioridad|urgente|importante)\b|^(?:ponla|ponlo|hazla|hazlo|márcala|márcalo|marcala|marcalo)\s+(?:como\s+)?(?:alta|baja|normal|media)\b",
    },
    ContextRuleSpec {
        action: ContextualAction::Reschedule,
        pattern: r"\b(?:reprograma\w*|mueve\w*|muévela|muévelo|pásala|pásalo|cambia la fecha|pasado mañana|mañana|próxima semana|proxima semana|lunes|viernes)\b",
    },
    ContextRuleSpec {
        action: ContextualAction::EditEntity,
        pattern: r"^(?:edita\w*|edítala|edítalo|modifica\w*|modifícala|modifícalo|cambia\w*)\b",
    },
];

/// Pulls the "add" half out of a combined edit like "quita la 2 y añade X".
const ADD_CLAUSE: &str = r"(?i)\b(?:añade|agrega|incluye)\b.*$";

// ---------------------------------------------------------------------------
// KeywordClassifier
// ---------------------------------------------------------------------------

struct Rule {
    intent: UserIntent,
    confidence: f64,
    patterns: Vec<Regex>,
}

struct ContextRule {
    action: ContextualAction,
    compiled: Regex,
}

/// Rule-based classifier for both fresh and follow-up messages.
///
/// Not `Clone`: it holds compiled automata. Wrap in `Arc` to share.
pub struct KeywordClassifier {
    rules: Vec<Rule>,
    /// Phrases and the index of the rule that owns them (lowercased).
    phrases: Vec<(String, usize)>,
    automaton: Option<AhoCorasick>,
    context_rules: Vec<ContextRule>,
    task_prefix: Regex,
    reminder_prefix: Regex,
    project_name: Vec<Regex>,
    amount: Vec<Regex>,
    add_clause: Regex,
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| IntentError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn compile_all(patterns: &[&str]) -> Result<Vec<Regex>> {
    patterns.iter().map(|p| compile(p)).collect()
}

impl KeywordClassifier {
    /// Build the classifier from the built-in Spanish rule tables.
    pub fn new() -> Result<Self> {
        let mut rules = Vec::with_capacity(INTENT_RULES.len());
        let mut phrase_list = Vec::new();

        for (idx, rule) in INTENT_RULES.iter().enumerate() {
            for phrase in rule.phrases {
                phrase_list.push((phrase.to_lowercase(), idx));
            }
            rules.push(Rule {
                intent: rule.intent,
                confidence: rule.confidence,
                patterns: compile_all(rule.patterns)?,
            });
        }

        let automaton = if phrase_list.is_empty() {
            None
        } else {
            let keys: Vec<&str> = phrase_list.iter().map(|(p, _)| p.as_str()).collect();
            Some(
                AhoCorasick::new(&keys).map_err(|e| IntentError::InvalidPattern {
                    pattern: "<phrase automaton>".into(),
                    reason: e.to_string(),
                })?,
            )
        };

        let context_rules = CONTEXT_RULES
            .iter()
            .map(|def| {
                Ok(ContextRule {
                    action: def.action,
                    compiled: compile(def.pattern)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::trace!(
            rules = rules.len(),
            phrases = phrase_list.len(),
            context_rules = context_rules.len(),
            "keyword classifier built"
        );

        Ok(Self {
            rules,
            phrases: phrase_list,
            automaton,
            context_rules,
            task_prefix: compile(TASK_PREFIX)?,
            reminder_prefix: compile(REMINDER_PREFIX)?,
            project_name: compile_all(PROJECT_NAME_PATTERNS)?,
            amount: compile_all(AMOUNT_PATTERNS)?,
            add_clause: compile(ADD_CLAUSE)?,
        })
    }

    /// Classify synchronously. Never fails.
    pub fn classify_text(&self, text: &str) -> Classification {
        let trimmed = text.trim();
        let lowered = trimmed.to_lowercase();
        let hits = self.phrase_hits(&lowered);

        for (idx, rule) in self.rules.iter().enumerate() {
            let mut captures = HashMap::new();
            let matched = hits.contains(&idx)
                || rule.patterns.iter().any(|re| match re.captures(&lowered) {
                    Some(caps) => {
                        collect_captures(re, &caps, &mut captures);
                        true
                    }
                    None => false,
                });

            if matched {
                let mut entities = self.extract_entities(rule.intent, trimmed);
                for (k, v) in captures {
                    entities.entry(k).or_insert(v);
                }
                debug!(intent = %rule.intent, confidence = rule.confidence, "keyword rule matched");
                return Classification::new(rule.intent, rule.confidence, entities);
            }
        }

        debug!("no keyword rule matched");
        Classification::new(UserIntent::Unknown, UNMATCHED_CONFIDENCE, HashMap::new())
    }

    /// Decide synchronously whether `text` is a follow-up. Never fails.
    pub fn classify_contextual_text(&self, text: &str) -> ContextualDecision {
        let trimmed = text.trim();
        let lowered = trimmed.to_lowercase();

        let primary = self.classify_text(trimmed);
        if primary.intent != UserIntent::Unknown && primary.confidence >= EXPLICIT_CONFIDENCE {
            debug!(intent = %primary.intent, "explicit request, not a follow-up");
            return ContextualDecision::not_contextual();
        }

        for rule in &self.context_rules {
            let Some(caps) = rule.compiled.captures(&lowered) else {
                continue;
            };

            let references = caps
                .name("refs")
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();

            let details = match rule.action {
                ContextualAction::ModifySubtasks => self
                    .add_clause
                    .find(trimmed)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
                ContextualAction::Confirm
                | ContextualAction::Reject
                | ContextualAction::RemoveBlocker => String::new(),
                _ => trimmed.to_string(),
            };

            debug!(action = %rule.action, "contextual rule matched");
            return ContextualDecision::action(rule.action)
                .with_references(references)
                .with_details(details);
        }

        ContextualDecision::not_contextual()
    }

    // -- Private helpers ----------------------------------------------------

    /// Indices of rules with at least one phrase on word boundaries.
    fn phrase_hits(&self, lowered: &str) -> BTreeSet<usize> {
        let Some(ac) = &self.automaton else {
            return BTreeSet::new();
        };

        ac.find_overlapping_iter(lowered)
            .filter(|m| on_word_boundaries(lowered, m.start(), m.end()))
            .map(|m| self.phrases[m.pattern().as_usize()].1)
            .collect()
    }

    fn extract_entities(&self, intent: UserIntent, text: &str) -> HashMap<String, String> {
        let mut entities = HashMap::new();

        match intent {
            UserIntent::TaskCreate => {
                let name = self.task_prefix.replace(text, "");
                let name = name.trim();
                if !name.is_empty() {
                    entities.insert("task".into(), name.to_string());
                }
                if let Some(priority) = extract_priority(text) {
                    entities.insert("priority".into(), priority.into());
                }
            }
            UserIntent::ReminderCreate => {
                let reminder = self.reminder_prefix.replace(text, "");
                let reminder = reminder.trim();
                if !reminder.is_empty() {
                    entities.insert("reminder".into(), reminder.to_string());
                }
            }
            UserIntent::ExpenseLog | UserIntent::ExpenseAnalyze => {
                if let Some(amount) = self.extract_amount(text) {
                    entities.insert("amount".into(), amount);
                }
            }
            UserIntent::ProjectCreate => {
                if let Some(name) = self
                    .project_name
                    .iter()
                    .find_map(|re| re.captures(text).and_then(|c| c.name("name")))
                {
                    entities.insert("project_name".into(), name.as_str().trim().to_string());
                }
                let lowered = text.to_lowercase();
                if let Some((kind, _)) = PROJECT_TYPES
                    .iter()
                    .find(|(_, kws)| kws.iter().any(|kw| lowered.contains(kw)))
                {
                    entities.insert("project_type".into(), (*kind).to_string());
                }
            }
            _ => {}
        }

        entities
    }

    fn extract_amount(&self, text: &str) -> Option<String> {
        self.amount
            .iter()
            .find_map(|re| re.captures(text).and_then(|c| c.name("amount")))
            .map(|m| m.as_str().replace(',', ""))
    }
}

fn collect_captures(re: &Regex, caps: &regex::Captures<'_>, out: &mut HashMap<String, String>) {
    for name in re.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            out.insert(name.to_string(), m.as_str().replace(',', ""));
        }
    }
}

fn on_word_boundaries(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, text: &str, _history_summary: &str) -> Result<Classification> {
        Ok(self.classify_text(text))
    }
}

#[async_trait]
impl ContextualClassifier for KeywordClassifier {
    async fn classify_contextual(
        &self,
        text: &str,
        _history_summary: &str,
        _active_summary: &str,
        _pending_tag: &str,
    ) -> Result<ContextualDecision> {
        Ok(self.classify_contextual_text(text))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
