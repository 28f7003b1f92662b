//! Project enrichment: name and type detection plus starter tasks.

use async_trait::async_trait;
use parley_intent::UserIntent;
use regex::Regex;
use serde_json::json;

use crate::enricher::{Enricher, EnrichmentRequest, EnrichmentResult};
use crate::error::{KernelError, Result};
use crate::vocabulary::tokenize;

const NAME_PATTERNS: &[&str] = &[
    r#"(?i)(?:crear?|nuevo|iniciar)\s+(?:un\s+)?proyecto\s+["']?([^"',-]+)["']?"#,
    r#"(?i)proyecto\s+["']?([^"',-]+)["']?"#,
];

const PROJECT_TYPES: &[(&str, &[&str])] = &[
    ("trabajo", &["trabajo", "work", "oficina"]),
    ("freelance", &["freelance", "cliente", "workana", "upwork"]),
    ("personal", &["personal", "casa", "propio", "hobby"]),
    ("estudio", &["estudio", "aprender", "curso", "tutorial", "certificación"]),
    ("side_project", &["side project", "side-project", "experimento", "startup"]),
];

const DEFAULT_PROJECT_TYPE: &str = "personal";
const MAX_SUGGESTIONS: usize = 5;

const COMMON_TASKS: &[&str] = &[
    "Definir objetivo y alcance",
    "Crear estructura de carpetas",
    "Configurar herramientas",
];

const TYPE_TASKS: &[(&str, &[&str])] = &[
    ("trabajo", &["Alinear con stakeholders", "Crear documentación inicial", "Definir milestones"]),
    ("freelance", &["Acordar entregables con cliente", "Establecer timeline", "Configurar facturación"]),
    ("estudio", &["Definir temario", "Establecer horario de estudio", "Buscar recursos"]),
    ("side_project", &["Validar idea", "Crear MVP mínimo", "Buscar early users"]),
];

pub struct ProjectEnricher {
    name_patterns: Vec<Regex>,
}

impl ProjectEnricher {
    pub const NAME: &'static str = "ProjectEnricher";

    const INTENTS: &'static [UserIntent] = &[
        UserIntent::ProjectCreate,
        UserIntent::ProjectUpdate,
        UserIntent::ProjectDelete,
        UserIntent::ProjectQuery,
    ];

    pub fn new() -> Result<Self> {
        let name_patterns = NAME_PATTERNS
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| KernelError::InvalidPattern {
                    pattern: (*p).to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { name_patterns })
    }

    fn extract_name(&self, text: &str) -> Option<String> {
        self.name_patterns.iter().find_map(|re| {
            re.captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|name| !name.is_empty())
        })
    }
}

#[async_trait]
impl Enricher for ProjectEnricher {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn intents(&self) -> &[UserIntent] {
        Self::INTENTS
    }

    async fn enrich(&self, request: &EnrichmentRequest) -> Result<EnrichmentResult> {
        let name = request
            .entity("project_name")
            .map(str::to_string)
            .or_else(|| self.extract_name(&request.text));
        let project_type = request
            .entity("project_type")
            .map(str::to_string)
            .unwrap_or_else(|| detect_type(&request.text).to_string());

        let mut result = EnrichmentResult::named(Self::NAME);
        if request.intent == UserIntent::ProjectCreate {
            result.project_suggestions = starter_tasks(&project_type);
        }
        result.project_match = Some(json!({
            "name": name,
            "type": project_type,
            "intent": request.intent.as_str(),
        }));
        Ok(result)
    }
}

/// Single keywords match whole tokens ("work" must not hit "workana");
/// multi-word keywords match as substrings.
fn detect_type(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    let tokens = tokenize(text);
    let hit = |keyword: &str| {
        if keyword.contains([' ', '-']) {
            lowered.contains(keyword)
        } else {
            tokens.iter().any(|t| t == keyword)
        }
    };

    PROJECT_TYPES
        .iter()
        .find(|(_, words)| words.iter().any(|w| hit(w)))
        .map_or(DEFAULT_PROJECT_TYPE, |(kind, _)| *kind)
}

fn starter_tasks(project_type: &str) -> Vec<String> {
    let specific = TYPE_TASKS
        .iter()
        .find(|(kind, _)| *kind == project_type)
        .map_or(&[][..], |(_, tasks)| *tasks);

    COMMON_TASKS
        .iter()
        .chain(specific)
        .take(MAX_SUGGESTIONS)
        .map(|t| (*t).to_string())
        .collect()
}
