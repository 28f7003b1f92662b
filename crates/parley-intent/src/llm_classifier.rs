//! Language-model classifier.
//!
//! Sends a structured prompt asking for a JSON object and validates the
//! answer. Models wrap JSON in code fences, answer with out-of-range
//! confidences and mix entity formats, so the parsing here is lenient and
//! everything it cannot use degrades to a default rather than an error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_llm::{ChatRequest, LlmClient, Message};
use serde_json::Value;
use tracing::{debug, info};

use crate::classifier::{ContextualClassifier, IntentClassifier};
use crate::error::{IntentError, Result};
use crate::intent::{
    Classification, ContextualAction, ContextualDecision, UserIntent, clamp_confidence,
};
use crate::keyword::extract_priority;

/// Confidence assumed when the model omits or garbles it.
const DEFAULT_CONFIDENCE: f64 = 0.5;

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

const INTENT_SYSTEM_PROMPT: &str = r#"Clasificas mensajes de un asistente de productividad en español.

Responde SOLO con un objeto JSON:
{
  "intent": "<una de las intenciones>",
  "confidence": 0.0-1.0,
  "entities": {"clave": "valor", ...}
}

Intenciones:
- task_create: crear/agregar una tarea o algo que hacer
- task_update: actualizar o modificar una tarea existente
- task_delete: eliminar, completar o marcar como hecha una tarea
- task_query: pregunta sobre sus tareas pendientes
- task_status_change: cambiar el estado de una tarea
- idea: una idea que quiere guardar
- note: una nota o información a guardar
- reminder_create: "recuérdame X", "ponme un recordatorio"
- reminder_query: pregunta sobre sus recordatorios
- plan_today: "planifica mi día", "qué hago hoy"
- plan_tomorrow: "qué hago mañana", "planifica mañana"
- plan_week: "cómo va mi semana", "qué tengo esta semana"
- prioritize: "qué hago primero", "X o Y primero"
- reschedule: "mueve X para mañana", "necesito más tiempo"
- workload_check: "cuánto tengo pendiente", "estoy sobrecargado"
- expense_log: registrar un gasto ya hecho
- expense_analyze: algo que QUIERE comprar (con precio)
- debt_query: pregunta sobre sus deudas
- gym_log: registrar su entrenamiento
- gym_query: historial de gym o pesos levantados
- nutrition_log: registrar lo que comió
- nutrition_query: pregunta sobre su alimentación
- project_create: crear un proyecto nuevo
- project_update: modificar un proyecto existente
- project_delete: eliminar, cerrar o archivar un proyecto
- project_query: pregunta sobre sus proyectos
- study_session: estudiar o hacer deep work
- greeting: saludo simple
- help: pide ayuda sobre el bot
- status: estado del sistema
- unknown: no encaja en ninguna categoría

Entidades útiles: task, date, priority (urgent|high|normal|low), amount, item,
meal, food, project_name, project_type. Deja "entities" vacío si no hay."#;

const CONTEXTUAL_SYSTEM_PROMPT: &str = r#"Decides si un mensaje hace referencia al contexto de la conversación.

Responde SOLO con un objeto JSON:
{
  "is_contextual": true|false,
  "contextual_action": "<acción>",
  "referenced_items": "items referenciados, ej: 'la 3', 'las primeras 2'",
  "modification_details": "detalles, ej: nuevas subtareas a añadir"
}

Acciones:
- modify_subtasks: quitar, añadir o cambiar subtareas
- confirm: confirma la acción pendiente (sí, ok, perfecto, dale)
- reject: rechaza la acción (no, mejor no, cancela)
- add_blocker: añadir un bloqueador
- remove_blocker: quitar un bloqueador
- change_priority: cambiar prioridad
- reschedule: cambiar fecha
- request_extension: necesita más tiempo
- edit_entity: editar la entidad activa
- delete_entity: eliminar la entidad
- none: no es una acción contextual"#;

// ---------------------------------------------------------------------------
// LlmClassifier
// ---------------------------------------------------------------------------

/// Classifier backed by an [`LlmClient`].
#[derive(Clone)]
pub struct LlmClassifier {
    llm: Arc<LlmClient>,
    /// Empty means the client's default model.
    model: String,
}

impl LlmClassifier {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self {
            llm,
            model: String::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    async fn ask(&self, system: &str, user: String) -> Result<Value> {
        let mut request = ChatRequest::new(vec![Message::system(system), Message::user(user)])
            .with_temperature(0.0)
            .with_max_tokens(256);
        request.model.clone_from(&self.model);

        let response = self.llm.chat(&request).await?;
        debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "classifier answered"
        );
        parse_json_answer(&response.text)
    }
}

#[async_trait]
impl IntentClassifier for LlmClassifier {
    async fn classify(&self, text: &str, history_summary: &str) -> Result<Classification> {
        let prompt = format!("Historial:\n{history_summary}\n\nMensaje: {text}");
        let answer = self.ask(INTENT_SYSTEM_PROMPT, prompt).await?;
        let classification = classification_from_json(&answer, text);

        info!(
            intent = %classification.intent,
            confidence = classification.confidence,
            "intent classified via llm"
        );
        Ok(classification)
    }
}

#[async_trait]
impl ContextualClassifier for LlmClassifier {
    async fn classify_contextual(
        &self,
        text: &str,
        history_summary: &str,
        active_summary: &str,
        pending_tag: &str,
    ) -> Result<ContextualDecision> {
        let prompt = format!(
            "Historial:\n{history_summary}\n\nContexto activo: {active_summary}\n\
             Acción pendiente: {pending_tag}\n\nMensaje: {text}"
        );
        let answer = self.ask(CONTEXTUAL_SYSTEM_PROMPT, prompt).await?;
        let decision = decision_from_json(&answer);

        debug!(
            is_contextual = decision.is_contextual,
            action = %decision.action,
            "contextual decision via llm"
        );
        Ok(decision)
    }
}

// ---------------------------------------------------------------------------
// Answer parsing
// ---------------------------------------------------------------------------

/// Strip optional markdown code fences and parse the JSON object.
fn parse_json_answer(text: &str) -> Result<Value> {
    let cleaned = text.trim();
    let cleaned = cleaned.strip_prefix("```json").unwrap_or(cleaned);
    let cleaned = cleaned.strip_prefix("```").unwrap_or(cleaned);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned);
    let cleaned = cleaned.trim();

    let value: Value = serde_json::from_str(cleaned).map_err(|e| IntentError::ParseFailed {
        reason: format!("classifier answer is not JSON: {e}"),
    })?;

    if value.is_object() {
        Ok(value)
    } else {
        Err(IntentError::ParseFailed {
            reason: "classifier answer is not a JSON object".into(),
        })
    }
}

fn classification_from_json(v: &Value, text: &str) -> Classification {
    let intent = v["intent"]
        .as_str()
        .and_then(|s| s.parse::<UserIntent>().ok())
        .unwrap_or(UserIntent::Unknown);

    let confidence = match &v["confidence"] {
        Value::Number(n) => n.as_f64().unwrap_or(DEFAULT_CONFIDENCE),
        Value::String(s) => s.trim().parse().unwrap_or(DEFAULT_CONFIDENCE),
        _ => DEFAULT_CONFIDENCE,
    };

    let mut entities = parse_entities(&v["entities"]);
    if intent == UserIntent::TaskCreate
        && !entities.contains_key("priority")
        && let Some(priority) = extract_priority(text)
    {
        entities.insert("priority".into(), priority.into());
    }

    Classification::new(intent, clamp_confidence(confidence), entities)
}

/// Entities arrive either as a JSON object or as `"k:v|k:v"`.
fn parse_entities(v: &Value) -> HashMap<String, String> {
    match v {
        Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.trim().to_string(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                (!value.is_empty()).then(|| (k.trim().to_lowercase(), value))
            })
            .collect(),
        Value::String(s) => parse_pipe_entities(s),
        _ => HashMap::new(),
    }
}

fn parse_pipe_entities(s: &str) -> HashMap<String, String> {
    let trimmed = s.trim();
    if trimmed.is_empty() || matches!(trimmed.to_lowercase().as_str(), "none" | "vacío" | "vacio") {
        return HashMap::new();
    }

    trimmed
        .split('|')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect()
}

fn decision_from_json(v: &Value) -> ContextualDecision {
    let is_contextual = match &v["is_contextual"] {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "sí" | "si" | "yes"),
        _ => false,
    };

    let action = v["contextual_action"]
        .as_str()
        .and_then(|s| s.parse::<ContextualAction>().ok())
        .unwrap_or_default();

    let text_field = |key: &str| -> String {
        match &v[key] {
            Value::String(s) => s.trim().to_string(),
            Value::Array(items) => items
                .iter()
                .filter_map(|i| match i {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(", "),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        }
    };

    ContextualDecision {
        is_contextual: is_contextual && action != ContextualAction::None,
        action,
        referenced_items: text_field("referenced_items"),
        details: text_field("modification_details"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_json() {
        let v = parse_json_answer(
            r#"{"intent": "expense_analyze", "confidence": 0.92, "entities": {"amount": "3000", "item": "airpods"}}"#,
        )
        .unwrap();
        let c = classification_from_json(&v, "quiero unos airpods de $3000");
        assert_eq!(c.intent, UserIntent::ExpenseAnalyze);
        assert!((c.confidence - 0.92).abs() < f64::EPSILON);
        assert_eq!(c.entities["item"], "airpods");
    }

    #[test]
    fn strips_code_fences() {
        let v = parse_json_answer("```json\n{\"intent\": \"help\", \"confidence\": 0.95}\n```")
            .unwrap();
        assert_eq!(classification_from_json(&v, "ayuda").intent, UserIntent::Help);
    }

    #[test]
    fn rejects_non_json_and_non_objects() {
        assert!(parse_json_answer("no sé").is_err());
        assert!(parse_json_answer("[1, 2]").is_err());
    }

    #[test]
    fn clamps_and_defaults_confidence() {
        let high = classification_from_json(&json!({"intent": "greeting", "confidence": 3.0}), "");
        assert_eq!(high.confidence, 1.0);

        let text = classification_from_json(&json!({"intent": "greeting", "confidence": "0.4"}), "");
        assert!((text.confidence - 0.4).abs() < f64::EPSILON);

        let missing = classification_from_json(&json!({"intent": "greeting"}), "");
        assert!((missing.confidence - DEFAULT_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_intent_tag_becomes_unknown() {
        let c = classification_from_json(&json!({"intent": "order_pizza", "confidence": 0.9}), "");
        assert_eq!(c.intent, UserIntent::Unknown);
    }

    #[test]
    fn pipe_entities_are_parsed() {
        let c = classification_from_json(
            &json!({
                "intent": "task_create",
                "confidence": 0.8,
                "entities": "Task: terminar reporte | date:mañana|priority:urgent"
            }),
            "terminar reporte",
        );
        assert_eq!(c.entities["task"], "terminar reporte");
        assert_eq!(c.entities["date"], "mañana");
        assert_eq!(c.entities["priority"], "urgent");

        assert!(parse_pipe_entities("vacío").is_empty());
        assert!(parse_pipe_entities("sin-separador").is_empty());
    }

    #[test]
    fn task_priority_is_backfilled_from_text() {
        let c = classification_from_json(
            &json!({"intent": "task_create", "confidence": 0.8, "entities": {"task": "llamar"}}),
            "llamar al cliente, es urgente",
        );
        assert_eq!(c.entities["priority"], "urgent");
    }

    #[test]
    fn contextual_decision_parsing() {
        let d = decision_from_json(&json!({
            "is_contextual": true,
            "contextual_action": "modify_subtasks",
            "referenced_items": ["la 2", 3],
            "modification_details": "añade documentar"
        }));
        assert!(d.is_contextual);
        assert_eq!(d.action, ContextualAction::ModifySubtasks);
        assert_eq!(d.referenced_items, "la 2, 3");
        assert_eq!(d.details, "añade documentar");
    }

    #[test]
    fn contextual_with_unknown_action_is_not_contextual() {
        let d = decision_from_json(&json!({"is_contextual": "true", "contextual_action": "dance"}));
        assert!(!d.is_contextual);
        assert_eq!(d.action, ContextualAction::None);
    }
}
