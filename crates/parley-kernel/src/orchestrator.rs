//! The dispatcher: one conversational turn end to end.
//!
//! ```text
//! process(user, text)
//!   ├─ lock user
//!   ├─ store.get                      (once)
//!   ├─ resolver ──► follow-up? ───────────────┐
//!   ├─ classifier (timeout → unknown)         │
//!   ├─ registry.dispatch (failure → None)     │
//!   ├─ compose reply                          │
//!   ├─ history ◄──────────────────────────────┘
//!   └─ store.save                     (once, error propagates)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parley_intent::{Classification, ContextualClassifier, IntentClassifier, UserIntent};
use parley_store::{
    ActiveEntity, Choice, ConversationContext, ConversationState, EntityDetails, EntityType,
    PendingAction, PendingKind, Priority, Role, SessionStore, truncate_chars,
};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::enricher::{EnrichmentRequest, EnrichmentResult};
use crate::error::Result;
use crate::locks::UserLocks;
use crate::registry::EnricherRegistry;
use crate::resolver::{ContextualResolver, replace_pending};
use crate::response::Response;

const MAX_ENTITY_NAME_CHARS: usize = 100;
const MAX_SUGGESTED_SUBTASKS: usize = 5;
const MAX_LISTED_BLOCKERS: usize = 3;

const GREETING_REPLY: &str = "¡Hola! ¿En qué te ayudo?";
const UNKNOWN_REPLY: &str = "No entendí tu mensaje. ¿Puedes reformularlo?";
const HELP_REPLY: &str = "Puedo ayudarte con tareas, proyectos y gastos.

Ejemplos:
• \"Crear tarea: revisar API\"
• \"Quita la subtarea 3\"
• \"Añade blocker: esperando cliente\"
• \"Mueve esto a mañana\"
• \"Es más urgente\"
• \"Me quiero comprar X por $Y\"
• \"¿Cuánto debo?\"";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for [`Dispatcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Idle time after which a context is reset.
    pub context_ttl_minutes: i64,
    pub classifier_timeout_ms: u64,
    pub enricher_timeout_ms: u64,
    /// Confidence at which the keyword path is trusted without the LLM.
    pub tiered_threshold: f64,
    /// Replies are truncated to this many chars in history.
    pub history_reply_chars: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            context_ttl_minutes: 30,
            classifier_timeout_ms: 10_000,
            enricher_timeout_ms: 15_000,
            tiered_threshold: 0.75,
            history_reply_chars: 200,
        }
    }
}

impl DispatchConfig {
    pub fn context_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.context_ttl_minutes)
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }

    pub fn enricher_timeout(&self) -> Duration {
        Duration::from_millis(self.enricher_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes user messages through resolver, classifier and enrichers, and
/// keeps each user's [`ConversationContext`] up to date.
pub struct Dispatcher {
    store: Arc<dyn SessionStore>,
    registry: Arc<EnricherRegistry>,
    classifier: Arc<dyn IntentClassifier>,
    resolver: ContextualResolver,
    locks: UserLocks,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn SessionStore>,
        registry: Arc<EnricherRegistry>,
        classifier: Arc<dyn IntentClassifier>,
        contextual: Arc<dyn ContextualClassifier>,
        config: DispatchConfig,
    ) -> Result<Self> {
        let resolver = ContextualResolver::new(contextual, config.classifier_timeout())?;
        Ok(Self {
            store,
            registry,
            classifier,
            resolver,
            locks: UserLocks::new(),
            config,
        })
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn registry(&self) -> &EnricherRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Handle one message from `user_id`.
    ///
    /// Turns for the same user are serialized. The context is read once
    /// and written once; only the write can fail the turn.
    #[instrument(skip(self, text))]
    pub async fn process(&self, user_id: &str, text: &str) -> Result<Response> {
        let started = Instant::now();
        let _turn = self.locks.acquire(user_id).await;
        let mut ctx = self.store.get(user_id).await;

        if let Some(mut response) = self.resolver.resolve(text, &mut ctx).await {
            ctx.add_message(Role::User, text, None, HashMap::new());
            self.record_reply(&mut ctx, &response);
            self.store.save(&ctx).await?;

            response.processing_time_ms = elapsed_ms(started);
            info!(
                action = response.contextual_action.as_deref().unwrap_or_default(),
                elapsed_ms = response.processing_time_ms,
                "follow-up resolved"
            );
            return Ok(response);
        }

        let classification = self.classify(text, &ctx).await;
        ctx.add_message(
            Role::User,
            text,
            Some(classification.intent.as_str().to_string()),
            classification.entities.clone(),
        );

        let request = EnrichmentRequest::new(user_id, classification.intent, text)
            .with_confidence(classification.confidence)
            .with_entities(classification.entities.clone())
            .with_context_summary(ctx.context_summary());
        let enrichment = self.registry.dispatch(&request).await;

        let mut response = Response::new(classification.intent, classification.confidence);
        response.entities = classification.entities;
        compose(&mut response, text, enrichment.as_ref(), &mut ctx);
        if let Some(result) = &enrichment {
            response.agents_used.clone_from(&result.agents_used);
        }
        response.enrichment = enrichment;

        self.record_reply(&mut ctx, &response);
        self.store.save(&ctx).await?;

        response.processing_time_ms = elapsed_ms(started);
        info!(
            intent = %response.intent,
            confidence = response.confidence,
            enriched = response.enrichment.is_some(),
            elapsed_ms = response.processing_time_ms,
            "turn processed"
        );
        Ok(response)
    }

    /// Reset every expired context. Each reset runs under that user's
    /// lock, so a sweep can overlap live traffic.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let mut reset = 0;
        for user_id in self.store.expired_user_ids().await {
            let _turn = self.locks.acquire(&user_id).await;
            if self.store.reset_if_expired(&user_id).await? {
                reset += 1;
            }
        }
        let pruned = self.locks.prune();
        info!(reset, pruned_locks = pruned, "expired contexts swept");
        Ok(reset)
    }

    async fn classify(&self, text: &str, ctx: &ConversationContext) -> Classification {
        let history = ctx.history_summary();
        let limit = self.config.classifier_timeout();
        match tokio::time::timeout(limit, self.classifier.classify(text, &history)).await {
            Ok(Ok(classification)) => {
                debug!(
                    intent = %classification.intent,
                    confidence = classification.confidence,
                    "classified"
                );
                classification
            }
            Ok(Err(e)) => {
                warn!(error = %e, "intent classifier failed, treating as unknown");
                Classification::unknown()
            }
            Err(_) => {
                warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "intent classifier timed out, treating as unknown"
                );
                Classification::unknown()
            }
        }
    }

    fn record_reply(&self, ctx: &mut ConversationContext, response: &Response) {
        ctx.add_message(
            Role::Assistant,
            response.history_text(self.config.history_reply_chars),
            None,
            HashMap::new(),
        );
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Reply composition
// ---------------------------------------------------------------------------

/// Fill in the reply for intents the kernel answers itself. Other intents
/// keep `message = None` for the host to render.
fn compose(
    response: &mut Response,
    text: &str,
    enrichment: Option<&EnrichmentResult>,
    ctx: &mut ConversationContext,
) {
    match response.intent {
        UserIntent::TaskCreate => compose_task_create(response, text, enrichment, ctx),
        UserIntent::ProjectCreate => compose_project_create(response, text, enrichment, ctx),
        UserIntent::Greeting => response.message = Some(GREETING_REPLY.to_string()),
        UserIntent::Help => response.message = Some(HELP_REPLY.to_string()),
        UserIntent::Unknown => response.message = Some(UNKNOWN_REPLY.to_string()),
        _ => {}
    }
}

fn compose_task_create(
    response: &mut Response,
    text: &str,
    enrichment: Option<&EnrichmentResult>,
    ctx: &mut ConversationContext,
) {
    let name = entity_name(&response.entities, "task", text);

    let mut details = EntityDetails::task();
    let mut payload = Value::Null;
    let mut suggested = Vec::new();
    let mut blockers: &[String] = &[];
    if let Some(result) = enrichment {
        if let Some(priority) = result.suggested_priority.as_deref().and_then(Priority::from_tag) {
            details.set_priority(priority);
        }
        if let Some(date) = result.suggested_dates.and_then(|d| d.do_date) {
            details.set_schedule(date);
        }
        payload = Value::Object(result.to_entities_map());
        suggested = result
            .subtasks
            .iter()
            .take(MAX_SUGGESTED_SUBTASKS)
            .cloned()
            .collect();
        blockers = &result.blockers;
    }

    let entity_id = Uuid::now_v7().to_string();
    let entity = ActiveEntity::new(details, &name)
        .with_id(&entity_id)
        .with_suggested_items(suggested.clone())
        .with_payload(payload);
    switch_entity(ctx, entity);

    let mut lines = vec![format!("Tarea creada: {name}")];
    if !suggested.is_empty() {
        lines.push("\nSubtareas sugeridas:".to_string());
        lines.extend(
            suggested
                .iter()
                .enumerate()
                .map(|(i, item)| format!("  {}. {item}", i + 1)),
        );
        lines.push("\nPuedes decir 'quita la 3' o 'añade otra subtarea'".to_string());

        let pending = PendingAction::new(
            PendingKind::CreateSubtasks { items: suggested },
            EntityType::Task,
        )
        .with_target_id(Some(entity_id));
        replace_pending(ctx, pending);
        ctx.state = ConversationState::ReviewingSubtasks;

        response.suggested_choices = Some(vec![
            vec![
                Choice::new("Crear subtareas", "confirm_subtasks"),
                Choice::new("Modificar", "modify_subtasks"),
            ],
            vec![Choice::new("Sin subtareas", "skip_subtasks")],
        ]);
    }
    if !blockers.is_empty() {
        lines.push("\nPosibles blockers:".to_string());
        lines.extend(
            blockers
                .iter()
                .take(MAX_LISTED_BLOCKERS)
                .map(|b| format!("  - {b}")),
        );
    }

    response.message = Some(lines.join("\n"));
}

fn compose_project_create(
    response: &mut Response,
    text: &str,
    enrichment: Option<&EnrichmentResult>,
    ctx: &mut ConversationContext,
) {
    let matched_name = enrichment
        .and_then(|r| r.project_match.as_ref())
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str);
    let name = match (response.entities.get("project_name"), matched_name) {
        (Some(name), _) if !name.trim().is_empty() => name.trim().to_string(),
        (_, Some(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => entity_name(&response.entities, "project_name", text),
    };
    let project_type = response
        .entities
        .get("project_type")
        .filter(|t| !t.trim().is_empty())
        .cloned();

    let mut entity = ActiveEntity::new(EntityDetails::project(project_type), &name)
        .with_id(Uuid::now_v7().to_string());
    if let Some(result) = enrichment {
        entity = entity
            .with_suggested_items(result.project_suggestions.clone())
            .with_payload(Value::Object(result.to_entities_map()));
    }
    switch_entity(ctx, entity);

    response.message = Some(format!("Proyecto: {name}\n¿Qué tipo de proyecto es?"));
    response.suggested_choices = Some(vec![
        vec![
            Choice::new("Trabajo", "project_type_trabajo"),
            Choice::new("Freelance", "project_type_freelance"),
        ],
        vec![
            Choice::new("Estudio", "project_type_estudio"),
            Choice::new("Personal", "project_type_personal"),
        ],
    ]);
}

fn switch_entity(ctx: &mut ConversationContext, entity: ActiveEntity) {
    if let Some(dropped) = ctx.set_active_entity(entity) {
        debug!(
            user_id = %ctx.user_id,
            dropped = dropped.action_type(),
            "pending action bound to previous entity dropped"
        );
    }
}

/// `entities[key]`, or the raw text, trimmed to [`MAX_ENTITY_NAME_CHARS`].
fn entity_name(entities: &HashMap<String, String>, key: &str, text: &str) -> String {
    let raw = entities
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| text.trim());
    truncate_chars(raw, MAX_ENTITY_NAME_CHARS).to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
