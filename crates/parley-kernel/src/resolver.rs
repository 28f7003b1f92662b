//! Contextual resolver.
//!
//! Decides whether a message is a follow-up to the conversation's current
//! state ("sí", "quita la 3", "ponla urgente") and, if so, applies it to the
//! [`ConversationContext`] directly. A resolved turn never reaches the
//! intent classifier or the enrichers.
//!
//! Resolution order, first match wins:
//!
//! 1. quick yes/no reply to a live pending action;
//! 2. contextual classification, when there is an active entity or a live
//!    pending action;
//! 3. execution of the classified [`ContextualAction`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parley_intent::{ContextualAction, ContextualClassifier, ContextualDecision, UserIntent};
use parley_store::{
    ActiveEntity, Choice, ConversationContext, ConversationState, EntityType, PendingAction,
    PendingKind,
};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ordinal::parse_item_references;
use crate::response::Response;
use crate::vocabulary::{ListEdits, QuickReply, date_from_text, priority_from_text, quick_reply};

/// Pending tag passed to the classifier when nothing is pending.
const NO_PENDING: &str = "ninguna";

const STALE_PENDING_REPLY: &str = "Esa acción ya no aplica a lo que estamos viendo.";

/// Applies follow-up messages to a conversation context.
pub struct ContextualResolver {
    classifier: Arc<dyn ContextualClassifier>,
    timeout: Duration,
    edits: ListEdits,
}

impl ContextualResolver {
    pub fn new(classifier: Arc<dyn ContextualClassifier>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            classifier,
            timeout,
            edits: ListEdits::new()?,
        })
    }

    /// Resolve `text` against `ctx`, mutating it in place.
    ///
    /// `None` means the message is a fresh request and should be classified.
    pub async fn resolve(&self, text: &str, ctx: &mut ConversationContext) -> Option<Response> {
        if ctx.live_pending_action().is_some() {
            match quick_reply(text) {
                Some(QuickReply::Confirm) => return Some(confirm(ctx)),
                Some(QuickReply::Reject) => return Some(reject(ctx)),
                None => {}
            }
        }

        if ctx.active_entity.is_none() && ctx.live_pending_action().is_none() {
            return None;
        }

        let decision = self.classify(text, ctx).await?;
        if !decision.is_contextual {
            return None;
        }

        debug!(
            user_id = %ctx.user_id,
            action = %decision.action,
            references = %decision.referenced_items,
            "contextual action"
        );
        self.execute(text, &decision, ctx)
    }

    async fn classify(&self, text: &str, ctx: &ConversationContext) -> Option<ContextualDecision> {
        let history = ctx.history_summary();
        let active = ctx.context_summary();
        let pending = ctx
            .live_pending_action()
            .map_or(NO_PENDING, PendingAction::action_type)
            .to_string();

        let call = self
            .classifier
            .classify_contextual(text, &history, &active, &pending);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(decision)) => Some(decision),
            Ok(Err(e)) => {
                warn!(user_id = %ctx.user_id, error = %e, "contextual classifier failed");
                None
            }
            Err(_) => {
                warn!(
                    user_id = %ctx.user_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "contextual classifier timed out"
                );
                None
            }
        }
    }

    fn execute(
        &self,
        text: &str,
        decision: &ContextualDecision,
        ctx: &mut ConversationContext,
    ) -> Option<Response> {
        let response = match decision.action {
            ContextualAction::ModifySubtasks => self.modify_subtasks(decision, ctx),
            ContextualAction::AddBlocker => self.add_blocker(text, decision, ctx),
            ContextualAction::RemoveBlocker => remove_blocker(decision, ctx),
            ContextualAction::ChangePriority => change_priority(text, decision, ctx),
            ContextualAction::Reschedule | ContextualAction::RequestExtension => {
                reschedule(text, decision, ctx)
            }
            ContextualAction::EditEntity => edit_entity(ctx),
            ContextualAction::DeleteEntity => request_delete(ctx),
            ContextualAction::Confirm => {
                ctx.live_pending_action()?;
                confirm(ctx)
            }
            ContextualAction::Reject => {
                ctx.live_pending_action()?;
                reject(ctx)
            }
            ContextualAction::None => return None,
        };
        Some(response)
    }

    // -- Subtasks -----------------------------------------------------------

    fn modify_subtasks(&self, decision: &ContextualDecision, ctx: &mut ConversationContext) -> Response {
        let Some(entity) = ctx.active_entity.as_mut() else {
            return Response::missing_entity("No hay tarea activa para modificar subtareas.");
        };

        // Once committed, edits apply to the entity's own items.
        let committed = entity.suggested_items.is_empty();
        let current = if committed {
            entity.items.clone()
        } else {
            entity.suggested_items.clone()
        };

        let to_remove = parse_item_references(&decision.referenced_items, current.len());
        let to_add = self.edits.extract_new_items(&decision.details);

        let mut updated: Vec<String> = current
            .iter()
            .enumerate()
            .filter(|(i, _)| !to_remove.contains(&(i + 1)))
            .map(|(_, item)| item.clone())
            .collect();
        updated.extend(to_add.iter().cloned());

        let intent = update_intent(entity);
        if committed {
            entity.items.clone_from(&updated);
        } else {
            entity.suggested_items.clone_from(&updated);
            if let Some(PendingAction {
                kind: PendingKind::CreateSubtasks { items },
                ..
            }) = ctx.pending_action.as_mut()
            {
                items.clone_from(&updated);
            }
        }

        let mut changes = Vec::new();
        if !to_remove.is_empty() {
            let removed: Vec<&str> = to_remove.iter().map(|i| current[i - 1].as_str()).collect();
            changes.push(format!("Quitadas: {}", removed.join(", ")));
        }
        if !to_add.is_empty() {
            changes.push(format!("Añadidas: {}", to_add.join(", ")));
        }

        let mut lines = vec!["Subtareas actualizadas:".to_string()];
        lines.extend(numbered(&updated));
        if !changes.is_empty() {
            lines.push(format!("\nCambios: {}", changes.join(" | ")));
        }

        Response::contextual(intent, ContextualAction::ModifySubtasks.as_str(), lines.join("\n"))
    }

    // -- Blockers -----------------------------------------------------------

    fn add_blocker(
        &self,
        text: &str,
        decision: &ContextualDecision,
        ctx: &mut ConversationContext,
    ) -> Response {
        let Some(entity) = active_task(&mut ctx.active_entity) else {
            return Response::missing_entity("No hay tarea activa para añadir blocker.");
        };

        let source = if decision.details.trim().is_empty() {
            text
        } else {
            decision.details.as_str()
        };
        let blocker = self.edits.extract_blocker(source);

        if blocker.is_empty() {
            ctx.state = ConversationState::AwaitingInput;
            return Response::contextual(
                UserIntent::TaskUpdate,
                "awaiting_input",
                "¿Cuál es el blocker? (ej: 'esperando respuesta del cliente')",
            );
        }

        let message = format!("Blocker añadido a '{}':\n  {blocker}", entity.name);
        entity.blockers.push(blocker);
        Response::contextual(UserIntent::TaskUpdate, ContextualAction::AddBlocker.as_str(), message)
    }
}

fn remove_blocker(decision: &ContextualDecision, ctx: &mut ConversationContext) -> Response {
    let Some(entity) = active_task(&mut ctx.active_entity) else {
        return Response::missing_entity("No hay tarea activa para quitar blocker.");
    };

    if entity.blockers.is_empty() {
        let message = format!("'{}' no tiene blockers.", entity.name);
        return Response::contextual(
            UserIntent::TaskUpdate,
            ContextualAction::RemoveBlocker.as_str(),
            message,
        );
    }

    let mut indices = parse_item_references(&decision.referenced_items, entity.blockers.len());
    if indices.is_empty() {
        indices.insert(entity.blockers.len());
    }

    let mut removed: Vec<String> = indices
        .iter()
        .rev()
        .map(|i| entity.blockers.remove(i - 1))
        .collect();
    removed.reverse();

    let message = format!("Blocker quitado de '{}': {}", entity.name, removed.join(", "));
    Response::contextual(
        UserIntent::TaskUpdate,
        ContextualAction::RemoveBlocker.as_str(),
        message,
    )
}

// -- Priority and dates -----------------------------------------------------

fn change_priority(
    text: &str,
    decision: &ContextualDecision,
    ctx: &mut ConversationContext,
) -> Response {
    let Some(entity) = ctx.active_entity.as_mut() else {
        return Response::missing_entity("No hay entidad activa para cambiar prioridad.");
    };
    let intent = update_intent(entity);

    let Some(priority) = priority_from_text(text).or_else(|| priority_from_text(&decision.details))
    else {
        ctx.state = ConversationState::AwaitingSelection;
        return Response::contextual(
            intent,
            "awaiting_selection",
            "¿Qué prioridad? (urgente, alta, normal, baja)",
        )
        .with_choices(vec![
            vec![
                Choice::new("Urgente", "priority_urgente"),
                Choice::new("Alta", "priority_alta"),
            ],
            vec![
                Choice::new("Normal", "priority_normal"),
                Choice::new("Baja", "priority_baja"),
            ],
        ]);
    };

    let message = if entity.details.set_priority(priority) {
        info!(entity = %entity.name, priority = priority.as_str(), "priority changed");
        format!("Prioridad de '{}' cambiada a: {}", entity.name, priority.label())
    } else {
        format!("'{}' no tiene prioridad.", entity.name)
    };
    Response::contextual(intent, ContextualAction::ChangePriority.as_str(), message)
}

fn reschedule(text: &str, decision: &ContextualDecision, ctx: &mut ConversationContext) -> Response {
    let Some(entity) = ctx.active_entity.as_mut() else {
        return Response::missing_entity("No hay tarea activa para reprogramar.");
    };
    let intent = update_intent(entity);

    let today = Local::now().date_naive();
    let Some(date) = date_from_text(text, today).or_else(|| date_from_text(&decision.details, today))
    else {
        ctx.state = ConversationState::AwaitingInput;
        return Response::contextual(
            intent,
            "awaiting_input",
            "¿Para cuándo? (mañana, pasado mañana, próxima semana, viernes)",
        );
    };

    let message = if entity.details.set_schedule(date) {
        info!(entity = %entity.name, date = %date, "entity rescheduled");
        format!("'{}' reprogramada para: {}", entity.name, date.format("%d/%m"))
    } else {
        format!("'{}' no tiene fecha.", entity.name)
    };
    Response::contextual(intent, decision.action.as_str(), message)
}

// -- Edit and delete --------------------------------------------------------

fn edit_entity(ctx: &mut ConversationContext) -> Response {
    let Some(entity) = ctx.active_entity.as_ref() else {
        return Response::missing_entity("No hay entidad activa para editar.");
    };
    let message = format!("Editando: {}\n¿Qué quieres modificar?", entity.name);
    let intent = update_intent(entity);
    ctx.state = ConversationState::EditingEntity;

    Response::contextual(intent, ContextualAction::EditEntity.as_str(), message).with_choices(vec![
        vec![
            Choice::new("Nombre", "edit_name"),
            Choice::new("Estado", "edit_status"),
        ],
        vec![
            Choice::new("Prioridad", "edit_priority"),
            Choice::new("Fecha", "edit_date"),
        ],
        vec![Choice::new("Cancelar", "edit_cancel")],
    ])
}

fn request_delete(ctx: &mut ConversationContext) -> Response {
    let Some(entity) = ctx.active_entity.as_ref() else {
        return Response::missing_entity("No hay entidad activa para eliminar.");
    };

    let choices = vec![
        Choice::new("Sí, eliminar", "confirm_delete"),
        Choice::new("No, cancelar", "cancel_delete"),
    ];
    let message = format!("¿Eliminar '{}'?", entity.name);
    let intent = delete_intent(entity.entity_type());
    let pending = PendingAction::new(PendingKind::DeleteEntity, entity.entity_type())
        .with_target_id(entity.entity_id.clone())
        .with_options(choices.clone());

    replace_pending(ctx, pending);
    ctx.state = ConversationState::AwaitingConfirmation;

    Response::contextual(intent, "awaiting_confirmation", message).with_choices(vec![choices])
}

// -- Confirmation -----------------------------------------------------------

/// Apply the pending action. Always clears it; an action bound to an
/// entity that is no longer active is dropped unapplied.
fn confirm(ctx: &mut ConversationContext) -> Response {
    let action = ctx.clear_pending_action();
    let tag = ContextualAction::Confirm.as_str();

    if let Some(stale) = action
        .as_ref()
        .filter(|a| !a.applies_to(ctx.active_entity.as_ref()))
    {
        debug!(
            user_id = %ctx.user_id,
            action = stale.action_type(),
            "pending action targets another entity, not applied"
        );
        ctx.state = ConversationState::Idle;
        return Response::contextual(UserIntent::Unknown, tag, STALE_PENDING_REPLY);
    }

    match action.map(|a| (a.kind, a.target_entity_type)) {
        Some((PendingKind::CreateSubtasks { items }, _)) => {
            if let Some(entity) = ctx.active_entity.as_mut() {
                entity.items.clone_from(&items);
                entity.suggested_items.clear();
            }
            ctx.state = ConversationState::Idle;

            let mut lines = vec!["Subtareas añadidas:".to_string()];
            lines.extend(numbered(&items));
            Response::contextual(UserIntent::TaskCreate, tag, lines.join("\n"))
        }
        Some((PendingKind::DeleteEntity, target)) => {
            let name = ctx
                .active_entity
                .as_ref()
                .map_or_else(|| "elemento".to_string(), |e| e.name.clone());
            ctx.clear_active_entity();
            Response::contextual(delete_intent(target), tag, format!("{name} eliminado."))
        }
        Some((PendingKind::Custom { .. }, _)) | None => {
            ctx.state = ConversationState::Idle;
            Response::contextual(UserIntent::Unknown, tag, "Acción completada.")
        }
    }
}

/// Drop the pending action. The active entity is left alone.
fn reject(ctx: &mut ConversationContext) -> Response {
    ctx.clear_pending_action();
    ctx.state = ConversationState::Idle;
    Response::contextual(
        UserIntent::Unknown,
        ContextualAction::Reject.as_str(),
        "Entendido, cancelado.",
    )
}

// -- Helpers ----------------------------------------------------------------

/// Install `action`, logging whatever it replaces.
///
/// An overwritten action from another domain is kept overwritten; the log
/// line is the only trace of it.
pub(crate) fn replace_pending(ctx: &mut ConversationContext, action: PendingAction) {
    let new_type = action.action_type().to_string();
    let new_target = action.target_entity_type;
    if let Some(previous) = ctx.set_pending_action(action) {
        debug!(
            user_id = %ctx.user_id,
            overwritten = previous.action_type(),
            replacement = %new_type,
            "pending action replaced"
        );
        if previous.target_entity_type != new_target {
            info!(
                user_id = %ctx.user_id,
                overwritten = previous.action_type(),
                overwritten_target = %previous.target_entity_type,
                replacement_target = %new_target,
                "pending action from another domain overwritten"
            );
        }
    }
}

fn active_task(entity: &mut Option<ActiveEntity>) -> Option<&mut ActiveEntity> {
    entity
        .as_mut()
        .filter(|e| e.entity_type() == EntityType::Task)
}

fn update_intent(entity: &ActiveEntity) -> UserIntent {
    match entity.entity_type() {
        EntityType::Project => UserIntent::ProjectUpdate,
        _ => UserIntent::TaskUpdate,
    }
}

fn delete_intent(target: EntityType) -> UserIntent {
    match target {
        EntityType::Project => UserIntent::ProjectDelete,
        _ => UserIntent::TaskDelete,
    }
}

fn numbered(items: &[String]) -> impl Iterator<Item = String> + '_ {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("  {}. {item}", i + 1))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use parley_intent::{IntentError, KeywordClassifier};
    use parley_store::{EntityDetails, Priority};

    use super::*;

    /// Contextual classifier that returns a fixed decision and records the
    /// pending tag it was given.
    struct Fixed {
        decision: Option<ContextualDecision>,
        seen_pending: Mutex<Vec<String>>,
    }

    impl Fixed {
        fn new(decision: ContextualDecision) -> Arc<Self> {
            Arc::new(Self {
                decision: Some(decision),
                seen_pending: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                decision: None,
                seen_pending: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ContextualClassifier for Fixed {
        async fn classify_contextual(
            &self,
            _text: &str,
            _history: &str,
            _active: &str,
            pending: &str,
        ) -> parley_intent::Result<ContextualDecision> {
            self.seen_pending.lock().unwrap().push(pending.to_string());
            self.decision.clone().ok_or(IntentError::ParseFailed {
                reason: "scripted".into(),
            })
        }
    }

    fn keyword_resolver() -> ContextualResolver {
        let classifier = Arc::new(KeywordClassifier::new().unwrap());
        ContextualResolver::new(classifier, Duration::from_secs(1)).unwrap()
    }

    fn resolver_with(classifier: Arc<Fixed>) -> ContextualResolver {
        ContextualResolver::new(classifier, Duration::from_secs(1)).unwrap()
    }

    fn reviewing_context() -> ConversationContext {
        let items: Vec<String> = ["diseñar", "implementar", "probar", "desplegar"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut ctx = ConversationContext::new("ana");
        ctx.set_active_entity(
            ActiveEntity::new(EntityDetails::task(), "Migrar API").with_suggested_items(items.clone()),
        );
        ctx.set_pending_action(PendingAction::new(
            PendingKind::CreateSubtasks { items },
            EntityType::Task,
        ));
        ctx.state = ConversationState::ReviewingSubtasks;
        ctx
    }

    fn task_context() -> ConversationContext {
        let mut ctx = ConversationContext::new("ana");
        ctx.set_active_entity(ActiveEntity::new(EntityDetails::task(), "Migrar API"));
        ctx
    }

    #[tokio::test]
    async fn fresh_context_is_not_resolved() {
        let mut ctx = ConversationContext::new("ana");
        assert!(keyword_resolver().resolve("sí", &mut ctx).await.is_none());
    }

    #[tokio::test]
    async fn confirm_commits_pending_subtasks() {
        let mut ctx = reviewing_context();
        let r = keyword_resolver().resolve("sí, perfecto", &mut ctx).await.unwrap();

        assert!(r.already_handled);
        assert_eq!(r.intent, UserIntent::TaskCreate);
        assert!(r.message.unwrap().starts_with("Subtareas añadidas:\n  1. diseñar"));
        assert!(ctx.pending_action.is_none());
        assert_eq!(ctx.state, ConversationState::Idle);
        let entity = ctx.active_entity.unwrap();
        assert_eq!(entity.items.len(), 4);
        assert!(entity.suggested_items.is_empty());
    }

    #[tokio::test]
    async fn reject_clears_pending_but_keeps_entity() {
        let mut ctx = reviewing_context();
        let r = keyword_resolver().resolve("no, mejor no", &mut ctx).await.unwrap();

        assert_eq!(r.message.as_deref(), Some("Entendido, cancelado."));
        assert!(ctx.pending_action.is_none());
        assert_eq!(ctx.state, ConversationState::Idle);
        assert_eq!(ctx.active_entity.unwrap().suggested_items.len(), 4);
    }

    #[tokio::test]
    async fn expired_pending_is_not_quick_confirmed() {
        let mut ctx = reviewing_context();
        if let Some(pending) = ctx.pending_action.as_mut() {
            pending.expires_at = chrono::Utc::now() - chrono::Duration::minutes(1);
        }
        let fixed = Fixed::new(ContextualDecision::not_contextual());
        let r = resolver_with(fixed.clone()).resolve("sí", &mut ctx).await;

        assert!(r.is_none());
        assert!(ctx.pending_action.is_some());
        assert_eq!(fixed.seen_pending.lock().unwrap().as_slice(), ["ninguna"]);
    }

    #[tokio::test]
    async fn modify_subtasks_keeps_pending_in_sync() {
        let mut ctx = reviewing_context();
        let r = keyword_resolver()
            .resolve("quita la 2 y añade documentar", &mut ctx)
            .await
            .unwrap();

        let message = r.message.unwrap();
        assert!(message.contains("Quitadas: implementar"));
        assert!(message.contains("Añadidas: documentar"));
        assert_eq!(r.contextual_action.as_deref(), Some("modify_subtasks"));

        let expected = vec!["diseñar", "probar", "desplegar", "documentar"];
        assert_eq!(ctx.active_entity.as_ref().unwrap().suggested_items, expected);
        match &ctx.pending_action.as_ref().unwrap().kind {
            PendingKind::CreateSubtasks { items } => assert_eq!(items, &expected),
            other => panic!("unexpected pending kind: {other:?}"),
        }
    }

    #[tokio::test]
    async fn edits_after_commit_change_committed_items() {
        let mut ctx = reviewing_context();
        let resolver = keyword_resolver();
        resolver.resolve("sí", &mut ctx).await.unwrap();

        let r = resolver.resolve("quita la 1", &mut ctx).await.unwrap();

        assert!(r.message.unwrap().contains("Quitadas: diseñar"));
        let entity = ctx.active_entity.as_ref().unwrap();
        assert_eq!(entity.items, vec!["implementar", "probar", "desplegar"]);
        assert!(entity.suggested_items.is_empty());
    }

    #[tokio::test]
    async fn confirm_skips_pending_bound_to_another_entity() {
        let mut ctx = reviewing_context();
        if let Some(pending) = ctx.pending_action.as_mut() {
            pending.target_id = Some("t-1".into());
        }
        ctx.active_entity = Some(
            ActiveEntity::new(EntityDetails::project(None), "Portal")
                .with_id("p-1")
                .with_suggested_items(vec!["Validar idea".into()]),
        );

        let r = keyword_resolver().resolve("sí", &mut ctx).await.unwrap();

        assert_eq!(r.intent, UserIntent::Unknown);
        assert_eq!(r.message.as_deref(), Some(STALE_PENDING_REPLY));
        assert!(ctx.pending_action.is_none());
        assert_eq!(ctx.state, ConversationState::Idle);
        assert!(ctx.active_entity.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn modify_without_entity_reports_error() {
        let mut ctx = ConversationContext::new("ana");
        ctx.set_pending_action(PendingAction::new(
            PendingKind::Custom {
                action_type: "log_meal".into(),
                data: serde_json::Value::Null,
            },
            EntityType::Nutrition,
        ));
        let fixed = Fixed::new(
            ContextualDecision::action(ContextualAction::ModifySubtasks).with_references("1"),
        );
        let r = resolver_with(fixed).resolve("quita la 1", &mut ctx).await.unwrap();

        assert_eq!(r.contextual_action.as_deref(), Some("error"));
        assert_eq!(
            r.message.as_deref(),
            Some("No hay tarea activa para modificar subtareas.")
        );
    }

    #[tokio::test]
    async fn blockers_are_added_and_removed() {
        let resolver = keyword_resolver();
        let mut ctx = task_context();

        let r = resolver
            .resolve("añade blocker: esperando al cliente", &mut ctx)
            .await
            .unwrap();
        assert_eq!(
            r.message.as_deref(),
            Some("Blocker añadido a 'Migrar API':\n  esperando al cliente")
        );

        let r = resolver.resolve("quita el blocker", &mut ctx).await.unwrap();
        assert_eq!(
            r.message.as_deref(),
            Some("Blocker quitado de 'Migrar API': esperando al cliente")
        );

        let r = resolver.resolve("quita el blocker", &mut ctx).await.unwrap();
        assert_eq!(r.message.as_deref(), Some("'Migrar API' no tiene blockers."));
    }

    #[tokio::test]
    async fn empty_blocker_asks_for_input() {
        let mut ctx = task_context();
        let fixed = Fixed::new(ContextualDecision::action(ContextualAction::AddBlocker));
        let r = resolver_with(fixed).resolve("pon blocker", &mut ctx).await.unwrap();

        assert_eq!(r.contextual_action.as_deref(), Some("awaiting_input"));
        assert_eq!(ctx.state, ConversationState::AwaitingInput);
    }

    #[tokio::test]
    async fn priority_change_and_prompt() {
        let mut ctx = task_context();
        let fixed = Fixed::new(ContextualDecision::action(ContextualAction::ChangePriority));
        let resolver = resolver_with(fixed);

        let r = resolver.resolve("ponla urgente", &mut ctx).await.unwrap();
        assert_eq!(
            r.message.as_deref(),
            Some("Prioridad de 'Migrar API' cambiada a: Urgente")
        );
        assert_eq!(
            ctx.active_entity.as_ref().unwrap().details.priority(),
            Some(Priority::Urgent)
        );

        let r = resolver.resolve("cámbiale la prioridad", &mut ctx).await.unwrap();
        assert_eq!(ctx.state, ConversationState::AwaitingSelection);
        let rows = r.suggested_choices.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0].action, "priority_urgente");
        assert_eq!(rows[1][1].action, "priority_baja");
    }

    #[tokio::test]
    async fn reschedule_applies_date() {
        let mut ctx = task_context();
        let fixed = Fixed::new(ContextualDecision::action(ContextualAction::Reschedule));
        let r = resolver_with(fixed).resolve("muévela a pasado mañana", &mut ctx).await.unwrap();

        let expected = date_from_text("pasado", Local::now().date_naive()).unwrap();
        assert_eq!(
            r.message.unwrap(),
            format!("'Migrar API' reprogramada para: {}", expected.format("%d/%m"))
        );
        match ctx.active_entity.unwrap().details {
            EntityDetails::Task { scheduled_for, .. } => assert_eq!(scheduled_for, Some(expected)),
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reschedule_without_date_asks() {
        let mut ctx = task_context();
        let fixed = Fixed::new(ContextualDecision::action(ContextualAction::RequestExtension));
        let r = resolver_with(fixed).resolve("necesito más tiempo", &mut ctx).await.unwrap();

        assert_eq!(ctx.state, ConversationState::AwaitingInput);
        assert!(r.message.unwrap().starts_with("¿Para cuándo?"));
    }

    #[tokio::test]
    async fn edit_sets_state_without_mutation() {
        let mut ctx = task_context();
        let before = ctx.active_entity.clone();
        let r = keyword_resolver().resolve("edítala", &mut ctx).await.unwrap();

        assert_eq!(ctx.state, ConversationState::EditingEntity);
        assert_eq!(ctx.active_entity, before);
        assert_eq!(r.suggested_choices.unwrap().concat().len(), 5);
    }

    #[tokio::test]
    async fn delete_asks_then_confirm_removes() {
        let resolver = keyword_resolver();
        let mut ctx = task_context();

        let r = resolver.resolve("elimínala", &mut ctx).await.unwrap();
        assert_eq!(r.message.as_deref(), Some("¿Eliminar 'Migrar API'?"));
        assert_eq!(ctx.state, ConversationState::AwaitingConfirmation);
        assert!(ctx.active_entity.is_some());
        assert_eq!(ctx.live_pending_action().unwrap().action_type(), "delete_entity");

        let r = resolver.resolve("sí", &mut ctx).await.unwrap();
        assert_eq!(r.message.as_deref(), Some("Migrar API eliminado."));
        assert_eq!(r.intent, UserIntent::TaskDelete);
        assert!(ctx.active_entity.is_none());
        assert!(ctx.pending_action.is_none());
    }

    #[tokio::test]
    async fn custom_pending_confirms_generically() {
        let mut ctx = ConversationContext::new("ana");
        ctx.set_pending_action(PendingAction::new(
            PendingKind::Custom {
                action_type: "log_meal".into(),
                data: serde_json::json!({"meal": "tacos"}),
            },
            EntityType::Nutrition,
        ));
        let r = keyword_resolver().resolve("dale", &mut ctx).await.unwrap();
        assert_eq!(r.message.as_deref(), Some("Acción completada."));
        assert!(ctx.pending_action.is_none());
    }

    #[tokio::test]
    async fn classifier_failure_is_not_contextual() {
        let mut ctx = task_context();
        let r = resolver_with(Fixed::failing()).resolve("lo que sea", &mut ctx).await;
        assert!(r.is_none());
    }

    #[tokio::test]
    async fn confirm_decision_without_pending_falls_through() {
        let mut ctx = task_context();
        let fixed = Fixed::new(ContextualDecision::action(ContextualAction::Confirm));
        assert!(resolver_with(fixed).resolve("de acuerdo", &mut ctx).await.is_none());
    }

    #[test]
    fn replacing_pending_returns_previous_into_log_only() {
        let mut ctx = reviewing_context();
        replace_pending(
            &mut ctx,
            PendingAction::new(PendingKind::DeleteEntity, EntityType::Project),
        );
        assert_eq!(ctx.pending_action.unwrap().action_type(), "delete_entity");
    }
}
