//! Integration tests for the parley-kernel crate.
//!
//! These drive [`Dispatcher::process`] end to end against a real SQLite
//! session store, the keyword classifier and the built-in enrichers:
//! multi-turn follow-ups, per-user serialization, the single read/write
//! per turn, and degradation when classifiers or storage fail.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parley_intent::{
    Classification, IntentClassifier, IntentError, KeywordClassifier, UserIntent,
};
use parley_kernel::{DispatchConfig, Dispatcher, default_registry};
use parley_store::{
    ActiveEntity, ConversationContext, ConversationState, Database, EntityDetails, EntityType,
    PendingKind, Role, SessionStore, SqliteSessionStore, StoreError, StoreResult, default_context_ttl,
};

// ═══════════════════════════════════════════════════════════════════════
//  Test doubles
// ═══════════════════════════════════════════════════════════════════════

/// Wraps a real store, counting calls and optionally failing saves.
struct CountingStore {
    inner: SqliteSessionStore,
    gets: AtomicUsize,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl CountingStore {
    async fn new() -> Arc<Self> {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        Arc::new(Self {
            inner: SqliteSessionStore::open(db, default_context_ttl()).await,
            gets: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            fail_saves: AtomicBool::new(false),
        })
    }

    fn counts(&self) -> (usize, usize) {
        (self.gets.load(Ordering::SeqCst), self.saves.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl SessionStore for CountingStore {
    async fn get(&self, user_id: &str) -> ConversationContext {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(user_id).await
    }

    async fn save(&self, ctx: &ConversationContext) -> StoreResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidArgument("disk full".into()));
        }
        self.inner.save(ctx).await
    }

    async fn clear(&self, user_id: &str) -> StoreResult<()> {
        self.inner.clear(user_id).await
    }

    async fn cleanup_expired(&self) -> StoreResult<usize> {
        self.inner.cleanup_expired().await
    }

    async fn expired_user_ids(&self) -> Vec<String> {
        self.inner.expired_user_ids().await
    }

    async fn reset_if_expired(&self, user_id: &str) -> StoreResult<bool> {
        self.inner.reset_if_expired(user_id).await
    }

    async fn len(&self) -> usize {
        self.inner.len().await
    }
}

/// Classifies everything as a note after a delay, widening the window in
/// which two turns for the same user could interleave.
struct SlowNotes {
    delay: Duration,
}

#[async_trait]
impl IntentClassifier for SlowNotes {
    async fn classify(&self, _text: &str, _history: &str) -> Result<Classification, IntentError> {
        tokio::time::sleep(self.delay).await;
        Ok(Classification::new(UserIntent::Note, 0.9, HashMap::new()))
    }
}

struct Broken;

#[async_trait]
impl IntentClassifier for Broken {
    async fn classify(&self, _text: &str, _history: &str) -> Result<Classification, IntentError> {
        Err(IntentError::ParseFailed {
            reason: "model returned prose".into(),
        })
    }
}

fn keyword() -> Arc<KeywordClassifier> {
    Arc::new(KeywordClassifier::new().unwrap())
}

fn dispatcher_with(
    store: Arc<dyn SessionStore>,
    classifier: Arc<dyn IntentClassifier>,
) -> Dispatcher {
    let config = DispatchConfig::default();
    let registry = Arc::new(default_registry(config.enricher_timeout()).unwrap());
    Dispatcher::new(store, registry, classifier, keyword(), config).unwrap()
}

fn dispatcher(store: Arc<dyn SessionStore>) -> Dispatcher {
    dispatcher_with(store, keyword())
}

// ═══════════════════════════════════════════════════════════════════════
//  Multi-turn follow-ups
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_remove_confirm_commits_edited_subtasks() {
    let store = CountingStore::new().await;
    let d = dispatcher(store.clone());

    let created = d
        .process("ana", "crear tarea migrar el sistema de pagos")
        .await
        .unwrap();
    assert_eq!(created.intent, UserIntent::TaskCreate);
    assert!(!created.already_handled);
    assert!(
        created
            .message
            .as_deref()
            .unwrap()
            .starts_with("Tarea creada: migrar el sistema de pagos")
    );
    assert!(created.enrichment.is_some());
    assert_eq!(created.suggested_choices.as_ref().unwrap().len(), 2);

    let ctx = store.get("ana").await;
    assert_eq!(ctx.state, ConversationState::ReviewingSubtasks);
    let suggested = ctx.active_entity.as_ref().unwrap().suggested_items.clone();
    assert_eq!(suggested.len(), 5);

    let expected: Vec<String> = suggested
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 1)
        .map(|(_, s)| s.clone())
        .collect();

    let edited = d.process("ana", "quita la 2").await.unwrap();
    assert!(edited.already_handled);
    assert_eq!(edited.contextual_action.as_deref(), Some("modify_subtasks"));

    // List edits keep the confirmation open.
    let ctx = store.get("ana").await;
    assert_eq!(ctx.active_entity.as_ref().unwrap().suggested_items, expected);
    match ctx.pending_action.as_ref().map(|p| &p.kind) {
        Some(PendingKind::CreateSubtasks { items }) => assert_eq!(items, &expected),
        other => panic!("expected create_subtasks pending, got {other:?}"),
    }
    assert_eq!(ctx.state, ConversationState::ReviewingSubtasks);

    let confirmed = d.process("ana", "sí").await.unwrap();
    assert!(confirmed.already_handled);
    assert_eq!(confirmed.contextual_action.as_deref(), Some("confirm"));
    assert!(confirmed.message.as_deref().unwrap().starts_with("Subtareas añadidas:"));

    let ctx = store.get("ana").await;
    let entity = ctx.active_entity.as_ref().unwrap();
    assert_eq!(entity.items, expected);
    assert!(entity.suggested_items.is_empty());
    assert!(ctx.pending_action.is_none());
    assert_eq!(ctx.state, ConversationState::Idle);

    // Three turns, each a user line and a reply.
    assert_eq!(ctx.history.len(), 6);
    assert_eq!(ctx.history[0].intent_tag.as_deref(), Some("task_create"));
    assert_eq!(ctx.history[5].role, Role::Assistant);
}

#[tokio::test]
async fn ordinal_words_remove_subtasks() {
    let store = CountingStore::new().await;
    let d = dispatcher(store.clone());

    d.process("ana", "crear tarea migrar el sistema de pagos")
        .await
        .unwrap();
    let suggested = store.get("ana").await.active_entity.unwrap().suggested_items;

    let edited = d.process("ana", "quita la segunda").await.unwrap();
    assert!(edited.already_handled);
    assert_eq!(edited.contextual_action.as_deref(), Some("modify_subtasks"));

    let remaining = store.get("ana").await.active_entity.unwrap().suggested_items;
    assert_eq!(remaining.len(), suggested.len() - 1);
    assert!(!remaining.contains(&suggested[1]));
}

#[tokio::test]
async fn new_project_drops_previous_task_confirmation() {
    let store = CountingStore::new().await;
    let d = dispatcher(store.clone());

    d.process("ana", "crear tarea migrar el sistema de pagos")
        .await
        .unwrap();
    let project = d.process("ana", "nuevo proyecto Portal").await.unwrap();
    assert_eq!(project.intent, UserIntent::ProjectCreate);

    let ctx = store.get("ana").await;
    let entity = ctx.active_entity.as_ref().unwrap();
    assert_eq!(entity.entity_type(), EntityType::Project);
    assert!(ctx.pending_action.is_none());
    assert_eq!(ctx.state, ConversationState::Idle);
    let starter_tasks = entity.suggested_items.clone();

    // Nothing is pending, so "sí" is not a confirmation of the old subtasks.
    let reply = d.process("ana", "sí").await.unwrap();
    assert_ne!(reply.intent, UserIntent::TaskCreate);

    let ctx = store.get("ana").await;
    let entity = ctx.active_entity.as_ref().unwrap();
    assert_eq!(entity.name, "Portal");
    assert!(entity.items.iter().all(|i| !i.contains("sistema de pagos")));
    assert_eq!(entity.suggested_items, starter_tasks);
}

#[tokio::test]
async fn reject_keeps_entity() {
    let store = CountingStore::new().await;
    let d = dispatcher(store.clone());

    d.process("ana", "crear tarea migrar el sistema de pagos")
        .await
        .unwrap();
    let rejected = d.process("ana", "no").await.unwrap();
    assert_eq!(rejected.message.as_deref(), Some("Entendido, cancelado."));

    let ctx = store.get("ana").await;
    assert!(ctx.pending_action.is_none());
    assert!(ctx.active_entity.as_ref().unwrap().items.is_empty());
}

#[tokio::test]
async fn follow_up_without_entity_is_classified_fresh() {
    let store = CountingStore::new().await;
    let d = dispatcher(store);

    let response = d.process("ana", "hola").await.unwrap();
    assert!(!response.already_handled);
    assert_eq!(response.intent, UserIntent::Greeting);
    assert_eq!(response.message.as_deref(), Some("¡Hola! ¿En qué te ayudo?"));
}

#[tokio::test]
async fn enriched_intent_without_reply_records_placeholder() {
    let store = CountingStore::new().await;
    let d = dispatcher(store.clone());

    let response = d
        .process("ana", "me quiero comprar unos audífonos de $1,500")
        .await
        .unwrap();
    assert_eq!(response.intent, UserIntent::ExpenseAnalyze);
    assert!(response.message.is_none());
    let analysis = response.enrichment.unwrap().financial_analysis.unwrap();
    assert_eq!(analysis["amount"], "1500");

    let ctx = store.get("ana").await;
    assert_eq!(ctx.history.last().unwrap().text, "[expense_analyze]");
}

#[tokio::test]
async fn workout_log_is_enriched_with_sets() {
    let store = CountingStore::new().await;
    let d = dispatcher(store);

    let response = d.process("ana", "entrené press banca 60kg 3x8").await.unwrap();
    assert_eq!(response.intent, UserIntent::GymLog);
    let enrichment = response.enrichment.unwrap();
    assert_eq!(enrichment.enricher_name, "FitnessEnricher");
    let workout = enrichment.workout_data.unwrap();
    assert_eq!(workout["exercises"][0]["name"], "Press Banca");
    assert_eq!(workout["total_sets"], 3);
}

#[tokio::test]
async fn prioritize_ranks_tasks_from_the_message() {
    let store = CountingStore::new().await;
    let d = dispatcher(store);

    let response = d
        .process("ana", "prioriza: migrar el sistema de pagos, entrega urgente del reporte")
        .await
        .unwrap();
    assert_eq!(response.intent, UserIntent::Prioritize);
    let planning = response.enrichment.unwrap().planning_data.unwrap();
    assert_eq!(planning["ranked_tasks"][0], "entrega urgente del reporte");
}

// ═══════════════════════════════════════════════════════════════════════
//  Storage discipline
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn each_turn_reads_and_writes_once() {
    let store = CountingStore::new().await;
    let d = dispatcher(store.clone());

    d.process("ana", "crear tarea migrar el sistema de pagos")
        .await
        .unwrap();
    assert_eq!(store.counts(), (1, 1));

    // Resolver path.
    d.process("ana", "quita la 1").await.unwrap();
    assert_eq!(store.counts(), (2, 2));

    // Classifier path with no enricher.
    d.process("ana", "hola").await.unwrap();
    assert_eq!(store.counts(), (3, 3));
}

#[tokio::test]
async fn save_failure_propagates() {
    let store = CountingStore::new().await;
    let d = dispatcher(store.clone());
    store.fail_saves.store(true, Ordering::SeqCst);

    let err = d.process("ana", "hola").await.unwrap_err();
    assert!(err.to_string().contains("disk full"));
    assert!(store.inner.get("ana").await.history.is_empty());
}

#[tokio::test]
async fn classifier_failure_degrades_to_unknown() {
    let store = CountingStore::new().await;
    let d = dispatcher_with(store, Arc::new(Broken));

    let response = d.process("ana", "crear tarea algo").await.unwrap();
    assert_eq!(response.intent, UserIntent::Unknown);
    assert_eq!(response.confidence, 0.0);
    assert_eq!(
        response.message.as_deref(),
        Some("No entendí tu mensaje. ¿Puedes reformularlo?")
    );
}

// ═══════════════════════════════════════════════════════════════════════
//  Concurrency
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_user_turns_do_not_lose_updates() {
    let store = CountingStore::new().await;
    let d = Arc::new(dispatcher_with(
        store.clone(),
        Arc::new(SlowNotes {
            delay: Duration::from_millis(30),
        }),
    ));

    let turns: Vec<_> = (0..4)
        .map(|i| {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.process("ana", &format!("nota {i}")).await })
        })
        .collect();
    for turn in turns {
        turn.await.unwrap().unwrap();
    }

    let ctx = store.get("ana").await;
    assert_eq!(ctx.history.len(), 8);
    let mut notes: Vec<_> = ctx
        .history
        .iter()
        .filter(|h| h.role == Role::User)
        .map(|h| h.text.clone())
        .collect();
    notes.sort();
    assert_eq!(notes, ["nota 0", "nota 1", "nota 2", "nota 3"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_users_run_in_parallel() {
    let store = CountingStore::new().await;
    let d = Arc::new(dispatcher_with(
        store.clone(),
        Arc::new(SlowNotes {
            delay: Duration::from_millis(200),
        }),
    ));

    let started = std::time::Instant::now();
    let turns: Vec<_> = ["ana", "luis", "eva"]
        .into_iter()
        .map(|user| {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.process(user, "nota").await })
        })
        .collect();
    for turn in turns {
        turn.await.unwrap().unwrap();
    }

    assert!(started.elapsed() < Duration::from_millis(550));
    assert_eq!(store.len().await, 3);
}

// ═══════════════════════════════════════════════════════════════════════
//  Expiry sweep
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn sweep_resets_expired_contexts_once() {
    let store = CountingStore::new().await;
    let d = dispatcher(store.clone());

    let mut stale = ConversationContext::new("ana");
    stale.set_active_entity(ActiveEntity::new(EntityDetails::task(), "vieja"));
    stale.last_activity = Utc::now() - chrono::Duration::hours(2);
    store.inner.save(&stale).await.unwrap();
    store
        .inner
        .save(&ConversationContext::new("luis"))
        .await
        .unwrap();

    assert_eq!(d.cleanup_expired().await.unwrap(), 1);
    assert_eq!(d.cleanup_expired().await.unwrap(), 0);

    let ctx = store.get("ana").await;
    assert!(ctx.active_entity.is_none());
    assert_eq!(store.len().await, 2);
}
