//! Per-user session storage.
//!
//! [`SessionStore`] is the seam the dispatcher depends on. The shipped
//! implementation, [`SqliteSessionStore`], keeps every context in a
//! `DashMap` working set and writes through to the `conversation_contexts`
//! table on each save.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use crate::context::{CONTEXT_SCHEMA_VERSION, ConversationContext};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Trait
// ═══════════════════════════════════════════════════════════════════════

/// Storage for one [`ConversationContext`] per user.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Return the user's context, creating an empty one if needed. An
    /// expired context is reset before it is returned.
    async fn get(&self, user_id: &str) -> ConversationContext;

    /// Persist `ctx`. The working set is only updated once the write
    /// succeeded.
    async fn save(&self, ctx: &ConversationContext) -> StoreResult<()>;

    /// Replace the user's context with a fresh one.
    async fn clear(&self, user_id: &str) -> StoreResult<()>;

    /// Replace every expired context with a fresh one. Returns how many
    /// were replaced.
    async fn cleanup_expired(&self) -> StoreResult<usize>;

    /// Users whose context is currently expired.
    async fn expired_user_ids(&self) -> Vec<String>;

    /// Replace the user's context with a fresh one if it is still expired.
    async fn reset_if_expired(&self, user_id: &str) -> StoreResult<bool>;

    /// Number of contexts held.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  SqliteSessionStore
// ═══════════════════════════════════════════════════════════════════════

/// A stored row ready for the blocking pool.
struct EncodedContext {
    user_id: String,
    schema_version: u32,
    payload: String,
    last_activity: i64,
}

impl EncodedContext {
    fn from_context(ctx: &ConversationContext) -> StoreResult<Self> {
        Ok(Self {
            user_id: ctx.user_id.clone(),
            schema_version: CONTEXT_SCHEMA_VERSION,
            payload: serde_json::to_string(ctx)?,
            last_activity: ctx.last_activity.timestamp(),
        })
    }
}

const UPSERT_SQL: &str = "INSERT INTO conversation_contexts \
     (user_id, schema_version, payload, last_activity, updated_at) \
     VALUES (?1, ?2, ?3, ?4, ?5) \
     ON CONFLICT(user_id) DO UPDATE SET \
        schema_version = excluded.schema_version, \
        payload = excluded.payload, \
        last_activity = excluded.last_activity, \
        updated_at = excluded.updated_at";

fn upsert(conn: &rusqlite::Connection, row: &EncodedContext, now: i64) -> StoreResult<()> {
    conn.execute(
        UPSERT_SQL,
        rusqlite::params![
            row.user_id,
            row.schema_version,
            row.payload,
            row.last_activity,
            now
        ],
    )?;
    Ok(())
}

/// `DashMap` working set written through to SQLite.
pub struct SqliteSessionStore {
    db: Database,
    contexts: DashMap<String, ConversationContext>,
    ttl: Duration,
}

impl SqliteSessionStore {
    /// Open the store and load every persisted context.
    ///
    /// Never fails: if the table cannot be read the store starts empty and
    /// the failure is logged. Rows that cannot be decoded, or that were
    /// written by a newer schema, are skipped.
    pub async fn open(db: Database, ttl: Duration) -> Self {
        let contexts = DashMap::new();

        match Self::load_rows(&db).await {
            Ok(rows) => {
                let total = rows.len();
                for (user_id, schema_version, payload) in rows {
                    match decode(&user_id, schema_version, &payload) {
                        Ok(ctx) => {
                            contexts.insert(user_id, ctx);
                        }
                        Err(e) => {
                            warn!(user_id = %user_id, error = %e, "skipping stored context");
                        }
                    }
                }
                info!(loaded = contexts.len(), total, "conversation contexts loaded");
            }
            Err(e) => {
                warn!(error = %e, "failed to load conversation contexts, starting empty");
            }
        }

        Self { db, contexts, ttl }
    }

    /// Inactivity TTL after which a context is reset.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn load_rows(db: &Database) -> StoreResult<Vec<(String, u32, String)>> {
        db.execute(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id, schema_version, payload FROM conversation_contexts")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn persist(&self, ctx: &ConversationContext) -> StoreResult<()> {
        let row = EncodedContext::from_context(ctx)?;
        self.db
            .execute(move |conn| upsert(conn, &row, Utc::now().timestamp()))
            .await
    }
}

fn decode(user_id: &str, schema_version: u32, payload: &str) -> StoreResult<ConversationContext> {
    if schema_version > CONTEXT_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            found: schema_version,
            supported: CONTEXT_SCHEMA_VERSION,
        });
    }
    let ctx: ConversationContext = serde_json::from_str(payload)?;
    if ctx.user_id != user_id {
        return Err(StoreError::InvalidArgument(format!(
            "row key {user_id} holds context for {}",
            ctx.user_id
        )));
    }
    Ok(ctx)
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, user_id: &str) -> ConversationContext {
        let mut entry = self
            .contexts
            .entry(user_id.to_string())
            .or_insert_with(|| ConversationContext::new(user_id));

        if entry.is_expired(self.ttl) {
            debug!(user_id, "context expired, resetting");
            entry.reset();
        }

        entry.value().clone()
    }

    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    async fn save(&self, ctx: &ConversationContext) -> StoreResult<()> {
        self.persist(ctx).await?;
        self.contexts.insert(ctx.user_id.clone(), ctx.clone());
        debug!("context saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear(&self, user_id: &str) -> StoreResult<()> {
        self.save(&ConversationContext::new(user_id)).await
    }

    #[instrument(skip(self))]
    async fn cleanup_expired(&self) -> StoreResult<usize> {
        let fresh: Vec<ConversationContext> = self
            .expired_user_ids()
            .await
            .into_iter()
            .map(ConversationContext::new)
            .collect();

        if fresh.is_empty() {
            return Ok(0);
        }

        let rows = fresh
            .iter()
            .map(EncodedContext::from_context)
            .collect::<StoreResult<Vec<_>>>()?;

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let now = Utc::now().timestamp();
                for row in &rows {
                    upsert(&tx, row, now)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        let count = fresh.len();
        for ctx in fresh {
            self.contexts.insert(ctx.user_id.clone(), ctx);
        }

        info!(count, "expired contexts cleaned up");
        Ok(count)
    }

    async fn expired_user_ids(&self) -> Vec<String> {
        let now = Utc::now();
        self.contexts
            .iter()
            .filter(|entry| entry.value().is_expired_at(now, self.ttl))
            .map(|entry| entry.key().clone())
            .collect()
    }

    #[instrument(skip(self))]
    async fn reset_if_expired(&self, user_id: &str) -> StoreResult<bool> {
        let expired = self
            .contexts
            .get(user_id)
            .is_some_and(|ctx| ctx.is_expired(self.ttl));

        if !expired {
            return Ok(false);
        }

        self.clear(user_id).await?;
        debug!("expired context reset");
        Ok(true)
    }

    async fn len(&self) -> usize {
        self.contexts.len()
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ActiveEntity, EntityDetails, EntityType, PendingAction, PendingKind};
    use crate::context::{ConversationState, Role};
    use std::collections::HashMap;

    async fn setup_store() -> SqliteSessionStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        SqliteSessionStore::open(db, Duration::minutes(30)).await
    }

    fn busy_context(user_id: &str) -> ConversationContext {
        let mut ctx = ConversationContext::new(user_id);
        ctx.add_message(Role::User, "crear tarea", None, HashMap::new());
        ctx.set_active_entity(ActiveEntity::new(EntityDetails::task(), "Revisar API"));
        ctx.set_pending_action(PendingAction::new(
            PendingKind::DeleteEntity,
            EntityType::Task,
        ));
        ctx.state = ConversationState::AwaitingConfirmation;
        ctx
    }

    #[tokio::test]
    async fn get_creates_empty_context() {
        let store = setup_store().await;
        assert!(store.is_empty().await);

        let ctx = store.get("u1").await;
        assert_eq!(ctx.user_id, "u1");
        assert_eq!(ctx.state, ConversationState::Idle);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn save_then_get_returns_saved_state() {
        let store = setup_store().await;
        store.save(&busy_context("u1")).await.unwrap();

        let ctx = store.get("u1").await;
        assert_eq!(ctx.active_entity.unwrap().name, "Revisar API");
        assert!(ctx.pending_action.is_some());
    }

    #[tokio::test]
    async fn expired_context_is_reset_on_get() {
        let store = setup_store().await;
        let mut ctx = busy_context("u1");
        ctx.last_activity = Utc::now() - Duration::minutes(45);
        store.save(&ctx).await.unwrap();

        let first = store.get("u1").await;
        assert!(first.active_entity.is_none());
        assert!(first.pending_action.is_none());
        assert_eq!(first.state, ConversationState::Idle);
        assert_eq!(first.history.len(), 1);

        let second = store.get("u1").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cleanup_resets_only_expired() {
        let store = setup_store().await;

        let mut stale = busy_context("stale");
        stale.last_activity = Utc::now() - Duration::hours(2);
        store.save(&stale).await.unwrap();
        store.save(&busy_context("fresh")).await.unwrap();

        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
        assert_eq!(store.cleanup_expired().await.unwrap(), 0);

        assert!(store.get("stale").await.history.is_empty());
        assert!(store.get("fresh").await.active_entity.is_some());
    }

    #[tokio::test]
    async fn reset_if_expired_is_idempotent() {
        let store = setup_store().await;
        let mut stale = busy_context("u1");
        stale.last_activity = Utc::now() - Duration::hours(1);
        store.save(&stale).await.unwrap();

        assert_eq!(store.expired_user_ids().await, vec!["u1".to_string()]);
        assert!(store.reset_if_expired("u1").await.unwrap());
        assert!(!store.reset_if_expired("u1").await.unwrap());
        assert!(!store.reset_if_expired("nobody").await.unwrap());
    }

    #[tokio::test]
    async fn clear_replaces_context() {
        let store = setup_store().await;
        store.save(&busy_context("u1")).await.unwrap();
        store.clear("u1").await.unwrap();

        let ctx = store.get("u1").await;
        assert!(ctx.history.is_empty());
        assert!(ctx.active_entity.is_none());
    }

    #[tokio::test]
    async fn failed_save_leaves_working_set_untouched() {
        let store = setup_store().await;
        store.save(&busy_context("u1")).await.unwrap();

        store
            .db
            .execute(|conn| {
                conn.execute_batch("DROP TABLE conversation_contexts;")?;
                Ok(())
            })
            .await
            .unwrap();

        let result = store.save(&ConversationContext::new("u1")).await;
        assert!(matches!(result, Err(StoreError::Sqlite(_))));
        assert!(store.get("u1").await.active_entity.is_some());
    }

    #[tokio::test]
    async fn load_failure_starts_empty() {
        // No migrations: the table does not exist.
        let db = Database::open_in_memory().unwrap();
        let store = SqliteSessionStore::open(db, Duration::minutes(30)).await;
        assert_eq!(store.len().await, 0);
    }

    #[test]
    fn decode_rejects_future_schema() {
        let payload = serde_json::to_string(&ConversationContext::new("u1")).unwrap();
        let err = decode("u1", CONTEXT_SCHEMA_VERSION + 1, &payload).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedSchema { .. }));
    }

    #[test]
    fn decode_rejects_mismatched_key() {
        let payload = serde_json::to_string(&ConversationContext::new("u1")).unwrap();
        assert!(decode("u2", CONTEXT_SCHEMA_VERSION, &payload).is_err());
    }
}
