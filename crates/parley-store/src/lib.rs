//! # parley-store
//!
//! Conversation state for Parley.
//!
//! Holds the per-user [`ConversationContext`] model and the
//! [`SessionStore`] that keeps one context per user, written through to
//! SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  SessionStore (trait)                   │
//! │  SqliteSessionStore (DashMap working    │
//! │  set, lazy TTL reset, bulk load)        │
//! ├─────────────────────────────────────────┤
//! │  Database (rusqlite WAL, blocking pool) │
//! │  Migrations (versioned, transactional)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use parley_store::{Database, SessionStore, SqliteSessionStore, default_context_ttl};
//!
//! let db = Database::open_and_migrate("data/parley.db").await?;
//! let store = SqliteSessionStore::open(db, default_context_ttl()).await;
//! let mut ctx = store.get("user-1").await;
//! store.save(&ctx).await?;
//! ```

pub mod context;
pub mod db;
pub mod error;
pub mod migration;
pub mod session;

// ── re-exports ───────────────────────────────────────────────────────

pub use context::{
    ActiveEntity, CONTEXT_SCHEMA_VERSION, Choice, ConversationContext, ConversationState,
    EntityDetails, EntityType, HistoryEntry, MAX_HISTORY, PendingAction, PendingKind, Priority,
    Role, default_context_ttl, truncate_chars,
};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use session::{SessionStore, SqliteSessionStore};
