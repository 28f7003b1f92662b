//! Parley dispatch kernel.
//!
//! Turns a user message into a [`Response`] while keeping the user's
//! conversation state current:
//!
//! - **[`orchestrator`]** -- [`Dispatcher`], the per-turn pipeline, and its
//!   [`DispatchConfig`].
//! - **[`resolver`]** -- follow-up handling ("sí", "quita la 2", "ponla
//!   urgente") applied directly to the active entity and pending action.
//! - **[`registry`]** -- intent → [`Enricher`] routing with timeouts and
//!   panic isolation.
//! - **[`enrichers`]** -- built-in task, project, finance, fitness and planning
//!   enrichers.
//! - **[`locks`]** -- per-user async mutexes backed by [`dashmap::DashMap`].
//! - **[`ordinal`]**, **[`vocabulary`]** -- Spanish item references, yes/no
//!   words, priorities, relative dates and list edits.
//! - **[`error`]** -- [`KernelError`] via [`thiserror`].
//!
//! Classifiers come from `parley-intent` and storage from `parley-store`;
//! both are injected into [`Dispatcher::new`].

pub mod enricher;
pub mod enrichers;
pub mod error;
pub mod locks;
pub mod ordinal;
pub mod orchestrator;
pub mod registry;
pub mod resolver;
pub mod response;
pub mod vocabulary;

pub use enricher::{
    Complexity, Enricher, EnrichmentRequest, EnrichmentResult, ReminderSuggestion, SuggestedDates,
};
pub use enrichers::{
    FinanceEnricher, FinanceProfile, FitnessEnricher, PlanningEnricher, ProjectEnricher,
    TaskEnricher, default_registry,
};
pub use error::{KernelError, Result};
pub use locks::UserLocks;
pub use orchestrator::{DispatchConfig, Dispatcher};
pub use registry::{EnricherRegistry, RegistryStats};
pub use resolver::ContextualResolver;
pub use response::{ERROR_ACTION, Response};
