//! Built-in enrichers.
//!
//! | Enricher | Intents |
//! |----------|---------|
//! | [`TaskEnricher`] | `task_create`, `task_update`, `task_status_change` |
//! | [`ProjectEnricher`] | `project_create`, `project_update`, `project_delete`, `project_query` |
//! | [`FinanceEnricher`] | `expense_analyze`, `expense_log`, `debt_query` |
//! | [`FitnessEnricher`] | `gym_log`, `gym_query`, `nutrition_log`, `nutrition_query` |
//! | [`PlanningEnricher`] | `plan_today`, `plan_tomorrow`, `plan_week`, `prioritize`, `reschedule`, `workload_check`, `study_session` |

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::registry::EnricherRegistry;

pub mod finance;
pub mod fitness;
pub mod planning;
pub mod project;
pub mod task;

pub use finance::{FinanceEnricher, FinanceProfile};
pub use fitness::FitnessEnricher;
pub use planning::PlanningEnricher;
pub use project::ProjectEnricher;
pub use task::TaskEnricher;

/// A registry with every built-in enricher, each call bounded by `timeout`.
pub fn default_registry(timeout: Duration) -> Result<EnricherRegistry> {
    let mut registry = EnricherRegistry::new().with_timeout(timeout);
    registry.register(Arc::new(TaskEnricher::new()));
    registry.register(Arc::new(ProjectEnricher::new()?));
    registry.register(Arc::new(FinanceEnricher::new()?));
    registry.register(Arc::new(FitnessEnricher::new()?));
    registry.register(Arc::new(PlanningEnricher::new()?));
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use parley_intent::UserIntent;

    use super::*;

    #[test]
    fn default_registry_claims_every_domain() {
        let registry = default_registry(Duration::from_secs(1)).unwrap();
        let stats = registry.stats();
        assert_eq!(stats.total_enrichers, 5);
        assert_eq!(stats.total_intents, 21);
        assert_eq!(
            registry.get(UserIntent::DebtQuery).unwrap().name(),
            FinanceEnricher::NAME
        );
        assert_eq!(
            registry.get(UserIntent::GymLog).unwrap().name(),
            FitnessEnricher::NAME
        );
        assert_eq!(
            registry.get(UserIntent::PlanToday).unwrap().name(),
            PlanningEnricher::NAME
        );
        assert!(registry.get(UserIntent::Greeting).is_none());
    }
}
