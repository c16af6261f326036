use anyhow::Result;
use async_trait::async_trait;
use shared::domain::{InvestmentCategory, PhasePlan, RequestId};

use crate::reclassify::ReclassifiedPlan;

/// Persistence seam for the reclassification flow, implemented by
/// `storage::Storage`. Keeps this crate free of SQL while letting the
/// operations layer run load-cascade-save without knowing the schema.
#[async_trait]
pub trait PlanningStore {
    /// Current category and phase plans for a request, `None` if the
    /// request does not exist.
    async fn load_phase_plans(
        &self,
        request_id: RequestId,
    ) -> Result<Option<(InvestmentCategory, PhasePlan, PhasePlan)>>;

    /// Persists a cascade outcome atomically: category and both phases.
    async fn save_reclassified(
        &self,
        request_id: RequestId,
        plan: &ReclassifiedPlan,
    ) -> Result<bool>;
}
