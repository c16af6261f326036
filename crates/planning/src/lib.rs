pub mod calendar;
pub mod reclassify;
pub mod schedule;
pub mod store;

pub use reclassify::{reclassify, ReclassifiedPlan, OBRA_GAP_MONTHS};
pub use schedule::{
    distribute, distribute_phases, reconcile, CommitmentWindow, Distribution, Reconciliation,
};
pub use store::PlanningStore;
