//! Planning module for reconciliation.
//!
//! This module compares desired attributes with the remote representation
//! and classifies each resource into the action that would converge it.

mod diff;
mod plan;

pub use diff::{AttributeChange, DriftKind, DriftReconciler, DriftRecord};
pub use plan::{ActionType, Cause, Observation, PlanSummary, PlannedAction, ResourcePlan};
