//! Reconciliation plan types and classification.
//!
//! A plan lists, per resource, the action that would converge it and why.
//! Classification is pure: it combines the declaration, the state record
//! and a fresh observation of the remote resource.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ResourceDeclaration;
use crate::resource::ResourceIdentifier;
use crate::state::{RecordStatus, ResourceRecord};

use super::diff::DriftRecord;

/// A complete reconciliation plan.
#[derive(Debug, Clone, Serialize)]
pub struct ResourcePlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Planned actions in execution order.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    /// Resource name.
    pub name: String,
    /// Resource type name.
    pub resource_type: String,
    /// Action to take.
    pub action: ActionType,
    /// Why the action is needed.
    pub cause: Cause,
    /// Identifier of the existing resource, if any.
    pub id: Option<ResourceIdentifier>,
    /// Drift found on the existing resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<DriftRecord>,
    /// Attributes forcing replacement.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replacement_attributes: Vec<String>,
    /// Hash of the desired attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_hash: Option<String>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Create a new resource.
    Create,
    /// Converge mutable drift in place.
    Update,
    /// Delete and recreate.
    Replace,
    /// Nothing to do.
    Noop,
    /// Delete a resource.
    Delete,
    /// Drop a state record whose resource is already gone.
    Purge,
}

/// Why an action was planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    /// Declared but never created.
    FirstProvision,
    /// The declaration changed since the last apply.
    DesiredChanged,
    /// The remote resource changed outside the engine.
    Drift,
    /// The recorded resource no longer exists remotely.
    Vanished,
    /// Recorded but no longer declared.
    Orphaned,
    /// Desired and remote state agree.
    InSync,
    /// The last operation stopped part way.
    Tainted,
    /// Destruction was requested.
    DestroyRequested,
}

/// What a lookup of the recorded identifier found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// The resource does not exist.
    Missing,
    /// The resource exists with this drift against the declaration.
    Present(DriftRecord),
}

/// Action counts of a plan or report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Resources to create.
    pub create: usize,
    /// Resources to update in place.
    pub update: usize,
    /// Resources to replace.
    pub replace: usize,
    /// Resources to delete.
    pub delete: usize,
    /// Records to purge.
    pub purge: usize,
    /// Resources already converged.
    pub noop: usize,
}

impl PlannedAction {
    /// Classifies a declared resource.
    ///
    /// `observation` is `None` when the resource has no state record.
    #[must_use]
    pub fn classify(
        declaration: &ResourceDeclaration,
        record: Option<&ResourceRecord>,
        observation: Option<Observation>,
        desired_hash: &str,
    ) -> Self {
        let mut planned = Self {
            name: declaration.name.clone(),
            resource_type: declaration.resource_type.clone(),
            action: ActionType::Create,
            cause: Cause::FirstProvision,
            id: record.map(|r| r.id.clone()),
            drift: None,
            replacement_attributes: Vec::new(),
            desired_hash: Some(desired_hash.to_string()),
        };

        let (Some(record), Some(observation)) = (record, observation) else {
            planned.id = None;
            return planned;
        };

        let Observation::Present(drift) = observation else {
            planned.cause = Cause::Vanished;
            return planned;
        };

        let changed = record.desired_hash != desired_hash;
        let tainted = record.status == RecordStatus::Tainted;

        if drift.requires_replacement() {
            planned.action = ActionType::Replace;
            planned.replacement_attributes = drift
                .replacement_attributes()
                .into_iter()
                .map(String::from)
                .collect();
        } else if drift.is_empty() && !tainted {
            planned.action = ActionType::Noop;
        } else {
            planned.action = ActionType::Update;
        }

        planned.cause = if tainted {
            Cause::Tainted
        } else if drift.is_empty() {
            Cause::InSync
        } else if changed {
            Cause::DesiredChanged
        } else {
            Cause::Drift
        };

        if !drift.is_empty() {
            planned.drift = Some(drift);
        }
        planned
    }

    /// Classifies a recorded resource that is no longer declared.
    #[must_use]
    pub fn orphan(record: &ResourceRecord, observation: &Observation) -> Self {
        let action = match observation {
            Observation::Missing => ActionType::Purge,
            Observation::Present(_) => ActionType::Delete,
        };
        Self::from_record(record, action, Cause::Orphaned)
    }

    /// Plans the destruction of a recorded resource.
    #[must_use]
    pub fn destroy(record: &ResourceRecord) -> Self {
        Self::from_record(record, ActionType::Delete, Cause::DestroyRequested)
    }

    /// Plans a re-read of a recorded resource.
    #[must_use]
    pub fn refresh(record: &ResourceRecord) -> Self {
        Self::from_record(record, ActionType::Noop, Cause::InSync)
    }

    fn from_record(record: &ResourceRecord, action: ActionType, cause: Cause) -> Self {
        Self {
            name: record.name.clone(),
            resource_type: record.resource_type.clone(),
            action,
            cause,
            id: Some(record.id.clone()),
            drift: None,
            replacement_attributes: Vec::new(),
            desired_hash: None,
        }
    }

    /// Returns true if the action changes anything.
    #[must_use]
    pub fn is_change(&self) -> bool {
        self.action != ActionType::Noop
    }

    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            ActionType::Create => format!("Create {} '{}'", self.resource_type, self.name),
            ActionType::Update => format!("Update {} '{}' in place", self.resource_type, self.name),
            ActionType::Replace => format!(
                "Replace {} '{}' ({} forces replacement)",
                self.resource_type,
                self.name,
                self.replacement_attributes.join(", ")
            ),
            ActionType::Noop => format!("No change for '{}'", self.name),
            ActionType::Delete => format!("Delete {} '{}'", self.resource_type, self.name),
            ActionType::Purge => format!("Forget '{}' (already gone)", self.name),
        }
    }
}

impl ResourcePlan {
    /// Creates a plan, ordering removals first and then by name.
    #[must_use]
    pub fn new(mut actions: Vec<PlannedAction>) -> Self {
        actions.sort_by(|a, b| {
            Self::order(a.action)
                .cmp(&Self::order(b.action))
                .then_with(|| a.name.cmp(&b.name))
        });
        Self {
            created_at: Utc::now(),
            actions,
        }
    }

    const fn order(action: ActionType) -> u8 {
        match action {
            ActionType::Delete | ActionType::Purge => 0,
            ActionType::Replace => 1,
            ActionType::Create => 2,
            ActionType::Update => 3,
            ActionType::Noop => 4,
        }
    }

    /// Returns true if any action changes anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(PlannedAction::is_change)
    }

    /// Returns the actions that change anything.
    pub fn changes(&self) -> impl Iterator<Item = &PlannedAction> {
        self.actions.iter().filter(|a| a.is_change())
    }

    /// Looks up the action for a resource.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PlannedAction> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Counts actions by type.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            summary.record(action.action);
        }
        summary
    }
}

impl PlanSummary {
    /// Counts one action.
    pub const fn record(&mut self, action: ActionType) {
        match action {
            ActionType::Create => self.create += 1,
            ActionType::Update => self.update += 1,
            ActionType::Replace => self.replace += 1,
            ActionType::Delete => self.delete += 1,
            ActionType::Purge => self.purge += 1,
            ActionType::Noop => self.noop += 1,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Noop => "noop",
            Self::Delete => "delete",
            Self::Purge => "purge",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FirstProvision => "not yet created",
            Self::DesiredChanged => "declaration changed",
            Self::Drift => "remote drift",
            Self::Vanished => "resource vanished",
            Self::Orphaned => "no longer declared",
            Self::InSync => "in sync",
            Self::Tainted => "previous apply incomplete",
            Self::DestroyRequested => "destroy requested",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.cause)
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete",
            self.create,
            self.update,
            self.replace,
            self.delete + self.purge
        )
    }
}

impl std::fmt::Display for ResourcePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_changes() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Plan ({}):", self.summary())?;
        for (i, action) in self.changes().enumerate() {
            writeln!(f, "  {}. {action}", i + 1)?;
            if let Some(drift) = &action.drift {
                write!(f, "{drift}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AttrValue, Attributes};
    use crate::planner::DriftReconciler;
    use crate::resource::{AttributeSemantics, LocalState, StatusTag};

    fn declaration() -> ResourceDeclaration {
        ResourceDeclaration {
            name: String::from("orders"),
            resource_type: String::from("table"),
            attributes: Attributes::new(),
        }
    }

    fn record(hash: &str) -> ResourceRecord {
        let state = LocalState {
            id: ResourceIdentifier::new("arn:orders"),
            status: StatusTag::Available,
            attributes: Attributes::new(),
        };
        ResourceRecord::applied("orders", "table", &state, hash)
    }

    fn drift(immutable: bool) -> DriftRecord {
        let mut semantics = AttributeSemantics::default();
        if immutable {
            semantics.immutable.insert(String::from("key"));
        }
        let desired: Attributes = [(String::from("key"), AttrValue::from("a"))].into();
        let remote: Attributes = [(String::from("key"), AttrValue::from("b"))].into();
        DriftReconciler::new(&semantics).reconcile(&desired, &remote)
    }

    #[test]
    fn test_first_provision() {
        let planned = PlannedAction::classify(&declaration(), None, None, "h1");
        assert_eq!(planned.action, ActionType::Create);
        assert_eq!(planned.cause, Cause::FirstProvision);
        assert!(planned.id.is_none());
    }

    #[test]
    fn test_vanished_resource_is_recreated() {
        let record = record("h1");
        let planned =
            PlannedAction::classify(&declaration(), Some(&record), Some(Observation::Missing), "h1");
        assert_eq!(planned.action, ActionType::Create);
        assert_eq!(planned.cause, Cause::Vanished);
        assert_eq!(planned.id, Some(ResourceIdentifier::new("arn:orders")));
    }

    #[test]
    fn test_in_sync_is_noop() {
        let record = record("h1");
        let planned = PlannedAction::classify(
            &declaration(),
            Some(&record),
            Some(Observation::Present(DriftRecord::default())),
            "h2",
        );
        assert_eq!(planned.action, ActionType::Noop);
        assert_eq!(planned.cause, Cause::InSync);
        assert!(!planned.is_change());
    }

    #[test]
    fn test_hash_tells_desired_change_from_drift() {
        let record = record("h1");
        let remote_moved = PlannedAction::classify(
            &declaration(),
            Some(&record),
            Some(Observation::Present(drift(false))),
            "h1",
        );
        assert_eq!(remote_moved.action, ActionType::Update);
        assert_eq!(remote_moved.cause, Cause::Drift);

        let edited = PlannedAction::classify(
            &declaration(),
            Some(&record),
            Some(Observation::Present(drift(false))),
            "h2",
        );
        assert_eq!(edited.cause, Cause::DesiredChanged);
    }

    #[test]
    fn test_immutable_drift_plans_replacement() {
        let record = record("h1");
        let planned = PlannedAction::classify(
            &declaration(),
            Some(&record),
            Some(Observation::Present(drift(true))),
            "h2",
        );
        assert_eq!(planned.action, ActionType::Replace);
        assert_eq!(planned.replacement_attributes, vec![String::from("key")]);
    }

    #[test]
    fn test_tainted_record_is_resumed() {
        let mut record = record("h1");
        record.taint("tag failed");
        let planned = PlannedAction::classify(
            &declaration(),
            Some(&record),
            Some(Observation::Present(DriftRecord::default())),
            "h1",
        );
        assert_eq!(planned.action, ActionType::Update);
        assert_eq!(planned.cause, Cause::Tainted);
    }

    #[test]
    fn test_orphans() {
        let record = record("h1");
        let gone = PlannedAction::orphan(&record, &Observation::Missing);
        assert_eq!(gone.action, ActionType::Purge);

        let live = PlannedAction::orphan(&record, &Observation::Present(DriftRecord::default()));
        assert_eq!(live.action, ActionType::Delete);
        assert_eq!(live.cause, Cause::Orphaned);
    }

    #[test]
    fn test_plan_orders_removals_first() {
        let record = record("h1");
        let mut create = PlannedAction::classify(&declaration(), None, None, "h1");
        create.name = String::from("a-new");
        let mut delete = PlannedAction::destroy(&record);
        delete.name = String::from("z-old");

        let plan = ResourcePlan::new(vec![create, delete]);
        assert_eq!(plan.actions[0].action, ActionType::Delete);
        assert!(plan.has_changes());
        assert_eq!(
            plan.summary(),
            PlanSummary {
                create: 1,
                delete: 1,
                ..PlanSummary::default()
            }
        );
        assert!(plan.to_string().starts_with("Plan (1 to create, 0 to update"));
    }

    #[test]
    fn test_empty_plan() {
        let plan = ResourcePlan::new(Vec::new());
        assert!(!plan.has_changes());
        assert_eq!(plan.to_string(), "No changes required");
    }
}
