//! State types for tracking applied resources.
//!
//! The state file records, per declared resource, the identifier the
//! provider assigned and the attributes folded in after the last successful
//! operation. It is the only place the previous identifier comes from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::client::Attributes;
use crate::resource::{LocalState, ResourceIdentifier};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1";

/// Maximum number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// The complete local state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateFile {
    /// State format version.
    pub version: String,
    /// Records keyed by resource name.
    pub resources: BTreeMap<String, ResourceRecord>,
    /// Recent operations, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
}

/// Whether a record reflects a completed operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// The last operation completed.
    Applied,
    /// The resource exists but the last operation stopped part way.
    Tainted,
}

/// State of a single managed resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    /// Resource name from the desired-state document.
    pub name: String,
    /// Resource type name.
    pub resource_type: String,
    /// Provider identifier.
    pub id: ResourceIdentifier,
    /// Record status.
    pub status: RecordStatus,
    /// Attributes folded in after the last successful operation.
    #[serde(default)]
    pub attributes: Attributes,
    /// Hash of the desired attributes last applied.
    #[serde(default)]
    pub desired_hash: String,
    /// Error that tainted the record.
    #[serde(default)]
    pub last_error: Option<String>,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the operation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
    /// Operation performed.
    pub operation: HistoryOperation,
    /// Resource affected.
    pub resource: String,
    /// Identifier involved, if any.
    #[serde(default)]
    pub id: Option<ResourceIdentifier>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message, if it failed.
    #[serde(default)]
    pub error: Option<String>,
}

/// Kinds of recorded operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOperation {
    /// A resource was created.
    Create,
    /// A resource was updated in place.
    Update,
    /// A resource was replaced.
    Replace,
    /// A resource was deleted.
    Delete,
    /// A dangling record was dropped.
    Purge,
    /// Local state was refreshed from the provider.
    Refresh,
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

impl StateFile {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            resources: BTreeMap::new(),
            history: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Gets a record by resource name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.get(name)
    }

    /// Adds or replaces a record.
    pub fn upsert(&mut self, record: ResourceRecord) {
        self.resources.insert(record.name.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a record by resource name.
    pub fn remove(&mut self, name: &str) -> Option<ResourceRecord> {
        let result = self.resources.remove(name);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry, dropping the oldest past [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            let excess = self.history.len() + 1 - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.history.push(entry);
    }

    /// Returns all resource names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Returns the records left tainted by a partial failure.
    #[must_use]
    pub fn tainted(&self) -> Vec<&ResourceRecord> {
        self.resources
            .values()
            .filter(|r| r.status == RecordStatus::Tainted)
            .collect()
    }
}

impl ResourceRecord {
    /// Creates a record from a converged local state.
    #[must_use]
    pub fn applied(name: &str, resource_type: &str, state: &LocalState, desired_hash: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            resource_type: resource_type.to_string(),
            id: state.id.clone(),
            status: RecordStatus::Applied,
            attributes: state.attributes.clone(),
            desired_hash: desired_hash.to_string(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a record for a resource whose creation stopped part way.
    #[must_use]
    pub fn tainted(name: &str, resource_type: &str, id: ResourceIdentifier, error: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            resource_type: resource_type.to_string(),
            id,
            status: RecordStatus::Tainted,
            attributes: Attributes::new(),
            desired_hash: String::new(),
            last_error: Some(error.to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Folds a newer local state into the record, keeping its creation time.
    pub fn refresh(&mut self, state: &LocalState, desired_hash: Option<&str>) {
        self.id = state.id.clone();
        self.attributes = state.attributes.clone();
        self.status = RecordStatus::Applied;
        self.last_error = None;
        if let Some(hash) = desired_hash {
            self.desired_hash = hash.to_string();
        }
        self.updated_at = Utc::now();
    }

    /// Marks the record tainted.
    pub fn taint(&mut self, error: &str) {
        self.status = RecordStatus::Tainted;
        self.last_error = Some(error.to_string());
        self.updated_at = Utc::now();
    }

    /// Returns true if the last operation completed.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.status == RecordStatus::Applied
    }
}

impl HistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: HistoryOperation, resource: &str, id: Option<ResourceIdentifier>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            resource: resource.to_string(),
            id,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: HistoryOperation,
        resource: &str,
        id: Option<ResourceIdentifier>,
        error: &str,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, resource, id)
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Applied => "applied",
            Self::Tainted => "tainted",
        };
        write!(f, "{status}")
    }
}

impl std::fmt::Display for HistoryOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Purge => "purge",
            Self::Refresh => "refresh",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AttrValue;
    use crate::resource::StatusTag;

    fn local(id: &str) -> LocalState {
        let mut attributes = Attributes::new();
        attributes.insert(String::from("name"), AttrValue::from("orders"));
        LocalState {
            id: ResourceIdentifier::new(id),
            status: StatusTag::Available,
            attributes,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = StateFile::new();
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(HistoryEntry::new(HistoryOperation::Create, &format!("r{i}"), None));
        }

        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].resource, "r5");
    }

    #[test]
    fn test_taint_and_refresh() {
        let mut record = ResourceRecord::tainted(
            "orders",
            "table",
            ResourceIdentifier::new("arn:1"),
            "tag failed",
        );
        assert!(!record.is_applied());
        let created = record.created_at;

        record.refresh(&local("arn:1"), Some("abc"));
        assert!(record.is_applied());
        assert_eq!(record.desired_hash, "abc");
        assert_eq!(record.last_error, None);
        assert_eq!(record.created_at, created);

        record.taint("wait timed out");
        assert_eq!(record.status, RecordStatus::Tainted);
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = StateFile::new();
        state.upsert(ResourceRecord::applied("orders", "table", &local("arn:1"), "h"));

        let json = serde_json::to_string(&state).expect("serializes");
        assert!(json.contains("\"status\":\"applied\""));
        let back: StateFile = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(back, state);
        assert_eq!(back.names(), vec!["orders"]);
    }
}
