//! Drift detection between desired and remote attributes.
//!
//! This module compares a resource's desired attributes with the
//! authoritative remote representation, attribute by attribute, and reports
//! what differs. It never talks to the provider.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::client::{AttrValue, Attributes};
use crate::resource::AttributeSemantics;

/// Computes drift records for one resource type.
#[derive(Debug, Clone, Copy)]
pub struct DriftReconciler<'a> {
    /// Comparison rules of the resource type.
    semantics: &'a AttributeSemantics,
}

/// How an attribute drifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// Declared but missing remotely.
    OnlyDesired,
    /// Present remotely but not declared.
    OnlyRemote,
    /// Present on both sides with different values.
    Changed,
}

/// Drift of a single attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeChange {
    /// Desired value, if declared.
    pub desired: Option<AttrValue>,
    /// Remote value, if present.
    pub remote: Option<AttrValue>,
    /// Whether converging this attribute requires replacement.
    pub immutable: bool,
}

/// Differences between desired and remote state for one resource.
///
/// Recomputed on every pass and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftRecord {
    changes: BTreeMap<String, AttributeChange>,
}

impl<'a> DriftReconciler<'a> {
    /// Creates a reconciler using the given comparison rules.
    #[must_use]
    pub const fn new(semantics: &'a AttributeSemantics) -> Self {
        Self { semantics }
    }

    /// Compares desired attributes against remote attributes.
    #[must_use]
    pub fn reconcile(&self, desired: &Attributes, remote: &Attributes) -> DriftRecord {
        let mut changes = BTreeMap::new();

        for (name, wanted) in desired {
            if self.semantics.is_computed(name) {
                continue;
            }
            let drifted = remote.get(name).map_or_else(
                || !self.matches_default(name, wanted),
                |actual| !self.values_match(name, wanted, actual),
            );
            if drifted {
                changes.insert(
                    name.clone(),
                    AttributeChange {
                        desired: Some(wanted.clone()),
                        remote: remote.get(name).cloned(),
                        immutable: self.semantics.is_immutable(name),
                    },
                );
            }
        }

        for (name, actual) in remote {
            if desired.contains_key(name)
                || self.semantics.is_computed(name)
                || is_empty_collection(actual)
                || self.matches_default(name, actual)
            {
                continue;
            }
            changes.insert(
                name.clone(),
                AttributeChange {
                    desired: None,
                    remote: Some(actual.clone()),
                    immutable: self.semantics.is_immutable(name),
                },
            );
        }

        if !changes.is_empty() {
            debug!("Detected drift on {} attribute(s)", changes.len());
        }

        DriftRecord { changes }
    }

    fn values_match(&self, name: &str, desired: &AttrValue, remote: &AttrValue) -> bool {
        if self.semantics.is_order_sensitive(name) {
            desired == remote
        } else {
            desired.canonical() == remote.canonical()
        }
    }

    fn matches_default(&self, name: &str, value: &AttrValue) -> bool {
        self.semantics
            .default_for(name)
            .is_some_and(|default| self.values_match(name, value, default))
    }
}

fn is_empty_collection(value: &AttrValue) -> bool {
    match value {
        AttrValue::List(items) => items.is_empty(),
        AttrValue::Map(map) => map.is_empty(),
        _ => false,
    }
}

impl AttributeChange {
    /// Classifies the change.
    #[must_use]
    pub const fn kind(&self) -> DriftKind {
        match (&self.desired, &self.remote) {
            (Some(_), None) => DriftKind::OnlyDesired,
            (None, _) => DriftKind::OnlyRemote,
            (Some(_), Some(_)) => DriftKind::Changed,
        }
    }
}

impl DriftRecord {
    /// Returns true if desired and remote state agree.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of drifted attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns the change for an attribute, if it drifted.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&AttributeChange> {
        self.changes.get(attribute)
    }

    /// Iterates over drifted attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeChange)> {
        self.changes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Names of every drifted attribute.
    #[must_use]
    pub fn drifted_attributes(&self) -> Vec<&str> {
        self.changes.keys().map(String::as_str).collect()
    }

    /// Attributes of the given kind.
    #[must_use]
    pub fn of_kind(&self, kind: DriftKind) -> Vec<&str> {
        self.iter()
            .filter(|(_, change)| change.kind() == kind)
            .map(|(name, _)| name)
            .collect()
    }

    /// Returns true if any drifted attribute is immutable.
    #[must_use]
    pub fn requires_replacement(&self) -> bool {
        self.changes.values().any(|c| c.immutable)
    }

    /// Drifted attributes that force replacement.
    #[must_use]
    pub fn replacement_attributes(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, c)| c.immutable)
            .map(|(name, _)| name)
            .collect()
    }

    /// Drifted attributes that can be updated in place.
    #[must_use]
    pub fn mutable_attributes(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, c)| !c.immutable)
            .map(|(name, _)| name)
            .collect()
    }
}

impl fmt::Display for DriftRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "no drift");
        }
        for (name, change) in self.iter() {
            let remote = change.remote.as_ref().map_or_else(|| String::from("<absent>"), ToString::to_string);
            let desired = change.desired.as_ref().map_or_else(|| String::from("<absent>"), ToString::to_string);
            write!(f, "  ~ {name}: {remote} -> {desired}")?;
            if change.immutable {
                write!(f, " (forces replacement)")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn attrs(pairs: &[(&str, AttrValue)]) -> Attributes {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    fn list(items: &[&str]) -> AttrValue {
        AttrValue::List(items.iter().map(|s| AttrValue::from(*s)).collect())
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_identical_attributes_have_no_drift() {
        let semantics = AttributeSemantics::default();
        let desired = attrs(&[("name", "orders".into()), ("capacity", AttrValue::Int(5))]);

        let drift = DriftReconciler::new(&semantics).reconcile(&desired, &desired.clone());
        assert!(drift.is_empty());
        assert_eq!(drift.to_string(), "no drift");
    }

    #[test]
    fn test_sets_compare_without_order() {
        let mut semantics = AttributeSemantics::default();
        let desired = attrs(&[("zones", list(&["a", "b"])), ("rules", list(&["x", "y"]))]);
        let remote = attrs(&[("zones", list(&["b", "a"])), ("rules", list(&["y", "x"]))]);

        assert!(DriftReconciler::new(&semantics).reconcile(&desired, &remote).is_empty());

        let repeated = attrs(&[("zones", list(&["a", "a", "b"])), ("rules", list(&["x", "y"]))]);
        assert!(DriftReconciler::new(&semantics).reconcile(&desired, &repeated).is_empty());

        semantics.order_sensitive = set(&["rules"]);
        let drift = DriftReconciler::new(&semantics).reconcile(&desired, &remote);
        assert_eq!(drift.drifted_attributes(), vec!["rules"]);
        assert_eq!(drift.get("rules").map(AttributeChange::kind), Some(DriftKind::Changed));
    }

    #[test]
    fn test_defaults_and_computed_are_not_drift() {
        let semantics = AttributeSemantics {
            computed: set(&["arn", "created_at"]),
            defaults: attrs(&[("billing_mode", "PROVISIONED".into())]),
            ..AttributeSemantics::default()
        };
        let desired = attrs(&[("name", "orders".into())]);
        let remote = attrs(&[
            ("name", "orders".into()),
            ("arn", "arn:table/orders".into()),
            ("created_at", "2024-01-01".into()),
            ("billing_mode", "PROVISIONED".into()),
            ("replicas", AttrValue::List(Vec::new())),
        ]);

        assert!(DriftReconciler::new(&semantics).reconcile(&desired, &remote).is_empty());
    }

    #[test]
    fn test_only_desired_and_only_remote() {
        let semantics = AttributeSemantics::default();
        let desired = attrs(&[("name", "orders".into()), ("stream", true.into())]);
        let remote = attrs(&[("name", "orders".into()), ("ttl", "expires".into())]);

        let drift = DriftReconciler::new(&semantics).reconcile(&desired, &remote);
        assert_eq!(drift.of_kind(DriftKind::OnlyDesired), vec!["stream"]);
        assert_eq!(drift.of_kind(DriftKind::OnlyRemote), vec!["ttl"]);
        assert!(!drift.requires_replacement());
    }

    #[test]
    fn test_immutable_drift_requires_replacement() {
        let semantics = AttributeSemantics {
            immutable: set(&["key_schema"]),
            ..AttributeSemantics::default()
        };
        let desired = attrs(&[("key_schema", "pk".into()), ("capacity", AttrValue::Int(10))]);
        let remote = attrs(&[("key_schema", "id".into()), ("capacity", AttrValue::Int(5))]);

        let drift = DriftReconciler::new(&semantics).reconcile(&desired, &remote);
        assert!(drift.requires_replacement());
        assert_eq!(drift.replacement_attributes(), vec!["key_schema"]);
        assert_eq!(drift.mutable_attributes(), vec!["capacity"]);
        assert!(drift.to_string().contains("forces replacement"));
    }
}
