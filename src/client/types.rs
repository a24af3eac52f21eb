//! Request and response types for the remote control-plane API.
//!
//! Every payload crossing the client boundary is an [`Attributes`] map of
//! [`AttrValue`]s: strings, booleans, integers, and nested sequences or
//! mappings of those. There are no binary payloads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A request or response payload.
pub type Attributes = BTreeMap<String, AttrValue>;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// UTF-8 string value.
    String(String),
    /// Ordered sequence.
    List(Vec<AttrValue>),
    /// Nested mapping.
    Map(BTreeMap<String, AttrValue>),
}

/// The kind of call being made against the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Create a resource.
    Create,
    /// Read a single resource.
    Describe,
    /// Modify a resource in place.
    Update,
    /// Remove a resource.
    Delete,
    /// Enumerate resources.
    List,
    /// Attach tags.
    Tag,
    /// Detach tags.
    Untag,
}

/// A named operation of the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operation {
    /// What the operation does.
    pub kind: OperationKind,
    /// Provider-side operation name (e.g. `CreateTable`).
    pub name: String,
}

impl Operation {
    /// Creates a new operation.
    #[must_use]
    pub fn new(kind: OperationKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Returns true if the operation changes remote state.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        !matches!(self.kind, OperationKind::Describe | OperationKind::List)
    }
}

impl AttrValue {
    /// Returns the string value, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list value, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the map value, if this is a map.
    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns a copy with every nested list sorted and deduplicated.
    ///
    /// Two values that are equal as sets have equal canonical forms.
    #[must_use]
    pub fn canonical(&self) -> Self {
        match self {
            Self::List(items) => {
                let mut items: Vec<Self> = items.iter().map(Self::canonical).collect();
                items.sort();
                items.dedup();
                Self::List(items)
            }
            Self::Map(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.canonical()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Converts a JSON value, dropping nulls.
    ///
    /// Integral floats become integers; other floats are kept as their
    /// decimal string.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => Some(Self::from_number(n)),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Array(items) => {
                Some(Self::List(items.iter().filter_map(Self::from_json).collect()))
            }
            serde_json::Value::Object(map) => Some(Self::Map(
                map.iter()
                    .filter_map(|(k, v)| Self::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::float_cmp)]
    fn from_number(n: &serde_json::Number) -> Self {
        if let Some(i) = n.as_i64() {
            return Self::Int(i);
        }
        match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Self::Int(f as i64)
            }
            _ => Self::String(n.to_string()),
        }
    }

    /// Converts to a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// Converts a JSON object into attributes; non-objects yield an empty map.
#[must_use]
pub fn attributes_from_json(value: &serde_json::Value) -> Attributes {
    match AttrValue::from_json(value) {
        Some(AttrValue::Map(map)) => map,
        _ => Attributes::new(),
    }
}

/// Converts attributes into a JSON object.
#[must_use]
pub fn attributes_to_json(attributes: &Attributes) -> serde_json::Value {
    serde_json::Value::Object(
        attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(_) | Self::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Describe => "describe",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
            Self::Tag => "tag",
            Self::Untag => "untag",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
