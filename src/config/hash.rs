//! Desired-state hashing for change detection.
//!
//! The hash of a resource's desired attributes is stored with its state
//! record. On the next plan a different hash means the user changed the
//! declaration; an equal hash with non-empty drift means the remote side
//! moved.

use sha2::{Digest, Sha256};

use crate::client::{AttrValue, Attributes};

use super::spec::ResourceDeclaration;

/// Computes deterministic hashes of desired attributes.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesiredHasher;

impl DesiredHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hashes one resource declaration: its type and its attributes.
    #[must_use]
    pub fn hash_declaration(&self, declaration: &ResourceDeclaration) -> String {
        self.hash_attributes(&declaration.resource_type, &declaration.attributes)
    }

    /// Hashes a type name and an attribute mapping.
    ///
    /// Keys are visited in sorted order, so equal mappings hash equally.
    #[must_use]
    pub fn hash_attributes(&self, type_name: &str, attributes: &Attributes) -> String {
        let mut hasher = Sha256::new();
        hasher.update(type_name.as_bytes());
        hasher.update([0]);
        for (name, value) in attributes {
            hasher.update(name.as_bytes());
            hasher.update([0]);
            hasher.update(Self::encode(value).as_bytes());
            hasher.update([0]);
        }
        hex::encode(hasher.finalize())
    }

    fn encode(value: &AttrValue) -> String {
        value.to_json().to_string()
    }

    /// Returns a short form of a hash.
    #[must_use]
    pub fn short(hash: &str) -> &str {
        &hash[..hash.len().min(12)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declaration(name: &str, pairs: &[(&str, AttrValue)]) -> ResourceDeclaration {
        ResourceDeclaration {
            name: name.to_string(),
            resource_type: String::from("table"),
            attributes: pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect(),
        }
    }

    #[test]
    fn test_hash_is_deterministic_and_name_independent() {
        let hasher = DesiredHasher::new();
        let a = declaration("orders", &[("name", "orders".into()), ("capacity", AttrValue::Int(5))]);
        let b = declaration("renamed", &[("capacity", AttrValue::Int(5)), ("name", "orders".into())]);

        let hash = hasher.hash_declaration(&a);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hasher.hash_declaration(&b));
    }

    #[test]
    fn test_hash_changes_with_values_and_type() {
        let hasher = DesiredHasher::new();
        let a = declaration("orders", &[("capacity", AttrValue::Int(5))]);
        let b = declaration("orders", &[("capacity", AttrValue::Int(6))]);
        assert_ne!(hasher.hash_declaration(&a), hasher.hash_declaration(&b));

        assert_ne!(
            hasher.hash_attributes("table", &a.attributes),
            hasher.hash_attributes("queue", &a.attributes)
        );
    }

    #[test]
    fn test_string_and_int_do_not_collide() {
        let hasher = DesiredHasher::new();
        let a = declaration("x", &[("v", AttrValue::from("5"))]);
        let b = declaration("x", &[("v", AttrValue::Int(5))]);
        assert_ne!(hasher.hash_declaration(&a), hasher.hash_declaration(&b));
    }

    #[test]
    fn test_short_hash() {
        let hasher = DesiredHasher::new();
        let hash = hasher.hash_attributes("table", &Attributes::new());
        assert_eq!(DesiredHasher::short(&hash).len(), 12);
        assert_eq!(DesiredHasher::short("abc"), "abc");
    }
}
