//! Registry of resource types by name.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::ResourceTypeConfig;
use crate::error::{ConfigError, ConvergeError, Result};

use super::declared::DeclaredResourceType;
use super::kind::ResourceType;

/// Maps type names to their implementations.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    types: BTreeMap<String, Arc<dyn ResourceType>>,
}

impl ResourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from declared resource types.
    ///
    /// # Errors
    ///
    /// Returns an error if two definitions share a name.
    pub fn from_config(definitions: &[ResourceTypeConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(Arc::new(DeclaredResourceType::new(definition.clone())))?;
        }
        Ok(registry)
    }

    /// Registers a resource type.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already registered.
    pub fn register(&mut self, resource_type: Arc<dyn ResourceType>) -> Result<()> {
        let name = resource_type.type_name().to_string();
        if self.types.contains_key(&name) {
            return Err(ConvergeError::Config(ConfigError::DuplicateName {
                kind: String::from("resource type"),
                name,
            }));
        }
        debug!("Registered resource type: {name}");
        self.types.insert(name, resource_type);
        Ok(())
    }

    /// Looks up a resource type.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ResourceType>> {
        self.types.get(name).cloned()
    }

    /// Looks up the type of a named resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is not registered.
    pub fn resolve(&self, resource: &str, type_name: &str) -> Result<Arc<dyn ResourceType>> {
        self.get(type_name).ok_or_else(|| {
            ConvergeError::Config(ConfigError::UnknownResourceType {
                resource: resource.to_string(),
                type_name: type_name.to_string(),
            })
        })
    }

    /// Registered type names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.types.keys().map(String::as_str).collect()
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::declared::tests::TABLE_TYPE;

    fn table_config() -> ResourceTypeConfig {
        serde_yaml::from_str(TABLE_TYPE).expect("valid type")
    }

    #[test]
    fn test_registry_resolves_declared_types() {
        let registry = ResourceRegistry::from_config(&[table_config()]).expect("registry builds");

        assert_eq!(registry.names(), vec!["table"]);
        let table = registry.resolve("orders", "table").expect("registered");
        assert_eq!(table.describe_operation().name, "DescribeTable");
    }

    #[test]
    fn test_duplicate_type_is_rejected() {
        let err = ResourceRegistry::from_config(&[table_config(), table_config()])
            .expect_err("duplicate names");
        assert!(matches!(
            err,
            ConvergeError::Config(ConfigError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_unknown_type_names_the_resource() {
        let registry = ResourceRegistry::new();
        let err = registry.resolve("orders", "queue").expect_err("not registered");
        assert!(err.to_string().contains("orders"));
    }
}
