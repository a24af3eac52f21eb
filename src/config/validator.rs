//! Cross-field configuration validation.
//!
//! Field ranges are checked by the `validator` derives on the schema types.
//! This module checks the rules that span fields: unique names, disjoint
//! status sets, consistent attribute semantics, and desired resources
//! referencing known types.

use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::resource::{LifecycleStage, WaitSpec};

use super::spec::{ConvergeConfig, DesiredDocument, LookupKind, ResourceTypeConfig};

/// Validator for engine configuration and desired-state documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigValidator;

/// Validation result containing every issue found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors.
    pub errors: Vec<ValidationIssue>,
    /// Non-fatal issues.
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Field path that failed validation.
    pub field: String,
    /// Error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if any rule fails.
    pub fn validate(&self, config: &ConvergeConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_timing(config, &mut result);
        Self::validate_types(&config.resource_types, &mut result);

        result.into_result()
    }

    /// Validates a desired-state document against the configured types.
    ///
    /// # Errors
    ///
    /// Returns the first error if any rule fails.
    pub fn validate_document(
        &self,
        config: &ConvergeConfig,
        document: &DesiredDocument,
    ) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();
        let known: HashSet<&str> = config.resource_types.iter().map(|t| t.name.as_str()).collect();

        if document.resources.is_empty() {
            result.warnings.push(String::from("No resources declared"));
        }

        let mut seen = HashSet::new();
        for (i, resource) in document.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !seen.insert(resource.name.as_str()) {
                result.error(format!("{prefix}.name"), format!("Duplicate resource name: {}", resource.name));
            }
            if !is_valid_name(&resource.name) {
                result.error(
                    format!("{prefix}.name"),
                    format!(
                        "Resource name '{}' is invalid. Must be lowercase alphanumeric with hyphens or underscores.",
                        resource.name
                    ),
                );
            }
            if !known.contains(resource.resource_type.as_str()) {
                result.error(
                    format!("{prefix}.type"),
                    format!("Unknown resource type '{}'", resource.resource_type),
                );
            }
        }

        result.into_result()
    }

    fn validate_timing(config: &ConvergeConfig, result: &mut ValidationResult) {
        let polling = &config.polling;
        if polling.max_interval_secs < polling.interval_secs {
            result.warnings.push(format!(
                "polling.max_interval_secs ({}) is below polling.interval_secs ({}); the interval is capped",
                polling.max_interval_secs, polling.interval_secs
            ));
        }
        if polling.timeout_secs < polling.interval_secs {
            result.error(
                "polling.timeout_secs",
                "Wait timeout must be at least one poll interval",
            );
        }

        let retry = &config.retry;
        if retry.max_delay_ms < retry.base_delay_ms {
            result.error(
                "retry.max_delay_ms",
                "Maximum retry delay must not be below the base delay",
            );
        }
    }

    fn validate_types(types: &[ResourceTypeConfig], result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for (i, resource_type) in types.iter().enumerate() {
            let prefix = format!("resource_types[{i}]");
            if !seen.insert(resource_type.name.as_str()) {
                result.error(
                    format!("{prefix}.name"),
                    format!("Duplicate resource type name: {}", resource_type.name),
                );
            }
            Self::validate_type(resource_type, &prefix, result);
        }
    }

    fn validate_type(config: &ResourceTypeConfig, prefix: &str, result: &mut ValidationResult) {
        let semantics = &config.attributes;

        for name in semantics.immutable.intersection(&semantics.computed) {
            result.error(
                format!("{prefix}.attributes"),
                format!("Attribute '{name}' cannot be both immutable and computed"),
            );
        }
        if semantics.computed.contains(&config.identifier.attribute) {
            debug!("{prefix}: identifier attribute is implicitly computed");
        }

        let mut grouped = BTreeSet::new();
        for (g, group) in config.update_groups.iter().enumerate() {
            let field = format!("{prefix}.update_groups[{g}]");
            if group.attributes.is_empty() {
                result.error(field.clone(), "Update group covers no attributes");
            }
            if group.operation.is_none() && config.operations.update.is_none() {
                result.error(
                    field.clone(),
                    "Update group has no operation and the type has no default update operation",
                );
            }
            for attribute in &group.attributes {
                if semantics.immutable.contains(attribute) {
                    result.error(
                        field.clone(),
                        format!("Immutable attribute '{attribute}' cannot be in an update group"),
                    );
                }
                if !grouped.insert(attribute.as_str()) {
                    result.error(
                        field.clone(),
                        format!("Attribute '{attribute}' is covered by more than one update group"),
                    );
                }
            }
        }

        for (s, step) in config.post_create.iter().enumerate() {
            for attribute in &step.attributes {
                if semantics.immutable.contains(attribute) {
                    result.error(
                        format!("{prefix}.post_create[{s}]"),
                        format!("Immutable attribute '{attribute}' cannot be set after create"),
                    );
                }
            }
        }

        if config.tags.is_some() && config.operations.tag.is_none() {
            result.warnings.push(format!(
                "{prefix}: tags are configured but no tag operation is set; tags are sent with create and update"
            ));
        }

        if config.lookup.strategy == LookupKind::List && config.operations.list.is_none() {
            result.error(
                format!("{prefix}.lookup"),
                "List lookup requires operations.list",
            );
        }

        for stage in [LifecycleStage::Create, LifecycleStage::Update, LifecycleStage::Delete] {
            let Some(settings) = config.stage(stage) else {
                continue;
            };
            let defaults = WaitSpec::default_for(stage);
            let target = if settings.target.is_empty() { &defaults.target } else { &settings.target };
            let failure = if settings.failure.is_empty() { &defaults.failure } else { &settings.failure };
            if let Some(overlap) = target.iter().find(|t| failure.contains(t)) {
                result.error(
                    format!("{prefix}.lifecycle.{stage}"),
                    format!("Status {overlap} is both a target and a failure status"),
                );
            }
            if settings.timeout_minutes == Some(0) {
                result.error(
                    format!("{prefix}.lifecycle.{stage}.timeout_minutes"),
                    "Stage timeout must be at least one minute",
                );
            }
            if settings.interval_secs == Some(0) {
                result.error(
                    format!("{prefix}.lifecycle.{stage}.interval_secs"),
                    "Stage poll interval must be at least one second",
                );
            }
        }
    }
}

/// Validates a resource name: lowercase alphanumeric with single hyphens or
/// underscores, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_') {
        return false;
    }
    !name.ends_with(['-', '_']) && !name.contains("--")
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
        });
    }

    fn into_result(self) -> Result<Self> {
        match self.errors.first() {
            None => {
                debug!("Validation passed with {} warning(s)", self.warnings.len());
                Ok(self)
            }
            Some(first) => Err(ConfigError::validation(first.message.clone(), first.field.clone()).into()),
        }
    }

    /// Returns true if validation passed.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
