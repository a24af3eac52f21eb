//! Configuration schema types for the converge engine.
//!
//! This module defines the structs that map to `converge.yaml`: engine
//! settings, declarative resource-type definitions, and the desired-state
//! document listing the resources to converge.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

use crate::client::Attributes;
use crate::resource::{AttributeSemantics, StatusTag};
use crate::wait::Backoff;

/// Default local state file.
pub const DEFAULT_STATE_PATH: &str = ".converge/state.json";

/// The root engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConvergeConfig {
    /// Remote client settings.
    #[serde(default)]
    #[validate(nested)]
    pub client: ClientConfig,
    /// Status polling defaults.
    #[serde(default)]
    #[validate(nested)]
    pub polling: PollingConfig,
    /// Mutation retry policy.
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryConfig,
    /// Local state settings.
    #[serde(default)]
    pub state: StateConfig,
    /// Maximum number of resources reconciled concurrently.
    #[serde(default = "default_parallelism")]
    #[validate(range(min = 1, max = 256))]
    pub parallelism: usize,
    /// Declared resource types.
    #[serde(default)]
    #[validate(nested)]
    pub resource_types: Vec<ResourceTypeConfig>,
    /// Resources declared inline.
    #[serde(default)]
    pub resources: Vec<ResourceDeclaration>,
}

/// Remote client settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ClientConfig {
    /// Base URL of the control-plane API.
    #[serde(default)]
    #[validate(url)]
    pub endpoint: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub request_timeout_secs: u64,
    /// Sustained request rate.
    #[serde(default = "default_requests_per_second")]
    #[validate(range(min = 1))]
    pub requests_per_second: u32,
    /// Maximum request burst.
    #[serde(default = "default_burst")]
    #[validate(range(min = 1))]
    pub burst: u32,
}

/// Status polling defaults, overridable per resource type and stage.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PollingConfig {
    /// Delay between probes in seconds.
    #[serde(default = "default_poll_interval")]
    #[validate(range(min = 1, max = 3600))]
    pub interval_secs: u64,
    /// Wait timeout in seconds.
    #[serde(default = "default_poll_timeout")]
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
    /// Cap on the delay between probes in seconds.
    #[serde(default = "default_max_interval")]
    #[validate(range(min = 1))]
    pub max_interval_secs: u64,
    /// Delay before the first probe in seconds.
    #[serde(default)]
    pub initial_delay_secs: u64,
    /// Delay growth between probes.
    #[serde(default)]
    pub backoff: Backoff,
    /// Consecutive not-found probes tolerated while awaiting a non-deletion target.
    #[serde(default = "default_not_found_checks")]
    #[validate(range(min = 1))]
    pub not_found_checks: u32,
    /// Consecutive target observations required before success.
    #[serde(default = "default_stable_observations")]
    #[validate(range(min = 1, max = 100))]
    pub stable_observations: u32,
}

/// Retry policy for mutating calls.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetryConfig {
    /// Maximum attempts for a call that keeps conflicting.
    #[serde(default = "default_conflict_attempts")]
    #[validate(range(min = 1, max = 50))]
    pub conflict_max_attempts: u32,
    /// First retry delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    #[validate(range(min = 1))]
    pub base_delay_ms: u64,
    /// Cap on the retry delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    #[validate(range(min = 1))]
    pub max_delay_ms: u64,
    /// Time budget for throttled or transient retries of one call, in seconds.
    #[serde(default = "default_mutation_deadline")]
    #[validate(range(min = 1))]
    pub mutation_deadline_secs: u64,
}

/// Local state settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// State file path.
    #[serde(default)]
    pub path: Option<String>,
}

/// Declarative definition of a resource type.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResourceTypeConfig {
    /// Type name referenced by resources.
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Provider operation names.
    pub operations: OperationsConfig,
    /// Where the identifier lives.
    pub identifier: IdentifierConfig,
    /// Envelope key wrapping describe and create responses (e.g. `Table`).
    #[serde(default)]
    pub response_key: Option<String>,
    /// Status extraction.
    #[serde(default)]
    pub status: StatusConfig,
    /// Attribute comparison rules.
    #[serde(default)]
    pub attributes: AttributeSemantics,
    /// Which update call converges which attributes.
    #[serde(default)]
    pub update_groups: Vec<UpdateGroupConfig>,
    /// Tag handling, when tags are managed through dedicated calls.
    #[serde(default)]
    pub tags: Option<TagsConfig>,
    /// Calls issued right after create for dependent features.
    #[serde(default)]
    pub post_create: Vec<PostCreateConfig>,
    /// How resources are located.
    #[serde(default)]
    pub lookup: LookupConfig,
    /// Per-stage wait settings.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Request parameter carrying the idempotency token on create.
    #[serde(default)]
    pub client_token_parameter: Option<String>,
    /// Request parameter listing attributes to clear on update.
    #[serde(default = "default_unset_parameter")]
    pub unset_parameter: String,
}

/// Provider operation names for a resource type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationsConfig {
    /// Create operation.
    pub create: String,
    /// Describe operation.
    pub describe: String,
    /// Delete operation.
    pub delete: String,
    /// Default update operation.
    #[serde(default)]
    pub update: Option<String>,
    /// List operation.
    #[serde(default)]
    pub list: Option<String>,
    /// Tag operation.
    #[serde(default)]
    pub tag: Option<String>,
    /// Untag operation.
    #[serde(default)]
    pub untag: Option<String>,
}

/// Identifier location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentifierConfig {
    /// Response attribute holding the identifier.
    pub attribute: String,
    /// Request parameter addressing the resource; defaults to `attribute`.
    #[serde(default)]
    pub parameter: Option<String>,
}

/// Status extraction rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusConfig {
    /// Response attribute holding the raw status.
    #[serde(default = "default_status_attribute")]
    pub attribute: String,
    /// Response attribute explaining the status.
    #[serde(default)]
    pub reason_attribute: Option<String>,
    /// Raw provider status to tag; unmapped values use the built-in mapping.
    #[serde(default)]
    pub map: BTreeMap<String, StatusTag>,
}

/// Attributes converged by one update call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateGroupConfig {
    /// Operation to call; defaults to the type's update operation.
    #[serde(default)]
    pub operation: Option<String>,
    /// Attributes covered by the call.
    pub attributes: Vec<String>,
}

/// Tag handling through dedicated tag and untag calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagsConfig {
    /// Desired and remote attribute holding the tag map.
    #[serde(default = "default_tags_attribute")]
    pub attribute: String,
    /// Tag request parameter carrying the tags to set.
    #[serde(default = "default_tags_attribute")]
    pub parameter: String,
    /// Untag request parameter carrying the keys to remove.
    #[serde(default = "default_tag_keys_parameter")]
    pub keys_parameter: String,
}

/// A call issued right after create.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostCreateConfig {
    /// Step name.
    pub name: String,
    /// Operation to call.
    pub operation: String,
    /// Desired attributes sent with this call instead of the create request.
    pub attributes: Vec<String>,
}

/// Lookup strategies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LookupKind {
    /// Describe by identifier.
    #[default]
    Direct,
    /// List then filter.
    List,
}

/// Lookup settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupConfig {
    /// Strategy to use.
    #[serde(default)]
    pub strategy: LookupKind,
    /// Item attribute compared against the identifier; defaults to the identifier attribute.
    #[serde(default)]
    pub match_attribute: Option<String>,
    /// Response attribute holding the list of items.
    #[serde(default)]
    pub collection_attribute: Option<String>,
    /// Pagination token attribute.
    #[serde(default)]
    pub page_token: Option<String>,
}

/// Per-stage wait settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Create stage.
    #[serde(default)]
    pub create: Option<StageConfig>,
    /// Update stage.
    #[serde(default)]
    pub update: Option<StageConfig>,
    /// Delete stage.
    #[serde(default)]
    pub delete: Option<StageConfig>,
}

/// Wait settings for one stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageConfig {
    /// Statuses completing the stage; empty keeps the default.
    #[serde(default)]
    pub target: Vec<StatusTag>,
    /// Statuses failing the stage; empty keeps the default.
    #[serde(default)]
    pub failure: Vec<StatusTag>,
    /// Stage timeout in minutes.
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
    /// Stage poll interval in seconds.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

/// The desired-state document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesiredDocument {
    /// Resources to converge.
    #[serde(default)]
    pub resources: Vec<ResourceDeclaration>,
}

/// One resource in the desired-state document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceDeclaration {
    /// Local resource name, unique in the document.
    pub name: String,
    /// Registered resource type.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Desired attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

const fn default_parallelism() -> usize {
    10
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_requests_per_second() -> u32 {
    10
}

const fn default_burst() -> u32 {
    20
}

const fn default_poll_interval() -> u64 {
    5
}

const fn default_poll_timeout() -> u64 {
    30 * 60
}

const fn default_max_interval() -> u64 {
    60
}

const fn default_not_found_checks() -> u32 {
    20
}

const fn default_stable_observations() -> u32 {
    1
}

const fn default_conflict_attempts() -> u32 {
    5
}

const fn default_base_delay_ms() -> u64 {
    500
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_mutation_deadline() -> u64 {
    5 * 60
}

fn default_unset_parameter() -> String {
    String::from("unset")
}

fn default_status_attribute() -> String {
    String::from("status")
}

fn default_tags_attribute() -> String {
    String::from("tags")
}

fn default_tag_keys_parameter() -> String {
    String::from("tag_keys")
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            polling: PollingConfig::default(),
            retry: RetryConfig::default(),
            state: StateConfig::default(),
            parallelism: default_parallelism(),
            resource_types: Vec::new(),
            resources: Vec::new(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout_secs: default_request_timeout(),
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            timeout_secs: default_poll_timeout(),
            max_interval_secs: default_max_interval(),
            initial_delay_secs: 0,
            backoff: Backoff::default(),
            not_found_checks: default_not_found_checks(),
            stable_observations: default_stable_observations(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            conflict_max_attempts: default_conflict_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            mutation_deadline_secs: default_mutation_deadline(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            attribute: default_status_attribute(),
            reason_attribute: None,
            map: BTreeMap::new(),
        }
    }
}

impl ConvergeConfig {
    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        PathBuf::from(self.state.path.as_deref().unwrap_or(DEFAULT_STATE_PATH))
    }

    /// Looks up a declared resource type by name.
    #[must_use]
    pub fn resource_type(&self, name: &str) -> Option<&ResourceTypeConfig> {
        self.resource_types.iter().find(|t| t.name == name)
    }
}

impl PollingConfig {
    /// Delay between probes.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Wait timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RetryConfig {
    /// First retry delay.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Cap on the retry delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Time budget for throttled or transient retries.
    #[must_use]
    pub const fn mutation_deadline(&self) -> Duration {
        Duration::from_secs(self.mutation_deadline_secs)
    }
}

impl ResourceTypeConfig {
    /// Request parameter addressing an existing resource.
    #[must_use]
    pub fn id_parameter(&self) -> &str {
        self.identifier
            .parameter
            .as_deref()
            .unwrap_or(&self.identifier.attribute)
    }

    /// Stage settings, if configured.
    #[must_use]
    pub const fn stage(&self, stage: crate::resource::LifecycleStage) -> Option<&StageConfig> {
        use crate::resource::LifecycleStage;
        match stage {
            LifecycleStage::Create => self.lifecycle.create.as_ref(),
            LifecycleStage::Update => self.lifecycle.update.as_ref(),
            LifecycleStage::Delete => self.lifecycle.delete.as_ref(),
        }
    }
}

impl DesiredDocument {
    /// Looks up a declared resource by name.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceDeclaration> {
        self.resources.iter().find(|r| r.name == name)
    }
}
