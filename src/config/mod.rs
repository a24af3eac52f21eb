//! Configuration module for the converge engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing `converge.yaml` and desired-state documents
//! - Cross-field validation of resource types and resources
//! - Hashing desired attributes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::DesiredHasher;
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_API_TOKEN, ENV_ENDPOINT, ENV_PARALLELISM,
    ENV_STATE_PATH, find_config_file,
};
pub use spec::{
    ClientConfig, ConvergeConfig, DEFAULT_STATE_PATH, DesiredDocument, IdentifierConfig,
    LifecycleConfig, LookupConfig, LookupKind, OperationsConfig, PollingConfig, PostCreateConfig,
    ResourceDeclaration, ResourceTypeConfig, RetryConfig, StageConfig, StateConfig, StatusConfig,
    TagsConfig, UpdateGroupConfig,
};
pub use validator::{ConfigValidator, ValidationIssue, ValidationResult};
