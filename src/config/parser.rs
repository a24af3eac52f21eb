//! Configuration loading.
//!
//! Loads `converge.yaml` and desired-state documents from YAML, applies
//! environment overrides, and locates the configuration file.

use std::path::{Path, PathBuf};
use tracing::{debug, info};
use validator::Validate;

use crate::error::{ConfigError, ConvergeError, Result};

use super::spec::{ConvergeConfig, DesiredDocument};

/// Overrides `client.endpoint`.
pub const ENV_ENDPOINT: &str = "CONVERGE_ENDPOINT";

/// Overrides `state.path`.
pub const ENV_STATE_PATH: &str = "CONVERGE_STATE_PATH";

/// Overrides `parallelism`.
pub const ENV_PARALLELISM: &str = "CONVERGE_PARALLELISM";

/// Bearer token for the control-plane API.
pub const ENV_API_TOKEN: &str = "CONVERGE_API_TOKEN";

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["converge.yaml", "converge.yml"];

/// Configuration parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for `.env` and relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for `.env` lookup.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads the engine configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, invalid YAML, or
    /// fails field-level validation.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ConvergeConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());
        let content = Self::read(path)?;
        self.parse_yaml(&content, Some(path))
    }

    /// Parses the engine configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or a field is out of range.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ConvergeConfig> {
        debug!("Parsing engine configuration");
        let config: ConvergeConfig = serde_yaml::from_str(content)
            .map_err(|e| Self::parse_error(&e, source))?;

        config.validate().map_err(|e| ConfigError::ValidationError {
            message: e.to_string(),
            field: None,
        })?;

        debug!(
            "Parsed {} resource type(s), {} inline resource(s)",
            config.resource_types.len(),
            config.resources.len()
        );
        Ok(config)
    }

    /// Loads the configuration, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or an override is invalid.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<ConvergeConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies overrides looked up through `var`.
    ///
    /// # Errors
    ///
    /// Returns an error if `CONVERGE_PARALLELISM` is not a positive integer.
    pub fn apply_overrides(
        config: &mut ConvergeConfig,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(endpoint) = var(ENV_ENDPOINT) {
            debug!("Overriding client.endpoint from environment");
            config.client.endpoint = Some(endpoint);
        }

        if let Some(path) = var(ENV_STATE_PATH) {
            debug!("Overriding state.path from environment");
            config.state.path = Some(path);
        }

        if let Some(raw) = var(ENV_PARALLELISM) {
            debug!("Overriding parallelism from environment");
            config.parallelism = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    ConfigError::validation(
                        format!("{ENV_PARALLELISM} must be a positive integer, got '{raw}'"),
                        "parallelism",
                    )
                })?;
        }

        Ok(())
    }

    /// Loads a desired-state document.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or not a valid document.
    pub fn load_desired(&self, path: impl AsRef<Path>) -> Result<DesiredDocument> {
        let path = path.as_ref();
        info!("Loading desired state from: {}", path.display());
        let content = Self::read(path)?;
        self.parse_desired(&content, Some(path))
    }

    /// Parses a desired-state document from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_desired(&self, content: &str, source: Option<&Path>) -> Result<DesiredDocument> {
        let document: DesiredDocument = serde_yaml::from_str(content)
            .map_err(|e| Self::parse_error(&e, source))?;
        debug!("Parsed {} desired resource(s)", document.resources.len());
        Ok(document)
    }

    /// Loads the `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the `.env` file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Returns the API bearer token from the environment, if set.
    #[must_use]
    pub fn api_token() -> Option<String> {
        std::env::var(ENV_API_TOKEN).ok().filter(|t| !t.is_empty())
    }

    fn read(path: &Path) -> Result<String> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }
        std::fs::read_to_string(path).map_err(|e| {
            ConvergeError::from(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })
    }

    fn parse_error(error: &serde_yaml::Error, source: Option<&Path>) -> ConfigError {
        let file = source.map(|p| p.display().to_string());
        let location = match (file, error.location()) {
            (Some(file), Some(at)) => Some(format!("{file}:{}:{}", at.line(), at.column())),
            (None, Some(at)) => Some(format!("line {}, column {}", at.line(), at.column())),
            (file, None) => file,
        };
        ConfigError::ParseError {
            message: format!("YAML parse error: {error}"),
            location,
        }
    }
}

/// Finds the configuration file.
///
/// Searches `start_dir` and its parents, then the user configuration
/// directory (`<config dir>/converge/converge.yaml`).
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    if let Some(user_dir) = dirs::config_dir() {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = user_dir.join("converge").join(filename);
            if config_path.exists() {
                info!("Using user configuration: {}", config_path.display());
                return Ok(config_path);
            }
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::StatusTag;
    use crate::wait::Backoff;
    use std::collections::HashMap;

    const ENGINE: &str = r"
client:
  endpoint: https://api.example.com/v1
  requests_per_second: 5
polling:
  interval_secs: 2
  backoff: exponential
parallelism: 4
resource_types:
  - name: queue
    operations:
      create: CreateQueue
      describe: GetQueueAttributes
      delete: DeleteQueue
    identifier:
      attribute: queue_url
    status:
      map:
        READY: available
resources:
  - name: jobs
    type: queue
    attributes:
      visibility_timeout: 30
";

    #[test]
    fn test_parse_engine_config() {
        let config = ConfigParser::new().parse_yaml(ENGINE, None).expect("valid config");

        assert_eq!(config.client.endpoint.as_deref(), Some("https://api.example.com/v1"));
        assert_eq!(config.client.burst, 20);
        assert_eq!(config.polling.interval_secs, 2);
        assert_eq!(config.polling.backoff, Backoff::Exponential);
        assert_eq!(config.polling.timeout_secs, 1800);
        assert_eq!(config.retry.conflict_max_attempts, 5);
        assert_eq!(config.parallelism, 4);

        let queue = config.resource_type("queue").expect("queue type");
        assert_eq!(queue.status.map.get("READY"), Some(&StatusTag::Available));
        assert_eq!(queue.id_parameter(), "queue_url");
        assert_eq!(config.resources[0].resource_type, "queue");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ConfigParser::new().parse_yaml("{}", None).expect("valid config");
        assert_eq!(config.parallelism, 10);
        assert_eq!(config.state_path(), PathBuf::from(".converge/state.json"));
    }

    #[test]
    fn test_out_of_range_field_is_rejected() {
        let err = ConfigParser::new()
            .parse_yaml("parallelism: 0", None)
            .expect_err("parallelism must be positive");
        assert!(matches!(
            err,
            ConvergeError::Config(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = ConfigParser::new()
            .parse_yaml("polling: [unclosed", Some(Path::new("converge.yaml")))
            .expect_err("invalid yaml");
        match err {
            ConvergeError::Config(ConfigError::ParseError { location, .. }) => {
                assert!(location.expect("location").starts_with("converge.yaml:"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_ENDPOINT, "http://localhost:9000"),
            (ENV_STATE_PATH, "/tmp/state.json"),
            (ENV_PARALLELISM, "3"),
        ]);
        let mut config = ConvergeConfig::default();

        ConfigParser::apply_overrides(&mut config, |name| vars.get(name).map(ToString::to_string))
            .expect("valid overrides");

        assert_eq!(config.client.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.state_path(), PathBuf::from("/tmp/state.json"));
        assert_eq!(config.parallelism, 3);

        let err = ConfigParser::apply_overrides(&mut config, |name| {
            (name == ENV_PARALLELISM).then(|| String::from("zero"))
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_parse_desired_document() {
        let yaml = r"
resources:
  - name: orders
    type: table
    attributes:
      name: orders
      read_capacity: 5
      tags:
        team: data
";
        let document = ConfigParser::new().parse_desired(yaml, None).expect("valid document");
        let orders = document.resource("orders").expect("declared");
        assert_eq!(orders.resource_type, "table");
        assert_eq!(orders.attributes.len(), 3);
    }

    #[test]
    fn test_find_config_file_walks_parents() {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("dirs");
        std::fs::write(temp.path().join("converge.yml"), "{}").expect("write");

        let found = find_config_file(&nested).expect("found");
        assert_eq!(found, temp.path().join("converge.yml"));
    }
}
