//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::naming::VolumeNaming;
use crate::retry::{PollSettings, RetryPolicy};

/// Driver configuration derived from defaults, configuration files,
/// `DO_*` environment variables, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "DO")]
pub struct DriverConfig {
    /// Personal access token used as the API bearer token. Required.
    pub api_token: String,
    /// Region new volumes are created in (for example `ams3`). Required.
    pub region: String,
    /// Cluster identifier recorded in volume descriptions. When set, volumes
    /// stamped with a different cluster id are ignored.
    pub cluster_id: Option<String>,
    /// Prefix of every volume name owned by the driver.
    #[ortho_config(default = "flocker-v1".to_owned())]
    pub volume_prefix: String,
    /// Base URL of the provider API. Override to point at a mock provider.
    #[ortho_config(default = "https://api.digitalocean.com/v2".to_owned())]
    pub api_base_url: String,
    /// URL of the droplet metadata document.
    #[ortho_config(default = "http://169.254.169.254/metadata/v1.json".to_owned())]
    pub metadata_url: String,
    /// Attempts per provider request, including the first.
    #[ortho_config(default = 5)]
    pub max_attempts: u32,
    /// First retry delay in milliseconds.
    #[ortho_config(default = 1_000)]
    pub backoff_base_ms: u64,
    /// Upper bound on a retry delay in milliseconds.
    #[ortho_config(default = 30_000)]
    pub backoff_cap_ms: u64,
    /// First interval between action polls in milliseconds.
    #[ortho_config(default = 1_000)]
    pub poll_interval_ms: u64,
    /// Largest interval between action polls in milliseconds.
    #[ortho_config(default = 5_000)]
    pub max_poll_interval_ms: u64,
    /// Bound on a whole create, attach, detach or destroy operation.
    #[ortho_config(default = 300)]
    pub operation_timeout_secs: u64,
    /// Timeout applied to each HTTP request.
    #[ortho_config(default = 30)]
    pub http_timeout_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to [digitalocean] in ballast.toml",
            self.env_var, self.toml_key
        )
    }
}

const API_TOKEN: FieldMetadata =
    FieldMetadata::new("DigitalOcean API token", "DO_API_TOKEN", "api_token");
const REGION: FieldMetadata = FieldMetadata::new("volume region", "DO_REGION", "region");
const API_BASE_URL: FieldMetadata =
    FieldMetadata::new("API base URL", "DO_API_BASE_URL", "api_base_url");
const VOLUME_PREFIX: FieldMetadata =
    FieldMetadata::new("volume name prefix", "DO_VOLUME_PREFIX", "volume_prefix");
const HTTP_TIMEOUT: FieldMetadata =
    FieldMetadata::new("HTTP timeout", "DO_HTTP_TIMEOUT_SECS", "http_timeout_secs");
const POLL_INTERVAL: FieldMetadata =
    FieldMetadata::new("poll interval", "DO_POLL_INTERVAL_MS", "poll_interval_ms");

impl DriverConfig {
    fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be positive: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                metadata.description,
                metadata.hint()
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("ballast")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and configuration key that supply each field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a value is malformed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(&self.api_token, &API_TOKEN)?;
        Self::require_field(&self.region, &REGION)?;
        Self::require_field(&self.api_base_url, &API_BASE_URL)?;
        self.naming()?;
        Self::require_positive(self.http_timeout_secs, &HTTP_TIMEOUT)?;
        Self::require_positive(self.poll_interval_ms, &POLL_INTERVAL)
    }

    /// Naming scheme for the configured prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the prefix cannot appear in a
    /// provider volume name.
    pub fn naming(&self) -> Result<VolumeNaming, ConfigError> {
        VolumeNaming::new(self.volume_prefix.trim())
            .map_err(|err| ConfigError::Invalid(format!("{err}: {}", VOLUME_PREFIX.hint())))
    }

    /// Cluster id, when one is configured and non-blank.
    #[must_use]
    pub fn cluster_id(&self) -> Option<&str> {
        self.cluster_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Retry policy for provider requests.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_millis(self.backoff_cap_ms),
        }
    }

    /// Polling schedule for provider actions. The maximum interval never
    /// drops below the first one.
    #[must_use]
    pub const fn poll_settings(&self) -> PollSettings {
        let max_interval_ms = if self.max_poll_interval_ms < self.poll_interval_ms {
            self.poll_interval_ms
        } else {
            self.max_poll_interval_ms
        };
        PollSettings {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_interval: Duration::from_millis(max_interval_ms),
            timeout: Duration::from_secs(self.operation_timeout_secs),
        }
    }

    /// Timeout applied to each HTTP request.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
