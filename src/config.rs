//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// IPAM connection and workflow settings derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "IPAM")]
pub struct IpamConfig {
    /// Scheme used to reach the IPAM service. Defaults to `https`.
    #[ortho_config(default = "https".to_owned())]
    pub protocol: String,
    /// Host name of the IPAM service. This value is required.
    pub hostname: String,
    /// TCP port of the IPAM service. Defaults to 443.
    #[ortho_config(default = 443)]
    pub port: u16,
    /// Account used to open sessions. This value is required.
    pub username: String,
    /// Credential for the account. This value is required.
    pub password: String,
    /// Connection establishment timeout in seconds.
    #[ortho_config(default = 30)]
    pub open_timeout_secs: u64,
    /// Response read timeout in seconds.
    #[ortho_config(default = 60)]
    pub read_timeout_secs: u64,
    /// Accept endpoints with invalid TLS certificates. Off by default; some
    /// appliance deployments only present self-signed certificates.
    #[ortho_config(default = false)]
    pub accept_invalid_certs: bool,
    /// Named top-level configuration scope to operate under. Required.
    pub configuration_name: String,
    /// Comma-separated object ids of downstream servers that receive a
    /// deploy call after registration.
    #[ortho_config(default = String::new())]
    pub deploy_servers: String,
    /// Settle delay between per-server deploy calls, in seconds.
    #[ortho_config(default = 10)]
    pub deploy_wait_secs: u64,
    /// Prefix for automatically generated hostnames.
    #[ortho_config(default = "cf".to_owned())]
    pub hostname_prefix: String,
    /// Maximum attempts for the bounded empty-search retry.
    #[ortho_config(default = 30)]
    pub search_attempts: u32,
    /// Pause between empty-search retries, in seconds.
    #[ortho_config(default = 10)]
    pub search_pause_secs: u64,
    /// Interval suggested to the host when a step asks to be retried later,
    /// in seconds.
    #[ortho_config(default = 60)]
    pub retry_interval_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

impl IpamConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in leasehold.toml",
                metadata.description, metadata.env_var, metadata.toml_key, metadata.section
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("leasehold")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Base URL of the IPAM API endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!(
            "{}://{}:{}/Services/API",
            self.protocol, self.hostname, self.port
        )
    }

    /// Connection establishment timeout.
    #[must_use]
    pub const fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    /// Response read timeout.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Settle delay between per-server deploy calls.
    #[must_use]
    pub const fn deploy_wait(&self) -> Duration {
        Duration::from_secs(self.deploy_wait_secs)
    }

    /// Pause between empty-search retries.
    #[must_use]
    pub const fn search_pause(&self) -> Duration {
        Duration::from_secs(self.search_pause_secs)
    }

    /// Interval suggested to the host for retry-later outcomes.
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Parses the deploy server list into object ids, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when an entry is not an integer.
    pub fn deploy_server_ids(&self) -> Result<Vec<i64>, ConfigError> {
        self.deploy_servers
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry.parse::<i64>().map_err(|_| {
                    ConfigError::Invalid(format!(
                        "deploy_servers entry {entry:?} is not an object id"
                    ))
                })
            })
            .collect()
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] for malformed values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.hostname,
            &FieldMetadata::new("IPAM host name", "IPAM_HOSTNAME", "hostname", "ipam"),
        )?;
        Self::require_field(
            &self.username,
            &FieldMetadata::new("IPAM user name", "IPAM_USERNAME", "username", "ipam"),
        )?;
        Self::require_field(
            &self.password,
            &FieldMetadata::new("IPAM password", "IPAM_PASSWORD", "password", "ipam"),
        )?;
        Self::require_field(
            &self.configuration_name,
            &FieldMetadata::new(
                "IPAM configuration scope",
                "IPAM_CONFIGURATION_NAME",
                "configuration_name",
                "ipam",
            ),
        )?;
        if self.port == 0 {
            return Err(ConfigError::Invalid(String::from("port must be non-zero")));
        }
        if self.hostname_prefix.is_empty()
            || !self
                .hostname_prefix
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
        {
            return Err(ConfigError::Invalid(format!(
                "hostname_prefix {:?} must be lowercase alphanumeric",
                self.hostname_prefix
            )));
        }
        if self.search_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "search_attempts must be at least 1",
            )));
        }
        self.deploy_server_ids().map(|_| ())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value that cannot be used.
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
