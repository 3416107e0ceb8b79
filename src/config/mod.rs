use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::policy::WhitelistStore;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid whitelist entry '{entry}': {reason}")]
    InvalidWhitelistEntry { entry: String, reason: String },

    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Project that owns the monitored firewalls and the notification secret
    #[serde(default)]
    pub project_id: String,

    #[serde(default)]
    pub notification: NotificationConfig,

    #[serde(default)]
    pub remediation: RemediationConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub whitelist: WhitelistConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Alerts are only sent when a recipient is configured
    #[serde(default)]
    pub recipient: Option<String>,

    #[serde(default = "default_sender")]
    pub sender: String,

    #[serde(default = "default_firewall_subject")]
    pub firewall_subject: String,

    #[serde(default = "default_bucket_subject")]
    pub bucket_subject: String,

    /// Secret Manager secret holding the mail API key
    #[serde(default = "default_secret_name")]
    pub secret_name: String,

    #[serde(default = "default_secret_version")]
    pub secret_version: String,

    #[serde(default = "default_mail_base_url")]
    pub api_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    /// Delay between operation status polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on waiting for a firewall deletion to finish
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Wall-clock budget for a whole invocation (decode to notify)
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,

    /// Read-modify-write attempts before giving up on a contended bucket policy
    #[serde(default = "default_bucket_max_attempts")]
    pub bucket_max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_compute_base_url")]
    pub compute_base_url: String,

    #[serde(default = "default_storage_base_url")]
    pub storage_base_url: String,

    #[serde(default = "default_secret_manager_base_url")]
    pub secret_manager_base_url: String,

    /// Bearer token sent to the Google APIs, supports `${ENV_VAR}`
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhitelistConfig {
    /// `protocol:CIDR[:ports]` entries
    #[serde(default)]
    pub firewall: Vec<String>,

    #[serde(default)]
    pub buckets: Vec<String>,
}

// Default value functions
fn default_sender() -> String {
    "No Reply<noreply@example.com>".to_string()
}
fn default_firewall_subject() -> String {
    "Firewall violation detected".to_string()
}
fn default_bucket_subject() -> String {
    "Bucket violation detected".to_string()
}
fn default_secret_name() -> String {
    "sendgrid-apikey".to_string()
}
fn default_secret_version() -> String {
    "latest".to_string()
}
fn default_mail_base_url() -> String {
    "https://api.sendgrid.com".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_poll_timeout_secs() -> u64 {
    240
}
fn default_invocation_timeout_secs() -> u64 {
    540 // matches the longest background function budget
}
fn default_bucket_max_attempts() -> u32 {
    3
}
fn default_compute_base_url() -> String {
    "https://compute.googleapis.com/compute/v1".to_string()
}
fn default_storage_base_url() -> String {
    "https://storage.googleapis.com/storage/v1".to_string()
}
fn default_secret_manager_base_url() -> String {
    "https://secretmanager.googleapis.com/v1".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_port() -> u16 {
    8080
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            recipient: None,
            sender: default_sender(),
            firewall_subject: default_firewall_subject(),
            bucket_subject: default_bucket_subject(),
            secret_name: default_secret_name(),
            secret_version: default_secret_version(),
            api_base_url: default_mail_base_url(),
        }
    }
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_secs: default_poll_timeout_secs(),
            invocation_timeout_secs: default_invocation_timeout_secs(),
            bucket_max_attempts: default_bucket_max_attempts(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            compute_base_url: default_compute_base_url(),
            storage_base_url: default_storage_base_url(),
            secret_manager_base_url: default_secret_manager_base_url(),
            access_token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Defaults, then the TOML file (if any), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };

        // Non-UTF-8 variables cannot carry any of our keys
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
        config.apply_env(vars)?;
        config.expand_env_vars();

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay deployment environment variables.
    ///
    /// Every variable whose upper-cased name starts with `FIREWALL_WHITE_LIST`
    /// contributes one firewall entry; every `BUCKET_WHITE_LIST*` variable
    /// contributes a comma separated list of bucket names. Entries are taken
    /// in variable-name order.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut vars: Vec<(String, String)> = vars.into_iter().collect();
        vars.sort();

        for (name, value) in vars {
            let upper = name.to_uppercase();
            match upper.as_str() {
                "PROJECT_ID" => self.project_id = value,
                "NOTIFICATION_EMAIL" => {
                    self.notification.recipient = Some(value).filter(|v| !v.trim().is_empty())
                }
                "NOTIFICATION_SENDER" => self.notification.sender = value,
                "NOTIFICATION_SUBJECT" => {
                    self.notification.firewall_subject = value.clone();
                    self.notification.bucket_subject = value;
                }
                "ACCESS_TOKEN" => self.api.access_token = Some(value),
                "PORT" => {
                    self.server.port = value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: name.clone(),
                        value: value.clone(),
                    })?
                }
                _ if upper.starts_with("FIREWALL_WHITE_LIST") => self.whitelist.firewall.push(value),
                _ if upper.starts_with("BUCKET_WHITE_LIST") => self
                    .whitelist
                    .buckets
                    .extend(value.split(',').map(|b| b.trim().to_string())),
                _ => {}
            }
        }

        Ok(())
    }

    fn expand_env_vars(&mut self) {
        if let Some(ref mut token) = self.api.access_token {
            *token = expand_env(token);
        }
    }

    /// Parse the configured whitelist.
    pub fn whitelist_store(&self) -> Result<WhitelistStore, ConfigError> {
        WhitelistStore::from_config(&self.whitelist)
    }

    pub fn get_value(&self, key: &str) -> Result<String, ConfigError> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["project_id"] => Ok(self.project_id.clone()),
            ["notification", "recipient"] => {
                Ok(self.notification.recipient.clone().unwrap_or_default())
            }
            ["notification", "sender"] => Ok(self.notification.sender.clone()),
            ["remediation", "poll_interval_ms"] => {
                Ok(self.remediation.poll_interval_ms.to_string())
            }
            ["remediation", "poll_timeout_secs"] => {
                Ok(self.remediation.poll_timeout_secs.to_string())
            }
            ["server", "port"] => Ok(self.server.port.to_string()),
            ["server", "bind"] => Ok(self.server.bind.clone()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            ["logging", "format"] => Ok(self.logging.format.clone()),
            _ => Err(ConfigError::UnknownKey(key.to_string())),
        }
    }
}

fn expand_env(s: &str) -> String {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else if let Some(var_name) = s.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_else(|_| s.to_string())
    } else {
        s.to_string()
    }
}
