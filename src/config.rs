//! Configuration management for the abuse guard.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{GuardError, Result};
use crate::guard::{LimitClass, LimitRule};

/// Prefix for environment overrides, e.g. `ABUSE_GUARD__LIMITS__AUTH__MAX_REQUESTS=10`.
pub const ENV_PREFIX: &str = "ABUSE_GUARD";

/// Main configuration for the abuse guard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Sidecar server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-class request limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Blocklist escalation and retention
    #[serde(default)]
    pub blocking: BlockingConfig,

    /// Suspicious activity log sizing
    #[serde(default)]
    pub activity_log: ActivityLogConfig,

    /// Request inspection settings
    #[serde(default)]
    pub inspection: InspectionConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8090))
}

/// Window and threshold for each limit class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_api_rule")]
    pub api: LimitRule,
    #[serde(default = "default_auth_rule")]
    pub auth: LimitRule,
    #[serde(default = "default_forms_rule")]
    pub forms: LimitRule,
    #[serde(default = "default_search_rule")]
    pub search: LimitRule,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            api: default_api_rule(),
            auth: default_auth_rule(),
            forms: default_forms_rule(),
            search: default_search_rule(),
        }
    }
}

fn default_api_rule() -> LimitRule {
    LimitRule::new(60, 60)
}

fn default_auth_rule() -> LimitRule {
    LimitRule::new(15 * 60, 5)
}

fn default_forms_rule() -> LimitRule {
    LimitRule::new(60, 3)
}

fn default_search_rule() -> LimitRule {
    LimitRule::new(60, 30)
}

impl LimitsConfig {
    /// Get the rule for a limit class.
    pub fn rule(&self, class: LimitClass) -> &LimitRule {
        match class {
            LimitClass::Api => &self.api,
            LimitClass::Auth => &self.auth,
            LimitClass::Forms => &self.forms,
            LimitClass::Search => &self.search,
        }
    }
}

/// Blocklist configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockingConfig {
    /// How long a blocked IP stays blocked, in seconds
    #[serde(default = "default_block_duration")]
    pub block_duration_secs: u64,

    /// Requests over the class maximum, within one window, that escalate to a block
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u64,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            block_duration_secs: default_block_duration(),
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

fn default_block_duration() -> u64 {
    24 * 60 * 60
}

fn default_escalation_threshold() -> u64 {
    20
}

/// Suspicious activity log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogConfig {
    /// Maximum number of records retained
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,
}

impl Default for ActivityLogConfig {
    fn default() -> Self {
        Self {
            capacity: default_log_capacity(),
        }
    }
}

fn default_log_capacity() -> usize {
    1000
}

/// Request inspection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionConfig {
    /// Serialized body length above which a payload is flagged
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: usize,

    /// Path prefix of the legitimate admin area, exempt from the suspicious URL check
    #[serde(default = "default_admin_prefix")]
    pub admin_prefix: String,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload(),
            admin_prefix: default_admin_prefix(),
        }
    }
}

fn default_max_payload() -> usize {
    1_000_000
}

fn default_admin_prefix() -> String {
    "/admin".to_string()
}

impl GuardConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GuardConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(format!("Failed to parse guard config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading guard configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional YAML file layered with
    /// `ABUSE_GUARD__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading guard configuration");
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: GuardConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the guard deny or allow everything.
    pub fn validate(&self) -> Result<()> {
        for class in LimitClass::all() {
            let rule = self.limits.rule(*class);
            if rule.window_secs == 0 {
                return Err(GuardError::Config(format!(
                    "limits.{}.window_secs must be greater than zero",
                    class
                )));
            }
            if rule.max_requests == 0 {
                return Err(GuardError::Config(format!(
                    "limits.{}.max_requests must be greater than zero",
                    class
                )));
            }
        }

        if self.blocking.block_duration_secs == 0 {
            return Err(GuardError::Config(
                "blocking.block_duration_secs must be greater than zero".to_string(),
            ));
        }

        if self.activity_log.capacity == 0 {
            return Err(GuardError::Config(
                "activity_log.capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
