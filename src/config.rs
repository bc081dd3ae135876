//! Configuration management for Ratewire.
//!
//! A configuration names the counter store and one or more tenants, each
//! with its own policy and optionally its own store.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{RatewireError, Result};
use crate::ratelimit::{FailureMode, Policy, DEFAULT_KEY_PREFIX};
use crate::wire::{is_inline_arg, ConnectOptions};

/// Prefix for environment variable overrides, e.g. `RATEWIRE__STORE__HOST`.
pub const ENV_PREFIX: &str = "RATEWIRE";

/// Main configuration for Ratewire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatewireConfig {
    /// Default counter store
    #[serde(default)]
    pub store: StoreConfig,

    /// What to do with a request when the store cannot be consulted
    #[serde(default)]
    pub failure_mode: FailureMode,

    /// Prefix for counter keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Tenants and their policies
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

impl Default for RatewireConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            failure_mode: FailureMode::default(),
            key_prefix: default_key_prefix(),
            tenants: Vec::new(),
        }
    }
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

/// Counter store connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Password sent with AUTH
    #[serde(default)]
    pub password: Option<String>,

    /// Database index sent with SELECT
    #[serde(default)]
    pub namespace: u32,

    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: Option<u64>,

    #[serde(default = "default_timeout_ms")]
    pub io_timeout_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: None,
            namespace: 0,
            connect_timeout_ms: default_timeout_ms(),
            io_timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_timeout_ms() -> Option<u64> {
    Some(1000)
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("namespace", &self.namespace)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("io_timeout_ms", &self.io_timeout_ms)
            .finish()
    }
}

impl StoreConfig {
    /// Connection options for the wire client.
    pub fn connect_options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new(self.host.clone(), self.port)
            .with_namespace(self.namespace)
            .with_timeouts(
                self.connect_timeout_ms.map(Duration::from_millis),
                self.io_timeout_ms.map(Duration::from_millis),
            );
        if let Some(password) = self.password.as_ref().filter(|p| !p.is_empty()) {
            options = options.with_password(password.clone());
        }
        options
    }

    fn validate(&self, owner: &str) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(RatewireError::Config(format!("{}: store host is empty", owner)));
        }
        if self.port == 0 {
            return Err(RatewireError::Config(format!("{}: store port must be non-zero", owner)));
        }
        if self.connect_timeout_ms == Some(0) || self.io_timeout_ms == Some(0) {
            return Err(RatewireError::Config(format!(
                "{}: timeouts must be positive when set",
                owner
            )));
        }
        if let Some(password) = self.password.as_ref().filter(|p| !p.is_empty()) {
            if !is_inline_arg(password) {
                return Err(RatewireError::Config(format!(
                    "{}: store password cannot contain whitespace or control characters",
                    owner
                )));
            }
        }
        Ok(())
    }
}

/// One tenant's quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub name: String,

    /// Requests admitted per window
    pub max: u64,

    /// Window length in seconds
    pub window_seconds: u64,

    /// Store for this tenant; replaces the top-level store entirely
    #[serde(default)]
    pub store: Option<StoreConfig>,
}

impl TenantConfig {
    pub fn policy(&self) -> Result<Policy> {
        Policy::new(self.max, self.window_seconds).ok_or_else(|| {
            RatewireError::Config(format!(
                "tenant {}: max and window_seconds must both be at least 1",
                self.name
            ))
        })
    }
}

impl RatewireConfig {
    /// Load configuration from a YAML file, then apply `RATEWIRE__*`
    /// environment overrides, then validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(RatewireError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| RatewireError::Config(e.to_string()))?;

        let config: RatewireConfig = settings
            .try_deserialize()
            .map_err(|e| RatewireError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RatewireConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RatewireError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration before any request is evaluated.
    pub fn validate(&self) -> Result<()> {
        self.store.validate("store")?;

        if !self.key_prefix.is_empty() && !is_inline_arg(&self.key_prefix) {
            return Err(RatewireError::Config(format!(
                "key_prefix {:?} cannot contain whitespace or control characters",
                self.key_prefix
            )));
        }

        if self.tenants.is_empty() {
            return Err(RatewireError::Config("no tenants configured".to_string()));
        }

        let mut seen = HashSet::new();
        for tenant in &self.tenants {
            if !seen.insert(tenant.name.as_str()) {
                return Err(RatewireError::Config(format!(
                    "duplicate tenant {}",
                    tenant.name
                )));
            }
            tenant.policy()?;
            if let Some(store) = &tenant.store {
                store.validate(&format!("tenant {}", tenant.name))?;
            }
        }

        Ok(())
    }

    pub fn tenant(&self, name: &str) -> Result<&TenantConfig> {
        self.tenants
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| RatewireError::UnknownTenant(name.to_string()))
    }

    /// The store a tenant's counters live in.
    pub fn store_for<'a>(&'a self, tenant: &'a TenantConfig) -> &'a StoreConfig {
        tenant.store.as_ref().unwrap_or(&self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
store:
  host: redis.internal
  port: 6380
  password: s3cret
  namespace: 2
failure_mode: open
tenants:
  - name: api
    max: 3
    window_seconds: 60
  - name: login
    max: 5
    window_seconds: 300
    store:
      host: 10.0.0.9
"#;

    #[test]
    fn test_parse_full_config() {
        let config = RatewireConfig::from_yaml(YAML).unwrap();

        assert_eq!(config.store.host, "redis.internal");
        assert_eq!(config.store.port, 6380);
        assert_eq!(config.failure_mode, FailureMode::Open);
        assert_eq!(config.key_prefix, DEFAULT_KEY_PREFIX);
        assert_eq!(config.tenants.len(), 2);

        let api = config.tenant("api").unwrap();
        assert_eq!(api.policy().unwrap(), Policy::new(3, 60).unwrap());
        assert_eq!(config.store_for(api).host, "redis.internal");

        let login = config.tenant("login").unwrap();
        let store = config.store_for(login);
        assert_eq!(store.host, "10.0.0.9");
        assert_eq!(store.port, 6379);
        assert_eq!(store.password, None);
    }

    #[test]
    fn test_connect_options() {
        let config = RatewireConfig::from_yaml(YAML).unwrap();
        let options = config.store.connect_options();

        assert_eq!(options.endpoint(), "redis.internal:6380");
        assert_eq!(options.password.as_deref(), Some("s3cret"));
        assert_eq!(options.namespace, 2);
        assert_eq!(options.io_timeout, Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = RatewireConfig::from_yaml(YAML).unwrap();
        let debug = format!("{:?}", config.store);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_rejects_zero_policy() {
        let yaml = "tenants:\n  - { name: api, max: 0, window_seconds: 60 }\n";
        assert!(matches!(
            RatewireConfig::from_yaml(yaml),
            Err(RatewireError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_tenants_and_empty_list() {
        let yaml = r#"
tenants:
  - { name: api, max: 1, window_seconds: 1 }
  - { name: api, max: 2, window_seconds: 1 }
"#;
        assert!(RatewireConfig::from_yaml(yaml).is_err());
        assert!(RatewireConfig::from_yaml("tenants: []\n").is_err());
    }

    #[test]
    fn test_rejects_bad_store() {
        let yaml = r#"
store: { port: 0 }
tenants:
  - { name: api, max: 1, window_seconds: 1 }
"#;
        assert!(RatewireConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_unsendable_key_prefix() {
        let yaml = format!("key_prefix: \"my app:\"\n{}", YAML);
        let err = RatewireConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("key_prefix"));

        let yaml = format!("key_prefix: \"\"\n{}", YAML);
        assert_eq!(RatewireConfig::from_yaml(&yaml).unwrap().key_prefix, "");
    }

    #[test]
    fn test_rejects_unsendable_password() {
        let yaml = YAML.replace("password: s3cret", "password: \"s3cret with space\"");
        let err = RatewireConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("store password"));

        let yaml = r#"
tenants:
  - name: api
    max: 1
    window_seconds: 1
    store: { password: "tab\there" }
"#;
        let err = RatewireConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("tenant api"));
    }

    #[test]
    fn test_unknown_tenant() {
        let config = RatewireConfig::from_yaml(YAML).unwrap();
        assert!(matches!(
            config.tenant("nope"),
            Err(RatewireError::UnknownTenant(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratewire.yaml");
        std::fs::write(&path, YAML).unwrap();

        let config = RatewireConfig::from_file(&path).unwrap();
        assert_eq!(config.tenants.len(), 2);
        assert_eq!(config.store.namespace, 2);
    }

    #[test]
    fn test_from_missing_file() {
        assert!(matches!(
            RatewireConfig::from_file("/nonexistent/ratewire.yaml"),
            Err(RatewireError::Io(_))
        ));
    }
}
