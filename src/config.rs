//! Configuration for the test harness
//!
//! Build it programmatically, or start from the environment with
//! [`HarnessConfig::from_env`]. No config files needed.
//!
//! # Example
//!
//! ```
//! use kubetest::config::HarnessConfig;
//! use std::time::Duration;
//!
//! let config = HarnessConfig::new()
//!     .namespace_prefix("echo-test")
//!     .poll_interval(Duration::from_millis(500));
//! ```

use std::time::Duration;

/// Namespace prefix override
pub const ENV_NAMESPACE_PREFIX: &str = "KUBETEST_NAMESPACE_PREFIX";
/// Run in an existing namespace instead of creating one
pub const ENV_NAMESPACE: &str = "KUBETEST_NAMESPACE";
/// Poll interval for wait operations, in milliseconds
pub const ENV_POLL_INTERVAL_MS: &str = "KUBETEST_POLL_INTERVAL_MS";
/// Never delete the test namespace, even on success
pub const ENV_KEEP_ALL: &str = "KUBETEST_KEEP_ALL";

/// Errors from reading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Harness configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Prefix for generated namespace names (`<prefix>-<8 hex>`)
    pub namespace_prefix: String,

    /// Use this namespace as-is; it is neither created nor deleted
    pub namespace: Option<String>,

    /// Delay between polls in `wait_*` operations
    pub poll_interval: Duration,

    /// Keep the namespace after a successful test
    pub keep_namespace: bool,

    /// Default timeout for `wait_for_registered` when the test attribute
    /// applies manifests
    pub registered_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: "kubetest".to_string(),
            namespace: None,
            poll_interval: Duration::from_secs(1),
            keep_namespace: false,
            registered_timeout: Duration::from_secs(300),
        }
    }
}

impl HarnessConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, overridden by `KUBETEST_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from an arbitrary source
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(prefix) = lookup(ENV_NAMESPACE_PREFIX) {
            if !is_dns_label(&prefix) {
                return Err(ConfigError::InvalidValue {
                    key: ENV_NAMESPACE_PREFIX.to_string(),
                    value: prefix,
                    reason: "must be a lowercase DNS label".to_string(),
                });
            }
            config.namespace_prefix = prefix;
        }

        if let Some(ns) = lookup(ENV_NAMESPACE).filter(|ns| !ns.is_empty()) {
            config.namespace = Some(ns);
        }

        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            let millis: u64 = raw.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    key: ENV_POLL_INTERVAL_MS.to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?;
            if millis == 0 {
                return Err(ConfigError::InvalidValue {
                    key: ENV_POLL_INTERVAL_MS.to_string(),
                    value: raw,
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.poll_interval = Duration::from_millis(millis);
        }

        // Presence is enough, matching the test attribute's check
        config.keep_namespace = lookup(ENV_KEEP_ALL).is_some();

        Ok(config)
    }

    /// Set the namespace prefix
    pub fn namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.namespace_prefix = prefix.into();
        self
    }

    /// Run in an existing namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Keep the namespace after the test
    pub fn keep_namespace(mut self, keep: bool) -> Self {
        self.keep_namespace = keep;
        self
    }

    /// Set the default `wait_for_registered` timeout
    pub fn registered_timeout(mut self, timeout: Duration) -> Self {
        self.registered_timeout = timeout;
        self
    }
}

fn is_dns_label(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 50
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}
