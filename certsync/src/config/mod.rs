//! TOML configuration
//!
//! Every section is optional:
//!
//! ```toml
//! database = "/var/lib/certsync/certsync.db"
//!
//! [acme]
//! directory = "production"
//!
//! [listener]
//! cookie_timeout_secs = 3600
//!
//! [slb]
//! timeout_secs = 10
//!
//! [dns.providers.alidns]
//! command = "/usr/local/bin/alidns-hook"
//! propagation_delay_secs = 60
//! ```

mod error;

pub use error::{ConfigError, Result};

use crate::acme::AcmeConfig;
use crate::dns::{DnsHookRegistry, HookProviderConfig};
use crate::slb::{ListenerDefaults, SlbConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_DATABASE_PATH: &str = "certsync.db";

/// Largest sticky-session cookie lifetime the load balancer accepts.
const MAX_COOKIE_TIMEOUT_SECS: u32 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: PathBuf,
    pub acme: AcmeConfig,
    pub listener: ListenerDefaults,
    pub slb: SlbConfig,
    pub dns: DnsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE_PATH),
            acme: AcmeConfig::default(),
            listener: ListenerDefaults::default(),
            slb: SlbConfig::default(),
            dns: DnsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DnsConfig {
    /// Hook providers by the name domain configurations refer to.
    pub providers: HashMap<String, HookProviderConfig>,
}

impl DnsConfig {
    pub fn registry(&self) -> DnsHookRegistry {
        DnsHookRegistry::new(self.providers.clone())
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(path.as_ref().to_path_buf(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.as_os_str().is_empty() {
            return Err(ConfigError::Validation("database path is empty".to_string()));
        }

        let directory = self.acme.directory.trim();
        let known = matches!(directory, "staging" | "production");
        if !known && !directory.starts_with("https://") && !directory.starts_with("http://") {
            return Err(ConfigError::Validation(format!(
                "acme.directory must be 'staging', 'production' or a URL, got '{directory}'"
            )));
        }
        if self.acme.order_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "acme.order_timeout_secs must be greater than 0".to_string(),
            ));
        }

        let listener = &self.listener;
        if listener.sticky_session
            && !(1..=MAX_COOKIE_TIMEOUT_SECS).contains(&listener.cookie_timeout_secs)
        {
            return Err(ConfigError::Validation(format!(
                "listener.cookie_timeout_secs must be between 1 and {MAX_COOKIE_TIMEOUT_SECS}"
            )));
        }
        if listener.bandwidth != -1 && listener.bandwidth < 1 {
            return Err(ConfigError::Validation(
                "listener.bandwidth must be -1 (unrestricted) or a positive number".to_string(),
            ));
        }

        if self.slb.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "slb.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if let Some(endpoint) = &self.slb.endpoint
            && reqwest::Url::parse(endpoint).is_err()
        {
            return Err(ConfigError::Validation(format!(
                "slb.endpoint is not a valid URL: {endpoint}"
            )));
        }

        for (name, provider) in &self.dns.providers {
            if provider.command.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "dns.providers.{name}.command is empty"
                )));
            }
        }

        Ok(())
    }
}
