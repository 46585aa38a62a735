//! DNS provider that delegates record changes to an external command.
//!
//! The command is invoked as `<command> [args..] present|cleanup <fqdn> <value>`
//! with the cloud credential exported as `CERTSYNC_ACCESS_KEY_ID` and
//! `CERTSYNC_ACCESS_KEY_SECRET`.

use super::{DnsChallengeProvider, DnsError, DnsProviderFactory, challenge_record_name};
use crate::defaults::DNS_PROPAGATION_DELAY;
use async_trait::async_trait;
use certsync_core::AccessKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// One named provider from the `[dns.providers.<name>]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookProviderConfig {
    /// Executable to run.
    pub command: String,
    /// Arguments placed before the action.
    #[serde(default)]
    pub args: Vec<String>,
    /// Wait after `present` so the record reaches the authoritative servers.
    #[serde(default = "default_propagation_delay_secs")]
    pub propagation_delay_secs: u64,
}

fn default_propagation_delay_secs() -> u64 {
    DNS_PROPAGATION_DELAY.as_secs()
}

impl HookProviderConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            propagation_delay_secs: default_propagation_delay_secs(),
        }
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.propagation_delay_secs)
    }
}

pub struct HookDnsProvider {
    name: String,
    config: HookProviderConfig,
    credential: AccessKey,
}

impl HookDnsProvider {
    pub fn new(
        name: impl Into<String>,
        config: HookProviderConfig,
        credential: AccessKey,
    ) -> Result<Self, DnsError> {
        let name = name.into();
        if !credential.is_complete() {
            return Err(DnsError::InvalidCredentials { provider: name });
        }
        Ok(Self {
            name,
            config,
            credential,
        })
    }

    async fn run(&self, action: &'static str, domain: &str, value: &str) -> Result<(), DnsError> {
        let fqdn = challenge_record_name(domain);
        tracing::debug!(
            provider = %self.name,
            action,
            fqdn = %fqdn,
            "Running DNS hook"
        );

        let output = Command::new(&self.config.command)
            .args(&self.config.args)
            .arg(action)
            .arg(&fqdn)
            .arg(value)
            .env("CERTSYNC_DNS_PROVIDER", &self.name)
            .env("CERTSYNC_ACCESS_KEY_ID", &self.credential.access_key_id)
            .env(
                "CERTSYNC_ACCESS_KEY_SECRET",
                &self.credential.access_key_secret,
            )
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DnsError::Spawn {
                command: self.config.command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DnsError::HookFailed {
                command: self.config.command.clone(),
                action,
                fqdn,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DnsChallengeProvider for HookDnsProvider {
    async fn present(&self, domain: &str, value: &str) -> Result<(), DnsError> {
        self.run("present", domain, value).await?;
        let delay = self.config.propagation_delay();
        if !delay.is_zero() {
            tracing::info!(
                provider = %self.name,
                domain = domain,
                delay_secs = delay.as_secs(),
                "Waiting for DNS propagation"
            );
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn cleanup(&self, domain: &str, value: &str) -> Result<(), DnsError> {
        self.run("cleanup", domain, value).await
    }
}

/// Named hook providers from configuration.
#[derive(Debug, Clone, Default)]
pub struct DnsHookRegistry {
    providers: HashMap<String, HookProviderConfig>,
}

impl DnsHookRegistry {
    pub fn new(providers: HashMap<String, HookProviderConfig>) -> Self {
        Self { providers }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }
}

impl DnsProviderFactory for DnsHookRegistry {
    fn provider(
        &self,
        name: &str,
        credential: &AccessKey,
    ) -> Result<Arc<dyn DnsChallengeProvider>, DnsError> {
        let config = self
            .providers
            .get(name)
            .ok_or_else(|| DnsError::UnknownProvider(name.to_string()))?;
        let provider = HookDnsProvider::new(name, config.clone(), credential.clone())?;
        Ok(Arc::new(provider))
    }
}
