//! DNS-01 challenge providers
//!
//! The engine never edits DNS records itself. A provider receives the
//! `_acme-challenge` record name and value and makes them resolvable, then
//! removes them after validation.

mod hook;

pub use hook::{DnsHookRegistry, HookDnsProvider, HookProviderConfig};

use async_trait::async_trait;
use certsync_core::AccessKey;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("unknown DNS provider: {0}")]
    UnknownProvider(String),

    #[error("invalid credentials for DNS provider {provider}: access key id and secret are required")]
    InvalidCredentials { provider: String },

    #[error("DNS hook `{command}` could not be started: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("DNS hook `{command} {action}` for {fqdn} exited with {status}: {stderr}")]
    HookFailed {
        command: String,
        action: &'static str,
        fqdn: String,
        status: String,
        stderr: String,
    },
}

/// Publishes and withdraws DNS-01 challenge records.
#[async_trait]
pub trait DnsChallengeProvider: Send + Sync {
    /// Make the TXT record for `domain` resolvable with `value`.
    async fn present(&self, domain: &str, value: &str) -> Result<(), DnsError>;

    /// Remove the TXT record created by [`DnsChallengeProvider::present`].
    async fn cleanup(&self, domain: &str, value: &str) -> Result<(), DnsError>;
}

/// Builds a provider by name for the given cloud credential.
pub trait DnsProviderFactory: Send + Sync {
    fn provider(
        &self,
        name: &str,
        credential: &AccessKey,
    ) -> Result<Arc<dyn DnsChallengeProvider>, DnsError>;
}

/// Fully qualified TXT record name answering a challenge for `domain`.
///
/// Wildcard identifiers validate against the base domain.
pub fn challenge_record_name(domain: &str) -> String {
    let base = domain.trim_start_matches("*.").trim_end_matches('.');
    format!("_acme-challenge.{base}.")
}
