//! Persistent records shared between the store, the task runner and the engine.

use serde::{Deserialize, Serialize};

/// Row id of any stored record.
pub type RecordId = i64;

/// Renewal threshold used when a domain configuration does not set one.
pub const DEFAULT_RENEW_DAYS: i32 = 90;

pub const DEFAULT_LISTENER_PORT: u16 = 443;
pub const DEFAULT_BACKEND_SERVER_PORT: u16 = 9080;

/// ACME account identity.
///
/// `private_key` is the account key as PEM and `resource` is the serialized
/// registration returned by the authority. Both stay empty until the first
/// successful registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcmeAccount {
    #[serde(default)]
    pub id: RecordId,
    pub email: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub created_at: i64,
}

impl AcmeAccount {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Default::default()
        }
    }

    pub fn has_private_key(&self) -> bool {
        !self.private_key.trim().is_empty()
    }

    pub fn has_resource(&self) -> bool {
        !self.resource.trim().is_empty()
    }
}

/// Cloud access key pair, used both for DNS challenges and for the load balancer API.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessKey {
    #[serde(default)]
    pub id: RecordId,
    pub access_key_id: String,
    pub access_key_secret: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub created_at: i64,
}

impl AccessKey {
    pub fn new(access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
            ..Default::default()
        }
    }

    /// Both halves of the pair are present.
    pub fn is_complete(&self) -> bool {
        !self.access_key_id.trim().is_empty() && !self.access_key_secret.trim().is_empty()
    }
}

impl std::fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKey")
            .field("id", &self.id)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field("remark", &self.remark)
            .finish()
    }
}

/// Issuance policy for one set of domains.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomainConfig {
    #[serde(default)]
    pub id: RecordId,
    /// One or more domain patterns separated by whitespace, e.g. `*.a.com c.com`.
    pub domain: String,
    /// Name of the DNS-01 provider used to answer challenges.
    pub provider_name: String,
    /// Renew once this many days or fewer remain. Negative means always renew.
    #[serde(default = "default_renew_days")]
    pub renew_days: i32,
    /// Reuse the existing certificate private key on renewal.
    #[serde(default)]
    pub reuse_key: bool,
    /// Bundle the issuer chain with the leaf certificate.
    #[serde(default)]
    pub bundle: bool,
    /// Request the OCSP must-staple extension.
    #[serde(default)]
    pub must_staple: bool,
    #[serde(default)]
    pub created_at: i64,
}

fn default_renew_days() -> i32 {
    DEFAULT_RENEW_DAYS
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            id: 0,
            domain: String::new(),
            provider_name: String::new(),
            renew_days: default_renew_days(),
            reuse_key: false,
            bundle: false,
            must_staple: false,
            created_at: 0,
        }
    }
}

impl DomainConfig {
    pub fn new(domain: impl Into<String>, provider_name: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            provider_name: provider_name.into(),
            ..Default::default()
        }
    }

    /// Individual domain patterns, in configured order, without duplicates.
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = Vec::new();
        for domain in self.domain.split_whitespace() {
            if !domains.iter().any(|d| d == domain) {
                domains.push(domain.to_string());
            }
        }
        domains
    }

    pub fn primary_domain(&self) -> Option<String> {
        self.domain.split_whitespace().next().map(str::to_string)
    }
}

/// A load balancer whose HTTPS listener is kept in sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadBalancerTarget {
    #[serde(default)]
    pub id: RecordId,
    pub region_id: String,
    pub load_balancer_id: String,
    #[serde(default = "default_listener_port")]
    pub listener_port: u16,
    #[serde(default = "default_backend_server_port")]
    pub backend_server_port: u16,
    #[serde(default)]
    pub created_at: i64,
}

fn default_listener_port() -> u16 {
    DEFAULT_LISTENER_PORT
}

fn default_backend_server_port() -> u16 {
    DEFAULT_BACKEND_SERVER_PORT
}

impl LoadBalancerTarget {
    pub fn new(region_id: impl Into<String>, load_balancer_id: impl Into<String>) -> Self {
        Self {
            id: 0,
            region_id: region_id.into(),
            load_balancer_id: load_balancer_id.into(),
            listener_port: DEFAULT_LISTENER_PORT,
            backend_server_port: DEFAULT_BACKEND_SERVER_PORT,
            created_at: 0,
        }
    }
}

/// An issued certificate. Records are superseded by newer rows, never edited.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificateRecord {
    #[serde(default)]
    pub id: RecordId,
    pub domain: String,
    #[serde(default)]
    pub cert_url: String,
    #[serde(default)]
    pub cert_stable_url: String,
    /// Leaf certificate PEM, followed by the issuer chain when bundled.
    pub certificate: String,
    #[serde(default)]
    pub issuer_certificate: String,
    pub private_key: String,
    #[serde(default)]
    pub created_at: i64,
}

impl std::fmt::Debug for CertificateRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateRecord")
            .field("id", &self.id)
            .field("domain", &self.domain)
            .field("cert_url", &self.cert_url)
            .field("cert_stable_url", &self.cert_stable_url)
            .field("certificate_len", &self.certificate.len())
            .field("issuer_certificate_len", &self.issuer_certificate.len())
            .finish_non_exhaustive()
    }
}
