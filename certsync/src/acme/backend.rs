//! Seam between the orchestrator and the ACME protocol client.

use crate::dns::{DnsChallengeProvider, DnsError};
use crate::identity::{AccountKey, Registration, ResolvedIdentity};
use async_trait::async_trait;
use certsync_core::CertificateRecord;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("ACME error: {0}")]
    Acme(#[from] instant_acme::Error),

    #[error("DNS challenge failed: {0}")]
    Dns(#[from] DnsError),

    #[error("CSR generation failed: {0}")]
    Csr(#[from] rcgen::Error),

    #[error("challenge failed: {0}")]
    Challenge(String),

    #[error("order failed: {0}")]
    Order(String),

    #[error("invalid account data: {0}")]
    Account(String),

    #[error("invalid certificate: {0}")]
    Certificate(String),
}

/// An account after registration: the key it is bound to and the resource
/// to persist.
#[derive(Debug, Clone)]
pub struct RegisteredAccount {
    pub key: AccountKey,
    pub registration: Registration,
}

#[derive(Debug, Clone)]
pub struct ObtainRequest {
    /// Identifiers in order; the first becomes the subject common name.
    pub domains: Vec<String>,
    /// Keep the issuer chain appended to the certificate.
    pub bundle: bool,
    /// Certificate private key as PEM.
    pub private_key: String,
    pub must_staple: bool,
}

/// A certificate as returned by the authority.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub domain: String,
    pub cert_url: String,
    pub cert_stable_url: String,
    pub certificate: String,
    pub issuer_certificate: String,
    pub private_key: String,
}

impl IssuedCertificate {
    pub fn into_record(self) -> CertificateRecord {
        CertificateRecord {
            domain: self.domain,
            cert_url: self.cert_url,
            cert_stable_url: self.cert_stable_url,
            certificate: self.certificate,
            issuer_certificate: self.issuer_certificate,
            private_key: self.private_key,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("domain", &self.domain)
            .field("cert_url", &self.cert_url)
            .finish_non_exhaustive()
    }
}

/// The ACME operations the engine needs.
#[async_trait]
pub trait AcmeBackend: Send + Sync {
    /// Register the identity's account, or load it when already registered.
    async fn register(&self, identity: &ResolvedIdentity)
    -> Result<RegisteredAccount, BackendError>;

    /// Order, validate and download a certificate.
    async fn obtain(
        &self,
        identity: &ResolvedIdentity,
        request: &ObtainRequest,
        dns: &dyn DnsChallengeProvider,
    ) -> Result<IssuedCertificate, BackendError>;

    async fn revoke(
        &self,
        identity: &ResolvedIdentity,
        certificate_pem: &str,
    ) -> Result<(), BackendError>;
}

const PEM_END_CERTIFICATE: &str = "-----END CERTIFICATE-----";

/// Split a full chain into the leaf and the remaining issuer certificates.
pub fn split_chain(fullchain: &str) -> (String, String) {
    match fullchain.find(PEM_END_CERTIFICATE) {
        Some(idx) => {
            let (leaf, rest) = fullchain.split_at(idx + PEM_END_CERTIFICATE.len());
            (format!("{}\n", leaf.trim()), rest.trim_start().to_string())
        }
        None => (fullchain.to_string(), String::new()),
    }
}
