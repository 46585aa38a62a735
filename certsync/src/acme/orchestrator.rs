//! Obtain, renew and revoke flows.

use super::AcmeError;
use super::backend::{AcmeBackend, BackendError, ObtainRequest};
use crate::dns::DnsProviderFactory;
use crate::identity::{IdentityError, KeyType, ResolvedIdentity, resolve_identity};
use crate::renewal::{LeafCertificate, needs_renewal_at, unix_now};
use crate::store::StoreError;
use certsync_core::{AccessKey, AcmeAccount, CertificateRecord, DomainConfig, RecordId};
use std::sync::Arc;

/// Where the orchestrator writes an account's key and registration.
pub trait AccountRepository: Send + Sync {
    fn save_account_credentials(
        &self,
        account_id: RecordId,
        private_key: &str,
        resource: &str,
    ) -> Result<(), StoreError>;
}

pub struct Orchestrator {
    backend: Arc<dyn AcmeBackend>,
    dns: Arc<dyn DnsProviderFactory>,
    accounts: Arc<dyn AccountRepository>,
    key_type: KeyType,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn AcmeBackend>,
        dns: Arc<dyn DnsProviderFactory>,
        accounts: Arc<dyn AccountRepository>,
        key_type: KeyType,
    ) -> Self {
        Self {
            backend,
            dns,
            accounts,
            key_type,
        }
    }

    /// Register the account and issue a certificate for every configured domain.
    ///
    /// The account key and registration are stored before the order is placed.
    pub async fn obtain(
        &self,
        account: &AcmeAccount,
        config: &DomainConfig,
        credential: &AccessKey,
    ) -> Result<CertificateRecord, AcmeError> {
        let domains = config.domains();
        let Some(primary) = domains.first().cloned() else {
            return Err(AcmeError::NoDomains(config.id));
        };

        let identity = resolve_identity(account, true)?;
        let dns = self.dns.provider(&config.provider_name, credential)?;

        let registered = self
            .backend
            .register(&identity)
            .await
            .map_err(|e| acquisition_failed("register", &primary, e))?;

        self.accounts.save_account_credentials(
            account.id,
            registered.key.pem(),
            &registered.registration.to_json(),
        )?;
        tracing::debug!(email = %account.email, "Saved ACME account credentials");

        let identity = identity.registered(registered.key, registered.registration);
        let request = ObtainRequest {
            domains,
            bundle: true,
            private_key: self.generate_key()?,
            must_staple: config.must_staple,
        };

        let issued = self
            .backend
            .obtain(&identity, &request, dns.as_ref())
            .await
            .map_err(|e| acquisition_failed("obtain", &primary, e))?;

        tracing::info!(domain = %issued.domain, "Obtained certificate");
        Ok(issued.into_record())
    }

    /// Renew `existing` when the domain configuration's threshold says it is due.
    pub async fn renew(
        &self,
        account: &AcmeAccount,
        config: &DomainConfig,
        credential: &AccessKey,
        existing: &CertificateRecord,
    ) -> Result<CertificateRecord, AcmeError> {
        self.renew_at(account, config, credential, existing, unix_now())
            .await
    }

    /// [`Orchestrator::renew`] with the policy evaluated at `now` (unix seconds).
    pub async fn renew_at(
        &self,
        account: &AcmeAccount,
        config: &DomainConfig,
        credential: &AccessKey,
        existing: &CertificateRecord,
        now: i64,
    ) -> Result<CertificateRecord, AcmeError> {
        let leaf = LeafCertificate::from_pem(&existing.certificate)?;
        if !needs_renewal_at(&leaf, &existing.domain, config.renew_days, now)? {
            return Err(AcmeError::NotDue {
                domain: existing.domain.clone(),
                remaining_days: leaf.days_remaining(now),
                threshold_days: config.renew_days,
            });
        }

        let identity = existing_identity(account)?;
        let dns = self.dns.provider(&config.provider_name, credential)?;

        let private_key = if config.reuse_key && !existing.private_key.trim().is_empty() {
            existing.private_key.clone()
        } else {
            self.generate_key()?
        };

        let domains = if leaf.domains.is_empty() {
            config.domains()
        } else {
            leaf.domains.clone()
        };

        tracing::info!(
            domain = %existing.domain,
            days_remaining = leaf.days_remaining(now),
            reuse_key = config.reuse_key,
            "Renewing certificate"
        );

        let request = ObtainRequest {
            domains,
            bundle: config.bundle,
            private_key,
            must_staple: config.must_staple,
        };
        let issued = self
            .backend
            .obtain(&identity, &request, dns.as_ref())
            .await
            .map_err(|e| acquisition_failed("renew", &existing.domain, e))?;

        tracing::info!(domain = %issued.domain, "Renewed certificate");
        Ok(issued.into_record())
    }

    /// Revoke `existing` with the authority. Nothing is changed locally.
    pub async fn revoke(
        &self,
        account: &AcmeAccount,
        existing: &CertificateRecord,
    ) -> Result<(), AcmeError> {
        let identity = existing_identity(account)?;
        self.backend
            .revoke(&identity, &existing.certificate)
            .await
            .map_err(|e| acquisition_failed("revoke", &existing.domain, e))?;

        tracing::info!(domain = %existing.domain, "Revoked certificate");
        Ok(())
    }

    fn generate_key(&self) -> Result<String, AcmeError> {
        Ok(self.key_type.generate()?.serialize_pem())
    }
}

/// Identity of an already registered account.
fn existing_identity(account: &AcmeAccount) -> Result<ResolvedIdentity, IdentityError> {
    let identity = resolve_identity(account, false)?;
    if identity.registration().is_none() {
        return Err(IdentityError::MissingAccountData {
            email: account.email.clone(),
        });
    }
    Ok(identity)
}

fn acquisition_failed(operation: &'static str, domain: &str, source: BackendError) -> AcmeError {
    tracing::error!(operation, domain = domain, error = %source, "ACME operation failed");
    AcmeError::AcquisitionFailed {
        operation,
        domain: domain.to_string(),
        source,
    }
}
