//! ACME backend built on `instant-acme`, answering DNS-01 challenges.

use super::backend::{
    AcmeBackend, BackendError, IssuedCertificate, ObtainRequest, RegisteredAccount, split_chain,
};
use crate::defaults::{
    ACME_ORDER_TIMEOUT, LETSENCRYPT_PRODUCTION_DIRECTORY, LETSENCRYPT_STAGING_DIRECTORY,
};
use crate::dns::DnsChallengeProvider;
use crate::identity::{AccountKey, KeyType, Registration, ResolvedIdentity};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, Key, NewAccount,
    NewOrder, Order, OrderStatus, RetryPolicy, RevocationRequest,
};
use rcgen::{CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// TLS Feature extension (RFC 7633).
const TLS_FEATURE_OID: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 24];
/// `SEQUENCE { INTEGER 5 }`: status_request.
const MUST_STAPLE_VALUE: [u8; 5] = [0x30, 0x03, 0x02, 0x01, 0x05];

/// ACME configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcmeConfig {
    /// `staging`, `production` or a full directory URL
    pub directory: String,
    pub terms_of_service_agreed: bool,
    /// How long to wait for an order to become ready or valid, in seconds
    pub order_timeout_secs: u64,
    /// Key type for newly generated certificate keys
    pub key_type: KeyType,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            directory: "staging".to_string(),
            terms_of_service_agreed: true,
            order_timeout_secs: ACME_ORDER_TIMEOUT.as_secs(),
            key_type: KeyType::default(),
        }
    }
}

impl AcmeConfig {
    pub fn directory_url(&self) -> String {
        match self.directory.as_str() {
            "staging" => LETSENCRYPT_STAGING_DIRECTORY.to_string(),
            "production" => LETSENCRYPT_PRODUCTION_DIRECTORY.to_string(),
            url => url.to_string(),
        }
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.order_timeout_secs)
    }
}

pub struct InstantAcmeClient {
    config: AcmeConfig,
}

impl InstantAcmeClient {
    pub fn new(config: AcmeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AcmeConfig {
        &self.config
    }

    async fn load_account(&self, identity: &ResolvedIdentity) -> Result<Account, BackendError> {
        let value = stored_credentials(identity, &self.config.directory_url())?;
        let credentials: AccountCredentials = serde_json::from_value(value)
            .map_err(|e| BackendError::Account(format!("invalid credentials: {e}")))?;

        let account = Account::builder()?.from_credentials(credentials).await?;
        Ok(account)
    }

    async fn complete_order(
        &self,
        order: &mut Order,
        request: &ObtainRequest,
        dns: &dyn DnsChallengeProvider,
        presented: &mut Vec<(String, String)>,
    ) -> Result<String, BackendError> {
        let mut authorizations = order.authorizations();
        while let Some(auth_result) = authorizations.next().await {
            let mut auth = auth_result?;

            match auth.status {
                AuthorizationStatus::Pending => {
                    let domain = match auth.identifier().identifier {
                        Identifier::Dns(name) => name.clone(),
                        other => {
                            return Err(BackendError::Challenge(format!(
                                "unsupported identifier {other:?}"
                            )));
                        }
                    };
                    let mut challenge = auth.challenge(ChallengeType::Dns01).ok_or_else(|| {
                        BackendError::Challenge(format!("no DNS-01 challenge for {domain}"))
                    })?;

                    let value = challenge.key_authorization().dns_value();
                    dns.present(&domain, &value).await?;
                    presented.push((domain.clone(), value));

                    tracing::info!(domain = %domain, "DNS-01 challenge presented");
                    challenge.set_ready().await?;
                }
                AuthorizationStatus::Valid => {
                    tracing::debug!("Authorization already valid");
                }
                status => {
                    return Err(BackendError::Challenge(format!(
                        "unexpected authorization status: {status:?}"
                    )));
                }
            }
        }

        let retry_policy = RetryPolicy::new().timeout(self.config.order_timeout());
        match order.poll_ready(&retry_policy).await? {
            OrderStatus::Ready => {}
            OrderStatus::Invalid => {
                return Err(BackendError::Challenge("order became invalid".to_string()));
            }
            status => return Err(BackendError::Order(format!("order not ready: {status:?}"))),
        }

        let key_pair = KeyPair::from_pem(&request.private_key)?;
        let csr = build_csr(request, &key_pair)?;
        order.finalize_csr(&csr).await?;

        Ok(order.poll_certificate(&retry_policy).await?)
    }
}

#[async_trait]
impl AcmeBackend for InstantAcmeClient {
    async fn register(
        &self,
        identity: &ResolvedIdentity,
    ) -> Result<RegisteredAccount, BackendError> {
        if let Some(registration) = identity.registration() {
            let account = self.load_account(identity).await?;
            tracing::debug!(email = %identity.email, id = %account.id(), "Using existing ACME account");
            let key = match identity.key() {
                Some(key) => key.clone(),
                None => key_from_credentials(registration.value())?,
            };
            return Ok(RegisteredAccount {
                key,
                registration: registration.clone(),
            });
        }

        let key = identity.key().ok_or_else(|| {
            BackendError::Account(format!("no account key for {}", identity.email))
        })?;

        let contact = format!("mailto:{}", identity.email);
        let new_account = NewAccount {
            contact: &[contact.as_str()],
            terms_of_service_agreed: self.config.terms_of_service_agreed,
            only_return_existing: false,
        };

        let (account, credentials) = Account::builder()?
            .create_with_key(
                &new_account,
                signing_key(key)?,
                self.config.directory_url(),
                None,
            )
            .await?;

        let value = serde_json::to_value(&credentials)
            .map_err(|e| BackendError::Account(format!("failed to serialize credentials: {e}")))?;

        tracing::info!(
            email = %identity.email,
            account_id = %account.id(),
            "Registered ACME account"
        );

        Ok(RegisteredAccount {
            key: key.clone(),
            registration: Registration::new(value),
        })
    }

    async fn obtain(
        &self,
        identity: &ResolvedIdentity,
        request: &ObtainRequest,
        dns: &dyn DnsChallengeProvider,
    ) -> Result<IssuedCertificate, BackendError> {
        let domain = request
            .domains
            .first()
            .cloned()
            .ok_or_else(|| BackendError::Order("no domains requested".to_string()))?;
        let account = self.load_account(identity).await?;

        tracing::info!(domain = %domain, domains = ?request.domains, "Requesting certificate via ACME");

        let identifiers: Vec<Identifier> = request
            .domains
            .iter()
            .map(|d| Identifier::Dns(d.clone()))
            .collect();
        let mut order = account.new_order(&NewOrder::new(&identifiers)).await?;

        let mut presented = Vec::new();
        let result = self
            .complete_order(&mut order, request, dns, &mut presented)
            .await;

        for (name, value) in &presented {
            if let Err(e) = dns.cleanup(name, value).await {
                tracing::warn!(domain = %name, error = %e, "Failed to clean up DNS-01 challenge");
            }
        }

        let fullchain = result?;
        let cert_url = order.state().certificate.clone().unwrap_or_default();
        let (leaf, issuer) = split_chain(&fullchain);
        let certificate = if request.bundle { fullchain } else { leaf };

        tracing::info!(domain = %domain, cert_url = %cert_url, "Certificate issued");

        Ok(IssuedCertificate {
            domain,
            cert_stable_url: cert_url.clone(),
            cert_url,
            certificate,
            issuer_certificate: issuer,
            private_key: request.private_key.clone(),
        })
    }

    async fn revoke(
        &self,
        identity: &ResolvedIdentity,
        certificate_pem: &str,
    ) -> Result<(), BackendError> {
        let account = self.load_account(identity).await?;

        let der = rustls_pemfile::certs(&mut certificate_pem.as_bytes())
            .next()
            .ok_or_else(|| BackendError::Certificate("no certificate in PEM data".to_string()))?
            .map_err(|e| BackendError::Certificate(e.to_string()))?;

        account
            .revoke(&RevocationRequest {
                certificate: &der,
                reason: None,
            })
            .await?;
        Ok(())
    }
}

fn build_csr(request: &ObtainRequest, key_pair: &KeyPair) -> Result<Vec<u8>, BackendError> {
    let mut params = CertificateParams::new(request.domains.clone())?;
    params.distinguished_name = DistinguishedName::new();
    if let Some(first) = request.domains.first() {
        params
            .distinguished_name
            .push(DnType::CommonName, first.as_str());
    }
    if request.must_staple {
        params
            .custom_extensions
            .push(CustomExtension::from_oid_content(
                TLS_FEATURE_OID,
                MUST_STAPLE_VALUE.to_vec(),
            ));
    }
    let csr = params.serialize_request(key_pair)?;
    Ok(csr.der().to_vec())
}

/// Signing key for account creation, taken from the resolved account key.
fn signing_key(key: &AccountKey) -> Result<(Key, PrivateKeyDer<'static>), BackendError> {
    let der = key
        .pkcs8_der()
        .map_err(|e| BackendError::Account(format!("invalid account key: {e}")))?;
    let signing = Key::from_pkcs8_der(PrivatePkcs8KeyDer::from(der.as_slice()))?;
    Ok((signing, PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(der))))
}

/// Credentials for reloading a registered account.
///
/// A stored account key takes precedence over the one embedded in the
/// registration, and a registration without a directory gets the configured one.
fn stored_credentials(
    identity: &ResolvedIdentity,
    directory_url: &str,
) -> Result<serde_json::Value, BackendError> {
    let registration = identity.registration().ok_or_else(|| {
        BackendError::Account(format!("account {} is not registered", identity.email))
    })?;
    let mut value = registration.value().clone();
    let Some(fields) = value.as_object_mut() else {
        return Err(BackendError::Account(
            "registration is not a JSON object".to_string(),
        ));
    };
    if let Some(key) = identity.key() {
        let der = key
            .pkcs8_der()
            .map_err(|e| BackendError::Account(format!("invalid account key: {e}")))?;
        fields.insert(
            "key_pkcs8".to_string(),
            serde_json::Value::String(URL_SAFE_NO_PAD.encode(der)),
        );
    }
    if !fields.contains_key("directory") && !fields.contains_key("urls") {
        fields.insert(
            "directory".to_string(),
            serde_json::Value::String(directory_url.to_string()),
        );
    }
    Ok(value)
}

/// Recover the account key embedded in serialized credentials.
fn key_from_credentials(value: &serde_json::Value) -> Result<AccountKey, BackendError> {
    let encoded = value
        .get("key_pkcs8")
        .and_then(|v| v.as_str())
        .ok_or_else(|| BackendError::Account("credentials carry no account key".to_string()))?;
    let der = URL_SAFE_NO_PAD
        .decode(encoded)
        .or_else(|_| STANDARD.decode(encoded))
        .map_err(|e| BackendError::Account(format!("invalid account key encoding: {e}")))?;
    AccountKey::from_pkcs8_der(&der)
        .map_err(|e| BackendError::Account(format!("invalid account key: {e}")))
}
