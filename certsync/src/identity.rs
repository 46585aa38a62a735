//! ACME account identity resolution
//!
//! Turns a stored [`AcmeAccount`] into something the ACME backend can act as.
//! Exactly one of three cases applies:
//!
//! - a private key is stored: parse and use it
//! - nothing is stored and this is a new registration: generate a P-256 key
//! - nothing is stored otherwise: rebuild from the stored registration resource

use certsync_core::AcmeAccount;
use rcgen::{KeyPair, PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to load the private key of account {email}: {reason}")]
    InvalidKey { email: String, reason: String },

    #[error("failed to generate key: {0}")]
    KeyGeneration(String),

    #[error("account {email} has no key and no registration data; the stored account is incomplete")]
    MissingAccountData { email: String },

    #[error("invalid registration data for account {email}: {reason}")]
    InvalidRegistration { email: String, reason: String },
}

/// Key algorithm for generated certificate keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    #[default]
    EcdsaP256,
    EcdsaP384,
}

impl KeyType {
    pub fn generate(self) -> Result<KeyPair, IdentityError> {
        let alg = match self {
            KeyType::EcdsaP256 => &PKCS_ECDSA_P256_SHA256,
            KeyType::EcdsaP384 => &PKCS_ECDSA_P384_SHA384,
        };
        KeyPair::generate_for(alg).map_err(|e| IdentityError::KeyGeneration(e.to_string()))
    }
}

/// A PEM private key that is known to parse.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountKey {
    pem: String,
}

impl AccountKey {
    /// Fresh ECDSA P-256 key, the only account key type ACME servers accept from us.
    pub fn generate() -> Result<Self, IdentityError> {
        let key_pair = KeyType::EcdsaP256.generate()?;
        Ok(Self {
            pem: key_pair.serialize_pem(),
        })
    }

    pub fn from_pem(pem: &str) -> Result<Self, rcgen::Error> {
        let key_pair = KeyPair::from_pem(pem)?;
        Ok(Self {
            pem: key_pair.serialize_pem(),
        })
    }

    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, rcgen::Error> {
        let key_pair = KeyPair::try_from(der)?;
        Ok(Self {
            pem: key_pair.serialize_pem(),
        })
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }

    pub fn key_pair(&self) -> Result<KeyPair, rcgen::Error> {
        KeyPair::from_pem(&self.pem)
    }

    pub fn pkcs8_der(&self) -> Result<Vec<u8>, rcgen::Error> {
        Ok(self.key_pair()?.serialize_der())
    }
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccountKey(<redacted>)")
    }
}

/// Registration resource returned by the authority, kept verbatim as JSON.
#[derive(Clone, PartialEq)]
pub struct Registration {
    value: serde_json::Value,
}

impl Registration {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            value: serde_json::from_str(json)?,
        })
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Account URL assigned by the authority.
    pub fn account_url(&self) -> Option<&str> {
        self.value
            .get("id")
            .or_else(|| self.value.get("uri"))
            .and_then(|v| v.as_str())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.value).unwrap_or_else(|_| self.value.to_string())
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("account_url", &self.account_url())
            .finish_non_exhaustive()
    }
}

/// Where the account's credentials come from.
#[derive(Debug, Clone)]
pub enum AccountCredentialSource {
    /// A key is stored; the registration is attached once one exists.
    HasStoredKey {
        key: AccountKey,
        registration: Option<Registration>,
    },
    /// Nothing stored, a fresh key was generated for a new registration.
    NewRegistration { key: AccountKey },
    /// Nothing but the serialized registration is stored.
    ReconstructFromResource { registration: Registration },
}

/// An account identity ready to hand to the ACME backend.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub email: String,
    pub source: AccountCredentialSource,
}

impl ResolvedIdentity {
    pub fn key(&self) -> Option<&AccountKey> {
        match &self.source {
            AccountCredentialSource::HasStoredKey { key, .. }
            | AccountCredentialSource::NewRegistration { key } => Some(key),
            AccountCredentialSource::ReconstructFromResource { .. } => None,
        }
    }

    pub fn registration(&self) -> Option<&Registration> {
        match &self.source {
            AccountCredentialSource::HasStoredKey { registration, .. } => registration.as_ref(),
            AccountCredentialSource::NewRegistration { .. } => None,
            AccountCredentialSource::ReconstructFromResource { registration } => Some(registration),
        }
    }

    pub fn is_new_registration(&self) -> bool {
        matches!(self.source, AccountCredentialSource::NewRegistration { .. })
    }

    /// Identity after a successful registration with `key`.
    pub fn registered(self, key: AccountKey, registration: Registration) -> Self {
        Self {
            email: self.email,
            source: AccountCredentialSource::HasStoredKey {
                key,
                registration: Some(registration),
            },
        }
    }
}

/// Resolve a stored account into a usable identity.
pub fn resolve_identity(
    account: &AcmeAccount,
    new_registration: bool,
) -> Result<ResolvedIdentity, IdentityError> {
    let email = account.email.clone();

    let source = if account.has_private_key() {
        let key = AccountKey::from_pem(&account.private_key).map_err(|e| {
            tracing::warn!(email = %email, error = %e, "Failed to load account private key");
            IdentityError::InvalidKey {
                email: email.clone(),
                reason: e.to_string(),
            }
        })?;
        let registration = if account.has_resource() {
            Some(parse_registration(&email, &account.resource)?)
        } else {
            None
        };
        AccountCredentialSource::HasStoredKey { key, registration }
    } else if new_registration {
        tracing::debug!(email = %email, "Generating key for new ACME account");
        AccountCredentialSource::NewRegistration {
            key: AccountKey::generate()?,
        }
    } else if account.has_resource() {
        AccountCredentialSource::ReconstructFromResource {
            registration: parse_registration(&email, &account.resource)?,
        }
    } else {
        return Err(IdentityError::MissingAccountData { email });
    };

    Ok(ResolvedIdentity { email, source })
}

fn parse_registration(email: &str, resource: &str) -> Result<Registration, IdentityError> {
    Registration::from_json(resource).map_err(|e| IdentityError::InvalidRegistration {
        email: email.to_string(),
        reason: e.to_string(),
    })
}
