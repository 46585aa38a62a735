//! ACME acquisition: obtain, renew and revoke certificates
//!
//! The protocol itself is handled by `instant-acme` behind [`AcmeBackend`];
//! the [`Orchestrator`] decides what to ask for and records the account.

mod backend;
mod client;
mod orchestrator;

pub use backend::{
    AcmeBackend, BackendError, IssuedCertificate, ObtainRequest, RegisteredAccount, split_chain,
};
pub use client::{AcmeConfig, InstantAcmeClient};
pub use orchestrator::{AccountRepository, Orchestrator};

use crate::dns::DnsError;
use crate::identity::IdentityError;
use crate::renewal::RenewalError;
use crate::store::StoreError;
use certsync_core::RecordId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcmeError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Dns(#[from] DnsError),

    /// Renewal is not due yet. An expected outcome, not a failure.
    #[error(
        "[{domain}] certificate is not due for renewal: {remaining_days} days left, threshold {threshold_days} days"
    )]
    NotDue {
        domain: String,
        remaining_days: i64,
        threshold_days: i32,
    },

    #[error(transparent)]
    Policy(#[from] RenewalError),

    #[error("[{domain}] ACME {operation} failed: {source}")]
    AcquisitionFailed {
        operation: &'static str,
        domain: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to save account credentials: {0}")]
    Persist(#[from] StoreError),

    #[error("domain configuration {0} lists no domains")]
    NoDomains(RecordId),
}

impl AcmeError {
    pub fn is_not_due(&self) -> bool {
        matches!(self, AcmeError::NotDue { .. })
    }
}
