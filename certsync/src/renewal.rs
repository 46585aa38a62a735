//! Renewal policy - decides whether a certificate must be renewed
//!
//! The decision is a pure function of the parsed leaf, the threshold and the
//! current time. Nothing here touches the network or the store.

use crate::defaults::SECONDS_PER_DAY;
use thiserror::Error;
use x509_parser::prelude::*;

#[derive(Debug, Error)]
pub enum RenewalError {
    /// The bundle starts with an issuer, not a leaf.
    #[error("[{domain}] certificate bundle starts with a CA certificate")]
    CaCertificate { domain: String },

    #[error("failed to parse certificate: {0}")]
    Parse(String),

    #[error("no certificate found in PEM data")]
    NoCertificate,
}

/// The parts of a leaf certificate the policy and the synchronizer look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCertificate {
    /// Expiry as unix seconds.
    pub not_after: i64,
    pub is_ca: bool,
    /// Subject common name first, then DNS subject alternative names.
    pub domains: Vec<String>,
}

impl LeafCertificate {
    /// Parse the first certificate of a PEM bundle.
    pub fn from_pem(pem_data: &str) -> Result<Self, RenewalError> {
        for pem in Pem::iter_from_buffer(pem_data.as_bytes()).flatten() {
            if pem.label != "CERTIFICATE" {
                continue;
            }
            let (_, cert) = X509Certificate::from_der(&pem.contents)
                .map_err(|e| RenewalError::Parse(e.to_string()))?;
            return Ok(Self::from_x509(&cert));
        }
        Err(RenewalError::NoCertificate)
    }

    pub fn from_x509(cert: &X509Certificate<'_>) -> Self {
        let mut domains: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            if !name.is_empty() && !domains.iter().any(|d| d == name) {
                domains.push(name.to_string());
            }
        };

        if let Some(cn) = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
        {
            push(cn);
        }
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    push(dns);
                }
            }
        }

        Self {
            not_after: cert.validity().not_after.timestamp(),
            is_ca: cert.is_ca(),
            domains,
        }
    }

    pub fn seconds_remaining(&self, now: i64) -> i64 {
        self.not_after - now
    }

    /// Whole days until expiry, rounded down (negative once expired).
    pub fn days_remaining(&self, now: i64) -> i64 {
        self.seconds_remaining(now).div_euclid(3600).div_euclid(24)
    }

    pub fn covers(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| d == domain)
    }
}

/// Current time as unix seconds.
pub fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Decide whether `cert` must be renewed given a threshold in days.
pub fn needs_renewal(
    cert: &LeafCertificate,
    domain: &str,
    threshold_days: i32,
) -> Result<bool, RenewalError> {
    needs_renewal_at(cert, domain, threshold_days, unix_now())
}

/// [`needs_renewal`] evaluated at a fixed `now` (unix seconds).
///
/// Renewal is required when the remaining whole days are at or below the
/// threshold. A negative threshold always renews.
pub fn needs_renewal_at(
    cert: &LeafCertificate,
    domain: &str,
    threshold_days: i32,
    now: i64,
) -> Result<bool, RenewalError> {
    if cert.is_ca {
        return Err(RenewalError::CaCertificate {
            domain: domain.to_string(),
        });
    }

    if threshold_days >= 0 {
        let remaining = cert.days_remaining(now);
        if remaining > i64::from(threshold_days) {
            tracing::info!(
                domain = domain,
                remaining_days = remaining,
                threshold_days,
                "Certificate not due for renewal"
            );
            return Ok(false);
        }
    }

    Ok(true)
}

/// Threshold in seconds, or `None` when the threshold means "always renew".
pub(crate) fn threshold_secs(threshold_days: i32) -> Option<i64> {
    (threshold_days >= 0).then(|| i64::from(threshold_days) * SECONDS_PER_DAY)
}
