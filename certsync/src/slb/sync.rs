//! Certificate inventory and HTTPS listener reconciliation
//!
//! Every run reads the remote state first and only issues the calls needed
//! to close the gap, so a run interrupted half way is finished by the next.

use super::{HttpsListenerSpec, ListenerDefaults, LoadBalancerApi, RemoteCertificate, SlbError};
use crate::defaults::SECONDS_PER_DAY;
use crate::renewal::{LeafCertificate, RenewalError, threshold_secs, unix_now};
use certsync_core::{CertificateRecord, DomainConfig, LoadBalancerTarget};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("[{domain}] load balancer {operation} failed: {source}")]
    Remote {
        operation: &'static str,
        domain: String,
        #[source]
        source: SlbError,
    },

    #[error(transparent)]
    Certificate(#[from] RenewalError),

    #[error("[{0}] certificate record has no private key")]
    MissingPrivateKey(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Leave the load balancer alone while it holds an adequate certificate.
    HealthCheck,
    /// Push the given certificate right after it was issued.
    Replace,
}

/// A remote entry covering the domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteMatch {
    pub id: String,
    /// Unix seconds.
    pub expires_at: i64,
    /// Remaining validity exceeds the renewal threshold.
    pub adequate: bool,
    /// Same name coverage and expiry second as the certificate being pushed.
    pub same_certificate: bool,
}

/// Result of scanning the remote inventory for one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InventoryScan {
    pub matches: Vec<RemoteMatch>,
}

impl InventoryScan {
    /// `incoming` is the certificate about to be pushed, when there is one.
    pub fn scan(
        inventory: &[RemoteCertificate],
        domain: &str,
        threshold_days: i32,
        now: i64,
        incoming: Option<&LeafCertificate>,
    ) -> Self {
        let threshold = threshold_secs(threshold_days);
        let incoming = incoming.map(|leaf| {
            let names: BTreeSet<&str> = leaf.domains.iter().map(String::as_str).collect();
            (leaf.not_after, names)
        });
        let matches = inventory
            .iter()
            .filter(|cert| cert.covers(domain))
            .map(|cert| {
                let expires_at = cert.expires_at();
                RemoteMatch {
                    id: cert.id.clone(),
                    expires_at,
                    adequate: threshold.is_some_and(|t| expires_at - now > t),
                    same_certificate: incoming.as_ref().is_some_and(|(not_after, names)| {
                        *not_after == expires_at
                            && cert
                                .subject_alternative_names
                                .iter()
                                .map(String::as_str)
                                .collect::<BTreeSet<_>>()
                                == *names
                    }),
                }
            })
            .collect();
        Self { matches }
    }

    pub fn found(&self) -> bool {
        !self.matches.is_empty()
    }

    pub fn adequate(&self) -> Option<&RemoteMatch> {
        self.matches.iter().find(|m| m.adequate)
    }

    pub fn reusable(&self) -> Option<&RemoteMatch> {
        self.matches.iter().find(|m| m.same_certificate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerAction {
    Created,
    CertificateUpdated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub certificate_id: String,
    pub deleted: Vec<String>,
    pub uploaded: bool,
    pub listener: ListenerAction,
    pub started: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Health check found an adequate certificate; nothing was changed.
    AlreadyCurrent { certificate_id: String },
    Converged(SyncReport),
}

pub struct Synchronizer {
    api: Arc<dyn LoadBalancerApi>,
    defaults: ListenerDefaults,
}

impl Synchronizer {
    pub fn new(api: Arc<dyn LoadBalancerApi>, defaults: ListenerDefaults) -> Self {
        Self { api, defaults }
    }

    pub async fn synchronize(
        &self,
        target: &LoadBalancerTarget,
        config: &DomainConfig,
        certificate: &CertificateRecord,
        mode: SyncMode,
    ) -> Result<SyncOutcome, SyncError> {
        self.synchronize_at(target, config, certificate, mode, unix_now())
            .await
    }

    /// [`Synchronizer::synchronize`] with margins measured from `now` (unix seconds).
    pub async fn synchronize_at(
        &self,
        target: &LoadBalancerTarget,
        config: &DomainConfig,
        certificate: &CertificateRecord,
        mode: SyncMode,
        now: i64,
    ) -> Result<SyncOutcome, SyncError> {
        let domain = certificate.domain.as_str();
        let leaf = LeafCertificate::from_pem(&certificate.certificate)?;
        if leaf.is_ca {
            return Err(RenewalError::CaCertificate {
                domain: domain.to_string(),
            }
            .into());
        }
        if certificate.private_key.trim().is_empty() {
            return Err(SyncError::MissingPrivateKey(domain.to_string()));
        }

        let inventory = self
            .api
            .list_certificates()
            .await
            .map_err(|e| remote("list certificates", domain, e))?;

        let scan = InventoryScan::scan(&inventory, domain, config.renew_days, now, Some(&leaf));

        if mode == SyncMode::HealthCheck
            && let Some(current) = scan.adequate()
        {
            tracing::info!(
                domain = domain,
                certificate_id = %current.id,
                days_remaining = (current.expires_at - now).div_euclid(SECONDS_PER_DAY),
                "Load balancer certificate is current"
            );
            return Ok(SyncOutcome::AlreadyCurrent {
                certificate_id: current.id.clone(),
            });
        }

        let keep = scan.reusable().map(|m| m.id.clone());
        if mode == SyncMode::HealthCheck && keep.is_some() {
            tracing::warn!(
                domain = domain,
                days_remaining = (leaf.not_after - now).div_euclid(SECONDS_PER_DAY),
                "Latest stored certificate is already uploaded but due for renewal"
            );
        }
        let mut deleted = Vec::new();
        for stale in scan.matches.iter().filter(|m| Some(&m.id) != keep.as_ref()) {
            self.api
                .delete_certificate(&stale.id)
                .await
                .map_err(|e| remote("delete certificate", domain, e))?;
            tracing::info!(
                domain = domain,
                certificate_id = %stale.id,
                "Deleted stale load balancer certificate"
            );
            deleted.push(stale.id.clone());
        }

        let (certificate_id, uploaded) = match keep {
            Some(id) => {
                tracing::debug!(domain = domain, certificate_id = %id, "Certificate already uploaded");
                (id, false)
            }
            None => {
                let id = self
                    .api
                    .upload_certificate(domain, &certificate.certificate, &certificate.private_key)
                    .await
                    .map_err(|e| remote("upload certificate", domain, e))?;
                tracing::info!(domain = domain, certificate_id = %id, "Uploaded certificate");
                (id, true)
            }
        };

        let (listener, running) = self.attach(target, &certificate_id, domain).await?;

        let started = if running {
            false
        } else {
            self.api
                .start_listener(&target.load_balancer_id, target.listener_port)
                .await
                .map_err(|e| remote("start listener", domain, e))?;
            tracing::info!(
                domain = domain,
                load_balancer_id = %target.load_balancer_id,
                listener_port = target.listener_port,
                "Started HTTPS listener"
            );
            true
        };

        Ok(SyncOutcome::Converged(SyncReport {
            certificate_id,
            deleted,
            uploaded,
            listener,
            started,
        }))
    }

    /// Point the listener at `certificate_id`, creating it when absent.
    /// Returns what was done and whether the listener is already running.
    async fn attach(
        &self,
        target: &LoadBalancerTarget,
        certificate_id: &str,
        domain: &str,
    ) -> Result<(ListenerAction, bool), SyncError> {
        let lb = target.load_balancer_id.as_str();
        let port = target.listener_port;

        let existing = self
            .api
            .https_listener(lb, port)
            .await
            .map_err(|e| remote("describe listener", domain, e))?;

        match existing {
            None => {
                let spec = HttpsListenerSpec {
                    load_balancer_id: lb.to_string(),
                    listener_port: port,
                    backend_server_port: target.backend_server_port,
                    server_certificate_id: certificate_id.to_string(),
                    defaults: self.defaults.clone(),
                };
                self.api
                    .create_https_listener(&spec)
                    .await
                    .map_err(|e| remote("create listener", domain, e))?;
                tracing::info!(
                    domain = domain,
                    load_balancer_id = lb,
                    listener_port = port,
                    certificate_id = certificate_id,
                    "Created HTTPS listener"
                );
                Ok((ListenerAction::Created, false))
            }
            Some(info) if info.certificate_id.as_deref() == Some(certificate_id) => {
                Ok((ListenerAction::Unchanged, info.status.is_running()))
            }
            Some(info) => {
                self.api
                    .set_https_listener_certificate(lb, port, certificate_id)
                    .await
                    .map_err(|e| remote("update listener", domain, e))?;
                tracing::info!(
                    domain = domain,
                    load_balancer_id = lb,
                    listener_port = port,
                    certificate_id = certificate_id,
                    "Updated HTTPS listener certificate"
                );
                Ok((ListenerAction::CertificateUpdated, info.status.is_running()))
            }
        }
    }
}

fn remote(operation: &'static str, domain: &str, source: SlbError) -> SyncError {
    tracing::error!(operation, domain = domain, error = %source, "Load balancer call failed");
    SyncError::Remote {
        operation,
        domain: domain.to_string(),
        source,
    }
}
