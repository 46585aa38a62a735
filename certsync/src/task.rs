//! Runs scheduler tasks: resolves the records named by [`TaskParams`] and
//! drives the matching flow to completion.

use crate::acme::{AcmeBackend, AcmeError, Orchestrator};
use crate::dns::DnsProviderFactory;
use crate::identity::KeyType;
use crate::slb::{
    ListenerDefaults, LoadBalancerConnector, SlbError, SyncError, SyncMode, SyncOutcome,
    Synchronizer,
};
use crate::store::{Store, StoreError};
use certsync_core::{
    AccessKey, AcmeAccount, CertificateRecord, DomainConfig, LoadBalancerTarget, RecordId,
    TaskField, TaskKind, TaskParams, TaskParamsError,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Params(#[from] TaskParamsError),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: RecordId },

    #[error("no stored certificate for {domain}")]
    NoCertificate { domain: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("failed to connect to load balancer: {0}")]
    Connect(#[from] SlbError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// A new certificate was stored (and pushed when a load balancer was given).
    Issued {
        certificate_id: RecordId,
        domain: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sync: Option<SyncOutcome>,
    },
    /// The existing certificate has enough validity left.
    NotDue {
        domain: String,
        remaining_days: i64,
        threshold_days: i32,
    },
    Revoked {
        certificate_id: RecordId,
        domain: String,
    },
    Checked {
        domain: String,
        sync: SyncOutcome,
    },
}

pub struct TaskRunner {
    store: Arc<Store>,
    orchestrator: Orchestrator,
    connector: Arc<dyn LoadBalancerConnector>,
    listener_defaults: ListenerDefaults,
}

impl TaskRunner {
    pub fn new(
        store: Arc<Store>,
        backend: Arc<dyn AcmeBackend>,
        dns: Arc<dyn DnsProviderFactory>,
        connector: Arc<dyn LoadBalancerConnector>,
        key_type: KeyType,
        listener_defaults: ListenerDefaults,
    ) -> Self {
        let orchestrator = Orchestrator::new(backend, dns, store.clone(), key_type);
        Self {
            store,
            orchestrator,
            connector,
            listener_defaults,
        }
    }

    /// Parse a task command and run it.
    pub async fn run_command(
        &self,
        kind: TaskKind,
        command: &str,
    ) -> Result<TaskOutcome, TaskError> {
        let params = TaskParams::parse(command)?;
        self.run(kind, &params).await
    }

    pub async fn run(&self, kind: TaskKind, params: &TaskParams) -> Result<TaskOutcome, TaskError> {
        params.validate(kind)?;
        tracing::info!(task = %kind, ?params, "Running task");

        match kind {
            TaskKind::Obtain => self.obtain(params).await,
            TaskKind::Renew => self.renew(params).await,
            TaskKind::Revoke => self.revoke(params).await,
            TaskKind::Check => self.check(params).await,
        }
    }

    async fn obtain(&self, params: &TaskParams) -> Result<TaskOutcome, TaskError> {
        let kind = TaskKind::Obtain;
        let account = self.account(params.require(kind, TaskField::AcmeUser)?)?;
        let credential = self.access_key(params.require(kind, TaskField::AccessKey)?)?;
        let config = self.domain_config(params.require(kind, TaskField::DomainConfig)?)?;

        let record = self
            .orchestrator
            .obtain(&account, &config, &credential)
            .await?;
        self.store_and_push(params, &config, &credential, record)
            .await
    }

    async fn renew(&self, params: &TaskParams) -> Result<TaskOutcome, TaskError> {
        let kind = TaskKind::Renew;
        let account = self.account(params.require(kind, TaskField::AcmeUser)?)?;
        let credential = self.access_key(params.require(kind, TaskField::AccessKey)?)?;
        let config = self.domain_config(params.require(kind, TaskField::DomainConfig)?)?;
        let existing = self.certificate(params.require(kind, TaskField::Certificate)?)?;

        let record = match self
            .orchestrator
            .renew(&account, &config, &credential, &existing)
            .await
        {
            Ok(record) => record,
            Err(AcmeError::NotDue {
                domain,
                remaining_days,
                threshold_days,
            }) => {
                return Ok(TaskOutcome::NotDue {
                    domain,
                    remaining_days,
                    threshold_days,
                });
            }
            Err(e) => return Err(e.into()),
        };
        self.store_and_push(params, &config, &credential, record)
            .await
    }

    async fn revoke(&self, params: &TaskParams) -> Result<TaskOutcome, TaskError> {
        let kind = TaskKind::Revoke;
        let account = self.account(params.require(kind, TaskField::AcmeUser)?)?;
        let existing = self.certificate(params.require(kind, TaskField::Certificate)?)?;

        self.orchestrator.revoke(&account, &existing).await?;
        Ok(TaskOutcome::Revoked {
            certificate_id: existing.id,
            domain: existing.domain,
        })
    }

    async fn check(&self, params: &TaskParams) -> Result<TaskOutcome, TaskError> {
        let kind = TaskKind::Check;
        let credential = self.access_key(params.require(kind, TaskField::AccessKey)?)?;
        let target = self.load_balancer(params.require(kind, TaskField::LoadBalancer)?)?;
        let config = self.domain_config(params.require(kind, TaskField::DomainConfig)?)?;

        let domain = config.primary_domain().unwrap_or_default();
        let certificate = self
            .store
            .latest_certificate_for_domain(&domain)?
            .ok_or_else(|| TaskError::NoCertificate {
                domain: domain.clone(),
            })?;

        let sync = self
            .synchronize(&credential, &target, &config, &certificate, SyncMode::HealthCheck)
            .await?;
        Ok(TaskOutcome::Checked { domain, sync })
    }

    /// Persist a freshly issued certificate and push it when a load balancer is set.
    async fn store_and_push(
        &self,
        params: &TaskParams,
        config: &DomainConfig,
        credential: &AccessKey,
        mut record: CertificateRecord,
    ) -> Result<TaskOutcome, TaskError> {
        record.id = self.store.create_certificate(&record)?;
        tracing::info!(
            domain = %record.domain,
            certificate_id = record.id,
            "Stored certificate"
        );

        let sync = match params.get(TaskField::LoadBalancer) {
            Some(id) => {
                let target = self.load_balancer(id)?;
                let outcome = self
                    .synchronize(credential, &target, config, &record, SyncMode::Replace)
                    .await?;
                Some(outcome)
            }
            None => None,
        };

        Ok(TaskOutcome::Issued {
            certificate_id: record.id,
            domain: record.domain,
            sync,
        })
    }

    async fn synchronize(
        &self,
        credential: &AccessKey,
        target: &LoadBalancerTarget,
        config: &DomainConfig,
        certificate: &CertificateRecord,
        mode: SyncMode,
    ) -> Result<SyncOutcome, TaskError> {
        let api = self.connector.connect(credential, target)?;
        let synchronizer = Synchronizer::new(api, self.listener_defaults.clone());
        Ok(synchronizer
            .synchronize(target, config, certificate, mode)
            .await?)
    }

    fn account(&self, id: RecordId) -> Result<AcmeAccount, TaskError> {
        self.store.account(id)?.ok_or(TaskError::NotFound {
            kind: "acme account",
            id,
        })
    }

    fn access_key(&self, id: RecordId) -> Result<AccessKey, TaskError> {
        self.store.access_key(id)?.ok_or(TaskError::NotFound {
            kind: "access key",
            id,
        })
    }

    fn domain_config(&self, id: RecordId) -> Result<DomainConfig, TaskError> {
        self.store.domain_config(id)?.ok_or(TaskError::NotFound {
            kind: "domain config",
            id,
        })
    }

    fn load_balancer(&self, id: RecordId) -> Result<LoadBalancerTarget, TaskError> {
        self.store.load_balancer(id)?.ok_or(TaskError::NotFound {
            kind: "load balancer",
            id,
        })
    }

    fn certificate(&self, id: RecordId) -> Result<CertificateRecord, TaskError> {
        self.store.certificate(id)?.ok_or(TaskError::NotFound {
            kind: "certificate",
            id,
        })
    }
}
