//! Task parameters handed over by the scheduler.
//!
//! The scheduler stores a JSON object in each task's command field naming the
//! records a flow operates on. Ids of `0` are treated as unset.

use crate::model::RecordId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flow a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Issue a new certificate and push it to the load balancer.
    Obtain,
    /// Renew an existing certificate when it is due and push it.
    Renew,
    /// Revoke an existing certificate.
    Revoke,
    /// Verify the load balancer still serves an adequate certificate.
    Check,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Obtain => "obtain",
            TaskKind::Renew => "renew",
            TaskKind::Revoke => "revoke",
            TaskKind::Check => "check",
        }
    }

    fn required_fields(self) -> &'static [TaskField] {
        match self {
            TaskKind::Obtain => &[
                TaskField::AcmeUser,
                TaskField::AccessKey,
                TaskField::DomainConfig,
            ],
            TaskKind::Renew => &[
                TaskField::AcmeUser,
                TaskField::AccessKey,
                TaskField::DomainConfig,
                TaskField::Certificate,
            ],
            TaskKind::Revoke => &[TaskField::AcmeUser, TaskField::Certificate],
            TaskKind::Check => &[
                TaskField::AccessKey,
                TaskField::LoadBalancer,
                TaskField::DomainConfig,
            ],
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskField {
    AcmeUser,
    AccessKey,
    LoadBalancer,
    Certificate,
    DomainConfig,
}

impl TaskField {
    pub fn key(self) -> &'static str {
        match self {
            TaskField::AcmeUser => "acme_user_id",
            TaskField::AccessKey => "access_key_id",
            TaskField::LoadBalancer => "aliyun_slb_id",
            TaskField::Certificate => "certificate_id",
            TaskField::DomainConfig => "domain_config_id",
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskParamsError {
    #[error("invalid task parameters: command is empty")]
    Empty,

    #[error("invalid task parameters: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind} task requires `{field}`")]
    Missing { kind: TaskKind, field: &'static str },
}

/// Record ids a task operates on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acme_user_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliyun_slb_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<RecordId>,
    #[serde(
        default,
        alias = "doamin_config_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub domain_config_id: Option<RecordId>,
}

impl TaskParams {
    /// Parse parameters from a task command string.
    pub fn parse(command: &str) -> Result<Self, TaskParamsError> {
        if command.trim().is_empty() {
            return Err(TaskParamsError::Empty);
        }
        Ok(serde_json::from_str(command)?)
    }

    /// Id stored for `field`, ignoring unset and zero values.
    pub fn get(&self, field: TaskField) -> Option<RecordId> {
        let value = match field {
            TaskField::AcmeUser => self.acme_user_id,
            TaskField::AccessKey => self.access_key_id,
            TaskField::LoadBalancer => self.aliyun_slb_id,
            TaskField::Certificate => self.certificate_id,
            TaskField::DomainConfig => self.domain_config_id,
        };
        value.filter(|id| *id > 0)
    }

    pub fn require(&self, kind: TaskKind, field: TaskField) -> Result<RecordId, TaskParamsError> {
        self.get(field).ok_or(TaskParamsError::Missing {
            kind,
            field: field.key(),
        })
    }

    /// Check that every id the flow needs is present.
    pub fn validate(&self, kind: TaskKind) -> Result<(), TaskParamsError> {
        for field in kind.required_fields() {
            self.require(kind, *field)?;
        }
        Ok(())
    }
}
