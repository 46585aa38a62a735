//! Cloud load balancer: certificate inventory and HTTPS listeners
//!
//! [`LoadBalancerApi`] is the vendor seam. [`AliyunSlbClient`] talks to the
//! Alibaba Cloud SLB API; [`Synchronizer`] drives any implementation to the
//! state "listener running with the current certificate attached".

mod aliyun;
mod signer;
mod sync;

pub use aliyun::{AliyunConnector, AliyunSlbClient, SlbConfig};
pub use sync::{
    InventoryScan, ListenerAction, RemoteMatch, SyncError, SyncMode, SyncOutcome, SyncReport,
    Synchronizer,
};

use crate::defaults::{LISTENER_BANDWIDTH_UNLIMITED, LISTENER_COOKIE_TIMEOUT_SECS};
use async_trait::async_trait;
use certsync_core::{AccessKey, LoadBalancerTarget};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlbError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SLB API error {code}: {message} (request id {request_id})")]
    Api {
        code: String,
        message: String,
        request_id: String,
    },

    #[error("unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("failed to decode SLB response: {0}")]
    Decode(String),

    #[error("invalid SLB endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid credentials for load balancer access: access key id and secret are required")]
    InvalidCredentials,

    #[error("failed to sign request: {0}")]
    Signing(String),
}

impl SlbError {
    pub fn code(&self) -> Option<&str> {
        match self {
            SlbError::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// A server certificate uploaded to the load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCertificate {
    pub id: String,
    pub name: String,
    pub subject_alternative_names: Vec<String>,
    /// Expiry in milliseconds, as the vendor reports it.
    pub expire_timestamp_ms: i64,
}

impl RemoteCertificate {
    pub fn covers(&self, domain: &str) -> bool {
        self.subject_alternative_names.iter().any(|d| d == domain)
    }

    /// Expiry as unix seconds.
    pub fn expires_at(&self) -> i64 {
        self.expire_timestamp_ms.div_euclid(1000)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerStatus {
    Running,
    Stopped,
    Starting,
    Configuring,
    Other(String),
}

impl ListenerStatus {
    pub fn from_api(status: &str) -> Self {
        match status {
            "running" => ListenerStatus::Running,
            "stopped" => ListenerStatus::Stopped,
            "starting" => ListenerStatus::Starting,
            "configuring" => ListenerStatus::Configuring,
            other => ListenerStatus::Other(other.to_string()),
        }
    }

    /// Transitional states count as not running.
    pub fn is_running(&self) -> bool {
        matches!(self, ListenerStatus::Running)
    }
}

/// An existing HTTPS listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerInfo {
    pub status: ListenerStatus,
    pub certificate_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StickySessionType {
    /// The load balancer inserts its own cookie.
    #[default]
    Insert,
    /// The backend sets the cookie.
    Server,
}

impl StickySessionType {
    pub fn as_str(self) -> &'static str {
        match self {
            StickySessionType::Insert => "insert",
            StickySessionType::Server => "server",
        }
    }
}

/// Settings applied to listeners this tool creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerDefaults {
    pub sticky_session: bool,
    pub sticky_session_type: StickySessionType,
    pub cookie_timeout_secs: u32,
    pub health_check: bool,
    /// Peak bandwidth in Mbps, `-1` for unrestricted.
    pub bandwidth: i32,
}

impl Default for ListenerDefaults {
    fn default() -> Self {
        Self {
            sticky_session: true,
            sticky_session_type: StickySessionType::Insert,
            cookie_timeout_secs: LISTENER_COOKIE_TIMEOUT_SECS,
            health_check: false,
            bandwidth: LISTENER_BANDWIDTH_UNLIMITED,
        }
    }
}

/// Everything needed to create an HTTPS listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpsListenerSpec {
    pub load_balancer_id: String,
    pub listener_port: u16,
    pub backend_server_port: u16,
    pub server_certificate_id: String,
    pub defaults: ListenerDefaults,
}

/// Remote operations against one load balancer's region.
#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    async fn list_certificates(&self) -> Result<Vec<RemoteCertificate>, SlbError>;

    /// Upload a certificate and return its id.
    async fn upload_certificate(
        &self,
        name: &str,
        certificate: &str,
        private_key: &str,
    ) -> Result<String, SlbError>;

    async fn delete_certificate(&self, certificate_id: &str) -> Result<(), SlbError>;

    /// `None` when no HTTPS listener exists on the port.
    async fn https_listener(
        &self,
        load_balancer_id: &str,
        listener_port: u16,
    ) -> Result<Option<ListenerInfo>, SlbError>;

    async fn create_https_listener(&self, spec: &HttpsListenerSpec) -> Result<(), SlbError>;

    async fn set_https_listener_certificate(
        &self,
        load_balancer_id: &str,
        listener_port: u16,
        certificate_id: &str,
    ) -> Result<(), SlbError>;

    async fn start_listener(
        &self,
        load_balancer_id: &str,
        listener_port: u16,
    ) -> Result<(), SlbError>;
}

/// Builds an API handle for a target from a cloud credential.
pub trait LoadBalancerConnector: Send + Sync {
    fn connect(
        &self,
        credential: &AccessKey,
        target: &LoadBalancerTarget,
    ) -> Result<Arc<dyn LoadBalancerApi>, SlbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_expiry_is_normalized_to_seconds() {
        let cert = RemoteCertificate {
            id: "1231579085529123_166f8204689_1714763408_709290797".to_string(),
            name: "example.com".to_string(),
            subject_alternative_names: vec!["*.example.com".to_string()],
            expire_timestamp_ms: 1_700_000_000_999,
        };
        assert_eq!(cert.expires_at(), 1_700_000_000);
        assert!(cert.covers("*.example.com"));
        assert!(!cert.covers("example.com"));
    }

    #[test]
    fn transitional_listener_states_are_not_running() {
        assert!(ListenerStatus::from_api("running").is_running());
        for status in ["stopped", "starting", "configuring", "deleting"] {
            assert!(!ListenerStatus::from_api(status).is_running());
        }
    }

    #[test]
    fn listener_defaults_match_created_listener_policy() {
        let defaults = ListenerDefaults::default();
        assert!(defaults.sticky_session);
        assert_eq!(defaults.sticky_session_type, StickySessionType::Insert);
        assert_eq!(defaults.cookie_timeout_secs, 86_400);
        assert!(!defaults.health_check);
        assert_eq!(defaults.bandwidth, -1);
    }
}
