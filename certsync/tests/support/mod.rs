#![allow(dead_code)]

use async_trait::async_trait;
use certsync::acme::{AcmeBackend, BackendError, IssuedCertificate, ObtainRequest, RegisteredAccount};
use certsync::dns::{DnsChallengeProvider, DnsError, DnsProviderFactory};
use certsync::identity::{AccountKey, Registration, ResolvedIdentity};
use certsync::renewal::LeafCertificate;
use certsync::slb::{
    HttpsListenerSpec, ListenerInfo, ListenerStatus, LoadBalancerApi, LoadBalancerConnector,
    RemoteCertificate, SlbError,
};
use certsync::store::Store;
use certsync_core::{AccessKey, CertificateRecord, LoadBalancerTarget, RecordId};
use parking_lot::Mutex;
use rcgen::{CertificateParams, DnType, KeyPair};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

pub const DAY: i64 = 86_400;

pub fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Self-signed leaf for `domains`, valid for `valid_days` from now.
pub fn certificate_pem_with_key(domains: &[&str], valid_days: i64, key: &KeyPair) -> String {
    let mut params =
        CertificateParams::new(domains.iter().map(|d| d.to_string()).collect::<Vec<_>>())
            .unwrap();
    params
        .distinguished_name
        .push(DnType::CommonName, domains[0]);
    params.not_before = OffsetDateTime::now_utc() - Duration::days(1);
    params.not_after = OffsetDateTime::now_utc() + Duration::days(valid_days);
    params.self_signed(key).unwrap().pem()
}

pub fn certificate_record(domains: &[&str], valid_days: i64) -> CertificateRecord {
    let key = KeyPair::generate().unwrap();
    CertificateRecord {
        domain: domains[0].to_string(),
        certificate: certificate_pem_with_key(domains, valid_days, &key),
        private_key: key.serialize_pem(),
        ..Default::default()
    }
}

/// Remote entry covering `sans` that expires `days` from now.
pub fn remote_certificate(id: &str, sans: &[&str], days: i64) -> RemoteCertificate {
    RemoteCertificate {
        id: id.to_string(),
        name: sans[0].to_string(),
        subject_alternative_names: sans.iter().map(|s| s.to_string()).collect(),
        expire_timestamp_ms: (now() + days * DAY) * 1000,
    }
}

pub fn install_crypto_provider() {
    certsync::install_rustls_crypto_provider();
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list: usize,
    pub upload: usize,
    pub delete: usize,
    pub describe_listener: usize,
    pub create_listener: usize,
    pub set_listener: usize,
    pub start_listener: usize,
}

impl CallCounts {
    pub fn mutations(&self) -> usize {
        self.upload + self.delete + self.create_listener + self.set_listener + self.start_listener
    }
}

#[derive(Default)]
struct LoadBalancerState {
    certificates: Vec<RemoteCertificate>,
    listener: Option<ListenerInfo>,
    created: Vec<HttpsListenerSpec>,
    calls: CallCounts,
    next_id: usize,
    fail_deletes: bool,
}

/// In-memory load balancer with call counting.
#[derive(Default)]
pub struct MockLoadBalancer {
    state: Mutex<LoadBalancerState>,
}

impl MockLoadBalancer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_certificate(&self, certificate: RemoteCertificate) {
        self.state.lock().certificates.push(certificate);
    }

    pub fn set_listener(&self, listener: Option<ListenerInfo>) {
        self.state.lock().listener = listener;
    }

    pub fn fail_deletes(&self) {
        self.state.lock().fail_deletes = true;
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls.clone()
    }

    pub fn certificates(&self) -> Vec<RemoteCertificate> {
        self.state.lock().certificates.clone()
    }

    pub fn certificates_covering(&self, domain: &str) -> Vec<RemoteCertificate> {
        self.certificates()
            .into_iter()
            .filter(|c| c.covers(domain))
            .collect()
    }

    pub fn listener(&self) -> Option<ListenerInfo> {
        self.state.lock().listener.clone()
    }

    pub fn created_listeners(&self) -> Vec<HttpsListenerSpec> {
        self.state.lock().created.clone()
    }
}

fn api_error(code: &str) -> SlbError {
    SlbError::Api {
        code: code.to_string(),
        message: "mock failure".to_string(),
        request_id: "mock".to_string(),
    }
}

#[async_trait]
impl LoadBalancerApi for MockLoadBalancer {
    async fn list_certificates(&self) -> Result<Vec<RemoteCertificate>, SlbError> {
        let mut state = self.state.lock();
        state.calls.list += 1;
        Ok(state.certificates.clone())
    }

    async fn upload_certificate(
        &self,
        name: &str,
        certificate: &str,
        _private_key: &str,
    ) -> Result<String, SlbError> {
        let leaf = LeafCertificate::from_pem(certificate)
            .map_err(|e| SlbError::Decode(e.to_string()))?;
        let mut state = self.state.lock();
        state.calls.upload += 1;
        state.next_id += 1;
        let id = format!("cert-{}", state.next_id);
        state.certificates.push(RemoteCertificate {
            id: id.clone(),
            name: name.to_string(),
            subject_alternative_names: leaf.domains,
            expire_timestamp_ms: leaf.not_after * 1000,
        });
        Ok(id)
    }

    async fn delete_certificate(&self, certificate_id: &str) -> Result<(), SlbError> {
        let mut state = self.state.lock();
        state.calls.delete += 1;
        if state.fail_deletes {
            return Err(api_error("ServiceUnavailable"));
        }
        state.certificates.retain(|c| c.id != certificate_id);
        Ok(())
    }

    async fn https_listener(
        &self,
        _load_balancer_id: &str,
        _listener_port: u16,
    ) -> Result<Option<ListenerInfo>, SlbError> {
        let mut state = self.state.lock();
        state.calls.describe_listener += 1;
        Ok(state.listener.clone())
    }

    async fn create_https_listener(&self, spec: &HttpsListenerSpec) -> Result<(), SlbError> {
        let mut state = self.state.lock();
        state.calls.create_listener += 1;
        state.created.push(spec.clone());
        state.listener = Some(ListenerInfo {
            status: ListenerStatus::Stopped,
            certificate_id: Some(spec.server_certificate_id.clone()),
        });
        Ok(())
    }

    async fn set_https_listener_certificate(
        &self,
        _load_balancer_id: &str,
        _listener_port: u16,
        certificate_id: &str,
    ) -> Result<(), SlbError> {
        let mut state = self.state.lock();
        state.calls.set_listener += 1;
        match state.listener.as_mut() {
            Some(listener) => {
                listener.certificate_id = Some(certificate_id.to_string());
                Ok(())
            }
            None => Err(api_error("ListenerNotExist")),
        }
    }

    async fn start_listener(
        &self,
        _load_balancer_id: &str,
        _listener_port: u16,
    ) -> Result<(), SlbError> {
        let mut state = self.state.lock();
        state.calls.start_listener += 1;
        match state.listener.as_mut() {
            Some(listener) => {
                listener.status = ListenerStatus::Running;
                Ok(())
            }
            None => Err(api_error("ListenerNotExist")),
        }
    }
}

/// Hands out the same mock for every target.
pub struct MockConnector {
    pub api: Arc<MockLoadBalancer>,
}

impl LoadBalancerConnector for MockConnector {
    fn connect(
        &self,
        credential: &AccessKey,
        _target: &LoadBalancerTarget,
    ) -> Result<Arc<dyn LoadBalancerApi>, SlbError> {
        if !credential.is_complete() {
            return Err(SlbError::InvalidCredentials);
        }
        Ok(self.api.clone())
    }
}

/// DNS provider that records challenge events.
#[derive(Default)]
pub struct RecordingDns {
    events: Mutex<Vec<String>>,
}

impl RecordingDns {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl DnsChallengeProvider for RecordingDns {
    async fn present(&self, domain: &str, _value: &str) -> Result<(), DnsError> {
        self.events.lock().push(format!("present {domain}"));
        Ok(())
    }

    async fn cleanup(&self, domain: &str, _value: &str) -> Result<(), DnsError> {
        self.events.lock().push(format!("cleanup {domain}"));
        Ok(())
    }
}

/// Factory that knows a single provider name.
pub struct RecordingDnsFactory {
    pub name: String,
    pub provider: Arc<RecordingDns>,
}

impl DnsProviderFactory for RecordingDnsFactory {
    fn provider(
        &self,
        name: &str,
        credential: &AccessKey,
    ) -> Result<Arc<dyn DnsChallengeProvider>, DnsError> {
        if name != self.name {
            return Err(DnsError::UnknownProvider(name.to_string()));
        }
        if !credential.is_complete() {
            return Err(DnsError::InvalidCredentials {
                provider: name.to_string(),
            });
        }
        Ok(self.provider.clone())
    }
}

pub const ACCOUNT_URL: &str = "https://acme.test/acct/1";

/// Stand-in certificate authority that issues self-signed leaves.
pub struct MockAcmeBackend {
    log: Mutex<Vec<String>>,
    valid_days: i64,
    observed: Mutex<Option<(Arc<Store>, RecordId)>>,
    order_failure: Mutex<Option<String>>,
}

impl MockAcmeBackend {
    pub fn new(valid_days: i64) -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
            valid_days,
            observed: Mutex::new(None),
            order_failure: Mutex::new(None),
        })
    }

    /// Record, at issuance time, whether `account_id` already has credentials.
    pub fn observe_account(&self, store: Arc<Store>, account_id: RecordId) {
        *self.observed.lock() = Some((store, account_id));
    }

    /// Make every subsequent order fail with `reason`.
    pub fn fail_orders(&self, reason: &str) {
        *self.order_failure.lock() = Some(reason.to_string());
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl AcmeBackend for MockAcmeBackend {
    async fn register(
        &self,
        identity: &ResolvedIdentity,
    ) -> Result<RegisteredAccount, BackendError> {
        self.log.lock().push(format!(
            "register {} new={}",
            identity.email,
            identity.is_new_registration()
        ));
        let key = match identity.key() {
            Some(key) => key.clone(),
            None => AccountKey::generate().map_err(|e| BackendError::Account(e.to_string()))?,
        };
        let registration = match identity.registration() {
            Some(registration) => registration.clone(),
            None => Registration::new(serde_json::json!({ "id": ACCOUNT_URL })),
        };
        Ok(RegisteredAccount { key, registration })
    }

    async fn obtain(
        &self,
        identity: &ResolvedIdentity,
        request: &ObtainRequest,
        dns: &dyn DnsChallengeProvider,
    ) -> Result<IssuedCertificate, BackendError> {
        if identity.registration().is_none() {
            return Err(BackendError::Account("account is not registered".to_string()));
        }

        let failure = self.order_failure.lock().clone();
        if let Some(reason) = failure {
            return Err(BackendError::Order(reason));
        }

        let observed = self.observed.lock().clone();
        if let Some((store, account_id)) = observed {
            let account = store.account(account_id).unwrap().unwrap();
            self.log.lock().push(format!(
                "account persisted={}",
                account.has_private_key() && account.has_resource()
            ));
        }
        self.log
            .lock()
            .push(format!("obtain {}", request.domains.join(" ")));

        for domain in &request.domains {
            dns.present(domain, "token").await?;
            dns.cleanup(domain, "token").await?;
        }

        let key = KeyPair::from_pem(&request.private_key)?;
        let domains: Vec<&str> = request.domains.iter().map(String::as_str).collect();
        let leaf = certificate_pem_with_key(&domains, self.valid_days, &key);
        let issuer_key = KeyPair::generate()?;
        let issuer = certificate_pem_with_key(&["issuer.mock.test"], 365, &issuer_key);

        let certificate = if request.bundle {
            format!("{leaf}{issuer}")
        } else {
            leaf
        };
        Ok(IssuedCertificate {
            domain: request.domains[0].clone(),
            cert_url: "https://acme.test/cert/1".to_string(),
            cert_stable_url: "https://acme.test/cert/1".to_string(),
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
        LeafCertificate::from_pem(certificate_pem)
            .map_err(|e| BackendError::Certificate(e.to_string()))?;
        self.log.lock().push(format!("revoke {}", identity.email));
        Ok(())
    }
}
