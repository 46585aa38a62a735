//! Alibaba Cloud SLB client (RPC API version 2014-05-15).

use super::signer::{RequestToSign, encode_params};
use super::{
    HttpsListenerSpec, ListenerInfo, ListenerStatus, LoadBalancerApi, LoadBalancerConnector,
    RemoteCertificate, SlbError,
};
use crate::defaults::{SLB_API_VERSION, SLB_HTTP_TIMEOUT};
use async_trait::async_trait;
use certsync_core::{AccessKey, LoadBalancerTarget};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::macros::format_description;

/// Error codes the API uses for "no such listener".
const LISTENER_ABSENT_CODES: &[&str] = &["InvalidParameter", "ListenerNotExist"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlbConfig {
    /// Override for `https://slb.<region>.aliyuncs.com`.
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SlbConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: SLB_HTTP_TIMEOUT.as_secs(),
        }
    }
}

impl SlbConfig {
    pub fn endpoint_for(&self, region_id: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://slb.{region_id}.aliyuncs.com"),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub struct AliyunSlbClient {
    http: reqwest::Client,
    endpoint: String,
    host: String,
    credential: AccessKey,
    region_id: String,
}

impl AliyunSlbClient {
    pub fn new(
        credential: AccessKey,
        region_id: &str,
        config: &SlbConfig,
    ) -> Result<Self, SlbError> {
        if !credential.is_complete() {
            return Err(SlbError::InvalidCredentials);
        }

        let endpoint = config.endpoint_for(region_id);
        let url = reqwest::Url::parse(&endpoint)
            .map_err(|e| SlbError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(SlbError::InvalidEndpoint(endpoint)),
        };

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{endpoint}/"),
            host,
            credential,
            region_id: region_id.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<T, SlbError> {
        let mut form: BTreeMap<String, String> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        form.insert("RegionId".to_string(), self.region_id.clone());
        let body = encode_params(&form);

        let date = OffsetDateTime::now_utc()
            .format(format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
            ))
            .map_err(|e| SlbError::Signing(e.to_string()))?;
        let nonce = nanoid::nanoid!();

        let signed = RequestToSign {
            method: "POST",
            host: &self.host,
            action,
            version: SLB_API_VERSION,
            date: &date,
            nonce: &nonce,
            body: &body,
        }
        .sign(&self.credential)
        .map_err(|e| SlbError::Signing(e.to_string()))?;

        let mut request = self.http.post(&self.endpoint);
        for (name, value) in &signed.headers {
            if name == "host" {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }

        tracing::debug!(action, region_id = %self.region_id, "Calling SLB API");
        let response = request.body(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ApiErrorBody>(&text) {
                Ok(err) => SlbError::Api {
                    code: err.code,
                    message: err.message,
                    request_id: err.request_id,
                },
                Err(_) => SlbError::UnexpectedStatus {
                    status: status.as_u16(),
                    body: text,
                },
            });
        }

        serde_json::from_str(&text).map_err(|e| SlbError::Decode(format!("{action}: {e}")))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    request_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeServerCertificatesResponse {
    #[serde(default)]
    server_certificates: ServerCertificates,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServerCertificates {
    #[serde(default)]
    server_certificate: Vec<ServerCertificateItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServerCertificateItem {
    server_certificate_id: String,
    #[serde(default)]
    server_certificate_name: String,
    #[serde(default)]
    expire_time_stamp: i64,
    #[serde(default)]
    subject_alternative_names: SubjectAlternativeNames,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SubjectAlternativeNames {
    #[serde(default)]
    subject_alternative_name: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UploadServerCertificateResponse {
    server_certificate_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListenerAttributeResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    server_certificate_id: String,
}

#[derive(Deserialize)]
struct Empty {}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

#[async_trait]
impl LoadBalancerApi for AliyunSlbClient {
    async fn list_certificates(&self) -> Result<Vec<RemoteCertificate>, SlbError> {
        let response: DescribeServerCertificatesResponse =
            self.call("DescribeServerCertificates", &[]).await?;
        Ok(response
            .server_certificates
            .server_certificate
            .into_iter()
            .map(|item| RemoteCertificate {
                id: item.server_certificate_id,
                name: item.server_certificate_name,
                subject_alternative_names: item.subject_alternative_names.subject_alternative_name,
                expire_timestamp_ms: item.expire_time_stamp,
            })
            .collect())
    }

    async fn upload_certificate(
        &self,
        name: &str,
        certificate: &str,
        private_key: &str,
    ) -> Result<String, SlbError> {
        let response: UploadServerCertificateResponse = self
            .call(
                "UploadServerCertificate",
                &[
                    ("ServerCertificate", certificate.to_string()),
                    ("PrivateKey", private_key.to_string()),
                    ("ServerCertificateName", name.to_string()),
                ],
            )
            .await?;
        Ok(response.server_certificate_id)
    }

    async fn delete_certificate(&self, certificate_id: &str) -> Result<(), SlbError> {
        let _: Empty = self
            .call(
                "DeleteServerCertificate",
                &[("ServerCertificateId", certificate_id.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn https_listener(
        &self,
        load_balancer_id: &str,
        listener_port: u16,
    ) -> Result<Option<ListenerInfo>, SlbError> {
        let result: Result<ListenerAttributeResponse, SlbError> = self
            .call(
                "DescribeLoadBalancerHTTPSListenerAttribute",
                &[
                    ("ListenerPort", listener_port.to_string()),
                    ("LoadBalancerId", load_balancer_id.to_string()),
                ],
            )
            .await;

        match result {
            Ok(response) => Ok(Some(ListenerInfo {
                status: ListenerStatus::from_api(&response.status),
                certificate_id: Some(response.server_certificate_id).filter(|id| !id.is_empty()),
            })),
            Err(e) if e.code().is_some_and(|c| LISTENER_ABSENT_CODES.contains(&c)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_https_listener(&self, spec: &HttpsListenerSpec) -> Result<(), SlbError> {
        let defaults = &spec.defaults;
        let mut params = vec![
            ("ListenerPort", spec.listener_port.to_string()),
            ("BackendServerPort", spec.backend_server_port.to_string()),
            ("LoadBalancerId", spec.load_balancer_id.clone()),
            ("ServerCertificateId", spec.server_certificate_id.clone()),
            ("Bandwidth", defaults.bandwidth.to_string()),
            ("StickySession", on_off(defaults.sticky_session).to_string()),
            ("HealthCheck", on_off(defaults.health_check).to_string()),
        ];
        if defaults.sticky_session {
            params.push((
                "StickySessionType",
                defaults.sticky_session_type.as_str().to_string(),
            ));
            params.push(("CookieTimeout", defaults.cookie_timeout_secs.to_string()));
        }

        let _: Empty = self
            .call("CreateLoadBalancerHTTPSListener", &params)
            .await?;
        Ok(())
    }

    async fn set_https_listener_certificate(
        &self,
        load_balancer_id: &str,
        listener_port: u16,
        certificate_id: &str,
    ) -> Result<(), SlbError> {
        let _: Empty = self
            .call(
                "SetLoadBalancerHTTPSListenerAttribute",
                &[
                    ("ListenerPort", listener_port.to_string()),
                    ("LoadBalancerId", load_balancer_id.to_string()),
                    ("ServerCertificateId", certificate_id.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn start_listener(
        &self,
        load_balancer_id: &str,
        listener_port: u16,
    ) -> Result<(), SlbError> {
        let _: Empty = self
            .call(
                "StartLoadBalancerListener",
                &[
                    ("ListenerPort", listener_port.to_string()),
                    ("LoadBalancerId", load_balancer_id.to_string()),
                ],
            )
            .await?;
        Ok(())
    }
}

/// Connects to the SLB API of a target's region.
#[derive(Debug, Clone, Default)]
pub struct AliyunConnector {
    config: SlbConfig,
}

impl AliyunConnector {
    pub fn new(config: SlbConfig) -> Self {
        Self { config }
    }
}

impl LoadBalancerConnector for AliyunConnector {
    fn connect(
        &self,
        credential: &AccessKey,
        target: &LoadBalancerTarget,
    ) -> Result<Arc<dyn LoadBalancerApi>, SlbError> {
        let client = AliyunSlbClient::new(credential.clone(), &target.region_id, &self.config)?;
        Ok(Arc::new(client))
    }
}
