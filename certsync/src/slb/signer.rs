//! ACS3-HMAC-SHA256 request signing for Alibaba Cloud RPC APIs.
//!
//! Parameters travel as a form body; the body hash is part of the signature.

use certsync_core::AccessKey;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const SIGNATURE_ALGORITHM: &str = "ACS3-HMAC-SHA256";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Everything except RFC 3986 unreserved characters.
const RFC3986: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

type HmacSha256 = Hmac<Sha256>;

pub fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, RFC3986).to_string()
}

/// `k=v&...` with keys sorted and both sides encoded.
pub fn encode_params(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub struct RequestToSign<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub action: &'a str,
    pub version: &'a str,
    /// ISO 8601 UTC, e.g. `2024-05-03T10:00:00Z`.
    pub date: &'a str,
    pub nonce: &'a str,
    pub body: &'a str,
}

pub struct SignedHeaders {
    /// Lowercase header names with values, including `authorization`.
    pub headers: BTreeMap<String, String>,
}

impl RequestToSign<'_> {
    fn canonical_headers(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("content-type".to_string(), FORM_CONTENT_TYPE.to_string()),
            ("host".to_string(), self.host.to_string()),
            ("x-acs-action".to_string(), self.action.to_string()),
            (
                "x-acs-content-sha256".to_string(),
                sha256_hex(self.body.as_bytes()),
            ),
            ("x-acs-date".to_string(), self.date.to_string()),
            ("x-acs-signature-nonce".to_string(), self.nonce.to_string()),
            ("x-acs-version".to_string(), self.version.to_string()),
        ])
    }

    pub fn canonical_request(&self, headers: &BTreeMap<String, String>) -> String {
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{k}:{}\n", v.trim()))
            .collect();
        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

        format!(
            "{}\n/\n\n{}\n{}\n{}",
            self.method,
            canonical_headers,
            signed_headers,
            sha256_hex(self.body.as_bytes())
        )
    }

    pub fn sign(&self, credential: &AccessKey) -> Result<SignedHeaders, hmac::digest::InvalidLength> {
        let mut headers = self.canonical_headers();
        let canonical_request = self.canonical_request(&headers);
        let string_to_sign = format!(
            "{SIGNATURE_ALGORITHM}\n{}",
            sha256_hex(canonical_request.as_bytes())
        );

        let mut mac = HmacSha256::new_from_slice(credential.access_key_secret.as_bytes())?;
        mac.update(string_to_sign.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
        headers.insert(
            "authorization".to_string(),
            format!(
                "{SIGNATURE_ALGORITHM} Credential={},SignedHeaders={signed_headers},Signature={signature}",
                credential.access_key_id
            ),
        );
        Ok(SignedHeaders { headers })
    }
}
