//! Certificate renewal engine and cloud load balancer listener synchronizer.
//!
//! Certificates are issued and renewed over ACME with DNS-01 challenges, stored
//! in SQLite, and pushed to the HTTPS listener of an Alibaba Cloud SLB instance.

pub mod acme;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod dns;
pub mod identity;
pub mod renewal;
pub mod slb;
pub mod store;
pub mod task;

/// Install the process-wide rustls provider before any TLS client is built.
pub fn install_rustls_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_some() {
        return;
    }

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}
