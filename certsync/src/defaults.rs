use std::time::Duration;

pub const LETSENCRYPT_PRODUCTION_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const LETSENCRYPT_STAGING_DIRECTORY: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";

pub const ACME_ORDER_TIMEOUT: Duration = Duration::from_secs(300);
pub const DNS_PROPAGATION_DELAY: Duration = Duration::from_secs(30);

pub const SLB_API_VERSION: &str = "2014-05-15";
pub const SLB_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Cookie lifetime for sticky sessions on newly created listeners (24 hours).
pub const LISTENER_COOKIE_TIMEOUT_SECS: u32 = 86_400;
/// `-1` lets the listener use the instance's full bandwidth.
pub const LISTENER_BANDWIDTH_UNLIMITED: i32 = -1;

pub const SECONDS_PER_DAY: i64 = 86_400;
