//! SQLite record store for accounts, credentials, domain configurations,
//! load balancer targets and issued certificates.

use crate::acme::AccountRepository;
use crate::renewal::unix_now;
use certsync_core::{
    AccessKey, AcmeAccount, CertificateRecord, DomainConfig, LoadBalancerTarget, RecordId,
};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS acme_accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    private_key TEXT NOT NULL DEFAULT '',
    resource TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS access_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    access_key_id TEXT NOT NULL,
    access_key_secret TEXT NOT NULL,
    remark TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS domain_configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain TEXT NOT NULL UNIQUE,
    provider_name TEXT NOT NULL,
    renew_days INTEGER NOT NULL DEFAULT 90,
    reuse_key INTEGER NOT NULL DEFAULT 0,
    bundle INTEGER NOT NULL DEFAULT 0,
    must_staple INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS load_balancers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    region_id TEXT NOT NULL,
    load_balancer_id TEXT NOT NULL,
    listener_port INTEGER NOT NULL DEFAULT 443,
    backend_server_port INTEGER NOT NULL DEFAULT 9080,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS certificates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain TEXT NOT NULL,
    cert_url TEXT NOT NULL DEFAULT '',
    cert_stable_url TEXT NOT NULL DEFAULT '',
    certificate TEXT NOT NULL,
    issuer_certificate TEXT NOT NULL DEFAULT '',
    private_key TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_certificates_domain ON certificates(domain);
"#;

const ACCOUNT_COLUMNS: &str = "id, email, private_key, resource, created_at";
const ACCESS_KEY_COLUMNS: &str = "id, access_key_id, access_key_secret, remark, created_at";
const DOMAIN_CONFIG_COLUMNS: &str =
    "id, domain, provider_name, renew_days, reuse_key, bundle, must_staple, created_at";
const LOAD_BALANCER_COLUMNS: &str =
    "id, region_id, load_balancer_id, listener_port, backend_server_port, created_at";
const CERTIFICATE_COLUMNS: &str = "id, domain, cert_url, cert_stable_url, certificate, issuer_certificate, private_key, created_at";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("{field} '{value}' already exists")]
    Duplicate { field: &'static str, value: String },

    #[error("unsupported schema version: {found}")]
    UnsupportedSchemaVersion { found: i32 },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One page of a listing, newest records first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Page {
    /// Page numbers start at 1; sizes are clamped to `1..=MAX_PAGE_SIZE`.
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }
}

type RowMapper<T> = fn(&Row<'_>) -> rusqlite::Result<T>;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (and create or migrate) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        match version {
            0 => {
                conn.execute_batch(SCHEMA_SQL)?;
                conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
                tracing::debug!(version = CURRENT_SCHEMA_VERSION, "Initialized database schema");
            }
            CURRENT_SCHEMA_VERSION => {}
            found => return Err(StoreError::UnsupportedSchemaVersion { found }),
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.conn.lock();
        Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    fn find<T>(
        &self,
        table: &str,
        columns: &str,
        id: RecordId,
        map: RowMapper<T>,
    ) -> Result<Option<T>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {columns} FROM {table} WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], map).optional()?)
    }

    fn list<T>(
        &self,
        table: &str,
        columns: &str,
        filter: Option<(&str, &str)>,
        page: Page,
        map: RowMapper<T>,
    ) -> Result<Vec<T>> {
        let conn = self.conn.lock();
        let rows = match filter {
            Some((column, value)) => {
                let sql = format!(
                    "SELECT {columns} FROM {table} WHERE {column} = ?1 ORDER BY id DESC LIMIT ?2 OFFSET ?3"
                );
                let mut stmt = conn.prepare(&sql)?;
                stmt.query_map(params![value, page.limit(), page.offset()], map)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let sql =
                    format!("SELECT {columns} FROM {table} ORDER BY id DESC LIMIT ?1 OFFSET ?2");
                let mut stmt = conn.prepare(&sql)?;
                stmt.query_map(params![page.limit(), page.offset()], map)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    }

    fn count(&self, table: &str, filter: Option<(&str, &str)>) -> Result<i64> {
        let conn = self.conn.lock();
        let count = match filter {
            Some((column, value)) => conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1"),
                params![value],
                |row| row.get(0),
            )?,
            None => conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?,
        };
        Ok(count)
    }

    fn delete(&self, table: &str, id: RecordId) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
        Ok(changed > 0)
    }

    fn exists(
        &self,
        table: &str,
        column: &str,
        value: &str,
        exclude_id: Option<RecordId>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let sql = format!("SELECT 1 FROM {table} WHERE {column} = ?1 AND id != ?2 LIMIT 1");
        let found = conn
            .query_row(&sql, params![value, exclude_id.unwrap_or(0)], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    // ACME accounts

    pub fn create_account(&self, account: &AcmeAccount) -> Result<RecordId> {
        let email = account.email.trim();
        if email.is_empty() {
            return Err(StoreError::InvalidData("account email is empty".to_string()));
        }
        if self.email_exists(email, None)? {
            return Err(StoreError::Duplicate {
                field: "email",
                value: email.to_string(),
            });
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO acme_accounts (email, private_key, resource, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![email, account.private_key, account.resource, unix_now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn account(&self, id: RecordId) -> Result<Option<AcmeAccount>> {
        self.find("acme_accounts", ACCOUNT_COLUMNS, id, account_from_row)
    }

    pub fn update_account(&self, account: &AcmeAccount) -> Result<bool> {
        if self.email_exists(&account.email, Some(account.id))? {
            return Err(StoreError::Duplicate {
                field: "email",
                value: account.email.clone(),
            });
        }
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE acme_accounts SET email = ?1, private_key = ?2, resource = ?3 WHERE id = ?4",
            params![
                account.email,
                account.private_key,
                account.resource,
                account.id
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_account(&self, id: RecordId) -> Result<bool> {
        self.delete("acme_accounts", id)
    }

    pub fn list_accounts(&self, email: Option<&str>, page: Page) -> Result<Vec<AcmeAccount>> {
        let filter = email.map(|e| ("email", e));
        self.list("acme_accounts", ACCOUNT_COLUMNS, filter, page, account_from_row)
    }

    pub fn count_accounts(&self, email: Option<&str>) -> Result<i64> {
        self.count("acme_accounts", email.map(|e| ("email", e)))
    }

    pub fn email_exists(&self, email: &str, exclude_id: Option<RecordId>) -> Result<bool> {
        self.exists("acme_accounts", "email", email, exclude_id)
    }

    /// Store the account key and registration, leaving other columns untouched.
    pub fn save_account_credentials(
        &self,
        account_id: RecordId,
        private_key: &str,
        resource: &str,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE acme_accounts SET private_key = ?1, resource = ?2 WHERE id = ?3",
            params![private_key, resource, account_id],
        )?;
        if changed == 0 {
            return Err(StoreError::InvalidData(format!(
                "acme account {account_id} does not exist"
            )));
        }
        Ok(())
    }

    // Access keys

    pub fn create_access_key(&self, key: &AccessKey) -> Result<RecordId> {
        if !key.is_complete() {
            return Err(StoreError::InvalidData(
                "access key id and secret are required".to_string(),
            ));
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO access_keys (access_key_id, access_key_secret, remark, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                key.access_key_id,
                key.access_key_secret,
                key.remark,
                unix_now()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn access_key(&self, id: RecordId) -> Result<Option<AccessKey>> {
        self.find("access_keys", ACCESS_KEY_COLUMNS, id, access_key_from_row)
    }

    pub fn update_access_key(&self, key: &AccessKey) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE access_keys SET access_key_id = ?1, access_key_secret = ?2, remark = ?3
             WHERE id = ?4",
            params![key.access_key_id, key.access_key_secret, key.remark, key.id],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_access_key(&self, id: RecordId) -> Result<bool> {
        self.delete("access_keys", id)
    }

    pub fn list_access_keys(
        &self,
        access_key_id: Option<&str>,
        page: Page,
    ) -> Result<Vec<AccessKey>> {
        let filter = access_key_id.map(|k| ("access_key_id", k));
        self.list("access_keys", ACCESS_KEY_COLUMNS, filter, page, access_key_from_row)
    }

    pub fn count_access_keys(&self, access_key_id: Option<&str>) -> Result<i64> {
        self.count("access_keys", access_key_id.map(|k| ("access_key_id", k)))
    }

    /// An identical id/secret pair is already stored.
    pub fn access_key_pair_exists(&self, access_key_id: &str, secret: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM access_keys WHERE access_key_id = ?1 AND access_key_secret = ?2
                 LIMIT 1",
                params![access_key_id, secret],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // Domain configurations

    pub fn create_domain_config(&self, config: &DomainConfig) -> Result<RecordId> {
        validate_domain_config(config)?;
        if self.domain_exists(&config.domain, None)? {
            return Err(StoreError::Duplicate {
                field: "domain",
                value: config.domain.clone(),
            });
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO domain_configs
             (domain, provider_name, renew_days, reuse_key, bundle, must_staple, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                config.domain,
                config.provider_name,
                config.renew_days,
                config.reuse_key,
                config.bundle,
                config.must_staple,
                unix_now()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn domain_config(&self, id: RecordId) -> Result<Option<DomainConfig>> {
        self.find("domain_configs", DOMAIN_CONFIG_COLUMNS, id, domain_config_from_row)
    }

    pub fn update_domain_config(&self, config: &DomainConfig) -> Result<bool> {
        validate_domain_config(config)?;
        if self.domain_exists(&config.domain, Some(config.id))? {
            return Err(StoreError::Duplicate {
                field: "domain",
                value: config.domain.clone(),
            });
        }
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE domain_configs SET domain = ?1, provider_name = ?2, renew_days = ?3,
             reuse_key = ?4, bundle = ?5, must_staple = ?6 WHERE id = ?7",
            params![
                config.domain,
                config.provider_name,
                config.renew_days,
                config.reuse_key,
                config.bundle,
                config.must_staple,
                config.id
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_domain_config(&self, id: RecordId) -> Result<bool> {
        self.delete("domain_configs", id)
    }

    pub fn list_domain_configs(
        &self,
        provider_name: Option<&str>,
        page: Page,
    ) -> Result<Vec<DomainConfig>> {
        let filter = provider_name.map(|p| ("provider_name", p));
        self.list(
            "domain_configs",
            DOMAIN_CONFIG_COLUMNS,
            filter,
            page,
            domain_config_from_row,
        )
    }

    pub fn count_domain_configs(&self, provider_name: Option<&str>) -> Result<i64> {
        self.count("domain_configs", provider_name.map(|p| ("provider_name", p)))
    }

    pub fn domain_exists(&self, domain: &str, exclude_id: Option<RecordId>) -> Result<bool> {
        self.exists("domain_configs", "domain", domain, exclude_id)
    }

    // Load balancer targets

    pub fn create_load_balancer(&self, target: &LoadBalancerTarget) -> Result<RecordId> {
        if target.region_id.trim().is_empty() || target.load_balancer_id.trim().is_empty() {
            return Err(StoreError::InvalidData(
                "region id and load balancer id are required".to_string(),
            ));
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO load_balancers
             (region_id, load_balancer_id, listener_port, backend_server_port, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                target.region_id,
                target.load_balancer_id,
                target.listener_port,
                target.backend_server_port,
                unix_now()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn load_balancer(&self, id: RecordId) -> Result<Option<LoadBalancerTarget>> {
        self.find("load_balancers", LOAD_BALANCER_COLUMNS, id, load_balancer_from_row)
    }

    pub fn update_load_balancer(&self, target: &LoadBalancerTarget) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE load_balancers SET region_id = ?1, load_balancer_id = ?2, listener_port = ?3,
             backend_server_port = ?4 WHERE id = ?5",
            params![
                target.region_id,
                target.load_balancer_id,
                target.listener_port,
                target.backend_server_port,
                target.id
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_load_balancer(&self, id: RecordId) -> Result<bool> {
        self.delete("load_balancers", id)
    }

    pub fn list_load_balancers(
        &self,
        region_id: Option<&str>,
        page: Page,
    ) -> Result<Vec<LoadBalancerTarget>> {
        let filter = region_id.map(|r| ("region_id", r));
        self.list(
            "load_balancers",
            LOAD_BALANCER_COLUMNS,
            filter,
            page,
            load_balancer_from_row,
        )
    }

    pub fn count_load_balancers(&self, region_id: Option<&str>) -> Result<i64> {
        self.count("load_balancers", region_id.map(|r| ("region_id", r)))
    }

    // Certificates

    pub fn create_certificate(&self, record: &CertificateRecord) -> Result<RecordId> {
        if record.domain.trim().is_empty()
            || record.certificate.trim().is_empty()
            || record.private_key.trim().is_empty()
        {
            return Err(StoreError::InvalidData(
                "certificate record needs a domain, a certificate and a private key".to_string(),
            ));
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO certificates
             (domain, cert_url, cert_stable_url, certificate, issuer_certificate, private_key,
              created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.domain,
                record.cert_url,
                record.cert_stable_url,
                record.certificate,
                record.issuer_certificate,
                record.private_key,
                unix_now()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn certificate(&self, id: RecordId) -> Result<Option<CertificateRecord>> {
        self.find("certificates", CERTIFICATE_COLUMNS, id, certificate_from_row)
    }

    pub fn delete_certificate(&self, id: RecordId) -> Result<bool> {
        self.delete("certificates", id)
    }

    pub fn list_certificates(
        &self,
        domain: Option<&str>,
        page: Page,
    ) -> Result<Vec<CertificateRecord>> {
        let filter = domain.map(|d| ("domain", d));
        self.list("certificates", CERTIFICATE_COLUMNS, filter, page, certificate_from_row)
    }

    pub fn count_certificates(&self, domain: Option<&str>) -> Result<i64> {
        self.count("certificates", domain.map(|d| ("domain", d)))
    }

    /// Most recently stored certificate for `domain`.
    pub fn latest_certificate_for_domain(&self, domain: &str) -> Result<Option<CertificateRecord>> {
        Ok(self
            .list_certificates(Some(domain), Page::new(1, 1))?
            .into_iter()
            .next())
    }
}

impl AccountRepository for Store {
    fn save_account_credentials(
        &self,
        account_id: RecordId,
        private_key: &str,
        resource: &str,
    ) -> Result<()> {
        Store::save_account_credentials(self, account_id, private_key, resource)
    }
}

fn validate_domain_config(config: &DomainConfig) -> Result<()> {
    if config.domains().is_empty() {
        return Err(StoreError::InvalidData("domain is empty".to_string()));
    }
    if config.provider_name.trim().is_empty() {
        return Err(StoreError::InvalidData("provider name is empty".to_string()));
    }
    Ok(())
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<AcmeAccount> {
    Ok(AcmeAccount {
        id: row.get(0)?,
        email: row.get(1)?,
        private_key: row.get(2)?,
        resource: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn access_key_from_row(row: &Row<'_>) -> rusqlite::Result<AccessKey> {
    Ok(AccessKey {
        id: row.get(0)?,
        access_key_id: row.get(1)?,
        access_key_secret: row.get(2)?,
        remark: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn domain_config_from_row(row: &Row<'_>) -> rusqlite::Result<DomainConfig> {
    Ok(DomainConfig {
        id: row.get(0)?,
        domain: row.get(1)?,
        provider_name: row.get(2)?,
        renew_days: row.get(3)?,
        reuse_key: row.get(4)?,
        bundle: row.get(5)?,
        must_staple: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn load_balancer_from_row(row: &Row<'_>) -> rusqlite::Result<LoadBalancerTarget> {
    Ok(LoadBalancerTarget {
        id: row.get(0)?,
        region_id: row.get(1)?,
        load_balancer_id: row.get(2)?,
        listener_port: row.get(3)?,
        backend_server_port: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn certificate_from_row(row: &Row<'_>) -> rusqlite::Result<CertificateRecord> {
    Ok(CertificateRecord {
        id: row.get(0)?,
        domain: row.get(1)?,
        cert_url: row.get(2)?,
        cert_stable_url: row.get(3)?,
        certificate: row.get(4)?,
        issuer_certificate: row.get(5)?,
        private_key: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn certificate(domain: &str, marker: &str) -> CertificateRecord {
        CertificateRecord {
            domain: domain.to_string(),
            certificate: format!("cert-{marker}"),
            private_key: format!("key-{marker}"),
            ..Default::default()
        }
    }

    #[test]
    fn open_creates_schema_on_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("certsync.db");
        let store = Store::open(&path).unwrap();
        assert_eq!(store.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn newer_schema_version_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("certsync.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }
        assert!(matches!(
            Store::open(&path),
            Err(StoreError::UnsupportedSchemaVersion { found: 99 })
        ));
    }

    #[test]
    fn account_crud_and_credentials() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .create_account(&AcmeAccount::new("ops@example.com"))
            .unwrap();

        let account = store.account(id).unwrap().unwrap();
        assert_eq!(account.email, "ops@example.com");
        assert!(!account.has_private_key());

        store
            .save_account_credentials(id, "-----KEY-----", r#"{"id":"x"}"#)
            .unwrap();
        let account = store.account(id).unwrap().unwrap();
        assert_eq!(account.private_key, "-----KEY-----");
        assert_eq!(account.resource, r#"{"id":"x"}"#);
        assert_eq!(account.email, "ops@example.com");

        assert!(store.delete_account(id).unwrap());
        assert!(store.account(id).unwrap().is_none());
        assert!(!store.delete_account(id).unwrap());
    }

    #[test]
    fn save_credentials_for_missing_account_fails() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.save_account_credentials(42, "k", "r"),
            Err(StoreError::InvalidData(_))
        ));
    }

    #[test]
    fn duplicate_email_is_rejected_except_for_self() {
        let store = Store::open_in_memory().unwrap();
        let first = store.create_account(&AcmeAccount::new("a@example.com")).unwrap();
        let second = store.create_account(&AcmeAccount::new("b@example.com")).unwrap();

        assert!(matches!(
            store.create_account(&AcmeAccount::new("a@example.com")),
            Err(StoreError::Duplicate { field: "email", .. })
        ));
        assert!(store.email_exists("a@example.com", None).unwrap());
        assert!(!store.email_exists("a@example.com", Some(first)).unwrap());

        let mut account = store.account(second).unwrap().unwrap();
        account.email = "a@example.com".to_string();
        assert!(store.update_account(&account).is_err());
    }

    #[test]
    fn domain_config_round_trips_flags() {
        let store = Store::open_in_memory().unwrap();
        let mut config = DomainConfig::new("*.example.com example.com", "alidns");
        config.renew_days = 30;
        config.reuse_key = true;
        config.must_staple = true;
        let id = store.create_domain_config(&config).unwrap();

        let loaded = store.domain_config(id).unwrap().unwrap();
        assert_eq!(loaded.domains(), vec!["*.example.com", "example.com"]);
        assert_eq!(loaded.renew_days, 30);
        assert!(loaded.reuse_key);
        assert!(!loaded.bundle);
        assert!(loaded.must_staple);

        assert!(store.domain_exists("*.example.com example.com", None).unwrap());
        assert!(
            !store
                .domain_exists("*.example.com example.com", Some(id))
                .unwrap()
        );
    }

    #[test]
    fn domain_config_requires_domain_and_provider() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.create_domain_config(&DomainConfig::new(" ", "alidns")).is_err());
        assert!(store.create_domain_config(&DomainConfig::new("a.com", "")).is_err());
    }

    #[test]
    fn load_balancer_keeps_ports() {
        let store = Store::open_in_memory().unwrap();
        let mut target = LoadBalancerTarget::new("cn-hangzhou", "lb-1");
        target.listener_port = 8443;
        let id = store.create_load_balancer(&target).unwrap();

        let mut loaded = store.load_balancer(id).unwrap().unwrap();
        assert_eq!(loaded.listener_port, 8443);
        assert_eq!(loaded.backend_server_port, 9080);

        loaded.backend_server_port = 8080;
        assert!(store.update_load_balancer(&loaded).unwrap());
        assert_eq!(
            store.load_balancer(id).unwrap().unwrap().backend_server_port,
            8080
        );
    }

    #[test]
    fn access_keys_list_and_filter() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.create_access_key(&AccessKey::new("id", "")).is_err());
        store.create_access_key(&AccessKey::new("LTAI1", "s1")).unwrap();
        store.create_access_key(&AccessKey::new("LTAI2", "s2")).unwrap();

        assert_eq!(store.count_access_keys(None).unwrap(), 2);
        assert_eq!(store.count_access_keys(Some("LTAI1")).unwrap(), 1);
        assert!(store.access_key_pair_exists("LTAI2", "s2").unwrap());
        assert!(!store.access_key_pair_exists("LTAI2", "s1").unwrap());

        let listed = store.list_access_keys(None, Page::default()).unwrap();
        let ids: Vec<&str> = listed.iter().map(|k| k.access_key_id.as_str()).collect();
        assert_eq!(ids, vec!["LTAI2", "LTAI1"]);
    }

    #[test]
    fn latest_certificate_is_highest_id() {
        let store = Store::open_in_memory().unwrap();
        store.create_certificate(&certificate("example.com", "1")).unwrap();
        store.create_certificate(&certificate("other.com", "x")).unwrap();
        let newest = store.create_certificate(&certificate("example.com", "2")).unwrap();

        let latest = store
            .latest_certificate_for_domain("example.com")
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, newest);
        assert_eq!(latest.certificate, "cert-2");
        assert!(
            store
                .latest_certificate_for_domain("missing.com")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn incomplete_certificate_is_not_written() {
        let store = Store::open_in_memory().unwrap();
        let mut record = certificate("example.com", "1");
        record.private_key.clear();
        assert!(store.create_certificate(&record).is_err());
        assert_eq!(store.count_certificates(None).unwrap(), 0);
    }

    #[test]
    fn pagination_walks_newest_first() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .create_certificate(&certificate("example.com", &i.to_string()))
                .unwrap();
        }
        let first = store
            .list_certificates(Some("example.com"), Page::new(1, 2))
            .unwrap();
        let third = store
            .list_certificates(Some("example.com"), Page::new(3, 2))
            .unwrap();
        assert_eq!(
            first.iter().map(|c| c.certificate.as_str()).collect::<Vec<_>>(),
            vec!["cert-4", "cert-3"]
        );
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].certificate, "cert-0");
    }

    #[test]
    fn page_is_clamped() {
        assert_eq!(Page::new(0, 0), Page::new(1, 1));
        assert_eq!(Page::new(2, 10_000).page_size, MAX_PAGE_SIZE);
        assert_eq!(Page::new(3, 20).offset(), 40);
    }
}
