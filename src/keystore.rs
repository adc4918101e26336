//! API key persistence and verification.
//!
//! Raw keys are random bearer tokens handed out exactly once at mint time.
//! Only a keyed HMAC-SHA256 digest is stored, so a leaked database file does
//! not leak usable credentials.

use crate::ServerError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use sqlx::SqlitePool;
use sqlx::{migrate::MigrateDatabase, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Prefix of every raw API key handed out by this server.
pub const API_KEY_PREFIX: &str = "sk_mcp_";

/// Number of random bytes behind each raw key.
const KEY_RANDOM_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// A stored API key record. The raw token itself is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Hex-encoded HMAC-SHA256 digest of the raw key.
    pub hash: String,

    /// Label of the consuming service. Unique per store.
    pub service: String,

    /// Creation time in unix seconds.
    pub created_at: i64,

    /// Expiration time in unix seconds.
    pub expires_at: i64,

    /// Soft revocation flag. Lookups treat flagged keys as absent.
    pub revoked: bool,
}

impl ApiKey {
    /// Returns true if the key is past its expiration time.
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    /// Creation time as a UTC datetime.
    pub fn created_time(&self) -> NaiveDateTime {
        DateTime::from_timestamp(self.created_at, 0)
            .unwrap_or_default()
            .naive_utc()
    }

    /// Expiration time as a UTC datetime.
    pub fn expires_time(&self) -> NaiveDateTime {
        DateTime::from_timestamp(self.expires_at, 0)
            .unwrap_or_default()
            .naive_utc()
    }
}

#[derive(Debug, Clone)]
pub struct KeyStore {
    /// shared connection pool for reading and writing
    conn_pool: SqlitePool,
    hash_secret: String,
}

impl KeyStore {
    /// Open the key store at the given path, creating the database file and
    /// any parent directories if needed.
    ///
    /// `hash_secret` keys the HMAC under which raw keys are stored. An empty
    /// secret is a configuration error.
    pub async fn new(path: &str, hash_secret: &str) -> Result<Self, ServerError> {
        if hash_secret.is_empty() {
            return Err(ServerError::ConfigError(
                "API_KEY_HASH_SECRET not set".to_string(),
            ));
        }

        info!("open api key store at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if !Sqlite::database_exists(path).await? {
            Sqlite::create_database(path).await?;
            info!("created key store db at {}", path);
        }
        let conn_pool = SqlitePool::connect(path).await?;

        let store = KeyStore {
            conn_pool,
            hash_secret: hash_secret.to_string(),
        };
        store.initialize().await?;

        Ok(store)
    }

    async fn initialize(&self) -> Result<(), ServerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_keys (
                hash TEXT PRIMARY KEY,
                service TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_api_keys_created_at
                ON api_keys(created_at);

            PRAGMA journal_mode=WAL;
        "#,
        )
        .execute(&self.conn_pool)
        .await?;

        Ok(())
    }

    /// Compute the storage digest of a raw key.
    fn hash_key(&self, raw_key: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.hash_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(raw_key.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Mint a new API key for a service label.
    ///
    /// Returns the raw key (shown to the caller exactly once) together with
    /// the stored record. A label that already has a key is rejected.
    pub async fn mint(&self, service: &str, ttl: Duration) -> Result<(String, ApiKey), ServerError> {
        let mut bytes = [0u8; KEY_RANDOM_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let raw_key = format!("{}{}", API_KEY_PREFIX, URL_SAFE_NO_PAD.encode(bytes));
        let hash = self.hash_key(&raw_key);

        let created_at = Utc::now().timestamp();
        let expires_at = created_at + ttl.as_secs() as i64;

        let res = sqlx::query(
            r#"
            INSERT INTO api_keys (hash, service, created_at, expires_at, revoked)
            VALUES (?, ?, ?, ?, 0)
            "#,
        )
        .bind(hash.as_str())
        .bind(service)
        .bind(created_at)
        .bind(expires_at)
        .execute(&self.conn_pool)
        .await;

        match res {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(ServerError::KeyStoreError(format!(
                    "an API key for service '{}' already exists",
                    service
                )));
            }
            Err(e) => return Err(e.into()),
        }

        info!("minted new API key for service '{}'", service);

        Ok((
            raw_key,
            ApiKey {
                hash,
                service: service.to_string(),
                created_at,
                expires_at,
                revoked: false,
            },
        ))
    }

    /// Look up a raw key. Unknown, revoked, and expired keys all read as
    /// `None`.
    pub async fn lookup(&self, raw_key: &str) -> Result<Option<ApiKey>, ServerError> {
        let hash = self.hash_key(raw_key);
        let found = sqlx::query(
            r#"
            SELECT hash, service, created_at, expires_at, revoked
            FROM api_keys WHERE hash = ?
            "#,
        )
        .bind(hash.as_str())
        .map(|row: SqliteRow| ApiKey {
            hash: row.get::<String, _>("hash"),
            service: row.get::<String, _>("service"),
            created_at: row.get::<i64, _>("created_at"),
            expires_at: row.get::<i64, _>("expires_at"),
            revoked: row.get::<i64, _>("revoked") != 0,
        })
        .fetch_optional(&self.conn_pool)
        .await?;

        let now = Utc::now().timestamp();
        Ok(found.filter(|key| !key.revoked && !key.is_expired(now)))
    }

    /// List all stored keys, newest first.
    pub async fn list(&self) -> Result<Vec<ApiKey>, ServerError> {
        let keys = sqlx::query(
            r#"
            SELECT hash, service, created_at, expires_at, revoked
            FROM api_keys
            ORDER BY created_at DESC, service ASC
            "#,
        )
        .map(|row: SqliteRow| ApiKey {
            hash: row.get::<String, _>("hash"),
            service: row.get::<String, _>("service"),
            created_at: row.get::<i64, _>("created_at"),
            expires_at: row.get::<i64, _>("expires_at"),
            revoked: row.get::<i64, _>("revoked") != 0,
        })
        .fetch_all(&self.conn_pool)
        .await?;
        Ok(keys)
    }

    /// Delete a key by its stored hash. Returns whether a row was removed.
    pub async fn revoke(&self, hash: &str) -> Result<bool, ServerError> {
        let res = sqlx::query("DELETE FROM api_keys WHERE hash = ?")
            .bind(hash)
            .execute(&self.conn_pool)
            .await?;
        let removed = res.rows_affected() > 0;
        if removed {
            info!("revoked API key {}", hash);
        }
        Ok(removed)
    }

    /// Delete all expired keys. Returns the number of rows removed.
    pub async fn purge_expired(&self) -> Result<u64, ServerError> {
        let now = Utc::now().timestamp();
        let res = sqlx::query("DELETE FROM api_keys WHERE expires_at < ?")
            .bind(now)
            .execute(&self.conn_pool)
            .await?;
        Ok(res.rows_affected())
    }

    /// Total number of stored keys, including revoked and expired ones.
    pub async fn count(&self) -> Result<i64, ServerError> {
        let count = sqlx::query("SELECT count(*) FROM api_keys")
            .map(|row: SqliteRow| row.get::<i64, _>(0))
            .fetch_one(&self.conn_pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const TEST_SECRET: &str = "test-hash-secret";

    /// Helper function to create a temporary database file path
    fn create_temp_db_path(test_name: &str) -> PathBuf {
        let mut temp_dir = std::env::temp_dir();
        temp_dir.push(format!(
            "google_oauth2_server_test_{}_{}.sqlite3",
            test_name,
            chrono::Utc::now().timestamp_millis()
        ));
        temp_dir
    }

    /// Helper function to ensure cleanup of database files
    fn cleanup_db_file(path: &PathBuf) {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }

        // Remove WAL and SHM files that SQLite creates
        let wal_path = path.with_extension("sqlite3-wal");
        if wal_path.exists() {
            let _ = std::fs::remove_file(wal_path);
        }

        let shm_path = path.with_extension("sqlite3-shm");
        if shm_path.exists() {
            let _ = std::fs::remove_file(shm_path);
        }
    }

    #[tokio::test]
    async fn test_mint_and_lookup() {
        let db_path = create_temp_db_path("mint_and_lookup");
        let db_path_str = db_path.to_str().unwrap();

        let store = KeyStore::new(db_path_str, TEST_SECRET).await.unwrap();
        let (raw_key, key) = store
            .mint("edgar", Duration::from_secs(3600))
            .await
            .unwrap();

        // raw key shape: prefix plus 43 chars of url-safe base64 (32 bytes)
        assert!(raw_key.starts_with(API_KEY_PREFIX));
        assert_eq!(raw_key.len(), API_KEY_PREFIX.len() + 43);

        // stored digest matches the keyed hash of the raw key
        assert_eq!(key.hash, store.hash_key(&raw_key));
        assert_eq!(key.service, "edgar");
        assert!(!key.revoked);

        let found = store.lookup(&raw_key).await.unwrap().unwrap();
        assert_eq!(found, key);

        // unknown key reads as absent
        assert!(store
            .lookup("sk_mcp_this-key-was-never-minted")
            .await
            .unwrap()
            .is_none());

        drop(store);
        cleanup_db_file(&db_path);
    }

    #[tokio::test]
    async fn test_duplicate_service_rejected() {
        let db_path = create_temp_db_path("duplicate_service");
        let db_path_str = db_path.to_str().unwrap();

        let store = KeyStore::new(db_path_str, TEST_SECRET).await.unwrap();
        store
            .mint("reports", Duration::from_secs(3600))
            .await
            .unwrap();

        let err = store
            .mint("reports", Duration::from_secs(3600))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::KeyStoreError(_)));
        assert_eq!(store.count().await.unwrap(), 1);

        drop(store);
        cleanup_db_file(&db_path);
    }

    #[tokio::test]
    async fn test_expired_key_rejected() {
        let db_path = create_temp_db_path("expired_key");
        let db_path_str = db_path.to_str().unwrap();

        let store = KeyStore::new(db_path_str, TEST_SECRET).await.unwrap();
        let (raw_key, key) = store
            .mint("stale", Duration::from_secs(3600))
            .await
            .unwrap();

        sqlx::query("UPDATE api_keys SET expires_at = ? WHERE hash = ?")
            .bind(Utc::now().timestamp() - 10)
            .bind(key.hash.as_str())
            .execute(&store.conn_pool)
            .await
            .unwrap();

        assert!(store.lookup(&raw_key).await.unwrap().is_none());
        // the row itself is still there until purged
        assert_eq!(store.count().await.unwrap(), 1);

        drop(store);
        cleanup_db_file(&db_path);
    }

    #[tokio::test]
    async fn test_revoked_flag_rejected() {
        let db_path = create_temp_db_path("revoked_flag");
        let db_path_str = db_path.to_str().unwrap();

        let store = KeyStore::new(db_path_str, TEST_SECRET).await.unwrap();
        let (raw_key, key) = store
            .mint("flagged", Duration::from_secs(3600))
            .await
            .unwrap();

        sqlx::query("UPDATE api_keys SET revoked = 1 WHERE hash = ?")
            .bind(key.hash.as_str())
            .execute(&store.conn_pool)
            .await
            .unwrap();

        assert!(store.lookup(&raw_key).await.unwrap().is_none());

        drop(store);
        cleanup_db_file(&db_path);
    }

    #[tokio::test]
    async fn test_revoke_deletes_row() {
        let db_path = create_temp_db_path("revoke_deletes");
        let db_path_str = db_path.to_str().unwrap();

        let store = KeyStore::new(db_path_str, TEST_SECRET).await.unwrap();
        let (raw_key, key) = store
            .mint("short-lived", Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(store.revoke(&key.hash).await.unwrap());
        assert!(store.lookup(&raw_key).await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);

        // revoking again is a no-op
        assert!(!store.revoke(&key.hash).await.unwrap());

        drop(store);
        cleanup_db_file(&db_path);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let db_path = create_temp_db_path("purge_expired");
        let db_path_str = db_path.to_str().unwrap();

        let store = KeyStore::new(db_path_str, TEST_SECRET).await.unwrap();
        let (_, stale) = store
            .mint("stale", Duration::from_secs(3600))
            .await
            .unwrap();
        store
            .mint("fresh", Duration::from_secs(3600))
            .await
            .unwrap();

        sqlx::query("UPDATE api_keys SET expires_at = ? WHERE hash = ?")
            .bind(Utc::now().timestamp() - 10)
            .bind(stale.hash.as_str())
            .execute(&store.conn_pool)
            .await
            .unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);

        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].service, "fresh");

        drop(store);
        cleanup_db_file(&db_path);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let db_path = create_temp_db_path("list_order");
        let db_path_str = db_path.to_str().unwrap();

        let store = KeyStore::new(db_path_str, TEST_SECRET).await.unwrap();
        let (_, older) = store
            .mint("older", Duration::from_secs(3600))
            .await
            .unwrap();
        store
            .mint("newer", Duration::from_secs(3600))
            .await
            .unwrap();

        sqlx::query("UPDATE api_keys SET created_at = created_at - 100 WHERE hash = ?")
            .bind(older.hash.as_str())
            .execute(&store.conn_pool)
            .await
            .unwrap();

        let keys = store.list().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].service, "newer");
        assert_eq!(keys[1].service, "older");

        drop(store);
        cleanup_db_file(&db_path);
    }

    #[tokio::test]
    async fn test_empty_secret_rejected() {
        let db_path = create_temp_db_path("empty_secret");
        let db_path_str = db_path.to_str().unwrap();

        let err = KeyStore::new(db_path_str, "").await.unwrap_err();
        assert!(matches!(err, ServerError::ConfigError(_)));

        cleanup_db_file(&db_path);
    }
}
