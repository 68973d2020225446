//! Durable session persistence.
//!
//! The session tuple (bearer token, profile snapshot, role tag) is stored
//! under three separate keys in a string key-value layer. The tuple is
//! all-or-nothing from the caller's point of view: [`SessionStore::load`]
//! only reports a session when every field is present and decodes, so an
//! interrupted write reads back as "not logged in" rather than as a broken
//! half-session.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::{Role, RoleProfile};

const KEY_TOKEN: &str = "session.token";
const KEY_PROFILE: &str = "session.profile";
const KEY_ROLE: &str = "session.role";

/// Failure of the persistence layer itself. Callers must treat any storage
/// error as "no session was established".
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to encode profile: {0}")]
    Encode(#[from] serde_json::Error),
}

/// String key-value persistence, the only thing the session store needs
/// from its environment.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        // Strip SQL comment lines (lines starting with --)
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

/// [`KvStore`] backed by an on-disk SQLite database.
#[derive(Clone)]
pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    pub async fn init(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("satchel.db");
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        info!("Initializing session database at {}", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;

        execute_sql(&pool, include_str!("../../migrations/001_session.sql")).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = sqlx::query_scalar("SELECT value FROM session_kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO session_kv (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM session_kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory [`KvStore`] for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current contents, for pre/post comparisons in tests.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// The persisted "who is currently logged in" tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub profile: RoleProfile,
    pub role: Role,
}

/// Single owner of the persisted session tuple.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KvStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Persist a freshly resolved session. On any write failure the partial
    /// tuple is cleared so a torn write cannot read back as a session.
    pub async fn save(
        &self,
        token: &str,
        profile: &RoleProfile,
        role: Role,
    ) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(profile)?;
        let result = self.write_all(token, &encoded, role).await;
        if result.is_err() {
            let _ = self.clear().await;
        }
        result
    }

    async fn write_all(&self, token: &str, profile: &str, role: Role) -> Result<(), StorageError> {
        self.kv.set(KEY_TOKEN, token).await?;
        self.kv.set(KEY_PROFILE, profile).await?;
        self.kv.set(KEY_ROLE, role.as_str()).await?;
        Ok(())
    }

    /// Load the current session, or `None` when not logged in. A partially
    /// populated or undecodable tuple reads as `None`.
    pub async fn load(&self) -> Result<Option<Session>, StorageError> {
        let token = self.kv.get(KEY_TOKEN).await?;
        let profile = self.kv.get(KEY_PROFILE).await?;
        let role = self.kv.get(KEY_ROLE).await?;

        let (Some(token), Some(profile), Some(role)) = (token, profile, role) else {
            return Ok(None);
        };

        let role = match role.parse::<Role>() {
            Ok(role) => role,
            Err(e) => {
                warn!(error = %e, "stored role tag is invalid, treating as logged out");
                return Ok(None);
            }
        };

        match serde_json::from_str::<RoleProfile>(&profile) {
            Ok(profile) => Ok(Some(Session {
                token,
                profile,
                role,
            })),
            Err(e) => {
                warn!(error = %e, "stored profile does not decode, treating as logged out");
                Ok(None)
            }
        }
    }

    /// Remove the session tuple. Safe to call when no session exists.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.kv.remove(KEY_TOKEN).await?;
        self.kv.remove(KEY_PROFILE).await?;
        self.kv.remove(KEY_ROLE).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> RoleProfile {
        RoleProfile {
            id: "stu-7".to_string(),
            name: "Ama Mensah".to_string(),
            email: "ama@gmail.com".to_string(),
            verified: Some(true),
            assigned_class: Some("JHS 2".to_string()),
            subject: None,
            extra: serde_json::Map::new(),
        }
    }

    fn memory_store() -> (SessionStore, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new());
        (SessionStore::new(kv.clone()), kv)
    }

    /// Refuses writes to one key, simulating the persistence layer dying
    /// partway through a save.
    struct FlakyKvStore {
        inner: MemoryKvStore,
        fail_key: &'static str,
    }

    #[async_trait]
    impl KvStore for FlakyKvStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if key == self.fail_key {
                return Err(StorageError::Database(sqlx::Error::PoolClosed));
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn save_then_load_returns_full_tuple() {
        let (store, _) = memory_store();
        let profile = sample_profile();

        store.save("tok-1", &profile, Role::Student).await.unwrap();

        let session = store.load().await.unwrap().unwrap();
        assert_eq!(session.token, "tok-1");
        assert_eq!(session.role, Role::Student);
        assert_eq!(session.profile, profile);
    }

    #[tokio::test]
    async fn clear_then_load_is_empty_and_clear_is_idempotent() {
        let (store, kv) = memory_store();
        store
            .save("tok-1", &sample_profile(), Role::Teacher)
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        assert!(kv.snapshot().is_empty());

        // Clearing with nothing persisted is a no-op, not an error
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn partial_tuple_reads_as_logged_out() {
        let (store, kv) = memory_store();
        // Token left over from an interrupted write
        kv.set(KEY_TOKEN, "orphan-token").await.unwrap();

        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_profile_reads_as_logged_out() {
        let (store, kv) = memory_store();
        kv.set(KEY_TOKEN, "tok-1").await.unwrap();
        kv.set(KEY_PROFILE, "{not json").await.unwrap();
        kv.set(KEY_ROLE, "student").await.unwrap();

        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_role_tag_reads_as_logged_out() {
        let (store, kv) = memory_store();
        kv.set(KEY_TOKEN, "tok-1").await.unwrap();
        kv.set(
            KEY_PROFILE,
            &serde_json::to_string(&sample_profile()).unwrap(),
        )
        .await
        .unwrap();
        kv.set(KEY_ROLE, "principal").await.unwrap();

        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_write_rolls_back_and_reports_storage_error() {
        let kv = Arc::new(FlakyKvStore {
            inner: MemoryKvStore::new(),
            fail_key: KEY_PROFILE,
        });
        let store = SessionStore::new(kv.clone());

        let error = store
            .save("tok-1", &sample_profile(), Role::Student)
            .await
            .unwrap_err();
        assert!(matches!(error, StorageError::Database(_)));

        // The token written before the failure was rolled back; nothing
        // reads back as a session
        assert!(store.load().await.unwrap().is_none());
        assert!(kv.inner.snapshot().is_empty());
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let kv = SqliteKvStore::init(dir.path()).await.unwrap();
            kv.set("session.token", "tok-9").await.unwrap();
            assert_eq!(
                kv.get("session.token").await.unwrap().as_deref(),
                Some("tok-9")
            );

            kv.set("session.token", "tok-10").await.unwrap();
            assert_eq!(
                kv.get("session.token").await.unwrap().as_deref(),
                Some("tok-10")
            );
        }

        // Reopening the same directory sees the persisted value
        let kv = SqliteKvStore::init(dir.path()).await.unwrap();
        assert_eq!(
            kv.get("session.token").await.unwrap().as_deref(),
            Some("tok-10")
        );

        kv.remove("session.token").await.unwrap();
        assert!(kv.get("session.token").await.unwrap().is_none());
        // Removing an absent key is fine
        kv.remove("session.token").await.unwrap();
    }
}
