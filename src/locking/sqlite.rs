//! SQLite-backed lock store shared by every process that opens the same file.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use super::{LOCK_LEASE, LockStore};
use crate::errors::LockError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Conditional upsert: insert a fresh lease, or take over an existing row only
/// when its lease has expired or it already belongs to the caller.
const ACQUIRE_SQL: &str = "
    INSERT INTO locks (resource, transaction_id, expires_at)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(resource) DO UPDATE SET
        transaction_id = excluded.transaction_id,
        expires_at = excluded.expires_at
    WHERE locks.expires_at <= ?4 OR locks.transaction_id = excluded.transaction_id
";

#[derive(Clone)]
pub struct SqliteLockStore {
    conn: Arc<Mutex<Connection>>,
    lease: Duration,
}

impl SqliteLockStore {
    /// Open (or create) the lock database at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open lock database {}", path.display()))?;
        Self::from_connection(conn, LOCK_LEASE)
    }

    /// In-memory database (for testing).
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory lock database")?;
        Self::from_connection(conn, LOCK_LEASE)
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    fn from_connection(conn: Connection, lease: Duration) -> anyhow::Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set busy timeout")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS locks (
                resource TEXT PRIMARY KEY,
                transaction_id INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            ",
        )
        .context("Failed to create locks table")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            lease,
        })
    }

    /// Run `f` against the connection on a blocking thread.
    async fn call<F, R>(&self, f: F) -> Result<R, LockError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| LockError::Poisoned)?;
            f(&guard).map_err(|e| LockError::Store(e.into()))
        })
        .await
        .map_err(|e| LockError::Store(anyhow::anyhow!("Lock store task panicked: {e}")))?
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl LockStore for SqliteLockStore {
    async fn acquire(&self, holder: u64, key: &str) -> Result<bool, LockError> {
        let key = key.to_string();
        let now = now_secs();
        let expires_at = now + self.lease.as_secs() as i64;
        self.call(move |conn| {
            let changed = conn.execute(ACQUIRE_SQL, params![key, holder as i64, expires_at, now])?;
            Ok(changed == 1)
        })
        .await
    }

    async fn release(&self, key: &str) -> Result<bool, LockError> {
        let key = key.to_string();
        self.call(move |conn| {
            let changed = conn.execute("DELETE FROM locks WHERE resource = ?1", params![key])?;
            Ok(changed > 0)
        })
        .await
    }

    async fn read(&self, key: &str) -> Result<Option<u64>, LockError> {
        let key = key.to_string();
        let now = now_secs();
        self.call(move |conn| {
            conn.query_row(
                "SELECT transaction_id FROM locks WHERE resource = ?1 AND expires_at > ?2",
                params![key, now],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|holder| holder.map(|h| h as u64))
        })
        .await
    }

    async fn release_if_held(&self, holder: u64, key: &str) -> Result<bool, LockError> {
        let key = key.to_string();
        let now = now_secs();
        self.call(move |conn| {
            let changed = conn.execute(
                "DELETE FROM locks WHERE resource = ?1 AND transaction_id = ?2 AND expires_at > ?3",
                params![key, holder as i64, now],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "acme/infra#network";

    #[tokio::test]
    async fn acquire_read_release() {
        let store = SqliteLockStore::new_in_memory().unwrap();
        assert_eq!(store.read(KEY).await.unwrap(), None);
        assert!(store.acquire(11, KEY).await.unwrap());
        assert_eq!(store.read(KEY).await.unwrap(), Some(11));
        assert!(store.release(KEY).await.unwrap());
        assert_eq!(store.read(KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn contention_returns_false_not_error() {
        let store = SqliteLockStore::new_in_memory().unwrap();
        assert!(store.acquire(11, KEY).await.unwrap());
        assert!(!store.acquire(12, KEY).await.unwrap());
        assert_eq!(store.read(KEY).await.unwrap(), Some(11));
    }

    #[tokio::test]
    async fn owner_reacquires() {
        let store = SqliteLockStore::new_in_memory().unwrap();
        assert!(store.acquire(11, KEY).await.unwrap());
        assert!(store.acquire(11, KEY).await.unwrap());
        assert_eq!(store.read(KEY).await.unwrap(), Some(11));
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let store = SqliteLockStore::new_in_memory()
            .unwrap()
            .with_lease(Duration::ZERO);
        assert!(store.acquire(11, KEY).await.unwrap());
        assert_eq!(store.read(KEY).await.unwrap(), None);
        assert!(store.acquire(12, KEY).await.unwrap());
    }

    #[tokio::test]
    async fn release_if_held_is_conditional() {
        let store = SqliteLockStore::new_in_memory().unwrap();
        store.acquire(11, KEY).await.unwrap();
        assert!(!store.release_if_held(12, KEY).await.unwrap());
        assert_eq!(store.read(KEY).await.unwrap(), Some(11));
        assert!(store.release_if_held(11, KEY).await.unwrap());
        assert_eq!(store.read(KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn separate_connections_share_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locks.db");

        let mut handles = Vec::new();
        for holder in 1..=8u64 {
            let store = SqliteLockStore::open(&path).unwrap();
            handles.push(tokio::spawn(async move { store.acquire(holder, KEY).await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let reader = SqliteLockStore::open(&path).unwrap();
        assert!(reader.read(KEY).await.unwrap().is_some());
    }
}
