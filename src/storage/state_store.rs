//! Single-snapshot state store.
//!
//! All control plane state lives in one [`ControlPlaneSnapshot`] persisted as
//! a JSON document. [`StateStore::with_snapshot`] is the only way to mutate
//! it: the store loads the current document under its write lock, hands a
//! working copy to the mutator, and persists the result with `version + 1`
//! only when the mutator succeeds. An error from the mutator rolls the
//! transaction back; no partial state is ever visible to readers.
//!
//! Mutator closures must stay CPU-bound and idempotent: callers may re-invoke
//! them after an aborted transaction, and the store's lock is held for their
//! full duration.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::clock::format_rfc3339;
use crate::domain::ControlPlaneSnapshot;
use crate::errors::{AuthPlaneError, Result};
use crate::storage::DbPool;

/// Serializable read-modify-write access to the one snapshot.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Return an owned copy of the last committed snapshot.
    async fn read(&self) -> Result<ControlPlaneSnapshot>;

    /// Monotonically increasing commit counter, for observability.
    async fn version(&self) -> Result<u64>;

    /// Run `mutator` against the current snapshot inside a transaction.
    ///
    /// Commits with `version + 1` when the mutator returns `Ok`; rolls back
    /// every change when it returns `Err` and surfaces that error unchanged.
    /// Concurrent callers serialize: the second always observes the first
    /// caller's writes.
    async fn with_snapshot<F, T>(&self, mutator: F) -> Result<T>
    where
        F: FnOnce(&mut ControlPlaneSnapshot) -> Result<T> + Send,
        T: Send;
}

/// Durable store: one row per snapshot key in `control_plane_snapshots`,
/// holding the JSON document and its version.
///
/// Multiple control planes can multiplex one database by using distinct
/// snapshot keys. Writes serialize on an in-process mutex plus the SQLite
/// write transaction, so mutators appear totally ordered.
pub struct SqlxStateStore {
    pool: DbPool,
    snapshot_key: String,
    write_lock: Mutex<()>,
}

impl SqlxStateStore {
    pub fn new(pool: DbPool, snapshot_key: impl Into<String>) -> Self {
        Self { pool, snapshot_key: snapshot_key.into(), write_lock: Mutex::new(()) }
    }

    pub fn snapshot_key(&self) -> &str {
        &self.snapshot_key
    }

    async fn fetch_row(&self) -> Result<Option<(i64, String)>> {
        sqlx::query_as::<_, (i64, String)>(
            "SELECT version, document FROM control_plane_snapshots WHERE snapshot_key = ?1",
        )
        .bind(&self.snapshot_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthPlaneError::database(e, "Failed to read control plane snapshot".into()))
    }

    fn decode(document: &str) -> Result<ControlPlaneSnapshot> {
        serde_json::from_str(document).map_err(|e| {
            AuthPlaneError::serialization(e, "Failed to decode control plane snapshot")
        })
    }
}

#[async_trait]
impl StateStore for SqlxStateStore {
    async fn read(&self) -> Result<ControlPlaneSnapshot> {
        match self.fetch_row().await? {
            Some((_, document)) => Self::decode(&document),
            None => Ok(ControlPlaneSnapshot::default()),
        }
    }

    async fn version(&self) -> Result<u64> {
        Ok(self.fetch_row().await?.map(|(version, _)| version as u64).unwrap_or(0))
    }

    async fn with_snapshot<F, T>(&self, mutator: F) -> Result<T>
    where
        F: FnOnce(&mut ControlPlaneSnapshot) -> Result<T> + Send,
        T: Send,
    {
        let _guard = self.write_lock.lock().await;

        let mut tx = self.pool.begin().await.map_err(|e| {
            AuthPlaneError::database(e, "Failed to begin snapshot transaction".into())
        })?;

        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT version, document FROM control_plane_snapshots WHERE snapshot_key = ?1",
        )
        .bind(&self.snapshot_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            AuthPlaneError::database(e, "Failed to load snapshot for mutation".into())
        })?;

        let (version, mut snapshot) = match row {
            Some((version, document)) => (version, Self::decode(&document)?),
            None => (0, ControlPlaneSnapshot::default()),
        };

        // Dropping the transaction on the error path rolls everything back.
        let value = mutator(&mut snapshot)?;

        let document = serde_json::to_string(&snapshot).map_err(|e| {
            AuthPlaneError::serialization(e, "Failed to encode control plane snapshot")
        })?;

        sqlx::query(
            "INSERT INTO control_plane_snapshots (snapshot_key, version, document, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(snapshot_key) DO UPDATE SET \
             version = excluded.version, document = excluded.document, updated_at = excluded.updated_at",
        )
        .bind(&self.snapshot_key)
        .bind(version + 1)
        .bind(&document)
        .bind(format_rfc3339(chrono::Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(|e| AuthPlaneError::database(e, "Failed to persist snapshot".into()))?;

        tx.commit()
            .await
            .map_err(|e| AuthPlaneError::database(e, "Failed to commit snapshot".into()))?;

        Ok(value)
    }
}
