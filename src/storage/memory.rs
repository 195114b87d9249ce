//! In-memory state store for tests and embedded use.
//!
//! Same contract as the durable store: mutators run against a working copy
//! and the committed snapshot is only replaced when the mutator succeeds.
//! An error leaves the previous snapshot and version untouched.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::ControlPlaneSnapshot;
use crate::errors::Result;
use crate::storage::StateStore;

#[derive(Debug, Default)]
struct VersionedSnapshot {
    version: u64,
    snapshot: ControlPlaneSnapshot,
}

/// Lock-serialized in-memory snapshot store.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    inner: Mutex<VersionedSnapshot>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a snapshot, e.g. restored state in tests.
    pub fn with_snapshot_data(snapshot: ControlPlaneSnapshot) -> Self {
        Self { inner: Mutex::new(VersionedSnapshot { version: 0, snapshot }) }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn read(&self) -> Result<ControlPlaneSnapshot> {
        Ok(self.inner.lock().await.snapshot.clone())
    }

    async fn version(&self) -> Result<u64> {
        Ok(self.inner.lock().await.version)
    }

    async fn with_snapshot<F, T>(&self, mutator: F) -> Result<T>
    where
        F: FnOnce(&mut ControlPlaneSnapshot) -> Result<T> + Send,
        T: Send,
    {
        let mut inner = self.inner.lock().await;

        // Mutate a working copy so an error cannot leak partial changes into
        // the committed snapshot.
        let mut working = inner.snapshot.clone();
        let value = mutator(&mut working)?;

        inner.snapshot = working;
        inner.version += 1;
        Ok(value)
    }
}
