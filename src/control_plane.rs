//! Wires the service graph over one state store and one clock.
//!
//! Dependencies are passed explicitly into each component; there is no
//! global state. The HTTP layer (out of scope here) holds one
//! [`ControlPlane`] and calls straight through.

use std::sync::Arc;

use crate::audit::AuditRecorder;
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::enrollment::EnrollmentService;
use crate::errors::Result;
use crate::registry::RegistryService;
use crate::rotation::RotationService;
use crate::storage::{create_pool, InMemoryStateStore, SqlxStateStore, StateStore};
use crate::token::TokenService;

/// The assembled control plane core.
pub struct ControlPlane<S> {
    pub registry: RegistryService<S>,
    pub enrollment: EnrollmentService<S>,
    pub rotation: RotationService<S>,
    pub token: TokenService<S>,
    pub audit: Arc<AuditRecorder<S>>,
}

impl<S> Clone for ControlPlane<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            enrollment: self.enrollment.clone(),
            rotation: self.rotation.clone(),
            token: self.token.clone(),
            audit: Arc::clone(&self.audit),
        }
    }
}

impl<S: StateStore> ControlPlane<S> {
    /// Assemble the service graph over an existing store and clock.
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: &AppConfig) -> Self {
        let audit =
            Arc::new(AuditRecorder::new(Arc::clone(&store), Arc::clone(&clock), &config.audit));

        Self {
            registry: RegistryService::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                Arc::clone(&audit),
            ),
            enrollment: EnrollmentService::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                Arc::clone(&audit),
            ),
            rotation: RotationService::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                Arc::clone(&audit),
            ),
            token: TokenService::new(store, clock, Arc::clone(&audit), config.token.clone()),
            audit,
        }
    }
}

impl ControlPlane<SqlxStateStore> {
    /// Connect to the configured database and assemble the durable control
    /// plane with the system clock.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let pool = create_pool(&config.database).await?;
        let store = Arc::new(SqlxStateStore::new(pool, config.database.snapshot_key.clone()));
        Ok(Self::new(store, Arc::new(SystemClock), config))
    }
}

impl ControlPlane<InMemoryStateStore> {
    /// Fully in-memory control plane; used by tests and embedded tooling.
    pub fn in_memory(clock: Arc<dyn Clock>, config: &AppConfig) -> Self {
        Self::new(Arc::new(InMemoryStateStore::new()), clock, config)
    }
}
