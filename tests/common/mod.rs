//! Common test utilities for all integration tests.
//!
//! Assembles the full service graph over the in-memory store (with a
//! deterministic clock) or over the durable SQLite store.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use rezilient_auth::clock::{Clock, TestClock};
use rezilient_auth::config::{AppConfig, DatabaseConfig};
use rezilient_auth::domain::{InstanceId, TenantId};
use rezilient_auth::enrollment::{EnrollmentExchange, ExchangeOutcome, IssueEnrollmentRequest};
use rezilient_auth::registry::{CreateInstanceRequest, CreateTenantRequest};
use rezilient_auth::storage::{create_pool, InMemoryStateStore, SqlxStateStore};
use rezilient_auth::ControlPlane;

static TRACING: Once = Once::new();

/// Route test logs through the tracing subscriber once per binary; run with
/// `RUST_LOG=debug` to see them.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub const TENANT: &str = "tenant-acme";
pub const INSTANCE: &str = "instance-dev-01";
pub const SOURCE: &str = "sn://acme-dev.service-now.com";
pub const EPOCH: &str = "2026-08-01T00:00:00.000Z";

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.token.issuer = "rezilient-auth".into();
    config.token.signing_key = "integration-test-signing-key-0123456789".into();
    config.token.token_ttl_seconds = 300;
    config.token.token_clock_skew_seconds = 30;
    config.token.outage_grace_window_seconds = 420;
    config
}

pub struct TestPlane {
    pub clock: Arc<TestClock>,
    pub store: Arc<InMemoryStateStore>,
    pub plane: ControlPlane<InMemoryStateStore>,
}

/// Control plane over the in-memory store, pinned to [`EPOCH`].
pub fn memory_plane() -> TestPlane {
    init_tracing();
    let clock = Arc::new(TestClock::fixed(EPOCH).expect("epoch timestamp"));
    let store = Arc::new(InMemoryStateStore::new());
    let plane = ControlPlane::new(
        Arc::clone(&store),
        Arc::clone(&clock) as Arc<dyn Clock>,
        &test_config(),
    );
    TestPlane { clock, store, plane }
}

pub struct DurablePlane {
    pub clock: Arc<TestClock>,
    pub store: Arc<SqlxStateStore>,
    pub plane: ControlPlane<SqlxStateStore>,
}

/// Control plane over the durable store, backed by a single-connection
/// in-memory SQLite database (`:memory:` databases are per-connection).
pub async fn sqlite_plane() -> DurablePlane {
    sqlite_plane_at("sqlite://:memory:").await
}

/// Durable control plane over an explicit SQLite URL (e.g. a temp file).
pub async fn sqlite_plane_at(url: &str) -> DurablePlane {
    init_tracing();
    let config = DatabaseConfig {
        url: url.to_string(),
        max_connections: 1,
        min_connections: 1,
        auto_migrate: true,
        ..Default::default()
    };
    let pool = create_pool(&config).await.expect("create pool");
    let store = Arc::new(SqlxStateStore::new(pool, config.snapshot_key.clone()));
    let clock = Arc::new(TestClock::fixed(EPOCH).expect("epoch timestamp"));
    let plane = ControlPlane::new(
        Arc::clone(&store),
        Arc::clone(&clock) as Arc<dyn Clock>,
        &test_config(),
    );
    DurablePlane { clock, store, plane }
}

pub fn tenant_id() -> TenantId {
    TenantId::from_str_unchecked(TENANT)
}

pub fn instance_id() -> InstanceId {
    InstanceId::from_str_unchecked(INSTANCE)
}

/// Create the standard tenant and instance.
pub async fn seed_tenant_and_instance<S: rezilient_auth::storage::StateStore>(
    plane: &ControlPlane<S>,
) {
    plane
        .registry
        .create_tenant(CreateTenantRequest {
            tenant_id: TENANT.into(),
            name: "Acme".into(),
            state: None,
            entitlement_state: None,
            actor: Some("ops@test".into()),
        })
        .await
        .expect("create tenant");
    plane
        .registry
        .create_instance(CreateInstanceRequest {
            instance_id: INSTANCE.into(),
            tenant_id: TENANT.into(),
            source: SOURCE.into(),
            state: None,
            allowed_services: None,
            actor: Some("ops@test".into()),
        })
        .await
        .expect("create instance");
}

/// Create the standard tenant/instance, issue a code, and exchange it.
pub async fn enroll<S: rezilient_auth::storage::StateStore>(
    plane: &ControlPlane<S>,
    ttl_seconds: u64,
) -> EnrollmentExchange {
    seed_tenant_and_instance(plane).await;
    let issued = plane
        .enrollment
        .issue(IssueEnrollmentRequest {
            tenant_id: TENANT.into(),
            instance_id: INSTANCE.into(),
            ttl_seconds,
            requested_by: Some("ops@test".into()),
        })
        .await
        .expect("issue code");
    match plane.enrollment.exchange(&issued.enrollment_code).await.expect("exchange") {
        ExchangeOutcome::Success(exchange) => exchange,
        ExchangeOutcome::Denied(denial) => panic!("enrollment denied: {denial:?}"),
    }
}
