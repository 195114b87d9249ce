//! Append-only audit recorder.
//!
//! Events are appended to the snapshot's audit sequence together with a
//! normalized cross-service projection. Services producing an event inside a
//! transaction call [`AuditRecorder::append_within`] from their mutator so
//! the event commits atomically with the mutation it describes; standalone
//! records go through [`AuditRecorder::record`], which opens its own
//! transaction. Events are never mutated after they are recorded.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AuditSettings;
use crate::domain::{
    AuditEvent, AuditEventType, ClientId, ControlPlaneSnapshot, CrossServiceEvent, InstanceId,
    ServiceScope, TenantId,
};
use crate::errors::Result;
use crate::storage::StateStore;

use super::sanitize::RedactionPolicy;

/// Event under construction; the recorder fills in `event_id` and
/// `occurred_at` and sanitizes the metadata.
#[derive(Debug, Clone)]
pub struct AuditEventDraft {
    pub event_type: AuditEventType,
    pub actor: Option<String>,
    pub tenant_id: Option<TenantId>,
    pub instance_id: Option<InstanceId>,
    pub client_id: Option<ClientId>,
    pub service_scope: Option<ServiceScope>,
    pub reason_code: Option<String>,
    pub metadata: Map<String, Value>,
}

impl AuditEventDraft {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            actor: None,
            tenant_id: None,
            instance_id: None,
            client_id: None,
            service_scope: None,
            reason_code: None,
            metadata: Map::new(),
        }
    }

    pub fn actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }

    pub fn tenant(mut self, tenant_id: &TenantId) -> Self {
        self.tenant_id = Some(tenant_id.clone());
        self
    }

    pub fn instance(mut self, instance_id: &InstanceId) -> Self {
        self.instance_id = Some(instance_id.clone());
        self
    }

    pub fn client(mut self, client_id: &ClientId) -> Self {
        self.client_id = Some(client_id.clone());
        self
    }

    pub fn scope(mut self, scope: ServiceScope) -> Self {
        self.service_scope = Some(scope);
        self
    }

    pub fn reason(mut self, reason_code: impl Into<String>) -> Self {
        self.reason_code = Some(reason_code.into());
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Records audit events and serves the read side of the stream.
pub struct AuditRecorder<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    policy: RedactionPolicy,
    origin_service: String,
}

impl<S: StateStore> AuditRecorder<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, settings: &AuditSettings) -> Self {
        Self {
            store,
            clock,
            policy: RedactionPolicy::from_settings(settings),
            origin_service: settings.origin_service.clone(),
        }
    }

    /// Append an event (and its cross-service projection) to a snapshot that
    /// is already open inside a transaction. The event commits or rolls back
    /// with the producing mutation.
    pub fn append_within(
        &self,
        snapshot: &mut ControlPlaneSnapshot,
        draft: AuditEventDraft,
    ) -> AuditEvent {
        let metadata = self.policy.sanitize_map(draft.metadata);
        let event = AuditEvent {
            event_id: Uuid::new_v4().to_string(),
            event_type: draft.event_type,
            occurred_at: self.clock.now_iso(),
            actor: draft.actor,
            tenant_id: draft.tenant_id,
            instance_id: draft.instance_id,
            client_id: draft.client_id,
            service_scope: draft.service_scope,
            reason_code: draft.reason_code,
            metadata,
        };

        let cross = CrossServiceEvent {
            event_id: event.event_id.clone(),
            occurred_at: event.occurred_at.clone(),
            origin_service: self.origin_service.clone(),
            event_type: event.event_type,
            tenant_id: event.tenant_id.clone(),
            instance_id: event.instance_id.clone(),
            client_id: event.client_id.clone(),
            service_scope: event.service_scope,
            reason_code: event.reason_code.clone(),
            attributes: event.metadata.clone(),
        };

        debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            "audit event appended"
        );
        snapshot.push_events(event.clone(), cross);
        event
    }

    /// Record a standalone event in its own transaction.
    pub async fn record(&self, draft: AuditEventDraft) -> Result<AuditEvent> {
        self.store.with_snapshot(|snapshot| Ok(self.append_within(snapshot, draft))).await
    }

    /// Events sorted ascending by `occurred_at`; last `limit` when provided.
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<AuditEvent>> {
        let snapshot = self.store.read().await?;
        let mut events = snapshot.audit_events;
        events.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
        Ok(tail(events, limit))
    }

    /// Normalized events in replay order: `occurred_at`, then `event_id`.
    pub async fn list_cross_service(&self, limit: Option<usize>) -> Result<Vec<CrossServiceEvent>> {
        let snapshot = self.store.read().await?;
        let mut events = snapshot.cross_service_events;
        events.sort_by(|a, b| {
            a.occurred_at.cmp(&b.occurred_at).then_with(|| a.event_id.cmp(&b.event_id))
        });
        Ok(tail(events, limit))
    }

    /// Events attributed to one instance, ascending by `occurred_at`.
    pub async fn list_for_instance(
        &self,
        instance_id: &InstanceId,
        limit: Option<usize>,
    ) -> Result<Vec<AuditEvent>> {
        let snapshot = self.store.read().await?;
        let mut events: Vec<AuditEvent> = snapshot
            .audit_events
            .into_iter()
            .filter(|e| e.instance_id.as_ref() == Some(instance_id))
            .collect();
        events.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
        Ok(tail(events, limit))
    }
}

fn tail<T>(mut events: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        if events.len() > limit {
            events.drain(..events.len() - limit);
        }
    }
    events
}
