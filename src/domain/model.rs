//! Persisted entities and the control plane snapshot.
//!
//! The snapshot is the single serializable unit the state store persists:
//! every map in it is a `BTreeMap` so the JSON document is deterministic,
//! and all timestamps are RFC 3339 strings (see [`crate::clock`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::id::{ClientId, EnrollmentCodeId, InstanceId, SecretVersionId, TenantId};
use super::types::{AuditEventType, LifecycleState, ServiceScope};

/// A customer organization. Tenants are created by admin action and never
/// destroyed; only their lifecycle and entitlement states change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: TenantId,
    pub name: String,
    pub state: LifecycleState,
    pub entitlement_state: LifecycleState,
    pub created_at: String,
    pub updated_at: String,
}

/// A customer instance owned by exactly one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: InstanceId,
    pub tenant_id: TenantId,
    /// External origin identifier; globally unique across all instances.
    pub source: String,
    pub state: LifecycleState,
    /// Sorted, deduplicated, never empty after create.
    pub allowed_services: Vec<ServiceScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_credentials: Option<ClientCredentials>,
    pub created_at: String,
    pub updated_at: String,
}

impl Instance {
    pub fn allows_service(&self, scope: ServiceScope) -> bool {
        self.allowed_services.contains(&scope)
    }
}

/// Credential material for one enrolled instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: ClientId,
    pub current_secret_version_id: SecretVersionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_secret_version_id: Option<SecretVersionId>,
    pub secret_versions: Vec<SecretVersion>,
}

impl ClientCredentials {
    pub fn version(&self, version_id: &SecretVersionId) -> Option<&SecretVersion> {
        self.secret_versions.iter().find(|v| &v.version_id == version_id)
    }

    pub fn version_mut(&mut self, version_id: &SecretVersionId) -> Option<&mut SecretVersion> {
        self.secret_versions.iter_mut().find(|v| &v.version_id == version_id)
    }

    pub fn current(&self) -> Option<&SecretVersion> {
        self.version(&self.current_secret_version_id)
    }

    pub fn next(&self) -> Option<&SecretVersion> {
        self.next_secret_version_id.as_ref().and_then(|id| self.version(id))
    }

    pub fn rotation_in_progress(&self) -> bool {
        self.next_secret_version_id.is_some()
    }

    /// Version number for the next allocation: max existing + 1.
    pub fn next_version_number(&self) -> u64 {
        self.secret_versions.iter().filter_map(|v| v.version_id.number()).max().unwrap_or(0) + 1
    }
}

/// One entry in an instance's secret version list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretVersion {
    pub version_id: SecretVersionId,
    /// SHA-256 hex of the raw secret; never disclosed to any external surface.
    pub secret_hash: String,
    pub created_at: String,
    /// Set exactly once, on the first authenticated use of a next version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adopted_at: Option<String>,
    /// Monotonic: once set, never cleared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<String>,
    /// Overlap deadline while the version is the rotation's next secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<String>,
}

impl SecretVersion {
    /// Whether this version can match a supplied secret right now.
    pub fn is_usable_at(&self, now_iso: &str) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        match &self.valid_until {
            Some(valid_until) => now_iso <= valid_until.as_str(),
            None => true,
        }
    }
}

/// A one-time enrollment code record. Only the SHA-256 hash of the plaintext
/// code is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentCode {
    pub code_id: EnrollmentCodeId,
    pub code_hash: String,
    pub tenant_id: TenantId,
    pub instance_id: InstanceId,
    pub issued_at: String,
    pub expires_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_by: Option<String>,
}

/// One record in the append-only audit stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub event_type: AuditEventType,
    pub occurred_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_scope: Option<ServiceScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    pub metadata: Map<String, Value>,
}

/// Normalized cross-service projection of an [`AuditEvent`], replayed by
/// downstream consumers in (`occurred_at`, `event_id`) order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossServiceEvent {
    pub event_id: String,
    pub occurred_at: String,
    pub origin_service: String,
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_scope: Option<ServiceScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    pub attributes: Map<String, Value>,
}

/// The single serializable unit of control plane state.
///
/// Created empty at first bootstrap; thereafter mutated only inside
/// [`StateStore::with_snapshot`] transactions and never partially updated.
///
/// [`StateStore::with_snapshot`]: crate::storage::StateStore::with_snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlPlaneSnapshot {
    pub tenants: BTreeMap<TenantId, Tenant>,
    pub instances: BTreeMap<InstanceId, Instance>,
    /// Reverse index: enrolled client id → owning instance id.
    pub client_id_index: BTreeMap<ClientId, InstanceId>,
    pub enrollment_codes: BTreeMap<EnrollmentCodeId, EnrollmentCode>,
    /// Reverse index: code hash → code id, for exchange lookups.
    pub code_hash_index: BTreeMap<String, EnrollmentCodeId>,
    pub audit_events: Vec<AuditEvent>,
    pub cross_service_events: Vec<CrossServiceEvent>,
    pub outage_active: bool,
}

impl ControlPlaneSnapshot {
    pub fn instance_by_client_id(&self, client_id: &ClientId) -> Option<&Instance> {
        let instance_id = self.client_id_index.get(client_id)?;
        self.instances.get(instance_id)
    }

    pub fn instance_by_client_id_mut(&mut self, client_id: &ClientId) -> Option<&mut Instance> {
        let instance_id = self.client_id_index.get(client_id)?.clone();
        self.instances.get_mut(&instance_id)
    }

    pub fn instance_by_source(&self, source: &str) -> Option<&Instance> {
        self.instances.values().find(|i| i.source == source)
    }

    /// Append one audit event together with its normalized projection.
    pub fn push_events(&mut self, event: AuditEvent, cross: CrossServiceEvent) {
        self.audit_events.push(event);
        self.cross_service_events.push(cross);
    }

    /// Verify the reachable-state invariants. Returns one message per
    /// violation; an empty list means the snapshot is coherent.
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for instance in self.instances.values() {
            if !self.tenants.contains_key(&instance.tenant_id) {
                violations.push(format!(
                    "instance {} refers to missing tenant {}",
                    instance.instance_id, instance.tenant_id
                ));
            }
            if instance.allowed_services.is_empty() {
                violations
                    .push(format!("instance {} has no allowed services", instance.instance_id));
            }

            if let Some(credentials) = &instance.client_credentials {
                if credentials.current().is_none() {
                    violations.push(format!(
                        "instance {} current secret version {} does not resolve",
                        instance.instance_id, credentials.current_secret_version_id
                    ));
                }
                if let Some(next_id) = &credentials.next_secret_version_id {
                    if next_id == &credentials.current_secret_version_id {
                        violations.push(format!(
                            "instance {} next secret version equals current",
                            instance.instance_id
                        ));
                    }
                    if credentials.version(next_id).is_none() {
                        violations.push(format!(
                            "instance {} next secret version {} does not resolve",
                            instance.instance_id, next_id
                        ));
                    }
                }
                match self.client_id_index.get(&credentials.client_id) {
                    Some(mapped) if mapped == &instance.instance_id => {}
                    Some(mapped) => violations.push(format!(
                        "client id {} indexed to {} but held by {}",
                        credentials.client_id, mapped, instance.instance_id
                    )),
                    None => violations.push(format!(
                        "client id {} held by {} is missing from the index",
                        credentials.client_id, instance.instance_id
                    )),
                }
            }
        }

        for (client_id, instance_id) in &self.client_id_index {
            let holds = self
                .instances
                .get(instance_id)
                .and_then(|i| i.client_credentials.as_ref())
                .map(|c| &c.client_id == client_id)
                .unwrap_or(false);
            if !holds {
                violations.push(format!(
                    "client id index entry {} → {} has no backing credentials",
                    client_id, instance_id
                ));
            }
        }

        let mut sources: BTreeMap<&str, &InstanceId> = BTreeMap::new();
        for instance in self.instances.values() {
            if let Some(existing) = sources.insert(&instance.source, &instance.instance_id) {
                violations.push(format!(
                    "source {} is mapped by both {} and {}",
                    instance.source, existing, instance.instance_id
                ));
            }
        }

        violations
    }
}
