//! Registry service: tenant, instance, and credential lifecycle.
//!
//! Every mutation runs in a single state-store transaction. Tenant and
//! instance lifecycle operations emit their audit event inside that same
//! transaction. Credential mutations are shared plumbing: their audit events
//! are recorded by the owning flow (enrollment exchange, rotation, token
//! adoption), so the wrappers here persist state only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use crate::audit::{metadata_value, AuditEventDraft, AuditRecorder};
use crate::clock::Clock;
use crate::domain::{
    AuditEventType, ClientId, Instance, InstanceId, LifecycleState, SecretVersionId, ServiceScope,
    Tenant, TenantId,
};
use crate::errors::{AuthPlaneError, Result};
use crate::storage::StateStore;

use super::mutations::{
    self, AdoptionOutcome, PromotionOutcome, RevocationOutcome,
};

/// Request payload for creating a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTenantRequest {
    #[validate(length(min = 1, message = "Tenant id cannot be empty"))]
    pub tenant_id: String,
    #[validate(length(min = 1, message = "Tenant name cannot be empty"))]
    pub name: String,
    pub state: Option<LifecycleState>,
    pub entitlement_state: Option<LifecycleState>,
    pub actor: Option<String>,
}

/// Request payload for creating an instance.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateInstanceRequest {
    #[validate(length(min = 1, message = "Instance id cannot be empty"))]
    pub instance_id: String,
    #[validate(length(min = 1, message = "Tenant id cannot be empty"))]
    pub tenant_id: String,
    #[validate(length(min = 1, message = "Source cannot be empty"))]
    pub source: String,
    pub state: Option<LifecycleState>,
    /// Defaults to the full service set when absent.
    pub allowed_services: Option<Vec<ServiceScope>>,
    pub actor: Option<String>,
}

/// Tenant + instance + credential lifecycle over the state store.
pub struct RegistryService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    audit: Arc<AuditRecorder<S>>,
}

impl<S> Clone for RegistryService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            audit: Arc::clone(&self.audit),
        }
    }
}

impl<S: StateStore> RegistryService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, audit: Arc<AuditRecorder<S>>) -> Self {
        Self { store, clock, audit }
    }

    // ------------------------------------------------------------------
    // Tenants
    // ------------------------------------------------------------------

    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id))]
    pub async fn create_tenant(&self, request: CreateTenantRequest) -> Result<Tenant> {
        request.validate().map_err(AuthPlaneError::from)?;

        let tenant_id = TenantId::from_string(request.tenant_id.clone());
        let tenant = self
            .store
            .with_snapshot(move |snapshot| {
                if snapshot.tenants.contains_key(&tenant_id) {
                    return Err(AuthPlaneError::TenantAlreadyExists(tenant_id.to_string()));
                }

                let now = self.clock.now_iso();
                let tenant = Tenant {
                    tenant_id: tenant_id.clone(),
                    name: request.name,
                    state: request.state.unwrap_or(LifecycleState::Active),
                    entitlement_state: request
                        .entitlement_state
                        .unwrap_or(LifecycleState::Active),
                    created_at: now.clone(),
                    updated_at: now,
                };
                snapshot.tenants.insert(tenant_id.clone(), tenant.clone());

                self.audit.append_within(
                    snapshot,
                    AuditEventDraft::new(AuditEventType::TenantCreated)
                        .actor(request.actor)
                        .tenant(&tenant_id)
                        .meta("name", metadata_value(&tenant.name))
                        .meta("state", metadata_value(&tenant.state))
                        .meta("entitlement_state", metadata_value(&tenant.entitlement_state)),
                );
                Ok(tenant)
            })
            .await?;

        info!(tenant_id = %tenant.tenant_id, "tenant created");
        Ok(tenant)
    }

    #[instrument(skip(self, actor), fields(tenant_id = %tenant_id))]
    pub async fn set_tenant_state(
        &self,
        tenant_id: &TenantId,
        new_state: LifecycleState,
        actor: Option<String>,
    ) -> Result<Tenant> {
        let tenant_id = tenant_id.clone();
        self.store
            .with_snapshot(move |snapshot| {
                let tenant = snapshot
                    .tenants
                    .get_mut(&tenant_id)
                    .ok_or_else(|| AuthPlaneError::TenantNotFound(tenant_id.to_string()))?;

                let old_state = tenant.state;
                tenant.state = new_state;
                tenant.updated_at = self.clock.now_iso();
                let tenant = tenant.clone();

                self.audit.append_within(
                    snapshot,
                    AuditEventDraft::new(AuditEventType::TenantStateChanged)
                        .actor(actor)
                        .tenant(&tenant_id)
                        .meta("old_state", metadata_value(&old_state))
                        .meta("new_state", metadata_value(&new_state)),
                );
                Ok(tenant)
            })
            .await
    }

    #[instrument(skip(self, actor), fields(tenant_id = %tenant_id))]
    pub async fn set_tenant_entitlement(
        &self,
        tenant_id: &TenantId,
        new_entitlement: LifecycleState,
        actor: Option<String>,
    ) -> Result<Tenant> {
        let tenant_id = tenant_id.clone();
        self.store
            .with_snapshot(move |snapshot| {
                let tenant = snapshot
                    .tenants
                    .get_mut(&tenant_id)
                    .ok_or_else(|| AuthPlaneError::TenantNotFound(tenant_id.to_string()))?;

                let old_entitlement = tenant.entitlement_state;
                tenant.entitlement_state = new_entitlement;
                tenant.updated_at = self.clock.now_iso();
                let tenant = tenant.clone();

                self.audit.append_within(
                    snapshot,
                    AuditEventDraft::new(AuditEventType::TenantEntitlementChanged)
                        .actor(actor)
                        .tenant(&tenant_id)
                        .meta("old_entitlement_state", metadata_value(&old_entitlement))
                        .meta("new_entitlement_state", metadata_value(&new_entitlement)),
                );
                Ok(tenant)
            })
            .await
    }

    pub async fn get_tenant(&self, tenant_id: &TenantId) -> Result<Tenant> {
        let snapshot = self.store.read().await?;
        snapshot
            .tenants
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| AuthPlaneError::TenantNotFound(tenant_id.to_string()))
    }

    pub async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let snapshot = self.store.read().await?;
        Ok(snapshot.tenants.into_values().collect())
    }

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------

    #[instrument(skip(self, request), fields(instance_id = %request.instance_id, tenant_id = %request.tenant_id))]
    pub async fn create_instance(&self, request: CreateInstanceRequest) -> Result<Instance> {
        request.validate().map_err(AuthPlaneError::from)?;

        let instance_id = InstanceId::from_string(request.instance_id.clone());
        let tenant_id = TenantId::from_string(request.tenant_id.clone());
        let allowed_services = ServiceScope::normalize(
            request.allowed_services.unwrap_or_else(|| ServiceScope::ALL.to_vec()),
        );
        if allowed_services.is_empty() {
            return Err(AuthPlaneError::validation_field(
                "allowed_services must not be empty",
                "allowed_services",
            ));
        }

        let source = request.source;
        let state = request.state.unwrap_or(LifecycleState::Active);
        let actor = request.actor;

        let instance = self
            .store
            .with_snapshot(move |snapshot| {
                if !snapshot.tenants.contains_key(&tenant_id) {
                    return Err(AuthPlaneError::TenantNotFound(tenant_id.to_string()));
                }
                if snapshot.instances.contains_key(&instance_id) {
                    return Err(AuthPlaneError::InstanceAlreadyExists(instance_id.to_string()));
                }
                if snapshot.instance_by_source(&source).is_some() {
                    return Err(AuthPlaneError::SourceMappingAlreadyExists(source.clone()));
                }

                let now = self.clock.now_iso();
                let instance = Instance {
                    instance_id: instance_id.clone(),
                    tenant_id: tenant_id.clone(),
                    source,
                    state,
                    allowed_services,
                    client_credentials: None,
                    created_at: now.clone(),
                    updated_at: now,
                };
                snapshot.instances.insert(instance_id.clone(), instance.clone());

                self.audit.append_within(
                    snapshot,
                    AuditEventDraft::new(AuditEventType::InstanceCreated)
                        .actor(actor)
                        .tenant(&tenant_id)
                        .instance(&instance_id)
                        .meta("source", metadata_value(&instance.source))
                        .meta("state", metadata_value(&instance.state))
                        .meta("allowed_services", metadata_value(&instance.allowed_services)),
                );
                Ok(instance)
            })
            .await?;

        info!(instance_id = %instance.instance_id, "instance created");
        Ok(instance)
    }

    #[instrument(skip(self, actor), fields(instance_id = %instance_id))]
    pub async fn set_instance_state(
        &self,
        instance_id: &InstanceId,
        new_state: LifecycleState,
        actor: Option<String>,
    ) -> Result<Instance> {
        let instance_id = instance_id.clone();
        self.store
            .with_snapshot(move |snapshot| {
                let instance = snapshot
                    .instances
                    .get_mut(&instance_id)
                    .ok_or_else(|| AuthPlaneError::InstanceNotFound(instance_id.to_string()))?;

                let old_state = instance.state;
                instance.state = new_state;
                instance.updated_at = self.clock.now_iso();
                let instance = instance.clone();

                self.audit.append_within(
                    snapshot,
                    AuditEventDraft::new(AuditEventType::InstanceStateChanged)
                        .actor(actor)
                        .tenant(&instance.tenant_id)
                        .instance(&instance_id)
                        .meta("old_state", metadata_value(&old_state))
                        .meta("new_state", metadata_value(&new_state)),
                );
                Ok(instance)
            })
            .await
    }

    #[instrument(skip(self, actor), fields(instance_id = %instance_id))]
    pub async fn set_instance_allowed_services(
        &self,
        instance_id: &InstanceId,
        allowed_services: Vec<ServiceScope>,
        actor: Option<String>,
    ) -> Result<Instance> {
        let allowed_services = ServiceScope::normalize(allowed_services);
        if allowed_services.is_empty() {
            return Err(AuthPlaneError::validation_field(
                "allowed_services must not be empty",
                "allowed_services",
            ));
        }

        let instance_id = instance_id.clone();
        self.store
            .with_snapshot(move |snapshot| {
                let instance = snapshot
                    .instances
                    .get_mut(&instance_id)
                    .ok_or_else(|| AuthPlaneError::InstanceNotFound(instance_id.to_string()))?;

                instance.allowed_services = allowed_services.clone();
                instance.updated_at = self.clock.now_iso();
                let instance = instance.clone();

                self.audit.append_within(
                    snapshot,
                    AuditEventDraft::new(AuditEventType::InstanceAllowedServicesChanged)
                        .actor(actor)
                        .tenant(&instance.tenant_id)
                        .instance(&instance_id)
                        .meta("allowed_services", metadata_value(&allowed_services)),
                );
                Ok(instance)
            })
            .await
    }

    pub async fn get_instance(&self, instance_id: &InstanceId) -> Result<Instance> {
        let snapshot = self.store.read().await?;
        snapshot
            .instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| AuthPlaneError::InstanceNotFound(instance_id.to_string()))
    }

    pub async fn list_instances(&self, tenant_id: Option<&TenantId>) -> Result<Vec<Instance>> {
        let snapshot = self.store.read().await?;
        Ok(snapshot
            .instances
            .into_values()
            .filter(|i| tenant_id.map(|t| &i.tenant_id == t).unwrap_or(true))
            .collect())
    }

    /// Lookup through the client-id reverse index.
    pub async fn get_instance_by_client_id(&self, client_id: &ClientId) -> Result<Instance> {
        let snapshot = self.store.read().await?;
        snapshot
            .instance_by_client_id(client_id)
            .cloned()
            .ok_or_else(|| AuthPlaneError::not_found("instance", client_id.as_str()))
    }

    pub async fn get_instance_by_source(&self, source: &str) -> Result<Instance> {
        let snapshot = self.store.read().await?;
        snapshot
            .instance_by_source(source)
            .cloned()
            .ok_or_else(|| AuthPlaneError::not_found("instance", source))
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    /// Install the single initial secret version and bind the client id.
    pub async fn set_initial_credentials(
        &self,
        instance_id: &InstanceId,
        client_id: &ClientId,
        version_id: &SecretVersionId,
        secret_hash: &str,
    ) -> Result<Instance> {
        let instance_id = instance_id.clone();
        let client_id = client_id.clone();
        let version_id = version_id.clone();
        let secret_hash = secret_hash.to_string();
        self.store
            .with_snapshot(move |snapshot| {
                mutations::install_initial_credentials(
                    snapshot,
                    &instance_id,
                    &client_id,
                    &version_id,
                    &secret_hash,
                    &self.clock.now_iso(),
                )
            })
            .await
    }

    /// Append a next secret version, opening the overlap window.
    pub async fn add_next_secret_version(
        &self,
        instance_id: &InstanceId,
        version_id: &SecretVersionId,
        secret_hash: &str,
        valid_until: Option<String>,
    ) -> Result<Instance> {
        let instance_id = instance_id.clone();
        let version_id = version_id.clone();
        let secret_hash = secret_hash.to_string();
        self.store
            .with_snapshot(move |snapshot| {
                mutations::add_next_secret_version(
                    snapshot,
                    &instance_id,
                    &version_id,
                    &secret_hash,
                    valid_until,
                    &self.clock.now_iso(),
                )
            })
            .await
    }

    /// Idempotently set `adopted_at` on the pending next version.
    pub async fn mark_secret_adopted(
        &self,
        instance_id: &InstanceId,
        version_id: &SecretVersionId,
    ) -> Result<AdoptionOutcome> {
        let instance_id = instance_id.clone();
        let version_id = version_id.clone();
        self.store
            .with_snapshot(move |snapshot| {
                mutations::mark_secret_adopted(
                    snapshot,
                    &instance_id,
                    &version_id,
                    &self.clock.now_iso(),
                )
            })
            .await
    }

    /// Promote the adopted next version to current.
    pub async fn promote_next_secret(&self, instance_id: &InstanceId) -> Result<PromotionOutcome> {
        let instance_id = instance_id.clone();
        self.store
            .with_snapshot(move |snapshot| {
                mutations::promote_next_secret(snapshot, &instance_id, &self.clock.now_iso())
            })
            .await
    }

    /// Revoke a secret version; a revoked next version closes the rotation.
    pub async fn revoke_secret_version(
        &self,
        instance_id: &InstanceId,
        version_id: &SecretVersionId,
    ) -> Result<RevocationOutcome> {
        let instance_id = instance_id.clone();
        let version_id = version_id.clone();
        self.store
            .with_snapshot(move |snapshot| {
                mutations::revoke_secret_version(
                    snapshot,
                    &instance_id,
                    &version_id,
                    &self.clock.now_iso(),
                )
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::config::AuditSettings;
    use crate::crypto::sha256_hex;
    use crate::storage::InMemoryStateStore;

    fn registry() -> (Arc<InMemoryStateStore>, RegistryService<InMemoryStateStore>) {
        let store = Arc::new(InMemoryStateStore::new());
        let clock: Arc<dyn Clock> =
            Arc::new(TestClock::fixed("2026-08-01T00:00:00.000Z").unwrap());
        let audit = Arc::new(AuditRecorder::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            &AuditSettings::default(),
        ));
        (Arc::clone(&store), RegistryService::new(store, clock, audit))
    }

    fn tenant_request(id: &str) -> CreateTenantRequest {
        CreateTenantRequest {
            tenant_id: id.to_string(),
            name: format!("{id} inc"),
            state: None,
            entitlement_state: None,
            actor: Some("ops".to_string()),
        }
    }

    fn instance_request(id: &str, tenant: &str, source: &str) -> CreateInstanceRequest {
        CreateInstanceRequest {
            instance_id: id.to_string(),
            tenant_id: tenant.to_string(),
            source: source.to_string(),
            state: None,
            allowed_services: None,
            actor: None,
        }
    }

    async fn with_enrolled_instance(
        registry: &RegistryService<InMemoryStateStore>,
    ) -> (InstanceId, ClientId) {
        registry.create_tenant(tenant_request("tenant-acme")).await.unwrap();
        registry
            .create_instance(instance_request("instance-dev-01", "tenant-acme", "sn://acme-dev"))
            .await
            .unwrap();
        let instance_id = InstanceId::from_str_unchecked("instance-dev-01");
        let client_id = ClientId::from_str_unchecked("cli_test");
        registry
            .set_initial_credentials(
                &instance_id,
                &client_id,
                &SecretVersionId::initial(),
                &sha256_hex("sec_raw"),
            )
            .await
            .unwrap();
        (instance_id, client_id)
    }

    #[tokio::test]
    async fn create_tenant_defaults_to_active() {
        let (_store, registry) = registry();
        let tenant = registry.create_tenant(tenant_request("tenant-acme")).await.unwrap();
        assert_eq!(tenant.state, LifecycleState::Active);
        assert_eq!(tenant.entitlement_state, LifecycleState::Active);
        assert_eq!(tenant.created_at, "2026-08-01T00:00:00.000Z");
    }

    #[tokio::test]
    async fn duplicate_tenant_is_rejected() {
        let (_store, registry) = registry();
        registry.create_tenant(tenant_request("tenant-acme")).await.unwrap();
        let err = registry.create_tenant(tenant_request("tenant-acme")).await.unwrap_err();
        assert!(matches!(err, AuthPlaneError::TenantAlreadyExists(_)));
    }

    #[tokio::test]
    async fn tenant_mutations_emit_exactly_one_event_each() {
        let (store, registry) = registry();
        let tenant_id = TenantId::from_str_unchecked("tenant-acme");

        registry.create_tenant(tenant_request("tenant-acme")).await.unwrap();
        registry.set_tenant_state(&tenant_id, LifecycleState::Suspended, None).await.unwrap();
        registry
            .set_tenant_entitlement(&tenant_id, LifecycleState::Disabled, None)
            .await
            .unwrap();

        let snapshot = store.read().await.unwrap();
        let types: Vec<&str> =
            snapshot.audit_events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec!["tenant_created", "tenant_state_changed", "tenant_entitlement_changed"]
        );
    }

    #[tokio::test]
    async fn set_tenant_state_on_missing_tenant_fails() {
        let (_store, registry) = registry();
        let err = registry
            .set_tenant_state(
                &TenantId::from_str_unchecked("tenant-none"),
                LifecycleState::Disabled,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthPlaneError::TenantNotFound(_)));
    }

    #[tokio::test]
    async fn create_instance_defaults_to_full_service_set() {
        let (_store, registry) = registry();
        registry.create_tenant(tenant_request("tenant-acme")).await.unwrap();
        let instance = registry
            .create_instance(instance_request("instance-dev-01", "tenant-acme", "sn://acme-dev"))
            .await
            .unwrap();
        assert_eq!(instance.allowed_services, vec![ServiceScope::Reg, ServiceScope::Rrs]);
    }

    #[tokio::test]
    async fn create_instance_enforces_uniqueness() {
        let (_store, registry) = registry();
        registry.create_tenant(tenant_request("tenant-acme")).await.unwrap();
        registry
            .create_instance(instance_request("instance-dev-01", "tenant-acme", "sn://acme-dev"))
            .await
            .unwrap();

        let err = registry
            .create_instance(instance_request("instance-dev-01", "tenant-acme", "sn://other"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthPlaneError::InstanceAlreadyExists(_)));

        let err = registry
            .create_instance(instance_request("instance-dev-02", "tenant-acme", "sn://acme-dev"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthPlaneError::SourceMappingAlreadyExists(_)));

        let err = registry
            .create_instance(instance_request("instance-dev-03", "tenant-none", "sn://fresh"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthPlaneError::TenantNotFound(_)));
    }

    #[tokio::test]
    async fn allowed_services_are_normalized_and_nonempty() {
        let (_store, registry) = registry();
        registry.create_tenant(tenant_request("tenant-acme")).await.unwrap();
        let mut request = instance_request("instance-dev-01", "tenant-acme", "sn://acme-dev");
        request.allowed_services =
            Some(vec![ServiceScope::Rrs, ServiceScope::Reg, ServiceScope::Rrs]);
        let instance = registry.create_instance(request).await.unwrap();
        assert_eq!(instance.allowed_services, vec![ServiceScope::Reg, ServiceScope::Rrs]);

        let err = registry
            .set_instance_allowed_services(&instance.instance_id, vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthPlaneError::Validation { .. }));
    }

    #[tokio::test]
    async fn initial_credentials_bind_client_id() {
        let (store, registry) = registry();
        let (instance_id, client_id) = with_enrolled_instance(&registry).await;

        let instance = registry.get_instance_by_client_id(&client_id).await.unwrap();
        assert_eq!(instance.instance_id, instance_id);
        let credentials = instance.client_credentials.unwrap();
        assert_eq!(credentials.current_secret_version_id.as_str(), "sv_1");
        assert!(credentials.next_secret_version_id.is_none());

        assert!(store.read().await.unwrap().check_invariants().is_empty());
    }

    #[tokio::test]
    async fn initial_credentials_reject_bound_client_id() {
        let (_store, registry) = registry();
        let (_, client_id) = with_enrolled_instance(&registry).await;
        registry
            .create_instance(instance_request("instance-dev-02", "tenant-acme", "sn://acme-two"))
            .await
            .unwrap();

        let err = registry
            .set_initial_credentials(
                &InstanceId::from_str_unchecked("instance-dev-02"),
                &client_id,
                &SecretVersionId::initial(),
                &sha256_hex("sec_other"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthPlaneError::Conflict { .. }));
    }

    #[tokio::test]
    async fn rotation_primitives_drive_the_version_list() {
        let (store, registry) = registry();
        let (instance_id, _) = with_enrolled_instance(&registry).await;
        let next_id = SecretVersionId::from_number(2);

        let instance = registry
            .add_next_secret_version(
                &instance_id,
                &next_id,
                &sha256_hex("sec_next"),
                Some("2026-08-01T01:00:00.000Z".to_string()),
            )
            .await
            .unwrap();
        let credentials = instance.client_credentials.unwrap();
        assert_eq!(credentials.next_secret_version_id.as_ref(), Some(&next_id));
        assert_eq!(credentials.secret_versions.len(), 2);

        // Starting a second rotation while one is pending fails.
        let err = registry
            .add_next_secret_version(
                &instance_id,
                &SecretVersionId::from_number(3),
                &sha256_hex("sec_third"),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthPlaneError::RotationAlreadyInProgress(_)));

        // Completion requires adoption.
        let err = registry.promote_next_secret(&instance_id).await.unwrap_err();
        assert!(matches!(err, AuthPlaneError::SecretRotationNotAdopted(_)));

        let adoption = registry.mark_secret_adopted(&instance_id, &next_id).await.unwrap();
        assert!(adoption.newly_adopted);
        let repeat = registry.mark_secret_adopted(&instance_id, &next_id).await.unwrap();
        assert!(!repeat.newly_adopted);

        let promotion = registry.promote_next_secret(&instance_id).await.unwrap();
        assert_eq!(promotion.old_secret_version_id.as_str(), "sv_1");
        assert_eq!(promotion.new_secret_version_id.as_str(), "sv_2");

        let credentials = promotion.instance.client_credentials.unwrap();
        assert_eq!(credentials.current_secret_version_id, next_id);
        assert!(credentials.next_secret_version_id.is_none());
        let old = credentials.version(&SecretVersionId::initial()).unwrap();
        assert!(old.revoked_at.is_some());
        let new = credentials.version(&next_id).unwrap();
        assert!(new.valid_until.is_none());

        assert!(store.read().await.unwrap().check_invariants().is_empty());
    }

    #[tokio::test]
    async fn revoking_the_next_version_clears_the_pointer() {
        let (_store, registry) = registry();
        let (instance_id, _) = with_enrolled_instance(&registry).await;
        let next_id = SecretVersionId::from_number(2);

        registry
            .add_next_secret_version(&instance_id, &next_id, &sha256_hex("sec_next"), None)
            .await
            .unwrap();

        let outcome = registry.revoke_secret_version(&instance_id, &next_id).await.unwrap();
        assert!(outcome.was_next_version);
        let credentials = outcome.instance.client_credentials.unwrap();
        assert!(credentials.next_secret_version_id.is_none());
        assert!(credentials.version(&next_id).unwrap().revoked_at.is_some());
    }

    #[tokio::test]
    async fn list_instances_filters_by_tenant() {
        let (_store, registry) = registry();
        registry.create_tenant(tenant_request("tenant-acme")).await.unwrap();
        registry.create_tenant(tenant_request("tenant-beta")).await.unwrap();
        registry
            .create_instance(instance_request("instance-a", "tenant-acme", "sn://a"))
            .await
            .unwrap();
        registry
            .create_instance(instance_request("instance-b", "tenant-beta", "sn://b"))
            .await
            .unwrap();

        let acme = TenantId::from_str_unchecked("tenant-acme");
        let instances = registry.list_instances(Some(&acme)).await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].instance_id.as_str(), "instance-a");

        assert_eq!(registry.list_instances(None).await.unwrap().len(), 2);
    }
}
