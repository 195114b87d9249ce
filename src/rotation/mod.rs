//! Dual-secret rotation lifecycle.
//!
//! Per-instance state machine: `STABLE → ROTATING →
//! ADOPTED_PENDING_PROMOTION → STABLE`. `start` opens the overlap window by
//! installing a next secret version with a `valid_until` deadline; adoption
//! is recorded on the first authenticated use of that version; `complete`
//! promotes it and revokes the old current. All preconditions are checked
//! inside the transaction, so concurrent starts race deterministically and
//! the loser fails with `RotationAlreadyInProgress`.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument};

use crate::audit::{AuditEventDraft, AuditRecorder};
use crate::clock::{format_rfc3339, Clock};
use crate::crypto::{random_token, sha256_hex};
use crate::domain::{
    AuditEventType, ControlPlaneSnapshot, InstanceId, SecretVersionId,
};
use crate::errors::{AuthPlaneError, Result};
use crate::registry::mutations;
use crate::registry::AdoptionOutcome;
use crate::storage::StateStore;

/// Result of starting a rotation. `next_client_secret` is the raw secret,
/// returned exactly once.
#[derive(Debug, Clone)]
pub struct RotationStart {
    pub instance_id: InstanceId,
    pub next_secret_version_id: SecretVersionId,
    pub next_client_secret: String,
    pub overlap_expires_at: String,
}

/// Result of completing a rotation.
#[derive(Debug, Clone)]
pub struct RotationCompletion {
    pub instance_id: InstanceId,
    pub old_secret_version_id: SecretVersionId,
    pub new_secret_version_id: SecretVersionId,
}

/// Record adoption inside an already-open transaction, emitting the
/// `secret_rotation_adopted` event on the first adoption only. Shared with
/// the token service, which detects adoption during mint.
pub(crate) fn record_adoption_in<S: StateStore>(
    audit: &AuditRecorder<S>,
    snapshot: &mut ControlPlaneSnapshot,
    instance_id: &InstanceId,
    version_id: &SecretVersionId,
    now_iso: &str,
) -> Result<AdoptionOutcome> {
    let outcome = mutations::mark_secret_adopted(snapshot, instance_id, version_id, now_iso)?;
    if outcome.newly_adopted {
        audit.append_within(
            snapshot,
            AuditEventDraft::new(AuditEventType::SecretRotationAdopted)
                .tenant(&outcome.instance.tenant_id)
                .instance(instance_id)
                .meta("secret_version_id", json!(version_id.as_str())),
        );
    }
    Ok(outcome)
}

/// Orchestrates the dual-secret overlap protocol.
pub struct RotationService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    audit: Arc<AuditRecorder<S>>,
}

impl<S> Clone for RotationService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            audit: Arc::clone(&self.audit),
        }
    }
}

impl<S: StateStore> RotationService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, audit: Arc<AuditRecorder<S>>) -> Self {
        Self { store, clock, audit }
    }

    /// Open the overlap window with a freshly generated next secret.
    #[instrument(skip(self, requested_by), fields(instance_id = %instance_id))]
    pub async fn start(
        &self,
        instance_id: &InstanceId,
        overlap_seconds: u64,
        requested_by: Option<String>,
    ) -> Result<RotationStart> {
        let instance_id = instance_id.clone();

        let started = self
            .store
            .with_snapshot(move |snapshot| {
                let instance = snapshot
                    .instances
                    .get(&instance_id)
                    .ok_or_else(|| AuthPlaneError::InstanceNotFound(instance_id.to_string()))?;
                let credentials = instance.client_credentials.as_ref().ok_or_else(|| {
                    AuthPlaneError::not_found("client_credentials", instance_id.as_str())
                })?;

                let next_secret_version_id =
                    SecretVersionId::from_number(credentials.next_version_number());
                let tenant_id = instance.tenant_id.clone();

                let now = self.clock.now();
                let now_iso = format_rfc3339(now);
                let overlap_expires_at =
                    format_rfc3339(now + chrono::Duration::seconds(overlap_seconds as i64));

                let next_client_secret = format!("sec_{}", random_token(40));

                mutations::add_next_secret_version(
                    snapshot,
                    &instance_id,
                    &next_secret_version_id,
                    &sha256_hex(&next_client_secret),
                    Some(overlap_expires_at.clone()),
                    &now_iso,
                )?;

                self.audit.append_within(
                    snapshot,
                    AuditEventDraft::new(AuditEventType::SecretRotationStarted)
                        .actor(requested_by)
                        .tenant(&tenant_id)
                        .instance(&instance_id)
                        .meta("next_secret_version_id", json!(next_secret_version_id.as_str()))
                        .meta("overlap_seconds", json!(overlap_seconds))
                        .meta("overlap_expires_at", json!(overlap_expires_at)),
                );

                Ok(RotationStart {
                    instance_id: instance_id.clone(),
                    next_secret_version_id,
                    next_client_secret,
                    overlap_expires_at,
                })
            })
            .await?;

        info!(
            instance_id = %started.instance_id,
            next_secret_version_id = %started.next_secret_version_id,
            "secret rotation started"
        );
        Ok(started)
    }

    /// Idempotently record that the next secret has been used.
    #[instrument(skip(self), fields(instance_id = %instance_id, version_id = %version_id))]
    pub async fn record_adoption(
        &self,
        instance_id: &InstanceId,
        version_id: &SecretVersionId,
    ) -> Result<AdoptionOutcome> {
        let instance_id = instance_id.clone();
        let version_id = version_id.clone();
        self.store
            .with_snapshot(move |snapshot| {
                record_adoption_in(
                    &self.audit,
                    snapshot,
                    &instance_id,
                    &version_id,
                    &self.clock.now_iso(),
                )
            })
            .await
    }

    /// Promote the adopted next secret and revoke the old current.
    #[instrument(skip(self, requested_by), fields(instance_id = %instance_id))]
    pub async fn complete(
        &self,
        instance_id: &InstanceId,
        requested_by: Option<String>,
    ) -> Result<RotationCompletion> {
        let instance_id = instance_id.clone();

        let completion = self
            .store
            .with_snapshot(move |snapshot| {
                let promotion =
                    mutations::promote_next_secret(snapshot, &instance_id, &self.clock.now_iso())?;

                self.audit.append_within(
                    snapshot,
                    AuditEventDraft::new(AuditEventType::SecretRotationCompleted)
                        .actor(requested_by)
                        .tenant(&promotion.instance.tenant_id)
                        .instance(&instance_id)
                        .meta(
                            "old_secret_version_id",
                            json!(promotion.old_secret_version_id.as_str()),
                        )
                        .meta(
                            "new_secret_version_id",
                            json!(promotion.new_secret_version_id.as_str()),
                        ),
                );

                Ok(RotationCompletion {
                    instance_id: instance_id.clone(),
                    old_secret_version_id: promotion.old_secret_version_id,
                    new_secret_version_id: promotion.new_secret_version_id,
                })
            })
            .await?;

        info!(
            instance_id = %completion.instance_id,
            new_secret_version_id = %completion.new_secret_version_id,
            "secret rotation completed"
        );
        Ok(completion)
    }

    /// Revoke a secret version. Revoking the pending next version closes the
    /// rotation.
    #[instrument(skip(self, reason, requested_by), fields(instance_id = %instance_id, version_id = %version_id))]
    pub async fn revoke(
        &self,
        instance_id: &InstanceId,
        version_id: &SecretVersionId,
        reason: Option<String>,
        requested_by: Option<String>,
    ) -> Result<()> {
        let instance_id = instance_id.clone();
        let version_id = version_id.clone();
        let log_instance_id = instance_id.clone();
        let log_version_id = version_id.clone();

        self.store
            .with_snapshot(move |snapshot| {
                let outcome = mutations::revoke_secret_version(
                    snapshot,
                    &instance_id,
                    &version_id,
                    &self.clock.now_iso(),
                )?;

                self.audit.append_within(
                    snapshot,
                    AuditEventDraft::new(AuditEventType::SecretRevoked)
                        .actor(requested_by)
                        .tenant(&outcome.instance.tenant_id)
                        .instance(&instance_id)
                        .meta("secret_version_id", json!(version_id.as_str()))
                        .meta("reason", json!(reason))
                        .meta("was_next_version", json!(outcome.was_next_version)),
                );

                Ok(())
            })
            .await?;

        info!(instance_id = %log_instance_id, version_id = %log_version_id, "secret version revoked");
        Ok(())
    }
}
