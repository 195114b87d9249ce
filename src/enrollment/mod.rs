//! Enrollment: one-time codes exchanged for initial client credentials.
//!
//! `issue` hands the plaintext code to the operator exactly once; only its
//! SHA-256 hash is persisted. `exchange` is a single transaction, so two
//! concurrent exchanges of the same code produce exactly one success — the
//! loser observes `used_at` (or the freshly installed credentials) and is
//! denied as used.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};
use validator::Validate;

use crate::audit::{AuditEventDraft, AuditRecorder};
use crate::clock::{format_rfc3339, Clock};
use crate::crypto::{random_token, sha256_hex};
use crate::domain::{
    AuditEventType, ClientId, EnrollmentCode, EnrollmentCodeId, ExchangeDenyReason, InstanceId,
    SecretVersionId, TenantId,
};
use crate::errors::{AuthPlaneError, Result};
use crate::registry::mutations;
use crate::storage::StateStore;

/// Attempts to allocate a fresh client id before failing loudly.
const CLIENT_ID_ALLOCATION_ATTEMPTS: usize = 10;

/// Request payload for issuing an enrollment code.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IssueEnrollmentRequest {
    #[validate(length(min = 1, message = "Tenant id cannot be empty"))]
    pub tenant_id: String,
    #[validate(length(min = 1, message = "Instance id cannot be empty"))]
    pub instance_id: String,
    #[validate(range(min = 1, message = "TTL must be at least 1 second"))]
    pub ttl_seconds: u64,
    pub requested_by: Option<String>,
}

/// Issued code. `enrollment_code` is the plaintext, returned exactly once.
#[derive(Debug, Clone)]
pub struct IssuedEnrollment {
    pub code_id: EnrollmentCodeId,
    pub enrollment_code: String,
    pub expires_at: String,
}

/// Successful exchange: the instance's initial credential set.
/// `client_secret` is the raw secret, returned exactly once.
#[derive(Debug, Clone)]
pub struct EnrollmentExchange {
    pub tenant_id: TenantId,
    pub instance_id: InstanceId,
    pub client_id: ClientId,
    pub client_secret: String,
    pub secret_version_id: SecretVersionId,
}

/// Domain-level exchange denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeDenial {
    pub reason_code: ExchangeDenyReason,
}

/// Exchange result: success or a reason-coded denial.
#[derive(Debug, Clone)]
pub enum ExchangeOutcome {
    Success(EnrollmentExchange),
    Denied(ExchangeDenial),
}

impl ExchangeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExchangeOutcome::Success(_))
    }

    pub fn reason_code(&self) -> Option<ExchangeDenyReason> {
        match self {
            ExchangeOutcome::Success(_) => None,
            ExchangeOutcome::Denied(denial) => Some(denial.reason_code),
        }
    }
}

/// Enrollment code record without its hash material, for operator support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentCodeStatus {
    pub code_id: EnrollmentCodeId,
    pub tenant_id: TenantId,
    pub instance_id: InstanceId,
    pub issued_at: String,
    pub expires_at: String,
    pub used_at: Option<String>,
    pub issued_by: Option<String>,
}

impl From<&EnrollmentCode> for EnrollmentCodeStatus {
    fn from(record: &EnrollmentCode) -> Self {
        Self {
            code_id: record.code_id.clone(),
            tenant_id: record.tenant_id.clone(),
            instance_id: record.instance_id.clone(),
            issued_at: record.issued_at.clone(),
            expires_at: record.expires_at.clone(),
            used_at: record.used_at.clone(),
            issued_by: record.issued_by.clone(),
        }
    }
}

/// Issues one-time codes and exchanges them for initial credentials.
pub struct EnrollmentService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    audit: Arc<AuditRecorder<S>>,
}

impl<S> Clone for EnrollmentService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            audit: Arc::clone(&self.audit),
        }
    }
}

impl<S: StateStore> EnrollmentService<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, audit: Arc<AuditRecorder<S>>) -> Self {
        Self { store, clock, audit }
    }

    /// Issue a one-time enrollment code for a tenant/instance pair.
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id, instance_id = %request.instance_id))]
    pub async fn issue(&self, request: IssueEnrollmentRequest) -> Result<IssuedEnrollment> {
        request.validate().map_err(AuthPlaneError::from)?;

        let tenant_id = TenantId::from_string(request.tenant_id.clone());
        let instance_id = InstanceId::from_string(request.instance_id.clone());
        let ttl_seconds = request.ttl_seconds;
        let requested_by = request.requested_by;

        let issued = self
            .store
            .with_snapshot(move |snapshot| {
                if !snapshot.tenants.contains_key(&tenant_id) {
                    return Err(AuthPlaneError::TenantNotFound(tenant_id.to_string()));
                }
                let instance = snapshot
                    .instances
                    .get(&instance_id)
                    .ok_or_else(|| AuthPlaneError::InstanceNotFound(instance_id.to_string()))?;
                if instance.tenant_id != tenant_id {
                    return Err(AuthPlaneError::validation(format!(
                        "instance {} is not owned by tenant {}",
                        instance_id, tenant_id
                    )));
                }

                let now = self.clock.now();
                let issued_at = format_rfc3339(now);
                let expires_at =
                    format_rfc3339(now + chrono::Duration::seconds(ttl_seconds as i64));

                let code_id = EnrollmentCodeId::generate();
                let enrollment_code = format!("enroll_{}", random_token(32));
                let code_hash = sha256_hex(&enrollment_code);

                snapshot.enrollment_codes.insert(
                    code_id.clone(),
                    EnrollmentCode {
                        code_id: code_id.clone(),
                        code_hash: code_hash.clone(),
                        tenant_id: tenant_id.clone(),
                        instance_id: instance_id.clone(),
                        issued_at,
                        expires_at: expires_at.clone(),
                        used_at: None,
                        issued_by: requested_by.clone(),
                    },
                );
                snapshot.code_hash_index.insert(code_hash, code_id.clone());

                self.audit.append_within(
                    snapshot,
                    AuditEventDraft::new(AuditEventType::EnrollmentCodeIssued)
                        .actor(requested_by)
                        .tenant(&tenant_id)
                        .instance(&instance_id)
                        .meta("code_id", json!(code_id.as_str()))
                        .meta("ttl_seconds", json!(ttl_seconds))
                        .meta("expires_at", json!(expires_at)),
                );

                Ok(IssuedEnrollment { code_id, enrollment_code, expires_at })
            })
            .await?;

        info!(code_id = %issued.code_id, "enrollment code issued");
        Ok(issued)
    }

    /// Exchange a plaintext enrollment code for initial credentials.
    ///
    /// A single transaction: lookup, one-time checks, client-id allocation,
    /// credential install, and the audit event commit together.
    #[instrument(skip_all)]
    pub async fn exchange(&self, enrollment_code: &str) -> Result<ExchangeOutcome> {
        let supplied_hash = sha256_hex(enrollment_code);

        self.store
            .with_snapshot(move |snapshot| {
                let record = snapshot
                    .code_hash_index
                    .get(&supplied_hash)
                    .and_then(|code_id| snapshot.enrollment_codes.get(code_id))
                    .cloned();

                let record = match record {
                    Some(record) => record,
                    None => {
                        return Ok(self.deny(
                            snapshot,
                            None,
                            ExchangeDenyReason::InvalidEnrollmentCode,
                        ))
                    }
                };

                if record.used_at.is_some() {
                    return Ok(self.deny(
                        snapshot,
                        Some(&record),
                        ExchangeDenyReason::EnrollmentCodeUsed,
                    ));
                }

                let has_credentials = snapshot
                    .instances
                    .get(&record.instance_id)
                    .map(|instance| instance.client_credentials.is_some());
                let has_credentials = match has_credentials {
                    Some(has_credentials) => has_credentials,
                    None => {
                        return Ok(self.deny(
                            snapshot,
                            Some(&record),
                            ExchangeDenyReason::InvalidEnrollmentCode,
                        ))
                    }
                };
                // Race-safe "used": a concurrent exchange already installed
                // credentials even if this record's used_at was not visible.
                if has_credentials {
                    return Ok(self.deny(
                        snapshot,
                        Some(&record),
                        ExchangeDenyReason::EnrollmentCodeUsed,
                    ));
                }

                let now_iso = self.clock.now_iso();
                if now_iso > record.expires_at {
                    return Ok(self.deny(
                        snapshot,
                        Some(&record),
                        ExchangeDenyReason::EnrollmentCodeExpired,
                    ));
                }

                let client_id = Self::allocate_client_id(snapshot)?;
                let client_secret = format!("sec_{}", random_token(40));
                let secret_version_id = SecretVersionId::initial();

                mutations::install_initial_credentials(
                    snapshot,
                    &record.instance_id,
                    &client_id,
                    &secret_version_id,
                    &sha256_hex(&client_secret),
                    &now_iso,
                )?;

                let stored = snapshot
                    .enrollment_codes
                    .get_mut(&record.code_id)
                    .ok_or_else(|| AuthPlaneError::internal("enrollment code record vanished"))?;
                stored.used_at = Some(now_iso);

                self.audit.append_within(
                    snapshot,
                    AuditEventDraft::new(AuditEventType::EnrollmentCodeExchanged)
                        .tenant(&record.tenant_id)
                        .instance(&record.instance_id)
                        .client(&client_id)
                        .meta("code_id", json!(record.code_id.as_str()))
                        .meta("secret_version_id", json!(secret_version_id.as_str())),
                );

                Ok(ExchangeOutcome::Success(EnrollmentExchange {
                    tenant_id: record.tenant_id,
                    instance_id: record.instance_id,
                    client_id,
                    client_secret,
                    secret_version_id,
                }))
            })
            .await
    }

    /// Look up a code record without exposing hash material.
    pub async fn peek(&self, code_id: &EnrollmentCodeId) -> Result<EnrollmentCodeStatus> {
        let snapshot = self.store.read().await?;
        snapshot
            .enrollment_codes
            .get(code_id)
            .map(EnrollmentCodeStatus::from)
            .ok_or_else(|| AuthPlaneError::not_found("enrollment_code", code_id.as_str()))
    }

    fn deny(
        &self,
        snapshot: &mut crate::domain::ControlPlaneSnapshot,
        record: Option<&EnrollmentCode>,
        reason: ExchangeDenyReason,
    ) -> ExchangeOutcome {
        let mut draft = AuditEventDraft::new(AuditEventType::TokenMintDenied)
            .reason(reason.as_str())
            .meta("phase", json!("enrollment_exchange"));
        if let Some(record) = record {
            draft = draft.tenant(&record.tenant_id).instance(&record.instance_id);
        }
        self.audit.append_within(snapshot, draft);
        ExchangeOutcome::Denied(ExchangeDenial { reason_code: reason })
    }

    fn allocate_client_id(snapshot: &crate::domain::ControlPlaneSnapshot) -> Result<ClientId> {
        for _ in 0..CLIENT_ID_ALLOCATION_ATTEMPTS {
            let candidate = ClientId::generate();
            if !snapshot.client_id_index.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(AuthPlaneError::internal(format!(
            "failed to allocate a unique client id after {} attempts",
            CLIENT_ID_ALLOCATION_ATTEMPTS
        )))
    }
}
