//! Token service: mint decision matrix, validation, outage mode, and
//! in-flight entitlement evaluation.
//!
//! Mint runs entirely inside one state-store transaction so the decision,
//! the adoption side effect, and the audit event commit together; a mint
//! never observes a torn rotation state. Validation is CPU-bound over the
//! token itself and only touches the store to append its audit event.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument};

use crate::audit::{AuditEventDraft, AuditRecorder};
use crate::clock::{format_rfc3339, parse_rfc3339, Clock};
use crate::config::TokenSettings;
use crate::crypto::{
    random_token, sha256_hex, sign_compact, verify_compact, CompactTokenError,
};
use crate::domain::{
    AuditEventType, ClientCredentials, ClientId, ControlPlaneSnapshot, InFlightAction,
    InFlightEvaluation, InFlightHoldReason, Instance, InstanceId, MintDenyReason, RefreshAction,
    RefreshEvaluation, RefreshHoldReason, SecretVersionId, ServiceScope, Tenant, TenantId,
    TokenFlow, ValidateDenyReason,
};
use crate::errors::{AuthPlaneError, Result};
use crate::rotation;
use crate::storage::StateStore;

use super::claims::TokenClaims;

/// Mint (or refresh) request as received from the HTTP layer.
#[derive(Debug, Clone)]
pub struct MintRequest {
    /// OAuth-style grant type; only `client_credentials` is accepted.
    pub grant_type: Option<String>,
    /// Absent means a plain mint.
    pub flow: Option<TokenFlow>,
    pub client_id: String,
    pub client_secret: String,
    pub service_scope: String,
}

/// Successful mint response.
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub access_token: String,
    pub expires_in: u64,
    pub scope: ServiceScope,
    pub issued_at: String,
    pub expires_at: String,
    pub tenant_id: TenantId,
    pub instance_id: InstanceId,
    pub source: String,
}

/// Domain-level mint denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintDenial {
    pub reason_code: MintDenyReason,
}

/// Mint result: a signed token or a reason-coded denial.
#[derive(Debug, Clone)]
pub enum MintOutcome {
    Success(MintedToken),
    Denied(MintDenial),
}

impl MintOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MintOutcome::Success(_))
    }

    pub fn reason_code(&self) -> Option<MintDenyReason> {
        match self {
            MintOutcome::Success(_) => None,
            MintOutcome::Denied(denial) => Some(denial.reason_code),
        }
    }
}

/// Validation request.
#[derive(Debug, Clone)]
pub struct ValidateRequest {
    pub access_token: String,
    pub expected_service_scope: Option<ServiceScope>,
}

/// Successfully validated token.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    pub claims: TokenClaims,
}

/// Domain-level validation denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateDenial {
    pub reason_code: ValidateDenyReason,
}

/// Validation result.
#[derive(Debug, Clone)]
pub enum ValidateOutcome {
    Valid(ValidatedToken),
    Denied(ValidateDenial),
}

impl ValidateOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidateOutcome::Valid(_))
    }

    pub fn reason_code(&self) -> Option<ValidateDenyReason> {
        match self {
            ValidateOutcome::Valid(_) => None,
            ValidateOutcome::Denied(denial) => Some(denial.reason_code),
        }
    }
}

struct SecretMatch {
    version_id: SecretVersionId,
    is_next_version: bool,
}

/// Mints and validates compact tokens, and evaluates outage/entitlement
/// policy for in-flight work.
pub struct TokenService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    audit: Arc<AuditRecorder<S>>,
    settings: TokenSettings,
}

impl<S> Clone for TokenService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            audit: Arc::clone(&self.audit),
            settings: self.settings.clone(),
        }
    }
}

impl<S: StateStore> TokenService<S> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        audit: Arc<AuditRecorder<S>>,
        settings: TokenSettings,
    ) -> Self {
        Self { store, clock, audit, settings }
    }

    // ------------------------------------------------------------------
    // Mint
    // ------------------------------------------------------------------

    /// Evaluate the mint decision matrix and, on success, return a signed
    /// compact token. The first failing rule wins; its reason code is both
    /// returned and audited as `token_mint_denied`.
    #[instrument(skip(self, request), fields(client_id = %request.client_id, service_scope = %request.service_scope))]
    pub async fn mint(&self, request: MintRequest) -> Result<MintOutcome> {
        let outcome =
            self.store.with_snapshot(move |snapshot| self.mint_in(snapshot, request)).await?;

        match &outcome {
            MintOutcome::Success(minted) => {
                info!(instance_id = %minted.instance_id, scope = %minted.scope, "token minted");
            }
            MintOutcome::Denied(denial) => {
                info!(reason_code = %denial.reason_code, "token mint denied");
            }
        }
        Ok(outcome)
    }

    fn mint_in(
        &self,
        snapshot: &mut ControlPlaneSnapshot,
        request: MintRequest,
    ) -> Result<MintOutcome> {
        let flow = request.flow.unwrap_or(TokenFlow::Mint);
        let client_id = ClientId::from_string(request.client_id.clone());

        // 1. Grant type, when supplied, must be client_credentials.
        if let Some(grant_type) = &request.grant_type {
            if grant_type != "client_credentials" {
                return Ok(self.deny_mint(
                    snapshot,
                    &client_id,
                    None,
                    None,
                    MintDenyReason::InvalidGrant,
                ));
            }
        }

        // 2. The requested scope must name a known service.
        let scope = match request.service_scope.parse::<ServiceScope>() {
            Ok(scope) => scope,
            Err(_) => {
                return Ok(self.deny_mint(
                    snapshot,
                    &client_id,
                    None,
                    None,
                    MintDenyReason::ServiceNotAllowed,
                ))
            }
        };

        // 3. Outage mode fails the mint path closed.
        if snapshot.outage_active {
            return Ok(self.deny_mint(
                snapshot,
                &client_id,
                Some(scope),
                None,
                MintDenyReason::AuthControlPlaneOutage,
            ));
        }

        // 4. Resolve client → instance → credentials → tenant.
        let instance = snapshot.instance_by_client_id(&client_id).cloned();
        let instance = match instance {
            Some(instance) => instance,
            None => {
                return Ok(self.deny_mint(
                    snapshot,
                    &client_id,
                    Some(scope),
                    None,
                    MintDenyReason::InvalidClient,
                ))
            }
        };
        let credentials = match instance.client_credentials.clone() {
            Some(credentials) => credentials,
            None => {
                return Ok(self.deny_mint(
                    snapshot,
                    &client_id,
                    Some(scope),
                    None,
                    MintDenyReason::InvalidClient,
                ))
            }
        };
        let tenant = snapshot.tenants.get(&instance.tenant_id).cloned();
        let tenant = match tenant {
            Some(tenant) => tenant,
            None => {
                return Ok(self.deny_mint(
                    snapshot,
                    &client_id,
                    Some(scope),
                    None,
                    MintDenyReason::InvalidClient,
                ))
            }
        };

        // 5-7. Eligibility, in strict order.
        if let Some(reason) = Self::eligibility_denial(&tenant, &instance, scope) {
            return Ok(self.deny_mint(snapshot, &client_id, Some(scope), Some(&instance), reason));
        }

        // 8. Secret matching across every candidate version.
        let now_iso = self.clock.now_iso();
        let supplied_hash = sha256_hex(&request.client_secret);
        let matched = match Self::match_secret(&credentials, &supplied_hash, &now_iso) {
            Some(matched) => matched,
            None => {
                return Ok(self.deny_mint(
                    snapshot,
                    &client_id,
                    Some(scope),
                    Some(&instance),
                    MintDenyReason::InvalidSecret,
                ))
            }
        };

        // Success: build, sign, adopt, audit.
        let iat = self.clock.now_millis().div_euclid(1000);
        let exp = iat + self.settings.token_ttl_seconds as i64;
        let claims = TokenClaims {
            iss: self.settings.issuer.clone(),
            sub: client_id.to_string(),
            aud: scope.audience(),
            jti: format!("tok_{}", random_token(22)),
            iat,
            exp,
            service_scope: scope,
            tenant_id: Some(instance.tenant_id.to_string()),
            instance_id: Some(instance.instance_id.to_string()),
            source: Some(instance.source.clone()),
        };

        let header = json!({"alg": "HS256", "typ": "JWT"});
        let payload = serde_json::to_value(&claims)
            .map_err(|err| AuthPlaneError::serialization(err, "Failed to encode token claims"))?;
        let access_token = sign_compact(&header, &payload, self.settings.signing_key.as_bytes())?;

        if matched.is_next_version {
            rotation::record_adoption_in(
                &self.audit,
                snapshot,
                &instance.instance_id,
                &matched.version_id,
                &now_iso,
            )?;
        }

        let issued_at = format_rfc3339(
            chrono::DateTime::from_timestamp(iat, 0)
                .ok_or_else(|| AuthPlaneError::internal("iat out of range"))?,
        );
        let expires_at = format_rfc3339(
            chrono::DateTime::from_timestamp(exp, 0)
                .ok_or_else(|| AuthPlaneError::internal("exp out of range"))?,
        );

        let event_type = match flow {
            TokenFlow::Mint => AuditEventType::TokenMinted,
            TokenFlow::Refresh => AuditEventType::TokenRefreshed,
        };
        self.audit.append_within(
            snapshot,
            AuditEventDraft::new(event_type)
                .tenant(&instance.tenant_id)
                .instance(&instance.instance_id)
                .client(&client_id)
                .scope(scope)
                .meta("jti", json!(claims.jti))
                .meta("secret_version_id", json!(matched.version_id.as_str()))
                .meta("expires_at", json!(expires_at)),
        );

        Ok(MintOutcome::Success(MintedToken {
            access_token,
            expires_in: self.settings.token_ttl_seconds,
            scope,
            issued_at,
            expires_at,
            tenant_id: instance.tenant_id,
            instance_id: instance.instance_id,
            source: instance.source,
        }))
    }

    fn eligibility_denial(
        tenant: &Tenant,
        instance: &Instance,
        scope: ServiceScope,
    ) -> Option<MintDenyReason> {
        use crate::domain::LifecycleState::{Disabled, Suspended};

        match tenant.state {
            Suspended => return Some(MintDenyReason::TenantSuspended),
            Disabled => return Some(MintDenyReason::TenantDisabled),
            _ => {}
        }
        if matches!(tenant.entitlement_state, Suspended | Disabled) {
            return Some(MintDenyReason::TenantNotEntitled);
        }
        match instance.state {
            Suspended => return Some(MintDenyReason::InstanceSuspended),
            Disabled => return Some(MintDenyReason::InstanceDisabled),
            _ => {}
        }
        if !instance.allows_service(scope) {
            return Some(MintDenyReason::ServiceNotAllowed);
        }
        None
    }

    /// Compare the supplied secret against every candidate version.
    ///
    /// Revoked and overlap-expired versions are skipped; the digest compare
    /// is constant-time. During the overlap window both the current and the
    /// next version can match, which is what makes adoption observable.
    fn match_secret(
        credentials: &ClientCredentials,
        supplied_hash: &str,
        now_iso: &str,
    ) -> Option<SecretMatch> {
        for version in &credentials.secret_versions {
            if !version.is_usable_at(now_iso) {
                continue;
            }
            if crate::crypto::constant_time_hex_eq(&version.secret_hash, supplied_hash) {
                return Some(SecretMatch {
                    version_id: version.version_id.clone(),
                    is_next_version: credentials.next_secret_version_id.as_ref()
                        == Some(&version.version_id),
                });
            }
        }
        None
    }

    fn deny_mint(
        &self,
        snapshot: &mut ControlPlaneSnapshot,
        client_id: &ClientId,
        scope: Option<ServiceScope>,
        instance: Option<&Instance>,
        reason: MintDenyReason,
    ) -> MintOutcome {
        let mut draft = AuditEventDraft::new(AuditEventType::TokenMintDenied)
            .client(client_id)
            .reason(reason.as_str())
            .meta("phase", json!("mint"));
        if let Some(scope) = scope {
            draft = draft.scope(scope);
        }
        if let Some(instance) = instance {
            draft = draft.tenant(&instance.tenant_id).instance(&instance.instance_id);
        }
        self.audit.append_within(snapshot, draft);
        MintOutcome::Denied(MintDenial { reason_code: reason })
    }

    // ------------------------------------------------------------------
    // Validate
    // ------------------------------------------------------------------

    /// Verify a compact token: structure, signature, claims, issuer, expiry
    /// with clock skew, and (optionally) the expected service scope.
    #[instrument(skip_all)]
    pub async fn validate(&self, request: ValidateRequest) -> Result<ValidateOutcome> {
        let outcome = self.evaluate_token(&request);

        self.store
            .with_snapshot(|snapshot| {
                let draft = match &outcome {
                    ValidateOutcome::Valid(valid) => {
                        AuditEventDraft::new(AuditEventType::TokenValidated)
                            .client(&ClientId::from_str_unchecked(&valid.claims.sub))
                            .scope(valid.claims.service_scope)
                            .meta("jti", json!(valid.claims.jti))
                    }
                    ValidateOutcome::Denied(denial) => {
                        AuditEventDraft::new(AuditEventType::TokenValidateDenied)
                            .reason(denial.reason_code.as_str())
                    }
                };
                self.audit.append_within(snapshot, draft);
                Ok(())
            })
            .await?;

        Ok(outcome)
    }

    fn evaluate_token(&self, request: &ValidateRequest) -> ValidateOutcome {
        let denied = |reason_code| ValidateOutcome::Denied(ValidateDenial { reason_code });

        let payload = match verify_compact(
            &request.access_token,
            self.settings.signing_key.as_bytes(),
        ) {
            Ok(payload) => payload,
            Err(CompactTokenError::Malformed) => {
                return denied(ValidateDenyReason::TokenMalformed)
            }
            Err(CompactTokenError::InvalidSignature) => {
                return denied(ValidateDenyReason::TokenInvalidSignature)
            }
        };

        let claims = match TokenClaims::from_payload(&payload) {
            Some(claims) => claims,
            None => return denied(ValidateDenyReason::TokenMalformed),
        };

        if claims.iss != self.settings.issuer {
            return denied(ValidateDenyReason::TokenMalformed);
        }

        let now_seconds = self.clock.now_seconds();
        if now_seconds > claims.exp + self.settings.token_clock_skew_seconds as i64 {
            return denied(ValidateDenyReason::TokenExpired);
        }

        if let Some(expected) = request.expected_service_scope {
            if expected != claims.service_scope {
                return denied(ValidateDenyReason::TokenWrongServiceScope);
            }
        }

        ValidateOutcome::Valid(ValidatedToken { claims })
    }

    // ------------------------------------------------------------------
    // Outage mode and in-flight policy
    // ------------------------------------------------------------------

    /// Flip the fail-closed outage switch.
    #[instrument(skip(self, actor))]
    pub async fn set_outage_mode(&self, active: bool, actor: Option<String>) -> Result<()> {
        self.store
            .with_snapshot(move |snapshot| {
                snapshot.outage_active = active;
                self.audit.append_within(
                    snapshot,
                    AuditEventDraft::new(AuditEventType::ControlPlaneOutageModeChanged)
                        .actor(actor)
                        .meta("outage_active", json!(active)),
                );
                Ok(())
            })
            .await?;

        info!(outage_active = active, "control plane outage mode changed");
        Ok(())
    }

    pub async fn is_outage_mode_active(&self) -> Result<bool> {
        Ok(self.store.read().await?.outage_active)
    }

    /// Decide what an in-flight refresh attempt should do while the mint
    /// path is failing closed.
    pub async fn evaluate_refresh_during_outage(
        &self,
        token_expires_at: &str,
    ) -> Result<RefreshEvaluation> {
        if !self.is_outage_mode_active().await? {
            return Ok(RefreshEvaluation { action: RefreshAction::RefreshAllowed, reason: None });
        }

        let expires_at_ms = parse_rfc3339(token_expires_at)?.timestamp_millis();
        let grace_ms = self.settings.outage_grace_window_seconds as i64 * 1000;

        if self.clock.now_millis() <= expires_at_ms + grace_ms {
            Ok(RefreshEvaluation {
                action: RefreshAction::RetryWithinGrace,
                reason: Some(RefreshHoldReason::BlockedAuthControlPlaneOutage),
            })
        } else {
            Ok(RefreshEvaluation {
                action: RefreshAction::PauseInFlight,
                reason: Some(RefreshHoldReason::PausedTokenRefreshGraceExhausted),
            })
        }
    }

    /// Decide whether an in-flight workload may keep running given current
    /// instance and tenant entitlement state.
    pub async fn evaluate_in_flight_entitlement(
        &self,
        instance_id: &InstanceId,
        at_chunk_boundary: bool,
    ) -> Result<InFlightEvaluation> {
        let snapshot = self.store.read().await?;

        let hold = match snapshot.instances.get(instance_id) {
            None => Some(InFlightHoldReason::PausedInstanceDisabled),
            Some(instance) if !instance.state.is_active() => {
                Some(InFlightHoldReason::PausedInstanceDisabled)
            }
            Some(instance) => match snapshot.tenants.get(&instance.tenant_id) {
                Some(tenant)
                    if tenant.state.is_active() && tenant.entitlement_state.is_active() =>
                {
                    None
                }
                _ => Some(InFlightHoldReason::PausedEntitlementDisabled),
            },
        };

        Ok(match hold {
            None => InFlightEvaluation { action: InFlightAction::Continue, reason: None },
            Some(reason) => InFlightEvaluation {
                action: if at_chunk_boundary {
                    InFlightAction::Pause
                } else {
                    InFlightAction::ContinueUntilChunkBoundary
                },
                reason: Some(reason),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::config::AuditSettings;
    use crate::enrollment::{EnrollmentService, ExchangeOutcome, IssueEnrollmentRequest};
    use crate::registry::{CreateInstanceRequest, CreateTenantRequest, RegistryService};
    use crate::rotation::RotationService;
    use crate::storage::InMemoryStateStore;

    struct Harness {
        store: Arc<InMemoryStateStore>,
        clock: Arc<TestClock>,
        registry: RegistryService<InMemoryStateStore>,
        rotation: RotationService<InMemoryStateStore>,
        token: TokenService<InMemoryStateStore>,
        client_id: String,
        client_secret: String,
        instance_id: InstanceId,
        tenant_id: TenantId,
    }

    fn settings() -> TokenSettings {
        TokenSettings {
            issuer: "rezilient-auth".into(),
            signing_key: "test-signing-key-0123456789abcdef-0123".into(),
            token_ttl_seconds: 300,
            token_clock_skew_seconds: 30,
            outage_grace_window_seconds: 420,
        }
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryStateStore::new());
        let clock = Arc::new(TestClock::fixed("2026-08-01T00:00:00.000Z").unwrap());
        let audit = Arc::new(AuditRecorder::new(
            Arc::clone(&store),
            Arc::clone(&clock) as Arc<dyn Clock>,
            &AuditSettings::default(),
        ));
        let registry = RegistryService::new(
            Arc::clone(&store),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::clone(&audit),
        );
        let enrollment = EnrollmentService::new(
            Arc::clone(&store),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::clone(&audit),
        );
        let rotation = RotationService::new(
            Arc::clone(&store),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::clone(&audit),
        );
        let token = TokenService::new(
            Arc::clone(&store),
            Arc::clone(&clock) as Arc<dyn Clock>,
            audit,
            settings(),
        );

        registry
            .create_tenant(CreateTenantRequest {
                tenant_id: "tenant-acme".into(),
                name: "Acme".into(),
                state: None,
                entitlement_state: None,
                actor: None,
            })
            .await
            .unwrap();
        registry
            .create_instance(CreateInstanceRequest {
                instance_id: "instance-dev-01".into(),
                tenant_id: "tenant-acme".into(),
                source: "sn://acme-dev.service-now.com".into(),
                state: None,
                allowed_services: None,
                actor: None,
            })
            .await
            .unwrap();

        let issued = enrollment
            .issue(IssueEnrollmentRequest {
                tenant_id: "tenant-acme".into(),
                instance_id: "instance-dev-01".into(),
                ttl_seconds: 900,
                requested_by: None,
            })
            .await
            .unwrap();
        let exchange = match enrollment.exchange(&issued.enrollment_code).await.unwrap() {
            ExchangeOutcome::Success(exchange) => exchange,
            ExchangeOutcome::Denied(denial) => panic!("enrollment denied: {:?}", denial),
        };

        Harness {
            store,
            clock,
            registry,
            rotation,
            token,
            client_id: exchange.client_id.to_string(),
            client_secret: exchange.client_secret,
            instance_id: InstanceId::from_str_unchecked("instance-dev-01"),
            tenant_id: TenantId::from_str_unchecked("tenant-acme"),
        }
    }

    fn mint_request(h: &Harness, scope: &str) -> MintRequest {
        MintRequest {
            grant_type: Some("client_credentials".into()),
            flow: None,
            client_id: h.client_id.clone(),
            client_secret: h.client_secret.clone(),
            service_scope: scope.into(),
        }
    }

    fn minted(outcome: MintOutcome) -> MintedToken {
        match outcome {
            MintOutcome::Success(minted) => minted,
            MintOutcome::Denied(denial) => panic!("unexpected denial: {:?}", denial),
        }
    }

    #[tokio::test]
    async fn mint_succeeds_with_valid_credentials() {
        let h = harness().await;
        let token = minted(h.token.mint(mint_request(&h, "reg")).await.unwrap());

        assert_eq!(token.expires_in, 300);
        assert_eq!(token.scope, ServiceScope::Reg);
        assert_eq!(token.issued_at, "2026-08-01T00:00:00.000Z");
        assert_eq!(token.expires_at, "2026-08-01T00:05:00.000Z");
        assert_eq!(token.tenant_id, h.tenant_id);
        assert_eq!(token.instance_id, h.instance_id);
        assert_eq!(token.source, "sn://acme-dev.service-now.com");
        assert_eq!(token.access_token.split('.').count(), 3);
    }

    #[tokio::test]
    async fn minted_claims_carry_the_audience_and_subject() {
        let h = harness().await;
        let token = minted(h.token.mint(mint_request(&h, "rrs")).await.unwrap());

        let outcome = h
            .token
            .validate(ValidateRequest {
                access_token: token.access_token,
                expected_service_scope: None,
            })
            .await
            .unwrap();
        let claims = match outcome {
            ValidateOutcome::Valid(valid) => valid.claims,
            ValidateOutcome::Denied(denial) => panic!("unexpected denial: {:?}", denial),
        };
        assert_eq!(claims.aud, "rezilient:rrs");
        assert_eq!(claims.sub, h.client_id);
        assert!(claims.jti.starts_with("tok_"));
        assert_eq!(claims.exp - claims.iat, 300);
    }

    #[tokio::test]
    async fn unknown_grant_type_wins_over_everything_else() {
        let h = harness().await;
        let mut request = mint_request(&h, "not-even-a-scope");
        request.grant_type = Some("password".into());
        let outcome = h.token.mint(request).await.unwrap();
        assert_eq!(outcome.reason_code(), Some(MintDenyReason::InvalidGrant));
    }

    #[tokio::test]
    async fn unknown_scope_is_denied_before_client_lookup() {
        let h = harness().await;
        let mut request = mint_request(&h, "web");
        request.client_id = "cli_who-knows".into();
        let outcome = h.token.mint(request).await.unwrap();
        assert_eq!(outcome.reason_code(), Some(MintDenyReason::ServiceNotAllowed));
    }

    #[tokio::test]
    async fn outage_denies_before_invalid_client() {
        let h = harness().await;
        h.token.set_outage_mode(true, Some("ops".into())).await.unwrap();

        let mut request = mint_request(&h, "reg");
        request.client_id = "cli_unknown".into();
        let outcome = h.token.mint(request).await.unwrap();
        assert_eq!(outcome.reason_code(), Some(MintDenyReason::AuthControlPlaneOutage));

        h.token.set_outage_mode(false, Some("ops".into())).await.unwrap();
        let mut request = mint_request(&h, "reg");
        request.client_id = "cli_unknown".into();
        let outcome = h.token.mint(request).await.unwrap();
        assert_eq!(outcome.reason_code(), Some(MintDenyReason::InvalidClient));
    }

    #[tokio::test]
    async fn tenant_eligibility_is_checked_in_order() {
        let h = harness().await;

        h.registry
            .set_tenant_state(&h.tenant_id, crate::domain::LifecycleState::Suspended, None)
            .await
            .unwrap();
        let outcome = h.token.mint(mint_request(&h, "reg")).await.unwrap();
        assert_eq!(outcome.reason_code(), Some(MintDenyReason::TenantSuspended));

        h.registry
            .set_tenant_state(&h.tenant_id, crate::domain::LifecycleState::Disabled, None)
            .await
            .unwrap();
        let outcome = h.token.mint(mint_request(&h, "reg")).await.unwrap();
        assert_eq!(outcome.reason_code(), Some(MintDenyReason::TenantDisabled));

        h.registry
            .set_tenant_state(&h.tenant_id, crate::domain::LifecycleState::Active, None)
            .await
            .unwrap();
        h.registry
            .set_tenant_entitlement(&h.tenant_id, crate::domain::LifecycleState::Suspended, None)
            .await
            .unwrap();
        let outcome = h.token.mint(mint_request(&h, "reg")).await.unwrap();
        assert_eq!(outcome.reason_code(), Some(MintDenyReason::TenantNotEntitled));
    }

    #[tokio::test]
    async fn instance_eligibility_and_scope_follow_tenant_checks() {
        let h = harness().await;

        h.registry
            .set_instance_state(&h.instance_id, crate::domain::LifecycleState::Suspended, None)
            .await
            .unwrap();
        let outcome = h.token.mint(mint_request(&h, "reg")).await.unwrap();
        assert_eq!(outcome.reason_code(), Some(MintDenyReason::InstanceSuspended));

        h.registry
            .set_instance_state(&h.instance_id, crate::domain::LifecycleState::Active, None)
            .await
            .unwrap();
        h.registry
            .set_instance_allowed_services(&h.instance_id, vec![ServiceScope::Rrs], None)
            .await
            .unwrap();
        let outcome = h.token.mint(mint_request(&h, "reg")).await.unwrap();
        assert_eq!(outcome.reason_code(), Some(MintDenyReason::ServiceNotAllowed));
        assert!(h.token.mint(mint_request(&h, "rrs")).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn wrong_secret_is_denied_after_all_eligibility() {
        let h = harness().await;
        let mut request = mint_request(&h, "reg");
        request.client_secret = "sec_not-the-secret".into();
        let outcome = h.token.mint(request).await.unwrap();
        assert_eq!(outcome.reason_code(), Some(MintDenyReason::InvalidSecret));
    }

    #[tokio::test]
    async fn both_secrets_mint_during_overlap_and_adoption_is_recorded() {
        let h = harness().await;
        let started = h.rotation.start(&h.instance_id, 3600, None).await.unwrap();

        // Old secret still works.
        assert!(h.token.mint(mint_request(&h, "reg")).await.unwrap().is_success());

        // New secret works and triggers adoption synchronously.
        let mut request = mint_request(&h, "reg");
        request.client_secret = started.next_client_secret.clone();
        assert!(h.token.mint(request).await.unwrap().is_success());

        let snapshot = h.store.read().await.unwrap();
        let credentials = snapshot
            .instances
            .get(&h.instance_id)
            .unwrap()
            .client_credentials
            .as_ref()
            .unwrap();
        assert!(credentials
            .version(&started.next_secret_version_id)
            .unwrap()
            .adopted_at
            .is_some());
        assert!(snapshot
            .audit_events
            .iter()
            .any(|e| e.event_type == AuditEventType::SecretRotationAdopted));
    }

    #[tokio::test]
    async fn expired_overlap_window_rejects_the_next_secret() {
        let h = harness().await;
        let started = h.rotation.start(&h.instance_id, 3600, None).await.unwrap();

        h.clock.advance_seconds(3601);
        let mut request = mint_request(&h, "reg");
        request.client_secret = started.next_client_secret;
        let outcome = h.token.mint(request).await.unwrap();
        assert_eq!(outcome.reason_code(), Some(MintDenyReason::InvalidSecret));

        // The current secret is unaffected by the lapsed window.
        assert!(h.token.mint(mint_request(&h, "reg")).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn refresh_flow_audits_as_token_refreshed() {
        let h = harness().await;
        let mut request = mint_request(&h, "reg");
        request.flow = Some(TokenFlow::Refresh);
        assert!(h.token.mint(request).await.unwrap().is_success());

        let snapshot = h.store.read().await.unwrap();
        assert!(snapshot
            .audit_events
            .iter()
            .any(|e| e.event_type == AuditEventType::TokenRefreshed));
        assert!(!snapshot
            .audit_events
            .iter()
            .any(|e| e.event_type == AuditEventType::TokenMinted));
    }

    #[tokio::test]
    async fn mint_denials_are_audited_with_the_reason() {
        let h = harness().await;
        let mut request = mint_request(&h, "reg");
        request.client_secret = "sec_wrong".into();
        h.token.mint(request).await.unwrap();

        let snapshot = h.store.read().await.unwrap();
        let denial = snapshot
            .audit_events
            .iter()
            .find(|e| e.event_type == AuditEventType::TokenMintDenied)
            .expect("denial event");
        assert_eq!(denial.reason_code.as_deref(), Some("denied_invalid_secret"));
        assert_eq!(denial.metadata["phase"], json!("mint"));
    }

    #[tokio::test]
    async fn validate_accepts_a_fresh_token() {
        let h = harness().await;
        let token = minted(h.token.mint(mint_request(&h, "reg")).await.unwrap());

        let outcome = h
            .token
            .validate(ValidateRequest {
                access_token: token.access_token,
                expected_service_scope: Some(ServiceScope::Reg),
            })
            .await
            .unwrap();
        assert!(outcome.is_valid());

        let snapshot = h.store.read().await.unwrap();
        assert!(snapshot
            .audit_events
            .iter()
            .any(|e| e.event_type == AuditEventType::TokenValidated));
    }

    #[tokio::test]
    async fn validate_rejects_garbage_and_forgeries() {
        let h = harness().await;
        let token = minted(h.token.mint(mint_request(&h, "reg")).await.unwrap());

        let outcome = h
            .token
            .validate(ValidateRequest {
                access_token: "definitely-not-a-token".into(),
                expected_service_scope: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.reason_code(), Some(ValidateDenyReason::TokenMalformed));

        // Re-sign with a different key by flipping a signature byte.
        let mut segments: Vec<String> =
            token.access_token.split('.').map(str::to_string).collect();
        segments[2] = segments[2].chars().rev().collect();
        let outcome = h
            .token
            .validate(ValidateRequest {
                access_token: segments.join("."),
                expected_service_scope: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.reason_code(), Some(ValidateDenyReason::TokenInvalidSignature));
    }

    #[tokio::test]
    async fn validate_rejects_a_foreign_issuer_as_malformed() {
        let h = harness().await;

        // Token signed with our key but stamped by another issuer.
        let claims = json!({
            "iss": "someone-else",
            "sub": "cli_abc",
            "aud": "rezilient:reg",
            "jti": "tok_x",
            "iat": h.clock.now_seconds(),
            "exp": h.clock.now_seconds() + 300,
            "service_scope": "reg",
        });
        let forged = sign_compact(
            &json!({"alg": "HS256", "typ": "JWT"}),
            &claims,
            settings().signing_key.as_bytes(),
        )
        .unwrap();

        let outcome = h
            .token
            .validate(ValidateRequest { access_token: forged, expected_service_scope: None })
            .await
            .unwrap();
        assert_eq!(outcome.reason_code(), Some(ValidateDenyReason::TokenMalformed));
    }

    #[tokio::test]
    async fn validate_honors_clock_skew_to_the_second() {
        let h = harness().await;
        let token = minted(h.token.mint(mint_request(&h, "reg")).await.unwrap());

        // exp is 300s out, skew is 30s: exactly exp + skew still passes.
        h.clock.advance_seconds(330);
        let outcome = h
            .token
            .validate(ValidateRequest {
                access_token: token.access_token.clone(),
                expected_service_scope: None,
            })
            .await
            .unwrap();
        assert!(outcome.is_valid());

        h.clock.advance_seconds(1);
        let outcome = h
            .token
            .validate(ValidateRequest {
                access_token: token.access_token,
                expected_service_scope: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.reason_code(), Some(ValidateDenyReason::TokenExpired));
    }

    #[tokio::test]
    async fn validate_rejects_the_wrong_expected_scope() {
        let h = harness().await;
        let token = minted(h.token.mint(mint_request(&h, "reg")).await.unwrap());

        let outcome = h
            .token
            .validate(ValidateRequest {
                access_token: token.access_token,
                expected_service_scope: Some(ServiceScope::Rrs),
            })
            .await
            .unwrap();
        assert_eq!(outcome.reason_code(), Some(ValidateDenyReason::TokenWrongServiceScope));

        let snapshot = h.store.read().await.unwrap();
        let denial = snapshot
            .audit_events
            .iter()
            .find(|e| e.event_type == AuditEventType::TokenValidateDenied)
            .expect("denial event");
        assert_eq!(denial.reason_code.as_deref(), Some("denied_token_wrong_service_scope"));
    }

    #[tokio::test]
    async fn refresh_grace_boundaries_are_exact() {
        let h = harness().await;
        h.token.set_outage_mode(true, None).await.unwrap();

        let expires_at = "2026-08-01T00:05:00.000Z";

        // Inside the grace window.
        h.clock.advance_seconds(300 + 310);
        let evaluation = h.token.evaluate_refresh_during_outage(expires_at).await.unwrap();
        assert_eq!(evaluation.action, RefreshAction::RetryWithinGrace);
        assert_eq!(evaluation.reason, Some(RefreshHoldReason::BlockedAuthControlPlaneOutage));

        // Exactly expires_at + grace window still retries.
        h.clock.advance_seconds(110);
        let evaluation = h.token.evaluate_refresh_during_outage(expires_at).await.unwrap();
        assert_eq!(evaluation.action, RefreshAction::RetryWithinGrace);

        // One second later the grace window is exhausted.
        h.clock.advance_seconds(1);
        let evaluation = h.token.evaluate_refresh_during_outage(expires_at).await.unwrap();
        assert_eq!(evaluation.action, RefreshAction::PauseInFlight);
        assert_eq!(evaluation.reason, Some(RefreshHoldReason::PausedTokenRefreshGraceExhausted));
    }

    #[tokio::test]
    async fn refresh_is_allowed_when_outage_is_inactive() {
        let h = harness().await;
        let evaluation = h
            .token
            .evaluate_refresh_during_outage("2020-01-01T00:00:00.000Z")
            .await
            .unwrap();
        assert_eq!(evaluation.action, RefreshAction::RefreshAllowed);
        assert_eq!(evaluation.reason, None);
    }

    #[tokio::test]
    async fn outage_mode_change_is_audited_with_the_new_value() {
        let h = harness().await;
        h.token.set_outage_mode(true, Some("ops".into())).await.unwrap();
        assert!(h.token.is_outage_mode_active().await.unwrap());

        let snapshot = h.store.read().await.unwrap();
        let event = snapshot
            .audit_events
            .iter()
            .find(|e| e.event_type == AuditEventType::ControlPlaneOutageModeChanged)
            .expect("outage event");
        assert_eq!(event.metadata["outage_active"], json!(true));
        assert_eq!(event.actor.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn in_flight_continues_when_everything_is_active() {
        let h = harness().await;
        let evaluation =
            h.token.evaluate_in_flight_entitlement(&h.instance_id, true).await.unwrap();
        assert_eq!(evaluation.action, InFlightAction::Continue);
        assert_eq!(evaluation.reason, None);
    }

    #[tokio::test]
    async fn in_flight_pauses_only_at_chunk_boundaries() {
        let h = harness().await;
        h.registry
            .set_tenant_entitlement(&h.tenant_id, crate::domain::LifecycleState::Disabled, None)
            .await
            .unwrap();

        let mid_chunk =
            h.token.evaluate_in_flight_entitlement(&h.instance_id, false).await.unwrap();
        assert_eq!(mid_chunk.action, InFlightAction::ContinueUntilChunkBoundary);
        assert_eq!(mid_chunk.reason, Some(InFlightHoldReason::PausedEntitlementDisabled));

        let at_boundary =
            h.token.evaluate_in_flight_entitlement(&h.instance_id, true).await.unwrap();
        assert_eq!(at_boundary.action, InFlightAction::Pause);
        assert_eq!(at_boundary.reason, Some(InFlightHoldReason::PausedEntitlementDisabled));
    }

    #[tokio::test]
    async fn in_flight_reports_instance_problems_as_instance_disabled() {
        let h = harness().await;

        h.registry
            .set_instance_state(&h.instance_id, crate::domain::LifecycleState::Suspended, None)
            .await
            .unwrap();
        let evaluation =
            h.token.evaluate_in_flight_entitlement(&h.instance_id, true).await.unwrap();
        assert_eq!(evaluation.action, InFlightAction::Pause);
        assert_eq!(evaluation.reason, Some(InFlightHoldReason::PausedInstanceDisabled));

        let missing = InstanceId::from_str_unchecked("instance-gone");
        let evaluation = h.token.evaluate_in_flight_entitlement(&missing, false).await.unwrap();
        assert_eq!(evaluation.action, InFlightAction::ContinueUntilChunkBoundary);
        assert_eq!(evaluation.reason, Some(InFlightHoldReason::PausedInstanceDisabled));
    }

    #[tokio::test]
    async fn revoked_current_secret_stops_minting() {
        let h = harness().await;
        h.rotation
            .revoke(
                &h.instance_id,
                &SecretVersionId::initial(),
                Some("compromised".into()),
                None,
            )
            .await
            .unwrap();

        let outcome = h.token.mint(mint_request(&h, "reg")).await.unwrap();
        assert_eq!(outcome.reason_code(), Some(MintDenyReason::InvalidSecret));
    }
}
