//! Enumerations and tagged decision types.
//!
//! Reason codes, lifecycle states, and service scopes are fixed strings on
//! the wire; every enum here round-trips through its exact string form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::AuthPlaneError;

/// Downstream service a token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceScope {
    Reg,
    Rrs,
}

impl ServiceScope {
    /// The full service set, used as the default for new instances.
    pub const ALL: [ServiceScope; 2] = [ServiceScope::Reg, ServiceScope::Rrs];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceScope::Reg => "reg",
            ServiceScope::Rrs => "rrs",
        }
    }

    /// Token audience for this scope.
    pub fn audience(&self) -> String {
        format!("rezilient:{}", self.as_str())
    }

    /// Sort and deduplicate a service list for storage.
    pub fn normalize(mut services: Vec<ServiceScope>) -> Vec<ServiceScope> {
        services.sort();
        services.dedup();
        services
    }
}

impl fmt::Display for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServiceScope {
    type Err = AuthPlaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reg" => Ok(ServiceScope::Reg),
            "rrs" => Ok(ServiceScope::Rrs),
            other => Err(AuthPlaneError::validation(format!("Unknown service scope: {}", other))),
        }
    }
}

/// Lifecycle state shared by tenants (state and entitlement) and instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Active,
    Suspended,
    Disabled,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Active => "active",
            LifecycleState::Suspended => "suspended",
            LifecycleState::Disabled => "disabled",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Active)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = AuthPlaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LifecycleState::Active),
            "suspended" => Ok(LifecycleState::Suspended),
            "disabled" => Ok(LifecycleState::Disabled),
            other => Err(AuthPlaneError::validation(format!("Unknown lifecycle state: {}", other))),
        }
    }
}

/// Which path a mint request came in on. Refresh shares the mint decision
/// matrix but is audited as `token_refreshed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenFlow {
    Mint,
    Refresh,
}

/// Closed set of audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    TenantCreated,
    TenantStateChanged,
    TenantEntitlementChanged,
    InstanceCreated,
    InstanceStateChanged,
    InstanceAllowedServicesChanged,
    EnrollmentCodeIssued,
    EnrollmentCodeExchanged,
    TokenMinted,
    TokenRefreshed,
    TokenMintDenied,
    TokenValidated,
    TokenValidateDenied,
    SecretRotationStarted,
    SecretRotationAdopted,
    SecretRotationCompleted,
    SecretRevoked,
    ControlPlaneOutageModeChanged,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::TenantCreated => "tenant_created",
            AuditEventType::TenantStateChanged => "tenant_state_changed",
            AuditEventType::TenantEntitlementChanged => "tenant_entitlement_changed",
            AuditEventType::InstanceCreated => "instance_created",
            AuditEventType::InstanceStateChanged => "instance_state_changed",
            AuditEventType::InstanceAllowedServicesChanged => "instance_allowed_services_changed",
            AuditEventType::EnrollmentCodeIssued => "enrollment_code_issued",
            AuditEventType::EnrollmentCodeExchanged => "enrollment_code_exchanged",
            AuditEventType::TokenMinted => "token_minted",
            AuditEventType::TokenRefreshed => "token_refreshed",
            AuditEventType::TokenMintDenied => "token_mint_denied",
            AuditEventType::TokenValidated => "token_validated",
            AuditEventType::TokenValidateDenied => "token_validate_denied",
            AuditEventType::SecretRotationStarted => "secret_rotation_started",
            AuditEventType::SecretRotationAdopted => "secret_rotation_adopted",
            AuditEventType::SecretRotationCompleted => "secret_rotation_completed",
            AuditEventType::SecretRevoked => "secret_revoked",
            AuditEventType::ControlPlaneOutageModeChanged => "control_plane_outage_mode_changed",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reason codes the mint decision matrix can deny with, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MintDenyReason {
    #[serde(rename = "denied_invalid_grant")]
    InvalidGrant,
    #[serde(rename = "denied_service_not_allowed")]
    ServiceNotAllowed,
    #[serde(rename = "denied_auth_control_plane_outage")]
    AuthControlPlaneOutage,
    #[serde(rename = "denied_invalid_client")]
    InvalidClient,
    #[serde(rename = "denied_tenant_suspended")]
    TenantSuspended,
    #[serde(rename = "denied_tenant_disabled")]
    TenantDisabled,
    #[serde(rename = "denied_tenant_not_entitled")]
    TenantNotEntitled,
    #[serde(rename = "denied_instance_suspended")]
    InstanceSuspended,
    #[serde(rename = "denied_instance_disabled")]
    InstanceDisabled,
    #[serde(rename = "denied_invalid_secret")]
    InvalidSecret,
}

impl MintDenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MintDenyReason::InvalidGrant => "denied_invalid_grant",
            MintDenyReason::ServiceNotAllowed => "denied_service_not_allowed",
            MintDenyReason::AuthControlPlaneOutage => "denied_auth_control_plane_outage",
            MintDenyReason::InvalidClient => "denied_invalid_client",
            MintDenyReason::TenantSuspended => "denied_tenant_suspended",
            MintDenyReason::TenantDisabled => "denied_tenant_disabled",
            MintDenyReason::TenantNotEntitled => "denied_tenant_not_entitled",
            MintDenyReason::InstanceSuspended => "denied_instance_suspended",
            MintDenyReason::InstanceDisabled => "denied_instance_disabled",
            MintDenyReason::InvalidSecret => "denied_invalid_secret",
        }
    }
}

impl fmt::Display for MintDenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reason codes token validation can deny with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidateDenyReason {
    #[serde(rename = "denied_token_malformed")]
    TokenMalformed,
    #[serde(rename = "denied_token_invalid_signature")]
    TokenInvalidSignature,
    #[serde(rename = "denied_token_expired")]
    TokenExpired,
    #[serde(rename = "denied_token_wrong_service_scope")]
    TokenWrongServiceScope,
}

impl ValidateDenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidateDenyReason::TokenMalformed => "denied_token_malformed",
            ValidateDenyReason::TokenInvalidSignature => "denied_token_invalid_signature",
            ValidateDenyReason::TokenExpired => "denied_token_expired",
            ValidateDenyReason::TokenWrongServiceScope => "denied_token_wrong_service_scope",
        }
    }
}

impl fmt::Display for ValidateDenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reason codes enrollment exchange can deny with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeDenyReason {
    #[serde(rename = "denied_invalid_enrollment_code")]
    InvalidEnrollmentCode,
    #[serde(rename = "denied_enrollment_code_used")]
    EnrollmentCodeUsed,
    #[serde(rename = "denied_enrollment_code_expired")]
    EnrollmentCodeExpired,
}

impl ExchangeDenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeDenyReason::InvalidEnrollmentCode => "denied_invalid_enrollment_code",
            ExchangeDenyReason::EnrollmentCodeUsed => "denied_enrollment_code_used",
            ExchangeDenyReason::EnrollmentCodeExpired => "denied_enrollment_code_expired",
        }
    }
}

impl fmt::Display for ExchangeDenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What an in-flight refresh attempt should do during an outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshAction {
    RefreshAllowed,
    RetryWithinGrace,
    PauseInFlight,
}

impl RefreshAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshAction::RefreshAllowed => "refresh_allowed",
            RefreshAction::RetryWithinGrace => "retry_within_grace",
            RefreshAction::PauseInFlight => "pause_in_flight",
        }
    }
}

/// Why a refresh attempt is being held. Absent when refresh is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshHoldReason {
    BlockedAuthControlPlaneOutage,
    PausedTokenRefreshGraceExhausted,
}

impl RefreshHoldReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshHoldReason::BlockedAuthControlPlaneOutage => "blocked_auth_control_plane_outage",
            RefreshHoldReason::PausedTokenRefreshGraceExhausted => {
                "paused_token_refresh_grace_exhausted"
            }
        }
    }
}

/// Outcome of [`evaluate_refresh_during_outage`].
///
/// [`evaluate_refresh_during_outage`]: crate::token::TokenService::evaluate_refresh_during_outage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshEvaluation {
    pub action: RefreshAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RefreshHoldReason>,
}

/// What an in-flight workload should do given entitlement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InFlightAction {
    Continue,
    Pause,
    ContinueUntilChunkBoundary,
}

impl InFlightAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            InFlightAction::Continue => "continue",
            InFlightAction::Pause => "pause",
            InFlightAction::ContinueUntilChunkBoundary => "continue_until_chunk_boundary",
        }
    }
}

/// Why an in-flight workload is being asked to stop. Absent when it may
/// continue freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InFlightHoldReason {
    PausedInstanceDisabled,
    PausedEntitlementDisabled,
}

impl InFlightHoldReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InFlightHoldReason::PausedInstanceDisabled => "paused_instance_disabled",
            InFlightHoldReason::PausedEntitlementDisabled => "paused_entitlement_disabled",
        }
    }
}

/// Outcome of [`evaluate_in_flight_entitlement`].
///
/// [`evaluate_in_flight_entitlement`]: crate::token::TokenService::evaluate_in_flight_entitlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightEvaluation {
    pub action: InFlightAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InFlightHoldReason>,
}
