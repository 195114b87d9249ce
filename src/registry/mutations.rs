//! Snapshot-level credential mutations.
//!
//! These run inside an open `with_snapshot` transaction. The registry
//! service wraps each in its own transaction; the enrollment, rotation, and
//! token services compose them into larger single-transaction flows so that
//! preconditions, state changes, and audit events commit together.

use crate::domain::{
    ClientCredentials, ClientId, ControlPlaneSnapshot, Instance, InstanceId, SecretVersion,
    SecretVersionId,
};
use crate::errors::{AuthPlaneError, Result};

/// Result of promoting a next secret version to current.
#[derive(Debug, Clone)]
pub struct PromotionOutcome {
    pub instance: Instance,
    pub old_secret_version_id: SecretVersionId,
    pub new_secret_version_id: SecretVersionId,
}

/// Result of revoking a secret version.
#[derive(Debug, Clone)]
pub struct RevocationOutcome {
    pub instance: Instance,
    pub was_next_version: bool,
}

/// Result of marking a secret version adopted.
#[derive(Debug, Clone)]
pub struct AdoptionOutcome {
    pub instance: Instance,
    pub newly_adopted: bool,
}

fn instance_mut<'a>(
    snapshot: &'a mut ControlPlaneSnapshot,
    instance_id: &InstanceId,
) -> Result<&'a mut Instance> {
    snapshot
        .instances
        .get_mut(instance_id)
        .ok_or_else(|| AuthPlaneError::InstanceNotFound(instance_id.to_string()))
}

fn credentials_mut<'a>(
    instance: &'a mut Instance,
) -> Result<(&'a InstanceId, &'a mut ClientCredentials)> {
    let instance_id = &instance.instance_id;
    match instance.client_credentials.as_mut() {
        Some(credentials) => Ok((instance_id, credentials)),
        None => Err(AuthPlaneError::not_found("client_credentials", instance_id.as_str())),
    }
}

/// Install the initial credential set produced by an enrollment exchange.
///
/// Fails when the client id is already bound to another instance or the
/// instance already carries credentials under a different client id.
pub(crate) fn install_initial_credentials(
    snapshot: &mut ControlPlaneSnapshot,
    instance_id: &InstanceId,
    client_id: &ClientId,
    version_id: &SecretVersionId,
    secret_hash: &str,
    now_iso: &str,
) -> Result<Instance> {
    if let Some(bound_to) = snapshot.client_id_index.get(client_id) {
        if bound_to != instance_id {
            return Err(AuthPlaneError::conflict(
                format!("client id {} is already bound to {}", client_id, bound_to),
                "client_credentials",
            ));
        }
    }

    let instance = instance_mut(snapshot, instance_id)?;
    if let Some(existing) = &instance.client_credentials {
        if &existing.client_id != client_id {
            return Err(AuthPlaneError::conflict(
                format!(
                    "instance {} already has credentials under client id {}",
                    instance_id, existing.client_id
                ),
                "client_credentials",
            ));
        }
    }

    instance.client_credentials = Some(ClientCredentials {
        client_id: client_id.clone(),
        current_secret_version_id: version_id.clone(),
        next_secret_version_id: None,
        secret_versions: vec![SecretVersion {
            version_id: version_id.clone(),
            secret_hash: secret_hash.to_string(),
            created_at: now_iso.to_string(),
            adopted_at: None,
            revoked_at: None,
            valid_until: None,
        }],
    });
    instance.updated_at = now_iso.to_string();
    let instance = instance.clone();

    snapshot.client_id_index.insert(client_id.clone(), instance_id.clone());
    Ok(instance)
}

/// Append a next secret version, opening the dual-secret overlap window.
pub(crate) fn add_next_secret_version(
    snapshot: &mut ControlPlaneSnapshot,
    instance_id: &InstanceId,
    version_id: &SecretVersionId,
    secret_hash: &str,
    valid_until: Option<String>,
    now_iso: &str,
) -> Result<Instance> {
    let instance = instance_mut(snapshot, instance_id)?;
    let (instance_id, credentials) = credentials_mut(instance)?;

    if credentials.rotation_in_progress() {
        return Err(AuthPlaneError::RotationAlreadyInProgress(instance_id.to_string()));
    }
    if credentials.version(version_id).is_some() {
        return Err(AuthPlaneError::conflict(
            format!("secret version {} already exists on {}", version_id, instance_id),
            "secret_version",
        ));
    }

    credentials.secret_versions.push(SecretVersion {
        version_id: version_id.clone(),
        secret_hash: secret_hash.to_string(),
        created_at: now_iso.to_string(),
        adopted_at: None,
        revoked_at: None,
        valid_until,
    });
    credentials.next_secret_version_id = Some(version_id.clone());

    instance.updated_at = now_iso.to_string();
    Ok(instance.clone())
}

/// Record first authenticated use of a next secret version. Idempotent:
/// repeat calls after the first leave `adopted_at` untouched.
pub(crate) fn mark_secret_adopted(
    snapshot: &mut ControlPlaneSnapshot,
    instance_id: &InstanceId,
    version_id: &SecretVersionId,
    now_iso: &str,
) -> Result<AdoptionOutcome> {
    let instance = instance_mut(snapshot, instance_id)?;
    let (instance_id, credentials) = credentials_mut(instance)?;

    let is_next = credentials.next_secret_version_id.as_ref() == Some(version_id);
    let version = credentials.version_mut(version_id).ok_or_else(|| {
        AuthPlaneError::not_found("secret_version", format!("{}/{}", instance_id, version_id))
    })?;

    let newly_adopted = if version.adopted_at.is_some() {
        false
    } else if is_next {
        version.adopted_at = Some(now_iso.to_string());
        true
    } else {
        return Err(AuthPlaneError::validation(format!(
            "secret version {} is not the pending next version of {}",
            version_id, instance_id
        )));
    };

    if newly_adopted {
        instance.updated_at = now_iso.to_string();
    }
    Ok(AdoptionOutcome { instance: instance.clone(), newly_adopted })
}

/// Promote an adopted next version: revoke the old current, clear the next
/// version's overlap deadline, and move the pointers.
pub(crate) fn promote_next_secret(
    snapshot: &mut ControlPlaneSnapshot,
    instance_id: &InstanceId,
    now_iso: &str,
) -> Result<PromotionOutcome> {
    let instance = instance_mut(snapshot, instance_id)?;
    let (instance_id, credentials) = credentials_mut(instance)?;

    let next_id = credentials
        .next_secret_version_id
        .clone()
        .ok_or_else(|| AuthPlaneError::SecretRotationNotAdopted(instance_id.to_string()))?;

    let adopted = credentials.version(&next_id).map(|v| v.adopted_at.is_some()).unwrap_or(false);
    if !adopted {
        return Err(AuthPlaneError::SecretRotationNotAdopted(instance_id.to_string()));
    }

    let old_id = credentials.current_secret_version_id.clone();

    {
        let old = credentials.version_mut(&old_id).ok_or_else(|| {
            AuthPlaneError::internal(format!(
                "current secret version {} of {} does not resolve",
                old_id, instance_id
            ))
        })?;
        if old.revoked_at.is_none() {
            old.revoked_at = Some(now_iso.to_string());
        }
    }

    {
        let next = credentials.version_mut(&next_id).ok_or_else(|| {
            AuthPlaneError::internal(format!(
                "next secret version {} of {} does not resolve",
                next_id, instance_id
            ))
        })?;
        next.valid_until = None;
    }

    credentials.current_secret_version_id = next_id.clone();
    credentials.next_secret_version_id = None;

    instance.updated_at = now_iso.to_string();
    Ok(PromotionOutcome {
        instance: instance.clone(),
        old_secret_version_id: old_id,
        new_secret_version_id: next_id,
    })
}

/// Set `revoked_at` on a version (monotonic; the first timestamp wins). A
/// revoked next version also closes the rotation by clearing the pointer.
pub(crate) fn revoke_secret_version(
    snapshot: &mut ControlPlaneSnapshot,
    instance_id: &InstanceId,
    version_id: &SecretVersionId,
    now_iso: &str,
) -> Result<RevocationOutcome> {
    let instance = instance_mut(snapshot, instance_id)?;
    let (instance_id, credentials) = credentials_mut(instance)?;

    let was_next_version = credentials.next_secret_version_id.as_ref() == Some(version_id);

    let version = credentials.version_mut(version_id).ok_or_else(|| {
        AuthPlaneError::not_found("secret_version", format!("{}/{}", instance_id, version_id))
    })?;
    if version.revoked_at.is_none() {
        version.revoked_at = Some(now_iso.to_string());
    }

    if was_next_version {
        credentials.next_secret_version_id = None;
    }

    instance.updated_at = now_iso.to_string();
    Ok(RevocationOutcome { instance: instance.clone(), was_next_version })
}
