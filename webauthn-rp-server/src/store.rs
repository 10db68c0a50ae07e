//! Capability interfaces for the state the Relying Party core does not own:
//! the credential repository populated by the caller, and an optional
//! metadata service used for attestation trust decisions.
//!
//! Both interfaces are synchronous and may block; the core makes no timing
//! assumptions about them. The core never writes through these interfaces:
//! persisting a new credential after registration and bumping the signature
//! counter after an assertion are the caller's responsibility.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use webauthn_rp_types::{
    ctap2::Aaguid,
    webauthn::{PublicKeyCredentialDescriptor, PublicKeyCredentialType},
    Bytes,
};

use crate::error::WebauthnError;

/// A failure inside an externally supplied store. The reason is carried
/// through to the caller as [`WebauthnError::InternalStoreError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct StoreError(pub String);

impl From<StoreError> for WebauthnError {
    fn from(err: StoreError) -> Self {
        WebauthnError::InternalStoreError(err.0)
    }
}

/// A credential record as the caller persists it after a successful
/// registration. The core holds no long-lived copy; each assertion looks the
/// record up through [`CredentialRepository`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredCredential {
    /// The authenticator-chosen credential ID.
    pub credential_id: Bytes,

    /// The user handle of the account the credential belongs to.
    pub user_handle: Bytes,

    /// The credential public key in COSE_Key CBOR form, exactly as it was
    /// returned in the registration result.
    pub public_key_cose: Bytes,

    /// The last signature counter value observed for this credential.
    pub signature_count: u32,
}

/// Read access to the caller's credential store.
///
/// Implementations may block and may fail; failures surface to the caller as
/// [`WebauthnError::InternalStoreError`] without aborting any state, since
/// the core performs no writes.
pub trait CredentialRepository {
    /// Descriptors for every credential registered to `username`, for use in
    /// exclude and allow lists. Unknown usernames yield an empty list.
    fn credential_ids_for_username(
        &self,
        username: &str,
    ) -> Result<Vec<PublicKeyCredentialDescriptor>, StoreError>;

    /// The user handle registered for `username`, if any.
    fn user_handle_for_username(&self, username: &str) -> Result<Option<Bytes>, StoreError>;

    /// The username registered for `user_handle`, if any.
    fn username_for_user_handle(&self, user_handle: &[u8]) -> Result<Option<String>, StoreError>;

    /// Look up the credential registered under exactly this credential ID and
    /// user handle pair.
    fn lookup(
        &self,
        credential_id: &[u8],
        user_handle: &[u8],
    ) -> Result<Option<RegisteredCredential>, StoreError>;

    /// Every credential registered under this credential ID, across all
    /// users. Credential IDs collide only by authenticator misbehavior, but
    /// the spec requires the lookup to exist.
    fn lookup_all(&self, credential_id: &[u8]) -> Result<Vec<RegisteredCredential>, StoreError>;
}

/// The status of an authenticator model as reported by a metadata service,
/// loosely following the FIDO Metadata Service authenticator status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticatorStatus {
    /// The authenticator has passed FIDO functional certification.
    FidoCertified,
    /// The authenticator is not certified but not known to be compromised.
    NotFidoCertified,
    /// The authenticator is self-asserted by its vendor.
    SelfAssertionSubmitted,
    /// The attestation key of this model is known to be compromised.
    AttestationKeyCompromise,
    /// The user verification mechanism of this model can be bypassed.
    UserVerificationBypass,
    /// The key protection of this model is known to be broken.
    UserKeyRemoteCompromise,
    /// The metadata entry was revoked by the service.
    Revoked,
}

impl AuthenticatorStatus {
    /// Whether a credential from an authenticator with this status may be
    /// considered trustworthy.
    pub fn is_acceptable(&self) -> bool {
        !matches!(
            self,
            AuthenticatorStatus::AttestationKeyCompromise
                | AuthenticatorStatus::UserVerificationBypass
                | AuthenticatorStatus::UserKeyRemoteCompromise
                | AuthenticatorStatus::Revoked
        )
    }
}

/// Metadata describing an authenticator model, as returned by a
/// [`MetadataService`] lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorMetadata {
    /// DER encoded root certificates the attestation trust path must chain
    /// to.
    pub trusted_root_certs: Vec<Bytes>,

    /// The certification status of the authenticator model.
    pub status: AuthenticatorStatus,

    /// Free-form device identifiers (model names, certification ids) for
    /// audit logging.
    #[serde(default)]
    pub device_identifiers: Vec<String>,
}

/// An external source of authenticator metadata, keyed by AAGUID or, for
/// U2F authenticators without an AAGUID, by the attestation leaf certificate.
pub trait MetadataService {
    /// Look up metadata for an authenticator model. Either key may be absent
    /// depending on the attestation format.
    fn lookup(
        &self,
        aaguid: Option<&Aaguid>,
        attestation_certificate: Option<&[u8]>,
    ) -> Result<Option<AuthenticatorMetadata>, StoreError>;
}

/// The default metadata service: knows nothing, so every registration
/// carries a `NoMetadataFound` warning and `attestation_trusted = false`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetadata;

impl MetadataService for NoMetadata {
    fn lookup(
        &self,
        _aaguid: Option<&Aaguid>,
        _attestation_certificate: Option<&[u8]>,
    ) -> Result<Option<AuthenticatorMetadata>, StoreError> {
        Ok(None)
    }
}

/// A thread-safe in-memory [`CredentialRepository`], suitable for tests and
/// demos. Real deployments persist credentials durably.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    user_handles: HashMap<String, Bytes>,
    credentials: Vec<RegisteredCredential>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a username to user-handle binding.
    pub fn add_user(&self, username: &str, user_handle: Bytes) {
        let mut state = self.state.lock().unwrap();
        state.user_handles.insert(username.to_owned(), user_handle);
    }

    /// Persist a credential, as the caller would after a successful
    /// `finish_registration`.
    pub fn add_credential(&self, credential: RegisteredCredential) {
        let mut state = self.state.lock().unwrap();
        state.credentials.push(credential);
    }

    /// Update the stored signature counter, as the caller would after a
    /// successful `finish_assertion`.
    pub fn update_signature_count(&self, credential_id: &[u8], signature_count: u32) {
        let mut state = self.state.lock().unwrap();
        for credential in &mut state.credentials {
            if credential.credential_id.as_slice() == credential_id {
                credential.signature_count = signature_count;
            }
        }
    }
}

impl CredentialRepository for MemoryRepository {
    fn credential_ids_for_username(
        &self,
        username: &str,
    ) -> Result<Vec<PublicKeyCredentialDescriptor>, StoreError> {
        let state = self.state.lock().unwrap();
        let Some(handle) = state.user_handles.get(username) else {
            return Ok(Vec::new());
        };
        Ok(state
            .credentials
            .iter()
            .filter(|credential| credential.user_handle == *handle)
            .map(|credential| PublicKeyCredentialDescriptor {
                ty: PublicKeyCredentialType::PublicKey,
                id: credential.credential_id.clone(),
                transports: None,
            })
            .collect())
    }

    fn user_handle_for_username(&self, username: &str) -> Result<Option<Bytes>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.user_handles.get(username).cloned())
    }

    fn username_for_user_handle(&self, user_handle: &[u8]) -> Result<Option<String>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .user_handles
            .iter()
            .find(|(_, handle)| handle.as_slice() == user_handle)
            .map(|(username, _)| username.clone()))
    }

    fn lookup(
        &self,
        credential_id: &[u8],
        user_handle: &[u8],
    ) -> Result<Option<RegisteredCredential>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .credentials
            .iter()
            .find(|credential| {
                credential.credential_id.as_slice() == credential_id
                    && credential.user_handle.as_slice() == user_handle
            })
            .cloned())
    }

    fn lookup_all(&self, credential_id: &[u8]) -> Result<Vec<RegisteredCredential>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .credentials
            .iter()
            .filter(|credential| credential.credential_id.as_slice() == credential_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_repository_round_trip() {
        let repo = MemoryRepository::new();
        repo.add_user("alice", Bytes::from(b"handle-a".as_slice()));
        repo.add_credential(RegisteredCredential {
            credential_id: Bytes::from(vec![1, 2, 3]),
            user_handle: Bytes::from(b"handle-a".as_slice()),
            public_key_cose: Bytes::from(vec![0xa0]),
            signature_count: 5,
        });

        let ids = repo.credential_ids_for_username("alice").unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].id.as_slice(), &[1, 2, 3]);

        assert_eq!(
            repo.username_for_user_handle(b"handle-a").unwrap(),
            Some("alice".into())
        );

        let stored = repo.lookup(&[1, 2, 3], b"handle-a").unwrap().unwrap();
        assert_eq!(stored.signature_count, 5);

        repo.update_signature_count(&[1, 2, 3], 9);
        let stored = repo.lookup(&[1, 2, 3], b"handle-a").unwrap().unwrap();
        assert_eq!(stored.signature_count, 9);

        assert!(repo.lookup(&[9, 9, 9], b"handle-a").unwrap().is_none());
        assert_eq!(repo.lookup_all(&[1, 2, 3]).unwrap().len(), 1);
    }
}
