//! The authentication ceremony: building
//! [`PublicKeyCredentialRequestOptions`] and validating an assertion signed
//! by a previously registered credential.

use coset::{CborSerializable, CoseKey};
use serde::{Deserialize, Serialize};

use webauthn_rp_types::{
    ctap2::{AuthenticatorData, Flags},
    encoding,
    webauthn::{
        AuthenticatedPublicKeyCredential, ClientDataType, CollectedClientData,
        PublicKeyCredentialRequestOptions, PublicKeyCredentialType, UserVerificationRequirement,
    },
    Bytes,
};

use crate::crypto::{self, sha256};
use crate::error::{Warning, WebauthnError};
use crate::store::{CredentialRepository, MetadataService};
use crate::RelyingParty;

/// A pending authentication ceremony: the options sent to the client plus
/// the username the ceremony was started for, if the user was already
/// identified. The caller persists this value between `start` and `finish`
/// and removes it on the first finish attempt, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionRequest {
    /// The username the ceremony was started for; `None` for a usernameless
    /// (discoverable credential) ceremony.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// The options transmitted to the client as `publicKey`.
    pub public_key: PublicKeyCredentialRequestOptions,
}

/// The outcome of a successful assertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    /// Whether the assertion verified. Always `true` for a returned result;
    /// failures surface as errors.
    pub success: bool,

    /// The credential that signed the assertion.
    pub credential_id: Bytes,

    /// The user handle the credential is registered under.
    pub user_handle: Bytes,

    /// The username resolved for the user handle.
    pub username: String,

    /// The signature counter reported by the authenticator. The caller
    /// persists this as the credential's new stored counter.
    pub signature_count: u32,

    /// Whether the reported counter is strictly greater than the stored one
    /// (or both are zero for counter-less authenticators). A `false` value
    /// indicates a possible cloned authenticator.
    pub signature_counter_valid: bool,

    /// Non-fatal advisories collected during verification.
    pub warnings: Vec<Warning>,
}

impl<R: CredentialRepository, M: MetadataService> RelyingParty<R, M> {
    /// Begin an authentication ceremony.
    ///
    /// With a username, the user's registered credentials populate
    /// `allowCredentials`; without one, the list is left empty and the
    /// ceremony relies on a discoverable credential returning its user
    /// handle.
    pub fn start_assertion(
        &self,
        username: Option<&str>,
    ) -> Result<AssertionRequest, WebauthnError> {
        let allow_credentials = match username {
            Some(username) => Some(self.credentials.credential_ids_for_username(username)?),
            None => None,
        };

        let options = PublicKeyCredentialRequestOptions {
            challenge: self.new_challenge()?,
            timeout: self.policy.timeout,
            rp_id: Some(self.identity.id.clone()),
            allow_credentials,
            user_verification: self.policy.user_verification,
            extensions: None,
        };

        Ok(AssertionRequest {
            username: username.map(str::to_owned),
            public_key: options,
        })
    }

    /// Finish an authentication ceremony: validate `credential` against the
    /// pending `request`, verify the assertion signature with the stored
    /// public key, and report the counter delta.
    ///
    /// Performs the ordered checks of WebAuthn §7.2: allow-list membership,
    /// user handle resolution, credential lookup, rpIdHash, UP/UV flags,
    /// client data type/challenge/origin/token-binding, signature
    /// verification, and the signature counter policy.
    pub fn finish_assertion(
        &self,
        request: &AssertionRequest,
        credential: &AuthenticatedPublicKeyCredential,
    ) -> Result<AssertionResult, WebauthnError> {
        let mut warnings = Vec::new();

        if credential.ty != PublicKeyCredentialType::PublicKey {
            return Err(WebauthnError::MalformedData(
                "credential type is not public-key".into(),
            ));
        }

        if let Some(allowed) = &request.public_key.allow_credentials {
            if !allowed.is_empty()
                && !allowed
                    .iter()
                    .any(|descriptor| descriptor.id == credential.id)
            {
                return Err(WebauthnError::DisallowedCredential);
            }
        }

        // Resolve the account: a response user handle must agree with the
        // stored handle for an identified user, and identifies the user for
        // a usernameless ceremony.
        let (user_handle, username) = match (&credential.response.user_handle, &request.username) {
            (Some(handle), Some(username)) => {
                let stored = self
                    .credentials
                    .user_handle_for_username(username)?
                    .ok_or(WebauthnError::CredentialNotRegistered)?;
                if stored != *handle {
                    return Err(WebauthnError::UserHandleMismatch);
                }
                (handle.clone(), username.clone())
            }
            (Some(handle), None) => {
                let username = self
                    .credentials
                    .username_for_user_handle(handle)?
                    .ok_or(WebauthnError::CredentialNotRegistered)?;
                (handle.clone(), username)
            }
            (None, Some(username)) => {
                let handle = self
                    .credentials
                    .user_handle_for_username(username)?
                    .ok_or(WebauthnError::CredentialNotRegistered)?;
                (handle, username.clone())
            }
            // Neither the ceremony nor the authenticator identified a user.
            (None, None) => return Err(WebauthnError::CredentialNotRegistered),
        };

        let registered = self
            .credentials
            .lookup(&credential.id, &user_handle)?
            .ok_or(WebauthnError::CredentialNotRegistered)?;

        let auth_data = AuthenticatorData::from_slice(&credential.response.authenticator_data)?;

        if auth_data.rp_id_hash() != sha256(self.identity.id.as_bytes()).as_slice() {
            return Err(WebauthnError::RpIdHashMismatch);
        }

        if !auth_data.flags.contains(Flags::UP) {
            return Err(WebauthnError::UserPresenceMissing);
        }
        if self.policy.user_verification == UserVerificationRequirement::Required
            && !auth_data.flags.contains(Flags::UV)
        {
            return Err(WebauthnError::UserVerificationRequired);
        }

        let client_data: CollectedClientData =
            serde_json::from_slice(&credential.response.client_data_json)
                .map_err(|_| WebauthnError::MalformedData("clientDataJSON".into()))?;

        if client_data.ty != ClientDataType::Get {
            return Err(WebauthnError::UnexpectedClientDataType);
        }

        let challenge = encoding::try_from_base64url(&client_data.challenge)
            .ok_or_else(|| WebauthnError::MalformedData("client data challenge".into()))?;
        if challenge != *request.public_key.challenge {
            return Err(WebauthnError::ChallengeMismatch);
        }

        self.assert_origin(&client_data.origin)?;
        self.token_binding.verify(client_data.token_binding.as_ref())?;

        self.assert_extensions(
            request.public_key.extensions.as_ref(),
            auth_data.extensions.as_ref(),
        )?;

        let client_data_hash = sha256(&credential.response.client_data_json);

        let public_key = CoseKey::from_slice(&registered.public_key_cose).map_err(|_| {
            WebauthnError::InternalStoreError("stored public key is not a cose key".into())
        })?;

        // The assertion signature covers the raw authenticator data bytes
        // followed by the client data hash.
        let mut signed_payload = credential.response.authenticator_data.to_vec();
        signed_payload.extend_from_slice(&client_data_hash);
        if let Some(advisory) =
            crypto::verify_with_cose_key(&public_key, &signed_payload, &credential.response.signature)?
        {
            warnings.push(advisory);
        }

        // Counter semantics: valid iff strictly increasing, or both zero for
        // authenticators that do not implement a counter.
        let signature_count = auth_data.counter;
        let stored_count = registered.signature_count;
        let signature_counter_valid =
            signature_count > stored_count || (signature_count == 0 && stored_count == 0);
        if signature_count == 0 && stored_count == 0 {
            warnings.push(Warning::SignatureCounterZero);
        }
        if !signature_counter_valid {
            if self.policy.validate_signature_counter {
                return Err(WebauthnError::CounterRollback);
            }
            log::warn!("signature counter regressed; possible cloned authenticator");
            warnings.push(Warning::SignatureCounterRollback);
        }

        Ok(AssertionResult {
            success: true,
            credential_id: credential.id.clone(),
            user_handle,
            username,
            signature_count,
            signature_counter_valid,
            warnings,
        })
    }
}
