//! The registration ceremony: building
//! [`PublicKeyCredentialCreationOptions`] and validating the authenticator's
//! attestation response against them.

use coset::{iana::EnumI64, CborSerializable};
use serde::{Deserialize, Serialize};

use webauthn_rp_types::{
    ctap2::{AttestationObject, Flags},
    encoding,
    webauthn::{
        ClientDataType, CollectedClientData, CreatedPublicKeyCredential,
        PublicKeyCredentialCreationOptions, PublicKeyCredentialType,
        PublicKeyCredentialUserEntity, UserVerificationRequirement,
    },
    Bytes,
};

use crate::attestation::{
    verify_attestation, AttestationContext, AttestationFormat, AttestationType,
};
use crate::config::{unix_millis, unix_seconds};
use crate::crypto::{self, sha256};
use crate::error::{Warning, WebauthnError};
use crate::store::{AuthenticatorMetadata, CredentialRepository, MetadataService};
use crate::RelyingParty;

/// A pending registration ceremony: the options sent to the client plus the
/// server-side context needed to finish. The caller persists this value
/// between `start` and `finish` and removes it on the first finish attempt,
/// successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    /// The username the ceremony was started for.
    pub username: String,

    /// The options transmitted to the client as `publicKey`.
    pub public_key: PublicKeyCredentialCreationOptions,
}

/// The artifacts of a successful registration, carrying everything the
/// caller's credential store needs to persist.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResult {
    /// The new credential's ID.
    pub credential_id: Bytes,

    /// The user handle the credential is bound to.
    pub user_handle: Bytes,

    /// The credential public key, COSE_Key CBOR encoded.
    pub public_key_cose: Bytes,

    /// The attestation type the statement conveyed.
    pub attestation_type: AttestationType,

    /// Whether the attestation chained to trusted metadata. `false` for
    /// `none` and self attestation and whenever no metadata was found.
    pub attestation_trusted: bool,

    /// The metadata entry backing the trust decision, when one was found.
    pub attestation_metadata: Option<AuthenticatorMetadata>,

    /// The authenticator's initial signature counter.
    pub signature_count: u32,

    /// Non-fatal advisories collected during verification.
    pub warnings: Vec<Warning>,
}

impl<R: CredentialRepository, M: MetadataService> RelyingParty<R, M> {
    /// Begin a registration ceremony for `user`, producing the options to
    /// transmit to the client.
    ///
    /// Credentials already registered to the user are listed in
    /// `excludeCredentials` so the client refuses to re-register an
    /// authenticator that already holds one.
    pub fn start_registration(
        &self,
        user: PublicKeyCredentialUserEntity,
    ) -> Result<RegistrationRequest, WebauthnError> {
        if user.id.is_empty() || user.id.len() > 64 {
            return Err(WebauthnError::InvalidUserHandle);
        }

        let exclude_credentials = self.credentials.credential_ids_for_username(&user.name)?;
        let username = user.name.clone();

        let options = PublicKeyCredentialCreationOptions {
            rp: self.identity.clone(),
            user,
            challenge: self.new_challenge()?,
            pub_key_cred_params: self.pub_key_cred_params.clone(),
            timeout: self.policy.timeout,
            exclude_credentials: (!exclude_credentials.is_empty()).then_some(exclude_credentials),
            authenticator_selection: self.policy.authenticator_selection.clone(),
            attestation: self.policy.attestation,
            extensions: None,
        };

        Ok(RegistrationRequest {
            username,
            public_key: options,
        })
    }

    /// Finish a registration ceremony: validate `credential` against the
    /// pending `request` and produce the artifacts to persist.
    ///
    /// Performs the ordered checks of WebAuthn §7.1: credential type, client
    /// data type/challenge/origin/token-binding, rpIdHash, UP/UV flags,
    /// algorithm policy, attestation statement verification, trust
    /// determination, and the exclude-list collision check.
    pub fn finish_registration(
        &self,
        request: &RegistrationRequest,
        credential: &CreatedPublicKeyCredential,
    ) -> Result<RegistrationResult, WebauthnError> {
        let mut warnings = Vec::new();

        if credential.ty != PublicKeyCredentialType::PublicKey {
            return Err(WebauthnError::MalformedData(
                "credential type is not public-key".into(),
            ));
        }

        let client_data: CollectedClientData =
            serde_json::from_slice(&credential.response.client_data_json)
                .map_err(|_| WebauthnError::MalformedData("clientDataJSON".into()))?;

        if client_data.ty != ClientDataType::Create {
            return Err(WebauthnError::UnexpectedClientDataType);
        }

        let challenge = encoding::try_from_base64url(&client_data.challenge)
            .ok_or_else(|| WebauthnError::MalformedData("client data challenge".into()))?;
        if challenge != *request.public_key.challenge {
            return Err(WebauthnError::ChallengeMismatch);
        }

        self.assert_origin(&client_data.origin)?;
        self.token_binding.verify(client_data.token_binding.as_ref())?;

        let client_data_hash = sha256(&credential.response.client_data_json);

        let att_obj = AttestationObject::from_slice(&credential.response.attestation_object)?;
        let auth_data = &att_obj.auth_data;

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

        let acd = auth_data
            .attested_credential_data
            .as_ref()
            .filter(|_| auth_data.flags.contains(Flags::AT))
            .ok_or_else(|| {
                WebauthnError::MalformedData("attested credential data missing".into())
            })?;

        let credential_alg = crypto::cose_algorithm(&acd.key)?;
        if !request
            .public_key
            .pub_key_cred_params
            .iter()
            .any(|param| param.alg == credential_alg)
        {
            return Err(WebauthnError::UnsupportedAlgorithm(credential_alg.to_i64()));
        }

        self.assert_extensions(
            request.public_key.extensions.as_ref(),
            auth_data.extensions.as_ref(),
        )?;

        let now = self.clock.now();
        let format = AttestationFormat::from(att_obj.fmt.as_str());
        let verified = verify_attestation(
            &format,
            &att_obj.att_stmt,
            acd,
            auth_data,
            &att_obj.auth_data_bytes,
            &client_data_hash,
            &AttestationContext {
                now_millis: unix_millis(now),
                safetynet_skew_millis: self.policy.safetynet_clock_skew.as_millis() as i64,
            },
        )?;

        // Trust is decided against externally provided metadata: the chain
        // must validate against the metadata roots and the authenticator
        // status must be acceptable. Absent metadata the registration still
        // succeeds (policy permitting) but is marked untrusted.
        let leaf_cert = verified.trust_path.first().map(Vec::as_slice);
        let metadata = self.metadata.lookup(Some(&acd.aaguid), leaf_cert)?;
        let attestation_trusted = match &metadata {
            Some(metadata) => {
                let roots: Vec<Vec<u8>> = metadata
                    .trusted_root_certs
                    .iter()
                    .map(|root| root.to_vec())
                    .collect();
                metadata.status.is_acceptable()
                    && !verified.trust_path.is_empty()
                    && crypto::verify_cert_chain(&verified.trust_path, &roots, unix_seconds(now))
            }
            None => {
                warnings.push(Warning::NoMetadataFound);
                false
            }
        };
        if !attestation_trusted && !self.policy.allow_untrusted_attestation {
            return Err(WebauthnError::UntrustedAttestation);
        }

        // A credential ID colliding with an excluded credential means the
        // authenticator ignored the exclude list.
        if let Some(excluded) = &request.public_key.exclude_credentials {
            if excluded
                .iter()
                .any(|descriptor| descriptor.id.as_slice() == acd.credential_id())
            {
                return Err(WebauthnError::DisallowedCredential);
            }
        }

        let public_key_cose = acd
            .key
            .clone()
            .to_vec()
            .map_err(|_| WebauthnError::InternalCryptoError)?;

        Ok(RegistrationResult {
            credential_id: acd.credential_id().into(),
            user_handle: request.public_key.user.id.clone(),
            public_key_cose: public_key_cose.into(),
            attestation_type: verified.attestation_type,
            attestation_trusted,
            attestation_metadata: metadata,
            signature_count: auth_data.counter,
            warnings,
        })
    }
}
