//! End-to-end ceremony tests: a software authenticator is emulated in-process
//! with a P-256 key, and full registration and authentication payloads are
//! driven through the façade.

use ciborium::cbor;
use coset::{iana, CoseKey, CoseKeyBuilder};
use p256::ecdsa::signature::Signer;
use url::Url;

use webauthn_rp_types::{
    crypto::sha256,
    ctap2::{Aaguid, AttestationObject, AttestedCredentialData, AuthenticatorData, Flags},
    encoding,
    webauthn::{
        AuthenticatedPublicKeyCredential, AuthenticatorAssertionResponse,
        AuthenticatorAttestationResponse, ClientDataType, CollectedClientData,
        CreatedPublicKeyCredential, PublicKeyCredentialRpEntity, PublicKeyCredentialType,
        PublicKeyCredentialUserEntity,
    },
    Bytes,
};

use crate::config::ChallengeGenerator;
use crate::store::{MemoryRepository, RegisteredCredential};
use crate::{AttestationType, RelyingParty, Warning, WebauthnError};

const RP_ID: &str = "example.com";
const ORIGIN: &str = "https://example.com";
const CHALLENGE: [u8; 16] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    0x10,
];

struct FixedChallenge(Vec<u8>);

impl ChallengeGenerator for FixedChallenge {
    fn generate(&self) -> Vec<u8> {
        self.0.clone()
    }
}

fn rp_entity() -> PublicKeyCredentialRpEntity {
    PublicKeyCredentialRpEntity {
        id: RP_ID.into(),
        name: "Example".into(),
        icon: None,
    }
}

fn alice() -> PublicKeyCredentialUserEntity {
    PublicKeyCredentialUserEntity {
        id: Bytes::from(b"alice-handle".as_slice()),
        name: "alice".into(),
        display_name: "Alice".into(),
        icon: None,
    }
}

fn test_rp() -> RelyingParty<MemoryRepository> {
    RelyingParty::builder(rp_entity(), MemoryRepository::new())
        .allowed_origin(Url::parse(ORIGIN).unwrap())
        .challenge_generator(FixedChallenge(CHALLENGE.to_vec()))
        .build()
        .unwrap()
}

/// A minimal software authenticator: an ES256 key pair with a fixed
/// credential ID.
struct SoftKey {
    signing: p256::ecdsa::SigningKey,
    credential_id: Vec<u8>,
}

impl SoftKey {
    fn new() -> Self {
        let private = p256::SecretKey::random(&mut rand::thread_rng());
        Self {
            signing: p256::ecdsa::SigningKey::from(&private),
            credential_id: vec![0x42; 24],
        }
    }

    fn cose_key(&self) -> CoseKey {
        let point = self.signing.verifying_key().to_encoded_point(false);
        CoseKeyBuilder::new_ec2_pub_key(
            iana::EllipticCurve::P_256,
            point.x().unwrap().to_vec(),
            point.y().unwrap().to_vec(),
        )
        .algorithm(iana::Algorithm::ES256)
        .build()
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let signature: p256::ecdsa::Signature = self.signing.sign(payload);
        // Authenticators emit low-S signatures; match that so no
        // non-canonical-signature advisory muddies the assertions.
        let signature = signature.normalize_s().unwrap_or(signature);
        signature.to_der().as_bytes().to_vec()
    }

    /// A packed self-attestation registration response over `challenge`.
    fn register(&self, challenge: &[u8], origin: &str) -> CreatedPublicKeyCredential {
        let client_data = client_data_json(ClientDataType::Create, challenge, origin);

        let acd = AttestedCredentialData::new(
            Aaguid::new_empty(),
            self.credential_id.clone(),
            self.cose_key(),
        )
        .unwrap();
        let auth_data = AuthenticatorData::new(RP_ID, 0)
            .set_flags(Flags::UP)
            .set_attested_credential_data(acd);
        let auth_data_bytes = auth_data.to_vec();

        let mut payload = auth_data_bytes.clone();
        payload.extend_from_slice(&sha256(&client_data));
        let att_stmt = cbor!({
            "alg" => -7,
            "sig" => ciborium::value::Value::Bytes(self.sign(&payload)),
        })
        .unwrap();

        let attestation_object = AttestationObject {
            fmt: "packed".into(),
            auth_data,
            auth_data_bytes,
            att_stmt,
        };

        CreatedPublicKeyCredential {
            id: self.credential_id.as_slice().into(),
            ty: PublicKeyCredentialType::PublicKey,
            response: AuthenticatorAttestationResponse {
                client_data_json: client_data.into(),
                attestation_object: attestation_object.to_vec().into(),
                transports: None,
            },
        }
    }

    /// An assertion response over `challenge` with the given counter.
    fn assert(
        &self,
        challenge: &[u8],
        origin: &str,
        counter: u32,
        user_handle: Option<&[u8]>,
    ) -> AuthenticatedPublicKeyCredential {
        let client_data = client_data_json(ClientDataType::Get, challenge, origin);
        let auth_data_bytes = AuthenticatorData::new(RP_ID, counter)
            .set_flags(Flags::UP)
            .to_vec();

        let mut payload = auth_data_bytes.clone();
        payload.extend_from_slice(&sha256(&client_data));

        AuthenticatedPublicKeyCredential {
            id: self.credential_id.as_slice().into(),
            ty: PublicKeyCredentialType::PublicKey,
            response: AuthenticatorAssertionResponse {
                client_data_json: client_data.into(),
                authenticator_data: auth_data_bytes.into(),
                signature: self.sign(&payload).into(),
                user_handle: user_handle.map(Bytes::from),
            },
        }
    }
}

fn client_data_json(ty: ClientDataType, challenge: &[u8], origin: &str) -> Vec<u8> {
    let collected = CollectedClientData {
        ty,
        challenge: encoding::base64url(challenge),
        origin: origin.into(),
        cross_origin: None,
        token_binding: None,
        unknown_keys: Default::default(),
    };
    serde_json::to_vec(&collected).unwrap()
}

/// Register the key and persist the result, as a caller would.
fn register_and_store(rp: &RelyingParty<MemoryRepository>, key: &SoftKey, counter: u32) {
    let request = rp.start_registration(alice()).unwrap();
    let result = rp
        .finish_registration(&request, &key.register(&CHALLENGE, ORIGIN))
        .unwrap();

    rp.credentials().add_user("alice", result.user_handle.clone());
    rp.credentials().add_credential(RegisteredCredential {
        credential_id: result.credential_id,
        user_handle: result.user_handle,
        public_key_cose: result.public_key_cose,
        signature_count: counter,
    });
}

#[test]
fn happy_registration_packed_self_attestation() {
    let rp = test_rp();
    let key = SoftKey::new();

    let request = rp.start_registration(alice()).unwrap();
    assert_eq!(request.public_key.challenge.as_slice(), &CHALLENGE);

    let result = rp
        .finish_registration(&request, &key.register(&CHALLENGE, ORIGIN))
        .unwrap();

    assert_eq!(result.attestation_type, AttestationType::SelfAttestation);
    assert!(!result.attestation_trusted);
    assert_eq!(result.warnings, vec![Warning::NoMetadataFound]);
    assert_eq!(result.credential_id.as_slice(), &[0x42; 24]);
    assert_eq!(result.signature_count, 0);

    // Round trip: the returned key re-decodes to the same cose key.
    use coset::CborSerializable;
    let decoded = CoseKey::from_slice(&result.public_key_cose).unwrap();
    assert_eq!(decoded, key.cose_key());
}

#[test]
fn registration_with_wrong_challenge_fails() {
    let rp = test_rp();
    let key = SoftKey::new();
    let request = rp.start_registration(alice()).unwrap();

    let other_challenge = [0xaau8; 16];
    assert_eq!(
        rp.finish_registration(&request, &key.register(&other_challenge, ORIGIN)),
        Err(WebauthnError::ChallengeMismatch)
    );
}

#[test]
fn registration_from_wrong_origin_fails() {
    let rp = test_rp();
    let key = SoftKey::new();
    let request = rp.start_registration(alice()).unwrap();

    assert_eq!(
        rp.finish_registration(
            &request,
            &key.register(&CHALLENGE, "https://evil.example.net")
        ),
        Err(WebauthnError::OriginMismatch)
    );
}

#[test]
fn registration_with_unknown_attestation_format_fails() {
    let rp = test_rp();
    let key = SoftKey::new();
    let request = rp.start_registration(alice()).unwrap();

    let mut credential = key.register(&CHALLENGE, ORIGIN);
    let mut att_obj =
        AttestationObject::from_slice(&credential.response.attestation_object).unwrap();
    att_obj.fmt = "bogus-format".into();
    credential.response.attestation_object = att_obj.to_vec().into();

    assert_eq!(
        rp.finish_registration(&request, &credential),
        Err(WebauthnError::UnknownAttestationFormat("bogus-format".into()))
    );
}

#[test]
fn registration_rejects_excluded_credential() {
    let rp = test_rp();
    let key = SoftKey::new();

    // First registration stores the credential.
    register_and_store(&rp, &key, 0);

    // A second ceremony for the same user excludes the stored credential id,
    // and the authenticator answers with the same credential anyway.
    let request = rp.start_registration(alice()).unwrap();
    assert!(request.public_key.exclude_credentials.is_some());
    assert_eq!(
        rp.finish_registration(&request, &key.register(&CHALLENGE, ORIGIN)),
        Err(WebauthnError::DisallowedCredential)
    );
}

#[test]
fn happy_authentication() {
    let rp = test_rp();
    let key = SoftKey::new();
    register_and_store(&rp, &key, 5);

    let request = rp.start_assertion(Some("alice")).unwrap();
    let result = rp
        .finish_assertion(&request, &key.assert(&CHALLENGE, ORIGIN, 6, None))
        .unwrap();

    assert!(result.success);
    assert!(result.signature_counter_valid);
    assert_eq!(result.signature_count, 6);
    assert_eq!(result.username, "alice");
    assert_eq!(result.user_handle.as_slice(), b"alice-handle");
    assert!(result.warnings.is_empty());
}

#[test]
fn replayed_assertion_fails_on_counter() {
    let rp = test_rp();
    let key = SoftKey::new();
    register_and_store(&rp, &key, 5);

    let request = rp.start_assertion(Some("alice")).unwrap();
    let response = key.assert(&CHALLENGE, ORIGIN, 6, None);
    let result = rp.finish_assertion(&request, &response).unwrap();
    rp.credentials()
        .update_signature_count(&response.id, result.signature_count);

    // Replaying the exact payload: 6 is not greater than 6.
    let request = rp.start_assertion(Some("alice")).unwrap();
    assert_eq!(
        rp.finish_assertion(&request, &response),
        Err(WebauthnError::CounterRollback)
    );
}

#[test]
fn counter_rollback_is_advisory_when_policy_allows() {
    let rp = RelyingParty::builder(rp_entity(), MemoryRepository::new())
        .allowed_origin(Url::parse(ORIGIN).unwrap())
        .challenge_generator(FixedChallenge(CHALLENGE.to_vec()))
        .validate_signature_counter(false)
        .build()
        .unwrap();
    let key = SoftKey::new();
    register_and_store(&rp, &key, 6);

    let request = rp.start_assertion(Some("alice")).unwrap();
    let result = rp
        .finish_assertion(&request, &key.assert(&CHALLENGE, ORIGIN, 6, None))
        .unwrap();

    assert!(result.success);
    assert!(!result.signature_counter_valid);
    assert_eq!(result.warnings, vec![Warning::SignatureCounterRollback]);
}

#[test]
fn assertion_from_wrong_origin_fails() {
    let rp = test_rp();
    let key = SoftKey::new();
    register_and_store(&rp, &key, 5);

    let request = rp.start_assertion(Some("alice")).unwrap();
    assert_eq!(
        rp.finish_assertion(
            &request,
            &key.assert(&CHALLENGE, "https://evil.example.com", 6, None)
        ),
        Err(WebauthnError::OriginMismatch)
    );
}

#[test]
fn flipped_signature_fails() {
    let rp = test_rp();
    let key = SoftKey::new();
    register_and_store(&rp, &key, 5);

    let request = rp.start_assertion(Some("alice")).unwrap();
    let mut response = key.assert(&CHALLENGE, ORIGIN, 6, None);
    let last = response.response.signature.len() - 1;
    response.response.signature[last] ^= 0x01;

    assert_eq!(
        rp.finish_assertion(&request, &response),
        Err(WebauthnError::SignatureInvalid)
    );
}

#[test]
fn tampered_authenticator_data_fails() {
    let rp = test_rp();
    let key = SoftKey::new();
    register_and_store(&rp, &key, 5);

    let request = rp.start_assertion(Some("alice")).unwrap();
    let mut response = key.assert(&CHALLENGE, ORIGIN, 6, None);
    // Flip a counter byte after signing.
    response.response.authenticator_data[36] ^= 0x01;

    assert_eq!(
        rp.finish_assertion(&request, &response),
        Err(WebauthnError::SignatureInvalid)
    );
}

#[test]
fn tampered_client_data_fails() {
    let rp = test_rp();
    let key = SoftKey::new();
    register_and_store(&rp, &key, 5);

    let request = rp.start_assertion(Some("alice")).unwrap();
    let mut response = key.assert(&CHALLENGE, ORIGIN, 6, None);
    // Whitespace keeps the JSON valid but changes the hash.
    let mut json = response.response.client_data_json.to_vec();
    json.push(b' ');
    response.response.client_data_json = json.into();

    assert_eq!(
        rp.finish_assertion(&request, &response),
        Err(WebauthnError::SignatureInvalid)
    );
}

#[test]
fn usernameless_assertion_resolves_user_by_handle() {
    let rp = test_rp();
    let key = SoftKey::new();
    register_and_store(&rp, &key, 5);

    let request = rp.start_assertion(None).unwrap();
    assert!(request.public_key.allow_credentials.is_none());

    let result = rp
        .finish_assertion(
            &request,
            &key.assert(&CHALLENGE, ORIGIN, 6, Some(b"alice-handle")),
        )
        .unwrap();

    assert_eq!(result.username, "alice");
    assert_eq!(result.user_handle.as_slice(), b"alice-handle");
}

#[test]
fn unknown_credential_is_not_registered() {
    let rp = test_rp();
    let key = SoftKey::new();
    register_and_store(&rp, &key, 5);

    let request = rp.start_assertion(None).unwrap();
    assert_eq!(
        rp.finish_assertion(
            &request,
            &key.assert(&CHALLENGE, ORIGIN, 6, Some(b"nobody-handle")),
        ),
        Err(WebauthnError::CredentialNotRegistered)
    );
}

#[test]
fn assertion_outside_allow_list_is_rejected() {
    let rp = test_rp();
    let key = SoftKey::new();
    register_and_store(&rp, &key, 5);

    let request = rp.start_assertion(Some("alice")).unwrap();
    let mut response = key.assert(&CHALLENGE, ORIGIN, 6, None);
    response.id = Bytes::from(vec![0x99; 24]);

    assert_eq!(
        rp.finish_assertion(&request, &response),
        Err(WebauthnError::DisallowedCredential)
    );
}

#[test]
fn counter_monotonicity_over_a_sequence() {
    let rp = test_rp();
    let key = SoftKey::new();
    register_and_store(&rp, &key, 0);

    for counter in [1u32, 2, 3] {
        let request = rp.start_assertion(Some("alice")).unwrap();
        let result = rp
            .finish_assertion(&request, &key.assert(&CHALLENGE, ORIGIN, counter, None))
            .unwrap();
        assert!(result.signature_counter_valid);
        rp.credentials()
            .update_signature_count(&key.credential_id, result.signature_count);
    }

    // Swapping the next two counters: the out-of-order one must fail.
    let request = rp.start_assertion(Some("alice")).unwrap();
    let result = rp
        .finish_assertion(&request, &key.assert(&CHALLENGE, ORIGIN, 5, None))
        .unwrap();
    assert!(result.signature_counter_valid);
    rp.credentials().update_signature_count(&key.credential_id, 5);

    let request = rp.start_assertion(Some("alice")).unwrap();
    assert_eq!(
        rp.finish_assertion(&request, &key.assert(&CHALLENGE, ORIGIN, 4, None)),
        Err(WebauthnError::CounterRollback)
    );
}

#[test]
fn subdomain_origin_honors_policy() {
    let rp = RelyingParty::builder(rp_entity(), MemoryRepository::new())
        .allowed_origin(Url::parse(ORIGIN).unwrap())
        .challenge_generator(FixedChallenge(CHALLENGE.to_vec()))
        .allow_origin_subdomain(true)
        .build()
        .unwrap();
    let key = SoftKey::new();

    let request = rp.start_registration(alice()).unwrap();
    rp.finish_registration(
        &request,
        &key.register(&CHALLENGE, "https://login.example.com"),
    )
    .expect("subdomain origin should be accepted under the policy");

    // Without the policy flag the same origin is rejected.
    let strict = test_rp();
    let request = strict.start_registration(alice()).unwrap();
    assert_eq!(
        strict.finish_registration(
            &request,
            &key.register(&CHALLENGE, "https://login.example.com")
        ),
        Err(WebauthnError::OriginMismatch)
    );
}

#[test]
fn user_verification_policy_is_enforced() {
    use webauthn_rp_types::webauthn::UserVerificationRequirement;

    let rp = RelyingParty::builder(rp_entity(), MemoryRepository::new())
        .allowed_origin(Url::parse(ORIGIN).unwrap())
        .challenge_generator(FixedChallenge(CHALLENGE.to_vec()))
        .user_verification(UserVerificationRequirement::Required)
        .build()
        .unwrap();
    let key = SoftKey::new();

    // The software key only sets UP, never UV.
    let request = rp.start_registration(alice()).unwrap();
    assert_eq!(
        rp.finish_registration(&request, &key.register(&CHALLENGE, ORIGIN)),
        Err(WebauthnError::UserVerificationRequired)
    );
}

#[test]
fn verification_is_idempotent() {
    let rp = test_rp();
    let key = SoftKey::new();
    register_and_store(&rp, &key, 5);

    let request = rp.start_assertion(Some("alice")).unwrap();
    let response = key.assert(&CHALLENGE, ORIGIN, 6, None);

    let first = rp.finish_assertion(&request, &response).unwrap();
    let second = rp.finish_assertion(&request, &response).unwrap();
    assert_eq!(first.signature_count, second.signature_count);
    assert_eq!(first.signature_counter_valid, second.signature_counter_valid);
    assert_eq!(first.username, second.username);
}

#[test]
fn builder_rejects_unscoped_origins() {
    let result = RelyingParty::builder(rp_entity(), MemoryRepository::new())
        .allowed_origin(Url::parse("https://other.net").unwrap())
        .build();
    assert!(matches!(result, Err(WebauthnError::InvalidRpId)));

    let result = RelyingParty::builder(rp_entity(), MemoryRepository::new()).build();
    assert!(matches!(result, Err(WebauthnError::OriginMissingDomain)));
}
