use serde::Serialize;

/// Errors produced by Relying Party ceremonies.
///
/// Every fallible operation in this crate surfaces one of these kinds; no
/// error carries challenge, key or signature material, so the rendered
/// messages are safe to show to end users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "type", content = "content")]
#[non_exhaustive]
pub enum WebauthnError {
    /// A CBOR, JSON or fixed-layout structure could not be decoded.
    #[error("malformed data: {0}")]
    MalformedData(String),
    /// The client data type was not the one expected for this ceremony.
    #[error("unexpected client data type")]
    UnexpectedClientDataType,
    /// The challenge in the client data does not match the issued options.
    #[error("challenge does not match the pending ceremony")]
    ChallengeMismatch,
    /// The client data origin is not in the allowed origin set.
    #[error("origin is not allowed for this relying party")]
    OriginMismatch,
    /// The token binding reported by the client failed verification.
    #[error("token binding verification failed")]
    TokenBindingMismatch,
    /// The rpIdHash in the authenticator data does not match the RP ID.
    #[error("authenticator data is scoped to a different relying party")]
    RpIdHashMismatch,
    /// The authenticator did not report user presence.
    #[error("user presence flag not set")]
    UserPresenceMissing,
    /// Policy requires user verification but the UV flag was not set.
    #[error("user verification required but not performed")]
    UserVerificationRequired,
    /// The credential uses a COSE algorithm the configuration does not allow.
    #[error("unsupported cose algorithm {0}")]
    UnsupportedAlgorithm(i64),
    /// The attestation statement format identifier is not implemented.
    #[error("unknown attestation statement format `{0}`")]
    UnknownAttestationFormat(String),
    /// The attestation statement failed verification.
    #[error("invalid attestation statement: {0}")]
    InvalidAttestation(AttestationProblem),
    /// Policy requires trusted attestation and no trust could be established.
    #[error("attestation is not trusted")]
    UntrustedAttestation,
    /// The assertion signature did not verify against the stored public key.
    #[error("signature verification failed")]
    SignatureInvalid,
    /// No registered credential matches the presented credential ID.
    #[error("credential is not registered")]
    CredentialNotRegistered,
    /// The user handle in the response contradicts the stored user handle.
    #[error("user handle does not match the registered user")]
    UserHandleMismatch,
    /// The presented credential is not in the ceremony's allow list, or a
    /// newly attested credential collides with an excluded credential ID.
    #[error("credential is not allowed for this ceremony")]
    DisallowedCredential,
    /// The signature counter regressed and policy treats that as fatal.
    #[error("signature counter regressed")]
    CounterRollback,
    /// The authenticator returned extension output that was never requested.
    #[error("authenticator returned an unrequested extension")]
    UnrequestedExtension,
    /// A cryptographic primitive failed for reasons other than an invalid
    /// signature, e.g. malformed key material in the configuration.
    #[error("internal crypto error")]
    InternalCryptoError,
    /// The external credential repository or metadata service failed.
    #[error("credential store error: {0}")]
    InternalStoreError(String),
    /// The user handle must be between 1 and 64 bytes.
    #[error("user handle length must be between 1 and 64 bytes")]
    InvalidUserHandle,
    /// The configured RP ID is not a registrable domain.
    #[error("relying party id is invalid")]
    InvalidRpId,
    /// An allowed origin has no domain part to scope credentials to.
    #[error("allowed origin is missing a domain")]
    OriginMissingDomain,
}

impl From<webauthn_rp_types::ctap2::DecodeError> for WebauthnError {
    fn from(err: webauthn_rp_types::ctap2::DecodeError) -> Self {
        WebauthnError::MalformedData(err.to_string())
    }
}

/// The reason an attestation statement was rejected, carried inside
/// [`WebauthnError::InvalidAttestation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[non_exhaustive]
pub enum AttestationProblem {
    /// The statement is not a CBOR map of the shape its format requires.
    #[error("statement is malformed")]
    MalformedStatement,
    /// A `none` statement must be an empty map.
    #[error("statement must be empty for the `none` format")]
    StatementNotEmpty,
    /// The statement is missing its `alg` entry.
    #[error("algorithm missing")]
    AlgorithmMissing,
    /// Self attestation must use the credential public key's algorithm.
    #[error("algorithm does not match the credential public key")]
    AlgorithmMismatch,
    /// The statement is missing its `sig` entry.
    #[error("signature missing")]
    SignatureMissing,
    /// The attestation signature did not verify.
    #[error("signature verification failed")]
    SignatureInvalid,
    /// The statement requires a certificate chain and none was present.
    #[error("certificate chain missing")]
    CertificateChainMissing,
    /// The certificate chain could not be parsed or has the wrong shape.
    #[error("certificate chain invalid")]
    CertificateChainInvalid,
    /// The attestation certificate violates its profile requirements.
    #[error("attestation certificate requirements not met")]
    CertificateRequirementsNotMet,
    /// The certificate's AAGUID extension contradicts the authenticator data.
    #[error("certificate aaguid does not match authenticator data")]
    AaguidMismatch,
    /// A nonce or challenge embedded in the statement does not match the
    /// ceremony's client data hash.
    #[error("statement nonce does not match the ceremony")]
    NonceMismatch,
    /// The android key authorization lists do not bind the key to this RP.
    #[error("key authorization requirements not met")]
    KeyAuthorizationInvalid,
    /// The public key conveyed by the statement differs from the credential
    /// public key.
    #[error("statement public key does not match the credential")]
    PublicKeyMismatch,
    /// The statement is missing its `response` entry.
    #[error("response missing")]
    ResponseMissing,
    /// The embedded response (e.g. a SafetyNet JWS) could not be parsed or
    /// verified.
    #[error("response invalid")]
    ResponseInvalid,
    /// The SafetyNet leaf certificate was not issued to attest.android.com.
    #[error("attestation hostname invalid")]
    HostnameInvalid,
    /// The SafetyNet response reports a failed integrity check.
    #[error("device integrity check failed")]
    IntegrityCheckFailed,
    /// The statement timestamp is outside the allowed clock skew.
    #[error("statement timestamp out of range")]
    TimestampOutOfRange,
    /// The statement declares a version this implementation does not support.
    #[error("statement version unsupported")]
    VersionUnsupported,
    /// The TPM public area does not describe the credential public key.
    #[error("tpm public area does not match the credential")]
    PubAreaMismatch,
    /// The TPM certInfo extraData does not hash the attested payload.
    #[error("tpm extra data mismatch")]
    ExtraDataMismatch,
    /// The TPM attested name does not match the public area digest.
    #[error("tpm certify name invalid")]
    CertifyNameInvalid,
    /// ECDAA attestation is not supported.
    #[error("ecdaa attestation unsupported")]
    EcdaaUnsupported,
}

/// Non-fatal advisories collected while a ceremony succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Warning {
    /// No authenticator metadata was found, so no trust decision could be
    /// made for the attestation.
    NoMetadataFound,
    /// An ECDSA signature verified but carried a non-normalized (high) S
    /// value.
    NonCanonicalSignature,
    /// Both the stored and the asserted signature counter are zero; the
    /// authenticator does not implement a counter.
    SignatureCounterZero,
    /// The signature counter regressed but policy allows the assertion.
    SignatureCounterRollback,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            Warning::NoMetadataFound => "NoMetadataFound",
            Warning::NonCanonicalSignature => "NonCanonicalSignature",
            Warning::SignatureCounterZero => "SignatureCounterZero",
            Warning::SignatureCounterRollback => "SignatureCounterRollback",
        };
        f.write_str(name)
    }
}
