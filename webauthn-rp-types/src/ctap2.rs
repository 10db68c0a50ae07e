//! Binary structures defined by the CTAP2 specification which surface in
//! WebAuthn responses: the authenticator data layout, attested credential
//! data, and the attestation object envelope.
//!
//! The decoders in this module are written for the Relying Party side: they
//! never trust a length field before checking it against the remaining
//! input, and they reject any trailing bytes once the structure is complete.

mod aaguid;
mod attestation_object;
mod authenticator_data;
mod flags;

pub use self::{
    aaguid::Aaguid,
    attestation_object::AttestationObject,
    authenticator_data::{AttestedCredentialData, AuthenticatorData},
    flags::Flags,
};

use ciborium::value::Value;

/// Structural failures raised while decoding authenticator supplied binary
/// data. These are deliberately free of any payload contents so they can be
/// shown to end users without leaking ceremony material.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The input ended before the structure was complete.
    #[error("data ended before the structure was complete")]
    UnexpectedEnd,
    /// Bytes remained after the structure was fully decoded.
    #[error("trailing bytes after the end of the structure")]
    TrailingBytes,
    /// The flags byte carries bits outside the defined set.
    #[error("unknown bits set in the authenticator data flags")]
    InvalidFlags,
    /// A credential ID may be at most 1023 bytes long.
    #[error("credential id length exceeds 1023 bytes")]
    CredentialIdTooLong,
    /// The embedded CBOR could not be decoded.
    #[error("malformed cbor item")]
    InvalidCbor,
    /// The embedded COSE key could not be decoded.
    #[error("malformed cose key")]
    InvalidCoseKey,
    /// CBOR maps with duplicate keys are rejected.
    #[error("duplicate key in cbor map")]
    DuplicateMapKey,
    /// A CBOR map was expected at this position.
    #[error("expected a cbor map")]
    ExpectedMap,
    /// A required map entry was absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    /// A map entry had an unexpected type or value.
    #[error("invalid value for field `{0}`")]
    InvalidField(&'static str),
}

/// Assert that no key appears twice in a decoded CBOR map.
pub(crate) fn ensure_unique_keys(entries: &[(Value, Value)]) -> Result<(), DecodeError> {
    for (idx, (key, _)) in entries.iter().enumerate() {
        if entries[idx + 1..].iter().any(|(other, _)| other == key) {
            return Err(DecodeError::DuplicateMapKey);
        }
    }
    Ok(())
}
