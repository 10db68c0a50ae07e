//! Attestation statement verification.
//!
//! Each WebAuthn attestation statement format gets its own verifier; the
//! formats are a closed set dispatched by a match on
//! [`AttestationFormat`], with unknown identifiers collected into
//! [`AttestationFormat::Unknown`] and rejected. Every verifier receives the
//! decoded statement, the attested credential data, the raw authenticator
//! data bytes and the client data hash, and produces the attestation type
//! together with the trust path the trust decision is made over.

use ciborium::value::Value;
use coset::iana::{self, EnumI64};
use serde::Serialize;
use webauthn_rp_types::ctap2::{AttestedCredentialData, AuthenticatorData};

use crate::error::{AttestationProblem, WebauthnError};

pub(crate) mod certificate;

mod android_key;
mod android_safetynet;
mod apple;
mod fido_u2f;
mod none;
mod packed;
mod tpm;

/// The registered attestation statement formats, plus a sink for identifiers
/// this implementation does not know.
///
/// <https://www.iana.org/assignments/webauthn/webauthn.xhtml#webauthn-attestation-statement-format-ids>
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationFormat {
    /// The WebAuthn-optimized `packed` format.
    Packed,
    /// TPM 2.0 attestation.
    Tpm,
    /// Android hardware key attestation.
    AndroidKey,
    /// The legacy Android SafetyNet JWS attestation.
    AndroidSafetyNet,
    /// Old U2F attestation.
    FidoU2f,
    /// Apple anonymous attestation.
    Apple,
    /// No attestation.
    None,
    /// Any format identifier not listed above.
    Unknown(String),
}

impl From<&str> for AttestationFormat {
    fn from(fmt: &str) -> Self {
        match fmt {
            "packed" => AttestationFormat::Packed,
            "tpm" => AttestationFormat::Tpm,
            "android-key" => AttestationFormat::AndroidKey,
            "android-safetynet" => AttestationFormat::AndroidSafetyNet,
            "fido-u2f" => AttestationFormat::FidoU2f,
            "apple" => AttestationFormat::Apple,
            "none" => AttestationFormat::None,
            other => AttestationFormat::Unknown(other.to_owned()),
        }
    }
}

/// The attestation type conveyed by a verified statement.
///
/// <https://w3c.github.io/webauthn/#sctn-attestation-types>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttestationType {
    /// No attestation statement was provided.
    None,
    /// The credential key itself signed the statement.
    SelfAttestation,
    /// A per-model attestation key signed the statement.
    Basic,
    /// An attestation CA (including anonymization CAs) vouches for the
    /// authenticator.
    AttCa,
    /// The statement does not distinguish between Basic and AttCA.
    BasicOrAttCa,
}

/// The outcome of verifying an attestation statement: the attestation type
/// and the certificate trust path (DER, leaf first; empty for `none` and
/// self attestation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VerifiedAttestation {
    pub attestation_type: AttestationType,
    pub trust_path: Vec<Vec<u8>>,
}

/// Ambient inputs some verifiers need beyond the ceremony payload.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AttestationContext {
    /// The RP clock at verification time, in unix milliseconds.
    pub now_millis: i64,
    /// Maximum tolerated skew for statement timestamps, in milliseconds.
    pub safetynet_skew_millis: i64,
}

/// Dispatch to the verifier for `format`.
pub(crate) fn verify_attestation(
    format: &AttestationFormat,
    att_stmt: &Value,
    acd: &AttestedCredentialData,
    auth_data: &AuthenticatorData,
    auth_data_bytes: &[u8],
    client_data_hash: &[u8; 32],
    ctx: &AttestationContext,
) -> Result<VerifiedAttestation, WebauthnError> {
    match format {
        AttestationFormat::None => none::verify(att_stmt),
        AttestationFormat::Packed => {
            packed::verify(att_stmt, acd, auth_data_bytes, client_data_hash)
        }
        AttestationFormat::FidoU2f => {
            fido_u2f::verify(att_stmt, acd, auth_data, client_data_hash)
        }
        AttestationFormat::AndroidKey => {
            android_key::verify(att_stmt, acd, auth_data_bytes, client_data_hash)
        }
        AttestationFormat::AndroidSafetyNet => {
            android_safetynet::verify(att_stmt, auth_data_bytes, client_data_hash, ctx)
        }
        AttestationFormat::Tpm => tpm::verify(att_stmt, acd, auth_data_bytes, client_data_hash),
        AttestationFormat::Apple => {
            apple::verify(att_stmt, acd, auth_data_bytes, client_data_hash)
        }
        AttestationFormat::Unknown(tag) => {
            Err(WebauthnError::UnknownAttestationFormat(tag.clone()))
        }
    }
}

pub(crate) fn invalid(problem: AttestationProblem) -> WebauthnError {
    WebauthnError::InvalidAttestation(problem)
}

/// View an attestation statement as its CBOR map entries.
fn stmt_entries(att_stmt: &Value) -> Result<&[(Value, Value)], WebauthnError> {
    match att_stmt {
        Value::Map(entries) => Ok(entries),
        _ => Err(invalid(AttestationProblem::MalformedStatement)),
    }
}

fn entry<'a>(entries: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    entries.iter().find_map(|(k, v)| match k {
        Value::Text(text) if text == key => Some(v),
        _ => None,
    })
}

/// The statement's `alg` entry as an IANA algorithm.
fn alg_entry(entries: &[(Value, Value)]) -> Result<iana::Algorithm, WebauthnError> {
    let value = entry(entries, "alg").ok_or(invalid(AttestationProblem::AlgorithmMissing))?;
    let raw = value
        .as_integer()
        .and_then(|i| i64::try_from(i128::from(i)).ok())
        .ok_or(invalid(AttestationProblem::MalformedStatement))?;
    iana::Algorithm::from_i64(raw).ok_or(WebauthnError::UnsupportedAlgorithm(raw))
}

/// The statement's `sig` entry.
fn sig_entry<'a>(entries: &'a [(Value, Value)]) -> Result<&'a [u8], WebauthnError> {
    entry(entries, "sig")
        .and_then(Value::as_bytes)
        .map(Vec::as_slice)
        .ok_or(invalid(AttestationProblem::SignatureMissing))
}

/// The statement's `x5c` entry: a non-empty array of DER certificates with
/// the attestation certificate first. `Ok(None)` when absent.
fn x5c_entry(entries: &[(Value, Value)]) -> Result<Option<Vec<Vec<u8>>>, WebauthnError> {
    let Some(value) = entry(entries, "x5c") else {
        return Ok(None);
    };
    let array = value
        .as_array()
        .ok_or(invalid(AttestationProblem::CertificateChainInvalid))?;
    if array.is_empty() {
        return Err(invalid(AttestationProblem::CertificateChainInvalid));
    }
    array
        .iter()
        .map(|cert| {
            cert.as_bytes()
                .map(|b| b.to_vec())
                .ok_or(invalid(AttestationProblem::CertificateChainInvalid))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// The concatenation `authData ∥ clientDataHash`, the payload most formats
/// sign over.
fn attestation_payload(auth_data_bytes: &[u8], client_data_hash: &[u8; 32]) -> Vec<u8> {
    auth_data_bytes
        .iter()
        .chain(client_data_hash.iter())
        .copied()
        .collect()
}
