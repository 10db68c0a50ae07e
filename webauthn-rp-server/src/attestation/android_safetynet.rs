//! The `android-safetynet` attestation statement format, WebAuthn §8.5.
//!
//! The statement wraps a SafetyNet attestation response: a compact JWS whose
//! header conveys the certificate chain, whose leaf must be issued to
//! `attest.android.com`, and whose payload binds the ceremony through a
//! nonce over `SHA256(authData ∥ clientDataHash)`.

use ciborium::value::Value;
use coset::iana;
use serde::Deserialize;
use webauthn_rp_types::{encoding, Bytes};

use super::{
    attestation_payload, certificate, entry, invalid, stmt_entries, AttestationContext,
    AttestationType, VerifiedAttestation,
};
use crate::crypto::{self, sha256};
use crate::error::{AttestationProblem, WebauthnError};

/// The JOSE header of the SafetyNet JWS.
#[derive(Debug, Deserialize)]
struct JwsHeader {
    alg: String,
    x5c: Vec<String>,
}

/// The SafetyNet attestation response claims the Relying Party validates.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SafetyNetResponse {
    timestamp_ms: i64,
    nonce: String,
    cts_profile_match: bool,
    #[serde(default)]
    #[allow(dead_code)]
    basic_integrity: bool,
}

pub(super) fn verify(
    att_stmt: &Value,
    auth_data_bytes: &[u8],
    client_data_hash: &[u8; 32],
    ctx: &AttestationContext,
) -> Result<VerifiedAttestation, WebauthnError> {
    let entries = stmt_entries(att_stmt)?;

    // `ver` is reserved; there is only one response format but the entry
    // must be present and textual.
    entry(entries, "ver")
        .and_then(Value::as_text)
        .ok_or(invalid(AttestationProblem::VersionUnsupported))?;

    let response = entry(entries, "response")
        .and_then(Value::as_bytes)
        .ok_or(invalid(AttestationProblem::ResponseMissing))?;
    let token =
        std::str::from_utf8(response).map_err(|_| invalid(AttestationProblem::ResponseInvalid))?;

    let (chain, claims) = verify_jws(token)?;

    // nonce = base64(SHA256(authData ∥ clientDataHash))
    let expected_nonce = sha256(&attestation_payload(auth_data_bytes, client_data_hash));
    let nonce = encoding::try_from_base64(&claims.nonce)
        .or_else(|| encoding::try_from_base64url(&claims.nonce))
        .ok_or(invalid(AttestationProblem::ResponseInvalid))?;
    if nonce != expected_nonce {
        return Err(invalid(AttestationProblem::NonceMismatch));
    }

    if !claims.cts_profile_match {
        return Err(invalid(AttestationProblem::IntegrityCheckFailed));
    }

    // The attestation must be fresh relative to the RP clock.
    if (ctx.now_millis - claims.timestamp_ms).abs() > ctx.safetynet_skew_millis {
        return Err(invalid(AttestationProblem::TimestampOutOfRange));
    }

    Ok(VerifiedAttestation {
        attestation_type: AttestationType::Basic,
        trust_path: chain,
    })
}

/// Parse and verify the compact JWS, returning the certificate chain from
/// the header and the validated claims.
fn verify_jws(token: &str) -> Result<(Vec<Vec<u8>>, SafetyNetResponse), WebauthnError> {
    let bad = || invalid(AttestationProblem::ResponseInvalid);

    let (signed_part, signature_b64) = token.rsplit_once('.').ok_or_else(bad)?;
    let (header_b64, payload_b64) = signed_part.split_once('.').ok_or_else(bad)?;

    let header_json = encoding::try_from_base64url(header_b64).ok_or_else(bad)?;
    let header: JwsHeader = serde_json::from_slice(&header_json).map_err(|_| bad())?;

    // x5c entries are standard base64 DER certificates, leaf first.
    let chain: Vec<Vec<u8>> = header
        .x5c
        .iter()
        .map(|cert| {
            Bytes::try_from(cert.as_str())
                .map(Vec::from)
                .map_err(|_| bad())
        })
        .collect::<Result<_, _>>()?;
    if chain.is_empty() {
        return Err(bad());
    }

    let leaf = crypto::parse_certificate(&chain[0]).map_err(|_| bad())?;

    // §8.5: the attestation certificate must be issued to the hostname
    // "attest.android.com".
    let common_name = certificate::common_name(&leaf)
        .ok_or(invalid(AttestationProblem::HostnameInvalid))?;
    if common_name != "attest.android.com" {
        return Err(invalid(AttestationProblem::HostnameInvalid));
    }

    let alg = match header.alg.as_str() {
        "RS256" => iana::Algorithm::RS256,
        "ES256" => iana::Algorithm::ES256,
        _ => return Err(bad()),
    };

    let signature = encoding::try_from_base64url(signature_b64).ok_or_else(bad)?;
    crypto::verify_with_certificate(alg, &leaf, signed_part.as_bytes(), &signature)
        .map_err(|_| invalid(AttestationProblem::SignatureInvalid))?;

    let payload_json = encoding::try_from_base64url(payload_b64).ok_or_else(bad)?;
    let claims: SafetyNetResponse = serde_json::from_slice(&payload_json).map_err(|_| bad())?;

    Ok((chain, claims))
}
