//! The `apple` anonymous attestation statement format, WebAuthn §8.8.
//!
//! There is no signature in the statement itself: the leaf certificate is
//! freshly issued by Apple's anonymization CA over the credential public
//! key, with a nonce extension binding it to this ceremony.

use ciborium::value::Value;
use webauthn_rp_types::ctap2::AttestedCredentialData;

use super::{
    attestation_payload, certificate, invalid, stmt_entries, x5c_entry, AttestationType,
    VerifiedAttestation,
};
use crate::crypto::{self, sha256};
use crate::error::{AttestationProblem, WebauthnError};

pub(super) fn verify(
    att_stmt: &Value,
    acd: &AttestedCredentialData,
    auth_data_bytes: &[u8],
    client_data_hash: &[u8; 32],
) -> Result<VerifiedAttestation, WebauthnError> {
    let entries = stmt_entries(att_stmt)?;
    let chain =
        x5c_entry(entries)?.ok_or(invalid(AttestationProblem::CertificateChainMissing))?;
    let leaf = crypto::parse_certificate(&chain[0])
        .map_err(|_| invalid(AttestationProblem::CertificateChainInvalid))?;

    // nonce = SHA-256(authData ∥ clientDataHash), proven live by its
    // presence in the freshly issued certificate.
    let nonce = sha256(&attestation_payload(auth_data_bytes, client_data_hash));
    let cert_nonce = certificate::apple_nonce(&leaf).map_err(invalid)?;
    if nonce != cert_nonce {
        return Err(invalid(AttestationProblem::NonceMismatch));
    }

    // The credential public key must equal the certificate subject key.
    let matches = crypto::public_key_matches_certificate(&acd.key, &leaf)
        .map_err(|_| invalid(AttestationProblem::PublicKeyMismatch))?;
    if !matches {
        return Err(invalid(AttestationProblem::PublicKeyMismatch));
    }

    Ok(VerifiedAttestation {
        attestation_type: AttestationType::AttCa,
        trust_path: chain,
    })
}
