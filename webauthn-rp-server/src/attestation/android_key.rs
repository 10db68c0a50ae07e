//! The `android-key` attestation statement format, WebAuthn §8.4.
//!
//! The leaf certificate's key signs `authData ∥ clientDataHash`, must equal
//! the credential public key, and must carry an Android key attestation
//! extension binding the key to this ceremony's client data hash with
//! origin GENERATED and purpose SIGN.

use ciborium::value::Value;
use webauthn_rp_types::ctap2::AttestedCredentialData;

use super::{
    alg_entry, attestation_payload, certificate, invalid, sig_entry, stmt_entries, x5c_entry,
    AttestationType, VerifiedAttestation,
};
use crate::crypto;
use crate::error::{AttestationProblem, WebauthnError};

pub(super) fn verify(
    att_stmt: &Value,
    acd: &AttestedCredentialData,
    auth_data_bytes: &[u8],
    client_data_hash: &[u8; 32],
) -> Result<VerifiedAttestation, WebauthnError> {
    let entries = stmt_entries(att_stmt)?;
    let alg = alg_entry(entries)?;
    let sig = sig_entry(entries)?;
    let chain =
        x5c_entry(entries)?.ok_or(invalid(AttestationProblem::CertificateChainMissing))?;
    let leaf = crypto::parse_certificate(&chain[0])
        .map_err(|_| invalid(AttestationProblem::CertificateChainInvalid))?;

    let payload = attestation_payload(auth_data_bytes, client_data_hash);
    crypto::verify_with_certificate(alg, &leaf, &payload, sig)
        .map_err(|_| invalid(AttestationProblem::SignatureInvalid))?;

    // The public key in the first certificate must match the credential
    // public key in the attested credential data.
    let matches = crypto::public_key_matches_certificate(&acd.key, &leaf)
        .map_err(|_| invalid(AttestationProblem::PublicKeyMismatch))?;
    if !matches {
        return Err(invalid(AttestationProblem::PublicKeyMismatch));
    }

    // The attestation extension must carry this ceremony's client data hash
    // as its challenge; its authorization lists were validated during parse.
    let attestation = certificate::android_key_attestation(&leaf).map_err(invalid)?;
    if attestation.attestation_challenge.as_slice() != client_data_hash {
        return Err(invalid(AttestationProblem::NonceMismatch));
    }

    Ok(VerifiedAttestation {
        attestation_type: AttestationType::Basic,
        trust_path: chain,
    })
}
