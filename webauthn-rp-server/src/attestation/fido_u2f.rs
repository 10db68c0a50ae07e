//! The `fido-u2f` attestation statement format, WebAuthn §8.6.
//!
//! The statement carries exactly one attestation certificate over a P-256
//! key, and the signature covers the reconstructed U2F registration payload
//! `0x00 ∥ rpIdHash ∥ clientDataHash ∥ credentialId ∥ publicKeyU2F`.

use ciborium::value::Value;
use coset::iana;
use webauthn_rp_types::ctap2::{AttestedCredentialData, AuthenticatorData};

use super::{invalid, sig_entry, stmt_entries, x5c_entry, AttestationType, VerifiedAttestation};
use crate::crypto;
use crate::error::{AttestationProblem, WebauthnError};

pub(super) fn verify(
    att_stmt: &Value,
    acd: &AttestedCredentialData,
    auth_data: &AuthenticatorData,
    client_data_hash: &[u8; 32],
) -> Result<VerifiedAttestation, WebauthnError> {
    let entries = stmt_entries(att_stmt)?;
    let sig = sig_entry(entries)?;

    let chain =
        x5c_entry(entries)?.ok_or(invalid(AttestationProblem::CertificateChainMissing))?;
    // x5c must contain exactly one element, the attestation certificate.
    if chain.len() != 1 {
        return Err(invalid(AttestationProblem::CertificateChainInvalid));
    }
    let leaf = crypto::parse_certificate(&chain[0])
        .map_err(|_| invalid(AttestationProblem::CertificateChainInvalid))?;

    // Convert the COSE credential public key to the raw ANSI X9.62 format
    // (ALG_KEY_ECC_X962_RAW).
    let public_key_u2f = crypto::alg_key_ecc_x962_raw(&acd.key)
        .map_err(|_| invalid(AttestationProblem::PublicKeyMismatch))?;

    // verificationData per [FIDO-U2F-Message-Formats] §4.3.
    let verification_data: Vec<u8> = [0x00]
        .iter()
        .chain(auth_data.rp_id_hash().iter())
        .chain(client_data_hash.iter())
        .chain(acd.credential_id().iter())
        .chain(public_key_u2f.iter())
        .copied()
        .collect();

    // The certificate public key must be an EC key over P-256; building the
    // ES256 verifying key from the certificate asserts this.
    crypto::verify_with_certificate(iana::Algorithm::ES256, &leaf, &verification_data, sig)
        .map_err(|_| invalid(AttestationProblem::SignatureInvalid))?;

    Ok(VerifiedAttestation {
        attestation_type: AttestationType::Basic,
        trust_path: chain,
    })
}
