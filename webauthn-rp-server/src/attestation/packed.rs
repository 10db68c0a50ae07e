//! The `packed` attestation statement format, WebAuthn §8.2.
//!
//! Two sub-forms exist: self attestation signed with the credential key
//! itself, and Basic/AttCA attestation signed by an attestation certificate
//! conveyed in `x5c`. ECDAA is obsolete and rejected.

use ciborium::value::Value;
use webauthn_rp_types::ctap2::AttestedCredentialData;

use super::{
    alg_entry, attestation_payload, certificate, entry, invalid, sig_entry, stmt_entries,
    x5c_entry, AttestationType, VerifiedAttestation,
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
    let payload = attestation_payload(auth_data_bytes, client_data_hash);

    if entry(entries, "ecdaaKeyId").is_some() {
        return Err(invalid(AttestationProblem::EcdaaUnsupported));
    }

    match x5c_entry(entries)? {
        Some(chain) => {
            // Basic or AttCA: the leaf certificate verifies the signature and
            // must satisfy the §8.2.1 certificate requirements.
            let leaf = crypto::parse_certificate(&chain[0])
                .map_err(|_| invalid(AttestationProblem::CertificateChainInvalid))?;

            crypto::verify_with_certificate(alg, &leaf, &payload, sig)
                .map_err(|_| invalid(AttestationProblem::SignatureInvalid))?;

            certificate::assert_packed_requirements(&leaf, &acd.aaguid).map_err(invalid)?;

            Ok(VerifiedAttestation {
                attestation_type: AttestationType::BasicOrAttCa,
                trust_path: chain,
            })
        }
        None => {
            // Self attestation: alg must equal the algorithm of the
            // credential public key, and the credential key verifies the
            // signature. Historical implementations tolerated an alg
            // mismatch for some older authenticators; this one does not.
            let credential_alg = crypto::cose_algorithm(&acd.key)?;
            if alg != credential_alg {
                return Err(invalid(AttestationProblem::AlgorithmMismatch));
            }

            crypto::verify_with_cose_key(&acd.key, &payload, sig)
                .map_err(|_| invalid(AttestationProblem::SignatureInvalid))?;

            Ok(VerifiedAttestation {
                attestation_type: AttestationType::SelfAttestation,
                trust_path: Vec::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use ciborium::cbor;
    use coset::{iana, CoseKeyBuilder};
    use p256::ecdsa::signature::Signer;
    use webauthn_rp_types::ctap2::Aaguid;

    use super::*;

    fn es256_credential() -> (p256::ecdsa::SigningKey, AttestedCredentialData) {
        let private = p256::SecretKey::random(&mut rand::thread_rng());
        let signing = p256::ecdsa::SigningKey::from(&private);
        let point = signing.verifying_key().to_encoded_point(false);
        let key = CoseKeyBuilder::new_ec2_pub_key(
            iana::EllipticCurve::P_256,
            point.x().unwrap().to_vec(),
            point.y().unwrap().to_vec(),
        )
        .algorithm(iana::Algorithm::ES256)
        .build();
        let acd =
            AttestedCredentialData::new(Aaguid::new_empty(), vec![0xab; 16], key).unwrap();
        (signing, acd)
    }

    fn self_statement(sig: &[u8], alg: i64) -> Value {
        cbor!({
            "alg" => alg,
            "sig" => Value::Bytes(sig.to_vec()),
        })
        .unwrap()
    }

    #[test]
    fn self_attestation_verifies() {
        let (signing, acd) = es256_credential();
        let auth_data = [0x55u8; 37];
        let hash = [0x66u8; 32];
        let payload = attestation_payload(&auth_data, &hash);
        let signature: p256::ecdsa::Signature = signing.sign(&payload);

        let stmt = self_statement(signature.to_der().as_bytes(), -7);
        let result = verify(&stmt, &acd, &auth_data, &hash).unwrap();
        assert_eq!(result.attestation_type, AttestationType::SelfAttestation);
        assert!(result.trust_path.is_empty());
    }

    #[test]
    fn self_attestation_alg_mismatch_is_rejected() {
        let (signing, acd) = es256_credential();
        let auth_data = [0x55u8; 37];
        let hash = [0x66u8; 32];
        let payload = attestation_payload(&auth_data, &hash);
        let signature: p256::ecdsa::Signature = signing.sign(&payload);

        // Declares RS256 while the credential key is ES256.
        let stmt = self_statement(signature.to_der().as_bytes(), -257);
        assert_eq!(
            verify(&stmt, &acd, &auth_data, &hash),
            Err(WebauthnError::InvalidAttestation(
                AttestationProblem::AlgorithmMismatch
            ))
        );
    }

    #[test]
    fn self_attestation_bad_signature_is_rejected() {
        let (signing, acd) = es256_credential();
        let auth_data = [0x55u8; 37];
        let hash = [0x66u8; 32];
        let payload = attestation_payload(&auth_data, &hash);
        let signature: p256::ecdsa::Signature = signing.sign(&payload);
        let mut der = signature.to_der().as_bytes().to_vec();
        let last = der.len() - 1;
        der[last] ^= 0x01;

        let stmt = self_statement(&der, -7);
        assert_eq!(
            verify(&stmt, &acd, &auth_data, &hash),
            Err(WebauthnError::InvalidAttestation(
                AttestationProblem::SignatureInvalid
            ))
        );
    }

    #[test]
    fn ecdaa_is_rejected() {
        let (_, acd) = es256_credential();
        let stmt = cbor!({
            "alg" => -7,
            "sig" => Value::Bytes(vec![0; 8]),
            "ecdaaKeyId" => Value::Bytes(vec![0; 8]),
        })
        .unwrap();
        assert_eq!(
            verify(&stmt, &acd, &[0; 37], &[0; 32]),
            Err(WebauthnError::InvalidAttestation(
                AttestationProblem::EcdaaUnsupported
            ))
        );
    }

    #[test]
    fn missing_signature_is_rejected() {
        let (_, acd) = es256_credential();
        let stmt = cbor!({ "alg" => -7 }).unwrap();
        assert_eq!(
            verify(&stmt, &acd, &[0; 37], &[0; 32]),
            Err(WebauthnError::InvalidAttestation(
                AttestationProblem::SignatureMissing
            ))
        );
    }
}
