//! Cryptographic operation wrappers for the Relying Party ceremonies.
//!
//! This module bridges COSE key material and X.509 certificates to the
//! RustCrypto verifying key types, and dispatches signature verification by
//! COSE algorithm. Signature checks happen inside the primitive crates and
//! are constant-time for the equality at their core; this module never
//! compares signature bytes itself.

use coset::{
    iana::{self, EnumI64},
    CoseKey, Label, RegisteredLabel, RegisteredLabelWithPrivate,
};
use p256::ecdsa::signature::Verifier;
use p256::elliptic_curve::generic_array::GenericArray;
use rsa::traits::PublicKeyParts;
use rsa::{pkcs1::DecodeRsaPublicKey, BigUint, RsaPublicKey};
use sha2::Sha256;
use x509_parser::prelude::{FromDer, X509Certificate};
use x509_parser::time::ASN1Time;

pub use webauthn_rp_types::crypto::sha256;

use crate::error::{Warning, WebauthnError};

/// The COSE algorithms this Relying Party implementation can verify.
pub const SUPPORTED_ALGORITHMS: &[iana::Algorithm] = &[
    iana::Algorithm::ES256,
    iana::Algorithm::ES384,
    iana::Algorithm::ES512,
    iana::Algorithm::RS256,
    iana::Algorithm::PS256,
    iana::Algorithm::EdDSA,
];

/// Whether this implementation can verify signatures made with `alg`.
pub fn is_supported_algorithm(alg: iana::Algorithm) -> bool {
    SUPPORTED_ALGORITHMS.contains(&alg)
}

/// Extract the mandatory `alg` parameter of a COSE key.
pub(crate) fn cose_algorithm(key: &CoseKey) -> Result<iana::Algorithm, WebauthnError> {
    match &key.alg {
        Some(RegisteredLabelWithPrivate::Assigned(alg)) => Ok(*alg),
        Some(RegisteredLabelWithPrivate::PrivateUse(value)) => {
            Err(WebauthnError::UnsupportedAlgorithm(*value))
        }
        Some(RegisteredLabelWithPrivate::Text(_)) | None => {
            Err(WebauthnError::MalformedData("cose key alg".into()))
        }
    }
}

pub(crate) fn param_bytes<'a>(key: &'a CoseKey, label: i64) -> Option<&'a [u8]> {
    key.params.iter().find_map(|(k, v)| match k {
        Label::Int(i) if *i == label => v.as_bytes().map(Vec::as_slice),
        _ => None,
    })
}

pub(crate) fn param_int(key: &CoseKey, label: i64) -> Option<i128> {
    key.params.iter().find_map(|(k, v)| match k {
        Label::Int(i) if *i == label => v.as_integer().map(i128::from),
        _ => None,
    })
}

fn malformed_key() -> WebauthnError {
    WebauthnError::MalformedData("cose key".into())
}

/// Convert a COSE EC2 key to the raw ANSI X9.62 uncompressed representation
/// `0x04 ∥ x ∥ y` (ALG_KEY_ECC_X962_RAW), as used by the FIDO U2F signed
/// payload.
pub(crate) fn alg_key_ecc_x962_raw(key: &CoseKey) -> Result<Vec<u8>, WebauthnError> {
    let x = param_bytes(key, iana::Ec2KeyParameter::X.to_i64()).ok_or_else(malformed_key)?;
    let y = param_bytes(key, iana::Ec2KeyParameter::Y.to_i64()).ok_or_else(malformed_key)?;
    Ok([0x04]
        .iter()
        .chain(x.iter())
        .chain(y.iter())
        .copied()
        .collect())
}

/// A verifying key for any of the [`SUPPORTED_ALGORITHMS`], aggregated over
/// the per-algorithm RustCrypto types.
pub(crate) enum VerifyingKey {
    Es256(p256::ecdsa::VerifyingKey),
    Es384(p384::ecdsa::VerifyingKey),
    Es512(p521::ecdsa::VerifyingKey),
    Rs256(rsa::pkcs1v15::VerifyingKey<Sha256>),
    Ps256(rsa::pss::VerifyingKey<Sha256>),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl VerifyingKey {
    /// Build a verifying key from a credential public key in COSE form.
    pub(crate) fn from_cose(key: &CoseKey) -> Result<Self, WebauthnError> {
        let alg = cose_algorithm(key)?;
        match alg {
            iana::Algorithm::ES256 | iana::Algorithm::ES384 | iana::Algorithm::ES512 => {
                if key.kty != RegisteredLabel::Assigned(iana::KeyType::EC2) {
                    return Err(malformed_key());
                }
                let crv = param_int(key, iana::Ec2KeyParameter::Crv.to_i64())
                    .ok_or_else(malformed_key)?;
                let x = param_bytes(key, iana::Ec2KeyParameter::X.to_i64())
                    .ok_or_else(malformed_key)?;
                let y = param_bytes(key, iana::Ec2KeyParameter::Y.to_i64())
                    .ok_or_else(malformed_key)?;
                Self::from_ec2_coordinates(alg, crv, x, y)
            }
            iana::Algorithm::RS256 | iana::Algorithm::PS256 => {
                if key.kty != RegisteredLabel::Assigned(iana::KeyType::RSA) {
                    return Err(malformed_key());
                }
                let n = param_bytes(key, iana::RsaKeyParameter::N.to_i64())
                    .ok_or_else(malformed_key)?;
                let e = param_bytes(key, iana::RsaKeyParameter::E.to_i64())
                    .ok_or_else(malformed_key)?;
                let public =
                    RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
                        .map_err(|_| malformed_key())?;
                Ok(if alg == iana::Algorithm::RS256 {
                    VerifyingKey::Rs256(rsa::pkcs1v15::VerifyingKey::new(public))
                } else {
                    VerifyingKey::Ps256(rsa::pss::VerifyingKey::new(public))
                })
            }
            iana::Algorithm::EdDSA => {
                if key.kty != RegisteredLabel::Assigned(iana::KeyType::OKP) {
                    return Err(malformed_key());
                }
                let crv = param_int(key, iana::OkpKeyParameter::Crv.to_i64())
                    .ok_or_else(malformed_key)?;
                if crv != i128::from(iana::EllipticCurve::Ed25519.to_i64()) {
                    return Err(WebauthnError::UnsupportedAlgorithm(alg.to_i64()));
                }
                let x = param_bytes(key, iana::OkpKeyParameter::X.to_i64())
                    .ok_or_else(malformed_key)?;
                let x: [u8; 32] = x.try_into().map_err(|_| malformed_key())?;
                ed25519_dalek::VerifyingKey::from_bytes(&x)
                    .map(VerifyingKey::Ed25519)
                    .map_err(|_| malformed_key())
            }
            other => Err(WebauthnError::UnsupportedAlgorithm(other.to_i64())),
        }
    }

    fn from_ec2_coordinates(
        alg: iana::Algorithm,
        crv: i128,
        x: &[u8],
        y: &[u8],
    ) -> Result<Self, WebauthnError> {
        match (alg, crv) {
            (iana::Algorithm::ES256, crv)
                if crv == i128::from(iana::EllipticCurve::P_256.to_i64()) =>
            {
                if x.len() != 32 || y.len() != 32 {
                    return Err(malformed_key());
                }
                let point = p256::EncodedPoint::from_affine_coordinates(
                    GenericArray::from_slice(x),
                    GenericArray::from_slice(y),
                    false,
                );
                p256::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map(VerifyingKey::Es256)
                    .map_err(|_| malformed_key())
            }
            (iana::Algorithm::ES384, crv)
                if crv == i128::from(iana::EllipticCurve::P_384.to_i64()) =>
            {
                if x.len() != 48 || y.len() != 48 {
                    return Err(malformed_key());
                }
                let point = p384::EncodedPoint::from_affine_coordinates(
                    GenericArray::from_slice(x),
                    GenericArray::from_slice(y),
                    false,
                );
                p384::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map(VerifyingKey::Es384)
                    .map_err(|_| malformed_key())
            }
            (iana::Algorithm::ES512, crv)
                if crv == i128::from(iana::EllipticCurve::P_521.to_i64()) =>
            {
                if x.len() != 66 || y.len() != 66 {
                    return Err(malformed_key());
                }
                let point = p521::EncodedPoint::from_affine_coordinates(
                    GenericArray::from_slice(x),
                    GenericArray::from_slice(y),
                    false,
                );
                p521::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map(VerifyingKey::Es512)
                    .map_err(|_| malformed_key())
            }
            _ => Err(malformed_key()),
        }
    }

    /// Build a verifying key for `alg` from the SubjectPublicKeyInfo of an
    /// attestation certificate.
    pub(crate) fn from_certificate(
        alg: iana::Algorithm,
        cert: &X509Certificate,
    ) -> Result<Self, WebauthnError> {
        let spki = cert.public_key();
        let data = spki.subject_public_key.data.as_ref();
        match alg {
            iana::Algorithm::ES256 => p256::ecdsa::VerifyingKey::from_sec1_bytes(data)
                .map(VerifyingKey::Es256)
                .map_err(|_| malformed_key()),
            iana::Algorithm::ES384 => p384::ecdsa::VerifyingKey::from_sec1_bytes(data)
                .map(VerifyingKey::Es384)
                .map_err(|_| malformed_key()),
            iana::Algorithm::ES512 => p521::ecdsa::VerifyingKey::from_sec1_bytes(data)
                .map(VerifyingKey::Es512)
                .map_err(|_| malformed_key()),
            iana::Algorithm::RS256 => RsaPublicKey::from_pkcs1_der(data)
                .map(|public| VerifyingKey::Rs256(rsa::pkcs1v15::VerifyingKey::new(public)))
                .map_err(|_| malformed_key()),
            iana::Algorithm::PS256 => RsaPublicKey::from_pkcs1_der(data)
                .map(|public| VerifyingKey::Ps256(rsa::pss::VerifyingKey::new(public)))
                .map_err(|_| malformed_key()),
            iana::Algorithm::EdDSA => {
                let raw: [u8; 32] = data.try_into().map_err(|_| malformed_key())?;
                ed25519_dalek::VerifyingKey::from_bytes(&raw)
                    .map(VerifyingKey::Ed25519)
                    .map_err(|_| malformed_key())
            }
            other => Err(WebauthnError::UnsupportedAlgorithm(other.to_i64())),
        }
    }

    /// Verify `signature` over `message`.
    ///
    /// Returns the non-fatal advisory for accepted but non-normalized ECDSA
    /// signatures; returns [`WebauthnError::SignatureInvalid`] on any
    /// verification failure.
    pub(crate) fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
    ) -> Result<Option<Warning>, WebauthnError> {
        let bad_sig = |_| WebauthnError::SignatureInvalid;
        match self {
            VerifyingKey::Es256(key) => {
                let sig = p256::ecdsa::Signature::from_der(signature).map_err(bad_sig)?;
                key.verify(message, &sig).map_err(bad_sig)?;
                Ok(sig
                    .normalize_s()
                    .is_some()
                    .then_some(Warning::NonCanonicalSignature))
            }
            VerifyingKey::Es384(key) => {
                let sig = p384::ecdsa::Signature::from_der(signature).map_err(bad_sig)?;
                key.verify(message, &sig).map_err(bad_sig)?;
                Ok(sig
                    .normalize_s()
                    .is_some()
                    .then_some(Warning::NonCanonicalSignature))
            }
            VerifyingKey::Es512(key) => {
                let sig = p521::ecdsa::Signature::from_der(signature).map_err(bad_sig)?;
                key.verify(message, &sig).map_err(bad_sig)?;
                Ok(sig
                    .normalize_s()
                    .is_some()
                    .then_some(Warning::NonCanonicalSignature))
            }
            VerifyingKey::Rs256(key) => {
                let sig = rsa::pkcs1v15::Signature::try_from(signature).map_err(bad_sig)?;
                key.verify(message, &sig).map_err(bad_sig)?;
                Ok(None)
            }
            VerifyingKey::Ps256(key) => {
                let sig = rsa::pss::Signature::try_from(signature).map_err(bad_sig)?;
                key.verify(message, &sig).map_err(bad_sig)?;
                Ok(None)
            }
            VerifyingKey::Ed25519(key) => {
                let sig = ed25519_dalek::Signature::from_slice(signature).map_err(bad_sig)?;
                key.verify(message, &sig).map_err(bad_sig)?;
                Ok(None)
            }
        }
    }

    /// A canonical byte encoding of the key, used only for equality checks
    /// between a credential key and a certificate key.
    fn comparable_encoding(&self) -> Vec<u8> {
        match self {
            VerifyingKey::Es256(key) => {
                let mut out = vec![1];
                out.extend_from_slice(key.to_encoded_point(false).as_bytes());
                out
            }
            VerifyingKey::Es384(key) => {
                let mut out = vec![2];
                out.extend_from_slice(key.to_encoded_point(false).as_bytes());
                out
            }
            VerifyingKey::Es512(key) => {
                let mut out = vec![3];
                out.extend_from_slice(key.to_encoded_point(false).as_bytes());
                out
            }
            VerifyingKey::Rs256(key) => rsa_comparable(key.as_ref()),
            VerifyingKey::Ps256(key) => rsa_comparable(key.as_ref()),
            VerifyingKey::Ed25519(key) => {
                let mut out = vec![5];
                out.extend_from_slice(key.as_bytes());
                out
            }
        }
    }
}

fn rsa_comparable(public: &RsaPublicKey) -> Vec<u8> {
    let mut out = vec![4];
    out.extend_from_slice(&public.n().to_bytes_be());
    out.push(0);
    out.extend_from_slice(&public.e().to_bytes_be());
    out
}

/// Whether the credential public key equals the subject public key of the
/// given attestation certificate.
pub(crate) fn public_key_matches_certificate(
    key: &CoseKey,
    cert: &X509Certificate,
) -> Result<bool, WebauthnError> {
    let alg = cose_algorithm(key)?;
    let from_cose = VerifyingKey::from_cose(key)?;
    let from_cert = VerifyingKey::from_certificate(alg, cert)?;
    Ok(from_cose.comparable_encoding() == from_cert.comparable_encoding())
}

/// Verify `signature` over `message` with the credential public key in COSE
/// form.
pub(crate) fn verify_with_cose_key(
    key: &CoseKey,
    message: &[u8],
    signature: &[u8],
) -> Result<Option<Warning>, WebauthnError> {
    VerifyingKey::from_cose(key)?.verify(message, signature)
}

/// Verify `signature` over `message` with the subject public key of an
/// attestation certificate, interpreted for `alg`.
pub(crate) fn verify_with_certificate(
    alg: iana::Algorithm,
    cert: &X509Certificate,
    message: &[u8],
    signature: &[u8],
) -> Result<Option<Warning>, WebauthnError> {
    VerifyingKey::from_certificate(alg, cert)?.verify(message, signature)
}

/// Parse a DER encoded X.509 certificate, rejecting trailing bytes.
pub(crate) fn parse_certificate(der: &[u8]) -> Result<X509Certificate<'_>, WebauthnError> {
    match X509Certificate::from_der(der) {
        Ok((rem, cert)) if rem.is_empty() => Ok(cert),
        _ => Err(WebauthnError::MalformedData("x509 certificate".into())),
    }
}

/// Standard X.509 path validation of an attestation trust path against a set
/// of trust anchors, at the given time.
///
/// The chain is ordered leaf first. Validation walks the chain verifying
/// every certificate's signature with its successor's public key and checks
/// each validity window; the chain anchors when its last certificate either
/// is byte-identical to an anchor or verifies under an anchor's key. No
/// revocation information is consulted.
pub(crate) fn verify_cert_chain(
    chain_der: &[Vec<u8>],
    anchors_der: &[Vec<u8>],
    at_unix_seconds: i64,
) -> bool {
    if chain_der.is_empty() || anchors_der.is_empty() {
        return false;
    }
    let Ok(at) = ASN1Time::from_timestamp(at_unix_seconds) else {
        return false;
    };

    let mut chain = Vec::with_capacity(chain_der.len());
    for der in chain_der {
        let Ok(cert) = parse_certificate(der) else {
            log::debug!("attestation chain certificate failed to parse");
            return false;
        };
        if !cert.validity().is_valid_at(at) {
            log::debug!("attestation chain certificate outside its validity window");
            return false;
        }
        chain.push(cert);
    }

    for i in 0..chain.len() - 1 {
        if chain[i]
            .verify_signature(Some(chain[i + 1].public_key()))
            .is_err()
        {
            log::debug!("attestation chain link failed signature verification");
            return false;
        }
    }

    // SAFETY: chain_der was checked non-empty above.
    let last_der = chain_der.last().unwrap();
    let last = chain.last().unwrap();

    anchors_der.iter().any(|anchor_der| {
        if anchor_der == last_der {
            return true;
        }
        let Ok(anchor) = parse_certificate(anchor_der) else {
            return false;
        };
        anchor.validity().is_valid_at(at)
            && last.verify_signature(Some(anchor.public_key())).is_ok()
    })
}

#[cfg(test)]
mod tests {
    use coset::{iana, CoseKeyBuilder};
    use p256::ecdsa::signature::Signer;

    use super::*;

    fn es256_pair() -> (p256::ecdsa::SigningKey, CoseKey) {
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
        (signing, key)
    }

    #[test]
    fn es256_round_trip() {
        let (signing, cose) = es256_pair();
        let message = b"authenticator data || client data hash";
        let signature: p256::ecdsa::Signature = signing.sign(message);
        let signature = signature.normalize_s().unwrap_or(signature);
        let der = signature.to_der();

        let advisory = verify_with_cose_key(&cose, message, der.as_bytes())
            .expect("signature should verify");
        assert_eq!(advisory, None);
    }

    #[test]
    fn high_s_signature_verifies_with_advisory() {
        use p256::elliptic_curve::PrimeField;

        let (signing, cose) = es256_pair();
        let message = b"authenticator data || client data hash";
        let signature: p256::ecdsa::Signature = signing.sign(message);
        let signature = signature.normalize_s().unwrap_or(signature);

        // Rebuild the signature with s' = n - s, the malleable twin.
        let (r, s) = (signature.r(), signature.s());
        let high_s = -*s.as_ref();
        let high = p256::ecdsa::Signature::from_scalars(
            r.as_ref().to_repr(),
            high_s.to_repr(),
        )
        .expect("valid scalar pair");

        let advisory = verify_with_cose_key(&cose, message, high.to_der().as_bytes())
            .expect("high-s signature is accepted");
        assert_eq!(advisory, Some(Warning::NonCanonicalSignature));
    }

    #[test]
    fn es256_flipped_byte_fails() {
        let (signing, cose) = es256_pair();
        let message = b"authenticator data || client data hash";
        let signature: p256::ecdsa::Signature = signing.sign(message);
        let mut der = signature.to_der().as_bytes().to_vec();
        let last = der.len() - 1;
        der[last] ^= 0x01;

        assert_eq!(
            verify_with_cose_key(&cose, message, &der),
            Err(WebauthnError::SignatureInvalid)
        );
    }

    #[test]
    fn es256_flipped_message_fails() {
        let (signing, cose) = es256_pair();
        let message = b"authenticator data || client data hash".to_vec();
        let signature: p256::ecdsa::Signature = signing.sign(&message);
        let der = signature.to_der();

        let mut tampered = message.clone();
        tampered[0] ^= 0x01;
        assert_eq!(
            verify_with_cose_key(&cose, &tampered, der.as_bytes()),
            Err(WebauthnError::SignatureInvalid)
        );
    }

    #[test]
    fn ed25519_round_trip() {
        use ed25519_dalek::Signer as _;

        let signing = ed25519_dalek::SigningKey::generate(&mut rand::thread_rng());
        let public = signing.verifying_key();
        let key = CoseKey {
            kty: coset::RegisteredLabel::Assigned(iana::KeyType::OKP),
            alg: Some(coset::RegisteredLabelWithPrivate::Assigned(
                iana::Algorithm::EdDSA,
            )),
            params: vec![
                (
                    Label::Int(iana::OkpKeyParameter::Crv.to_i64()),
                    ciborium::value::Value::from(iana::EllipticCurve::Ed25519.to_i64()),
                ),
                (
                    Label::Int(iana::OkpKeyParameter::X.to_i64()),
                    ciborium::value::Value::Bytes(public.as_bytes().to_vec()),
                ),
            ],
            ..Default::default()
        };

        let message = b"assertion payload";
        let signature = signing.sign(message);

        verify_with_cose_key(&key, message, &signature.to_bytes())
            .expect("ed25519 signature should verify");
    }

    #[test]
    fn unsupported_algorithm_is_reported() {
        let key = CoseKeyBuilder::new_ec2_pub_key(
            iana::EllipticCurve::P_256,
            vec![0; 32],
            vec![0; 32],
        )
        .algorithm(iana::Algorithm::ES256K)
        .build();

        assert!(matches!(
            VerifyingKey::from_cose(&key),
            Err(WebauthnError::UnsupportedAlgorithm(_))
        ));
    }
}
