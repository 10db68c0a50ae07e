//! X.509 profile checks for attestation certificates, and the parsing of the
//! custom extensions the WebAuthn attestation formats rely on.

use der_parser::ber::BerObjectContent;
use der_parser::der::{
    parse_der, parse_der_container, parse_der_enum, parse_der_integer, parse_der_octetstring,
    parse_der_tagged_explicit, Class, Header, Tag,
};
use der_parser::error::BerError;
use der_parser::nom;
use x509_parser::oid_registry::Oid;
use x509_parser::prelude::{GeneralName, X509Certificate, X509Error, X509Version};

use webauthn_rp_types::ctap2::Aaguid;

use crate::error::AttestationProblem;

/// id-fido-gen-ce-aaguid, the FIDO AAGUID certificate extension.
pub(crate) const FIDO_GEN_CE_AAGUID: Oid<'static> =
    der_parser::oid!(1.3.6 .1 .4 .1 .45724 .1 .1 .4);

/// The Android key attestation certificate extension.
const ANDROID_KEY_ATTESTATION: Oid<'static> = der_parser::oid!(1.3.6 .1 .4 .1 .11129 .2 .1 .17);

/// The Apple anonymous attestation nonce certificate extension.
const APPLE_NONCE: Oid<'static> = der_parser::oid!(1.2.840 .113635 .100 .8 .2);

/// tcg-kp-AIKCertificate, required in the EKU of TPM attestation certs.
const TCG_KP_AIK_CERTIFICATE: Oid<'static> = der_parser::oid!(2.23.133 .8 .3);

/// TCG directoryName attributes carried in the SAN of TPM attestation certs.
const TCG_AT_TPM_MANUFACTURER: Oid<'static> = der_parser::oid!(2.23.133 .2 .1);
const TCG_AT_TPM_MODEL: Oid<'static> = der_parser::oid!(2.23.133 .2 .2);
const TCG_AT_TPM_VERSION: Oid<'static> = der_parser::oid!(2.23.133 .2 .3);

/// Check an optional-but-constrained certificate extension the way the spec
/// phrases them: if present it must satisfy `check`, and if `must_be_present`
/// it must exist.
fn check_extension<T, F>(
    extension: &Result<Option<T>, X509Error>,
    must_be_present: bool,
    check: F,
) -> Result<(), AttestationProblem>
where
    F: Fn(&T) -> bool,
{
    match extension {
        Ok(Some(extension)) => {
            if check(extension) {
                Ok(())
            } else {
                Err(AttestationProblem::CertificateRequirementsNotMet)
            }
        }
        Ok(None) => {
            if must_be_present {
                Err(AttestationProblem::CertificateRequirementsNotMet)
            } else {
                Ok(())
            }
        }
        // present multiple times or invalid
        Err(_) => Err(AttestationProblem::CertificateRequirementsNotMet),
    }
}

/// If the certificate carries the id-fido-gen-ce-aaguid extension, its
/// octet-string payload must equal the AAGUID from the authenticator data,
/// and the extension must not be critical.
pub(crate) fn assert_aaguid_extension(
    cert: &X509Certificate,
    aaguid: &Aaguid,
) -> Result<(), AttestationProblem> {
    let Some(extension) = cert
        .extensions()
        .iter()
        .find(|extension| extension.oid == FIDO_GEN_CE_AAGUID)
    else {
        // The extension is optional in every format that consults it.
        return Ok(());
    };

    if extension.critical {
        return Err(AttestationProblem::CertificateRequirementsNotMet);
    }

    let (_, octets) = parse_der_octetstring(extension.value)
        .map_err(|_| AttestationProblem::CertificateRequirementsNotMet)?;
    let value = octets
        .as_slice()
        .map_err(|_| AttestationProblem::CertificateRequirementsNotMet)?;

    if value == aaguid.as_bytes() {
        Ok(())
    } else {
        Err(AttestationProblem::AaguidMismatch)
    }
}

/// Packed attestation certificate requirements, WebAuthn §8.2.1.
///
/// Version 3, subject C/O/CN present with OU = "Authenticator Attestation",
/// basic constraints CA=false, and a non-critical AAGUID extension matching
/// the authenticator data when present.
pub(crate) fn assert_packed_requirements(
    cert: &X509Certificate,
    aaguid: &Aaguid,
) -> Result<(), AttestationProblem> {
    if cert.version != X509Version::V3 {
        return Err(AttestationProblem::CertificateRequirementsNotMet);
    }

    let subject = cert.subject();
    let subject_c = subject.iter_country().next();
    let subject_o = subject.iter_organization().next();
    let subject_cn = subject.iter_common_name().next();
    if subject_c.is_none() || subject_o.is_none() || subject_cn.is_none() {
        return Err(AttestationProblem::CertificateRequirementsNotMet);
    }

    let ou_is_attestation = subject
        .iter_organizational_unit()
        .next()
        .and_then(|ou| ou.attr_value().as_str().ok())
        .is_some_and(|ou| ou == "Authenticator Attestation");
    if !ou_is_attestation {
        return Err(AttestationProblem::CertificateRequirementsNotMet);
    }

    check_extension(&cert.basic_constraints(), true, |basic_constraints| {
        !basic_constraints.value.ca
    })?;

    assert_aaguid_extension(cert, aaguid)
}

/// TPM attestation certificate requirements, WebAuthn §8.3.1.
///
/// Version 3, empty subject, a critical SAN carrying the TCG device
/// attributes, an EKU containing tcg-kp-AIKCertificate, and basic
/// constraints CA=false.
pub(crate) fn assert_tpm_requirements(cert: &X509Certificate) -> Result<(), AttestationProblem> {
    if cert.version != X509Version::V3 {
        return Err(AttestationProblem::CertificateRequirementsNotMet);
    }

    if cert.subject().iter_attributes().next().is_some() {
        return Err(AttestationProblem::CertificateRequirementsNotMet);
    }

    check_extension(
        &cert.subject_alternative_name(),
        true,
        |subject_alternative_name| {
            // Per [TPMv2-EK-Profile] §3.2.9 the extension must be critical
            // when the subject is empty, and must carry the TPM manufacturer,
            // part number and firmware version as directoryName attributes.
            if !subject_alternative_name.critical {
                return false;
            }
            subject_alternative_name
                .value
                .general_names
                .iter()
                .any(|general_name| {
                    if let GeneralName::DirectoryName(name) = general_name {
                        let mut manufacturer = false;
                        let mut model = false;
                        let mut version = false;
                        for attribute in name.iter_attributes() {
                            let oid = attribute.attr_type();
                            manufacturer |= *oid == TCG_AT_TPM_MANUFACTURER;
                            model |= *oid == TCG_AT_TPM_MODEL;
                            version |= *oid == TCG_AT_TPM_VERSION;
                        }
                        manufacturer && model && version
                    } else {
                        false
                    }
                })
        },
    )?;

    check_extension(&cert.extended_key_usage(), true, |extended_key_usage| {
        extended_key_usage
            .value
            .other
            .contains(&TCG_KP_AIK_CERTIFICATE)
    })?;

    check_extension(&cert.basic_constraints(), true, |basic_constraints| {
        !basic_constraints.value.ca
    })
}

/// Extract the Apple anonymous attestation nonce: an octet string wrapped in
/// a context-specific `[1]` tag inside a sequence.
pub(crate) fn apple_nonce(cert: &X509Certificate) -> Result<[u8; 32], AttestationProblem> {
    let extension = cert
        .extensions()
        .iter()
        .find(|extension| extension.oid == APPLE_NONCE)
        .ok_or(AttestationProblem::CertificateRequirementsNotMet)?;

    let (_, nonce) = parse_der_container(|i: &[u8], hdr: Header| {
        if hdr.tag() != Tag::Sequence {
            return Err(nom::Err::Error(BerError::BerTypeError));
        }
        let (i, tagged_nonce) = parse_der_tagged_explicit(1, parse_der_octetstring)(i)?;
        let (class, _tag, nonce) = tagged_nonce.as_tagged()?;
        if class != Class::ContextSpecific {
            return Err(nom::Err::Error(BerError::BerTypeError));
        }
        let nonce: [u8; 32] = nonce
            .as_slice()?
            .try_into()
            .map_err(|_| BerError::InvalidLength)?;
        Ok((i, nonce))
    })(extension.value)
    .map_err(|_| AttestationProblem::CertificateRequirementsNotMet)?;

    Ok(nonce)
}

/// The subset of the Android key attestation extension the Relying Party
/// validates.
pub(crate) struct AndroidKeyAttestation {
    /// The challenge the key was attested over; must equal the client data
    /// hash of this ceremony.
    pub attestation_challenge: Vec<u8>,
}

const KM_ORIGIN_GENERATED: u32 = 0;
const KM_PURPOSE_SIGN: u32 = 2;

#[derive(Default, Clone, Copy)]
struct AuthorizationList {
    all_applications: bool,
    origin: Option<u32>,
    purpose: Option<u32>,
}

impl AuthorizationList {
    fn parse(i: &[u8]) -> der_parser::error::BerResult<Self> {
        parse_der_container(|i: &[u8], hdr: Header| {
            if hdr.tag() != Tag::Sequence {
                return Err(nom::Err::Error(BerError::BerTypeError));
            }

            let mut list = AuthorizationList::default();

            let mut i = i;
            while let Ok((rest, obj)) = parse_der(i) {
                i = rest;
                if obj.content == BerObjectContent::Optional(None) {
                    continue;
                }

                match obj.tag() {
                    // allApplications
                    Tag(600) => {
                        list.all_applications = true;
                    }
                    // origin
                    Tag(702) => {
                        if let BerObjectContent::Unknown(any) = obj.content {
                            let (_, value) = parse_der_integer(any.data)?;
                            list.origin = Some(value.as_u32()?);
                        }
                    }
                    // purpose, a SET OF INTEGER
                    Tag(1) => {
                        if let BerObjectContent::Unknown(any) = obj.content {
                            let (_, value) =
                                parse_der_container(|i, _| parse_der_integer(i))(any.data)?;
                            list.purpose = Some(value.as_u32()?);
                        }
                    }
                    _ => continue,
                };
            }

            Ok((i, list))
        })(i)
    }

    /// Whether this list binds the key to origin=GENERATED and purpose=SIGN.
    fn is_bound_for_signing(&self) -> Result<bool, BerError> {
        match (self.origin, self.purpose) {
            (Some(origin), Some(purpose))
                if origin == KM_ORIGIN_GENERATED && purpose == KM_PURPOSE_SIGN =>
            {
                Ok(true)
            }
            (None, None) => Ok(false),
            _ => Err(BerError::InvalidTag),
        }
    }
}

/// Parse and validate the Android key attestation extension of the leaf
/// certificate: extract the attestation challenge and require the
/// authorization lists to scope the key to this RP (no `allApplications`)
/// with origin GENERATED and purpose SIGN.
pub(crate) fn android_key_attestation(
    cert: &X509Certificate,
) -> Result<AndroidKeyAttestation, AttestationProblem> {
    let extension = cert
        .extensions()
        .iter()
        .find(|extension| extension.oid == ANDROID_KEY_ATTESTATION)
        .ok_or(AttestationProblem::CertificateRequirementsNotMet)?;

    let (_, parsed) = parse_der_container(|i: &[u8], hdr: Header| {
        if hdr.tag() != Tag::Sequence {
            return Err(nom::Err::Error(BerError::BerTypeError));
        }
        let (i, _attestation_version) = parse_der_integer(i)?;
        let (i, _attest_security_level) = parse_der_enum(i)?;
        let (i, _keymaster_version) = parse_der_integer(i)?;
        let (i, _km_security_level) = parse_der_enum(i)?;

        let (i, attestation_challenge) = parse_der_octetstring(i)?;
        let attestation_challenge = attestation_challenge.as_slice()?.to_vec();

        let (i, _unique_id) = parse_der_octetstring(i)?;

        let (i, software_enforced) = AuthorizationList::parse(i)?;
        let (i, tee_enforced) = AuthorizationList::parse(i)?;

        // The key must be origin bound: PublicKeyCredential is scoped to the
        // RP ID, so allApplications must not appear in either list.
        if software_enforced.all_applications || tee_enforced.all_applications {
            return Err(nom::Err::Error(BerError::InvalidTag));
        }

        let software_bound = software_enforced
            .is_bound_for_signing()
            .map_err(nom::Err::Error)?;
        let tee_bound = tee_enforced
            .is_bound_for_signing()
            .map_err(nom::Err::Error)?;
        if !software_bound && !tee_bound {
            return Err(nom::Err::Error(BerError::InvalidTag));
        }

        Ok((
            i,
            AndroidKeyAttestation {
                attestation_challenge,
            },
        ))
    })(extension.value)
    .map_err(|_| AttestationProblem::KeyAuthorizationInvalid)?;

    Ok(parsed)
}

/// The first common name of the certificate subject, used by the SafetyNet
/// hostname check.
pub(crate) fn common_name(cert: &X509Certificate) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.attr_value().as_str().ok())
        .map(str::to_owned)
}
