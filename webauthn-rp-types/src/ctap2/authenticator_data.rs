use std::io::{Cursor, Read};

use ciborium::value::Value;
use coset::{AsCborValue, CborSerializable, CoseKey};

use crate::{
    crypto::sha256,
    ctap2::{ensure_unique_keys, Aaguid, DecodeError, Flags},
};

/// The authenticator data structure encodes contextual bindings made by the
/// authenticator: the RP ID the credential is scoped to, the user
/// presence/verification flags, a signature counter, and optionally the
/// attested credential data of a newly created credential.
///
/// The layout is fixed: `rpIdHash (32) ∥ flags (1) ∥ signCount (4, BE)`
/// followed by attested credential data when [`Flags::AT`] is set and a CBOR
/// map of extension outputs when [`Flags::ED`] is set. [`Self::from_slice`]
/// requires the input to be consumed exactly; any bytes left over after the
/// advertised structure are treated as an attack and rejected.
///
/// <https://w3c.github.io/webauthn/#sctn-authenticator-data>
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatorData {
    /// SHA-256 hash of the RP ID the credential is scoped to.
    rp_id_hash: [u8; 32],

    /// The flags representing the information of this credential. See [Flags]
    /// for more information.
    pub flags: Flags,

    /// Signature counter, 32-bit unsigned big-endian integer.
    pub counter: u32,

    /// An optional [AttestedCredentialData]; present exactly when [Flags::AT]
    /// is set. Its length depends on the length of the credential ID and
    /// credential public key being attested.
    pub attested_credential_data: Option<AttestedCredentialData>,

    /// Extension-defined authenticator data: a CBOR map with extension
    /// identifiers as keys, present exactly when [Flags::ED] is set.
    ///
    /// This field uses the generic [`Value`] rather than a map type because
    /// `Value` does not implement `Hash`; the decoder asserts that it is a
    /// CBOR map with unique keys.
    pub extensions: Option<Value>,
}

impl AuthenticatorData {
    /// Create a new AuthenticatorData value for an RP ID and a counter.
    ///
    /// No flags are set; combine with [`Self::set_flags`] and
    /// [`Self::set_attested_credential_data`] to build a complete value.
    pub fn new(rp_id: &str, counter: u32) -> Self {
        Self {
            rp_id_hash: sha256(rp_id.as_bytes()),
            flags: Flags::empty(),
            counter,
            attested_credential_data: None,
            extensions: None,
        }
    }

    /// Add an [`AttestedCredentialData`] to the authenticator data.
    ///
    /// This sets the [`Flags::AT`] value as well.
    pub fn set_attested_credential_data(mut self, acd: AttestedCredentialData) -> Self {
        self.attested_credential_data = Some(acd);
        self.set_flags(Flags::AT)
    }

    /// Set additional [`Flags`] on the authenticator data.
    pub fn set_flags(mut self, flags: Flags) -> Self {
        self.flags |= flags;
        self
    }

    /// Get read access to the RP ID hash
    pub fn rp_id_hash(&self) -> &[u8] {
        &self.rp_id_hash
    }

    /// Decode an authenticator data structure from a byte slice, requiring
    /// the slice to be consumed exactly.
    pub fn from_slice(v: &[u8]) -> Result<Self, DecodeError> {
        // hash len (32 bytes) + flags (1 byte) + counter (4 bytes)
        if v.len() < 37 {
            return Err(DecodeError::UnexpectedEnd);
        }

        // SAFETY: split_at panics if the index is greater than the length.
        // These are in bounds due to the guard above.
        let (rp_id_hash, v) = v.split_at(32);
        let (flag_byte, v) = v.split_at(1);
        let (counter, rest) = v.split_at(4);

        let flags = Flags::from_bits(flag_byte[0]).ok_or(DecodeError::InvalidFlags)?;

        let mut reader = Cursor::new(rest);
        let attested_credential_data = flags
            .contains(Flags::AT)
            .then(|| AttestedCredentialData::from_reader(&mut reader))
            .transpose()?;
        let extensions = flags
            .contains(Flags::ED)
            .then(|| {
                let value: Value =
                    ciborium::de::from_reader(&mut reader).map_err(|_| DecodeError::InvalidCbor)?;
                if let Value::Map(entries) = &value {
                    ensure_unique_keys(entries)?;
                    Ok(value)
                } else {
                    Err(DecodeError::ExpectedMap)
                }
            })
            .transpose()?;

        if reader.position() as usize != rest.len() {
            return Err(DecodeError::TrailingBytes);
        }

        // SAFETY: the unwrap is safe since rp_id_hash was created by
        // `split_at` with a length of exactly 32.
        Ok(AuthenticatorData {
            rp_id_hash: rp_id_hash.try_into().unwrap(),
            flags,
            counter: u32::from_be_bytes(counter.try_into().unwrap()),
            attested_credential_data,
            extensions,
        })
    }

    /// Encode an authenticator data structure to its byte representation.
    pub fn to_vec(&self) -> Vec<u8> {
        let flags = if self.attested_credential_data.is_some() {
            self.flags | Flags::AT
        } else {
            self.flags
        };

        self.rp_id_hash
            .into_iter()
            .chain(std::iter::once(flags.into()))
            .chain(self.counter.to_be_bytes())
            .chain(
                self.attested_credential_data
                    .clone()
                    .map(AttestedCredentialData::into_iter)
                    .into_iter()
                    .flatten(),
            )
            .chain(
                self.extensions
                    .as_ref()
                    .map(|val| {
                        let mut bytes = Vec::new();
                        ciborium::ser::into_writer(val, &mut bytes).unwrap();
                        bytes
                    })
                    .into_iter()
                    .flatten(),
            )
            .collect()
    }
}

/// Attested credential data is a variable-length byte array added to the
/// authenticator data when generating an attestation object for a credential.
///
/// Layout: `aaguid (16) ∥ credentialIdLength (2, BE) ∥ credentialId ∥
/// credentialPublicKey (COSE_Key, CTAP2 canonical CBOR)`.
///
/// <https://w3c.github.io/webauthn/#attested-credential-data>
#[derive(Debug, Clone, PartialEq)]
pub struct AttestedCredentialData {
    /// The AAGUID of the authenticator.
    pub aaguid: Aaguid,

    /// The credential ID whose length is prepended to the byte array. This is
    /// not public as it must not grow beyond [`Self::MAX_CREDENTIAL_ID_LENGTH`].
    credential_id: Vec<u8>,

    /// The credential public key encoded in COSE_Key format, as defined in
    /// Section 7 of [RFC9052], using the CTAP2 canonical CBOR encoding form.
    ///
    /// [RFC9052]: https://www.rfc-editor.org/rfc/rfc9052
    pub key: CoseKey,
}

impl AttestedCredentialData {
    /// Credential IDs are limited to 1023 bytes by the WebAuthn specification.
    pub const MAX_CREDENTIAL_ID_LENGTH: usize = 1023;

    /// Create a new [AttestedCredentialData].
    ///
    /// # Error
    /// Returns [`DecodeError::CredentialIdTooLong`] if the credential ID
    /// exceeds 1023 bytes.
    pub fn new(aaguid: Aaguid, credential_id: Vec<u8>, key: CoseKey) -> Result<Self, DecodeError> {
        if credential_id.len() > Self::MAX_CREDENTIAL_ID_LENGTH {
            return Err(DecodeError::CredentialIdTooLong);
        }

        Ok(Self {
            aaguid,
            credential_id,
            key,
        })
    }

    /// Get read access to the credential ID.
    pub fn credential_id(&self) -> &[u8] {
        &self.credential_id
    }

    /// Custom implementation rather than IntoIterator because the iterator
    /// type is complicated.
    fn into_iter(self) -> impl Iterator<Item = u8> {
        // SAFETY: if this unwrap fails, it is programmer error;
        // serialization in coset does not use serde::Serialize and takes by value.
        let cose_key = self.key.to_vec().unwrap();
        self.aaguid
            .0
            .into_iter()
            // SAFETY: the length has been asserted to be at most 1023 in the
            // constructor and decoder.
            .chain(
                u16::try_from(self.credential_id.len())
                    .unwrap()
                    .to_be_bytes(),
            )
            .chain(self.credential_id)
            .chain(cose_key)
    }

    fn from_reader<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut aaguid = [0; 16];
        reader
            .read_exact(&mut aaguid)
            .map_err(|_| DecodeError::UnexpectedEnd)?;
        let aaguid = Aaguid(aaguid);

        let mut cred_len = [0; 2];
        reader
            .read_exact(&mut cred_len)
            .map_err(|_| DecodeError::UnexpectedEnd)?;
        let cred_len: usize = u16::from_be_bytes(cred_len).into();
        if cred_len > Self::MAX_CREDENTIAL_ID_LENGTH {
            return Err(DecodeError::CredentialIdTooLong);
        }

        let mut credential_id = vec![0; cred_len];
        reader
            .read_exact(&mut credential_id)
            .map_err(|_| DecodeError::UnexpectedEnd)?;

        let cose_val: Value =
            ciborium::de::from_reader(reader).map_err(|_| DecodeError::InvalidCbor)?;
        let key = CoseKey::from_cbor_value(cose_val).map_err(|_| DecodeError::InvalidCoseKey)?;

        Ok(Self {
            aaguid,
            credential_id,
            key,
        })
    }
}

#[cfg(test)]
mod tests {
    use ciborium::cbor;
    use coset::CoseKeyBuilder;

    use super::*;
    use crate::rand::random_vec;

    // This is authenticator data extracted from a yubikey version 5
    const YUBIKEY_AUTH_DATA: &[u8] = &[
        0x74, 0xa6, 0xea, 0x92, 0x13, 0xc9, 0x9c, 0x2f, 0x74, 0xb2, 0x24, 0x92, 0xb3, 0x20, 0xcf,
        0x40, 0x26, 0x2a, 0x94, 0xc1, 0xa9, 0x50, 0xa0, 0x39, 0x7f, 0x29, 0x25, 0x0b, 0x60, 0x84,
        0x1e, 0xf0, 0xc5, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x30, 0x0c, 0x98, 0x51, 0xdc, 0x8b, 0xd1,
        0xef, 0x2d, 0x08, 0x4b, 0x20, 0x1c, 0xbf, 0x5e, 0x4c, 0x14, 0x04, 0x4f, 0xf8, 0x87, 0x04,
        0x11, 0x5e, 0x6c, 0x58, 0x94, 0xb8, 0x69, 0xbb, 0x45, 0x3c, 0x3f, 0xe2, 0x1e, 0xb1, 0x22,
        0x44, 0xc6, 0xe7, 0xe9, 0x6a, 0xbe, 0xd3, 0x0f, 0x18, 0x1b, 0x9f, 0x86, 0xa5, 0x01, 0x02,
        0x03, 0x26, 0x20, 0x01, 0x21, 0x58, 0x20, 0x0c, 0x98, 0x51, 0xdc, 0x8b, 0xd1, 0xef, 0x2d,
        0x08, 0x4b, 0x20, 0x1c, 0xbf, 0xad, 0xd9, 0xa6, 0x97, 0xbb, 0x48, 0xd9, 0xd7, 0xff, 0x91,
        0x0f, 0x0a, 0x6a, 0xc1, 0x0b, 0x91, 0x2b, 0xe9, 0x58, 0x22, 0x58, 0x20, 0x46, 0x78, 0x6f,
        0x2a, 0x95, 0x76, 0x69, 0x8c, 0x9f, 0x3a, 0xe2, 0x52, 0x3b, 0x4e, 0xb9, 0x4b, 0x8e, 0x07,
        0x4c, 0x35, 0xab, 0xc4, 0xdf, 0x68, 0x8f, 0xcd, 0x85, 0xd2, 0x9a, 0x01, 0xab, 0xba, 0xa1,
        0x6b, 0x63, 0x72, 0x65, 0x64, 0x50, 0x72, 0x6f, 0x74, 0x65, 0x63, 0x74, 0x02,
    ];

    fn yubikey_attested_credential_data() -> AttestedCredentialData {
        AttestedCredentialData {
            // interestingly a yubikey returns an empty AAGUID
            aaguid: Aaguid([0; 16]),
            credential_id: vec![
                0x0c, 0x98, 0x51, 0xdc, 0x8b, 0xd1, 0xef, 0x2d, 0x08, 0x4b, 0x20, 0x1c, 0xbf, 0x5e,
                0x4c, 0x14, 0x04, 0x4f, 0xf8, 0x87, 0x04, 0x11, 0x5e, 0x6c, 0x58, 0x94, 0xb8, 0x69,
                0xbb, 0x45, 0x3c, 0x3f, 0xe2, 0x1e, 0xb1, 0x22, 0x44, 0xc6, 0xe7, 0xe9, 0x6a, 0xbe,
                0xd3, 0x0f, 0x18, 0x1b, 0x9f, 0x86,
            ],
            key: CoseKeyBuilder::new_ec2_pub_key(
                coset::iana::EllipticCurve::P_256,
                vec![
                    0x0c, 0x98, 0x51, 0xdc, 0x8b, 0xd1, 0xef, 0x2d, 0x08, 0x4b, 0x20, 0x1c, 0xbf,
                    0xad, 0xd9, 0xa6, 0x97, 0xbb, 0x48, 0xd9, 0xd7, 0xff, 0x91, 0x0f, 0x0a, 0x6a,
                    0xc1, 0x0b, 0x91, 0x2b, 0xe9, 0x58,
                ],
                vec![
                    0x46, 0x78, 0x6f, 0x2a, 0x95, 0x76, 0x69, 0x8c, 0x9f, 0x3a, 0xe2, 0x52, 0x3b,
                    0x4e, 0xb9, 0x4b, 0x8e, 0x07, 0x4c, 0x35, 0xab, 0xc4, 0xdf, 0x68, 0x8f, 0xcd,
                    0x85, 0xd2, 0x9a, 0x01, 0xab, 0xba,
                ],
            )
            .algorithm(coset::iana::Algorithm::ES256)
            .build(),
        }
    }

    #[test]
    fn deserialize_authenticator_data_with_at_and_ed() {
        let auth_data = AuthenticatorData::from_slice(YUBIKEY_AUTH_DATA)
            .expect("could not parse the authenticator data");

        let expected = AuthenticatorData {
            rp_id_hash: [
                0x74, 0xa6, 0xea, 0x92, 0x13, 0xc9, 0x9c, 0x2f, 0x74, 0xb2, 0x24, 0x92, 0xb3, 0x20,
                0xcf, 0x40, 0x26, 0x2a, 0x94, 0xc1, 0xa9, 0x50, 0xa0, 0x39, 0x7f, 0x29, 0x25, 0x0b,
                0x60, 0x84, 0x1e, 0xf0,
            ],
            flags: Flags::UP | Flags::UV | Flags::AT | Flags::ED,
            counter: 1,
            attested_credential_data: Some(yubikey_attested_credential_data()),
            extensions: Some(
                cbor!({
                    "credProtect" => 2
                })
                .unwrap(),
            ),
        };
        assert_eq!(expected, auth_data);
    }

    #[test]
    fn deserialize_authenticator_data_with_only_ed() {
        // The yubikey vector with the attested credential data removed.
        let data = [
            0x74, 0xa6, 0xea, 0x92, 0x13, 0xc9, 0x9c, 0x2f, 0x74, 0xb2, 0x24, 0x92, 0xb3, 0x20,
            0xcf, 0x40, 0x26, 0x2a, 0x94, 0xc1, 0xa9, 0x50, 0xa0, 0x39, 0x7f, 0x29, 0x25, 0x0b,
            0x60, 0x84, 0x1e, 0xf0, 0x85, 0x00, 0x00, 0x00, 0x01, 0xa1, 0x6b, 0x63, 0x72, 0x65,
            0x64, 0x50, 0x72, 0x6f, 0x74, 0x65, 0x63, 0x74, 0x02,
        ];
        let auth_data =
            AuthenticatorData::from_slice(&data).expect("could not parse the authenticator data");

        assert_eq!(auth_data.flags, Flags::UP | Flags::UV | Flags::ED);
        assert_eq!(auth_data.counter, 1);
        assert!(auth_data.attested_credential_data.is_none());
        assert_eq!(
            auth_data.extensions,
            Some(cbor!({ "credProtect" => 2 }).unwrap())
        );
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut data = YUBIKEY_AUTH_DATA.to_vec();
        data.push(0x00);
        assert_eq!(
            AuthenticatorData::from_slice(&data),
            Err(DecodeError::TrailingBytes)
        );
    }

    #[test]
    fn truncated_data_is_rejected() {
        let data = &YUBIKEY_AUTH_DATA[..YUBIKEY_AUTH_DATA.len() - 4];
        assert!(AuthenticatorData::from_slice(data).is_err());

        assert_eq!(
            AuthenticatorData::from_slice(&YUBIKEY_AUTH_DATA[..20]),
            Err(DecodeError::UnexpectedEnd)
        );
    }

    #[test]
    fn extension_data_must_be_a_map() {
        // ED flag set but a CBOR integer follows the fixed head.
        let mut data = Vec::new();
        data.extend_from_slice(&[0x11; 32]);
        data.push(0x80); // ED only
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.push(0x02); // cbor uint 2
        assert_eq!(
            AuthenticatorData::from_slice(&data),
            Err(DecodeError::ExpectedMap)
        );
    }

    #[test]
    fn round_trip_deserialization() {
        let expected = AuthenticatorData::new("demo.example.com", 0)
            .set_flags(Flags::UP)
            .set_attested_credential_data(
                AttestedCredentialData::new(
                    Aaguid::new_empty(),
                    random_vec(16),
                    CoseKeyBuilder::new_ec2_pub_key(
                        coset::iana::EllipticCurve::P_256,
                        // seeing as these are random, it is not a valid key, so don't use this.
                        random_vec(32),
                        random_vec(32),
                    )
                    .algorithm(coset::iana::Algorithm::ES256)
                    .build(),
                )
                .unwrap(),
            );

        let auth_data_bytes = expected.to_vec();

        let auth_data =
            AuthenticatorData::from_slice(&auth_data_bytes).expect("could not deserialize");

        assert_eq!(expected, auth_data);
    }

    #[test]
    fn oversized_credential_id_is_rejected() {
        let acd = AttestedCredentialData::new(
            Aaguid::new_empty(),
            vec![0; 1024],
            CoseKeyBuilder::new_ec2_pub_key(
                coset::iana::EllipticCurve::P_256,
                vec![0; 32],
                vec![0; 32],
            )
            .build(),
        );
        assert_eq!(acd, Err(DecodeError::CredentialIdTooLong));
    }
}
