//! Types specific to public key credential creation
use std::fmt;

use coset::iana;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::{
    utils::serde::{
        i64_to_iana, ignore_unknown, ignore_unknown_opt_vec, ignore_unknown_vec, maybe_stringified,
    },
    webauthn::{
        AuthenticatorAttachment, AuthenticatorTransport, PublicKeyCredential,
        PublicKeyCredentialDescriptor, PublicKeyCredentialType, UserVerificationRequirement,
    },
    Bytes,
};

#[cfg(doc)]
use crate::ctap2::{Aaguid, AttestedCredentialData, AuthenticatorData};

/// The response to the successful creation of a PublicKeyCredential
pub type CreatedPublicKeyCredential = PublicKeyCredential<AuthenticatorAttestationResponse>;

/// This defines the request for creating a [`PublicKeyCredential`], emitted
/// by the Relying Party as the `publicKey` member of the credential creation
/// options.
///
/// <https://w3c.github.io/webauthn/#dictdef-publickeycredentialcreationoptions>
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredentialCreationOptions {
    /// This member contains a name and an identifier for the [Relying Party]
    /// responsible for the request.
    ///
    /// [Relying Party]: https://w3c.github.io/webauthn/#relying-party
    pub rp: PublicKeyCredentialRpEntity,

    /// This member contains names and an identifier for the user account
    /// performing the registration.
    ///
    /// The value's [`PublicKeyCredentialUserEntity::id`] can be returned as
    /// the `userHandle` in some future authentication ceremonies.
    pub user: PublicKeyCredentialUserEntity,

    /// This member specifies a challenge that the authenticator signs, along
    /// with other data, when producing an [`AttestedCredentialData`] for the
    /// newly created credential.
    ///
    /// See the [Cryptographic Challenges] security consideration.
    ///
    /// [Cryptographic Challenges]: https://w3c.github.io/webauthn/#sctn-cryptographic-challenges
    pub challenge: Bytes,

    /// This member lists the key types and signature algorithms the
    /// [Relying Party] supports, ordered from most preferred to least
    /// preferred. Unknown algorithm identifiers are dropped during
    /// deserialization rather than failing the whole request.
    ///
    /// [Relying Party]: https://w3c.github.io/webauthn/#relying-party
    #[serde(deserialize_with = "ignore_unknown_vec")]
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,

    /// This OPTIONAL member specifies a time, in milliseconds, that the
    /// Relying Party is willing to wait for the call to complete. This is
    /// treated as a hint, and MAY be overridden by the client.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "maybe_stringified"
    )]
    pub timeout: Option<u32>,

    /// The Relying Party SHOULD use this OPTIONAL member to list any existing
    /// credentials mapped to this user account (as identified by
    /// [`PublicKeyCredentialUserEntity::id`]). This ensures that the new
    /// credential is not created on an authenticator that already contains a
    /// credential mapped to this user account.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "ignore_unknown_opt_vec"
    )]
    pub exclude_credentials: Option<Vec<PublicKeyCredentialDescriptor>>,

    /// The Relying Party MAY use this OPTIONAL member to specify capabilities
    /// and settings that the authenticator MUST or SHOULD satisfy to
    /// participate in the `create()` operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_selection: Option<AuthenticatorSelectionCriteria>,

    /// The Relying Party MAY use this OPTIONAL member to specify a preference
    /// regarding attestation conveyance.
    ///
    /// The default value is [`AttestationConveyancePreference::None`].
    #[serde(default, deserialize_with = "ignore_unknown")]
    pub attestation: AttestationConveyancePreference,

    /// The Relying Party MAY use this OPTIONAL member to provide client
    /// extension inputs requesting additional processing by the client and
    /// authenticator. Kept as opaque JSON; the engine only uses the set of
    /// extension identifiers when deciding whether an authenticator output
    /// was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

/// This type is used to supply additional Relying Party attributes when
/// creating a new credential.
///
/// <https://w3c.github.io/webauthn/#dictdef-publickeycredentialrpentity>
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PublicKeyCredentialRpEntity {
    /// A unique identifier for the [Relying Party] entity, which sets the
    /// [RP ID]. On the server side this is always known, and it scopes every
    /// credential created through these options.
    ///
    /// [Relying Party]: https://w3c.github.io/webauthn/#relying-party
    /// [RP ID]: https://w3c.github.io/webauthn/#rp-id
    pub id: String,

    /// A human-palatable identifier for the Relying Party, intended only for
    /// display.
    pub name: String,

    /// A URL which resolves to an image associated with the Relying Party.
    /// Deprecated in WebAuthn Level 2 but still accepted on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// This type is used to supply additional user account attributes when
/// creating a new credential.
///
/// <https://w3c.github.io/webauthn/#dictdef-publickeycredentialuserentity>
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredentialUserEntity {
    /// The user handle of the user account: an opaque byte sequence with a
    /// maximum size of 64 bytes, chosen by the Relying Party and not meant to
    /// be displayed to the user.
    ///
    /// To ensure secure operation, authentication and authorization decisions
    /// MUST be made on the basis of this id member, not the
    /// [`Self::display_name`] nor [`Self::name`] members. The user handle
    /// MUST NOT contain personally identifying information and MUST NOT be
    /// empty.
    pub id: Bytes,

    /// A human-palatable name for the user account, intended only for
    /// display. For example, "Alex Müller" or "田中倫".
    pub display_name: String,

    /// A human-palatable identifier for a user account, intended only for
    /// display and for aiding the user in determining the difference between
    /// user accounts with similar display names. For example, "alexm" or
    /// "alex.mueller@example.com".
    pub name: String,

    /// A URL which resolves to an image associated with the user account.
    /// Deprecated in WebAuthn Level 2 but still accepted on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// This type is used to supply additional parameters when creating a new
/// credential.
///
/// <https://w3c.github.io/webauthn/#dictdef-publickeycredentialparameters>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCredentialParameters {
    /// This member specifies the type of credential to be created.
    #[serde(rename = "type", deserialize_with = "ignore_unknown")]
    pub ty: PublicKeyCredentialType,

    /// This member specifies the cryptographic signature algorithm with which
    /// the newly generated credential will be used, and thus also the type of
    /// asymmetric key pair to be generated, e.g., RSA or Elliptic Curve.
    ///
    /// > Note: we use `alg` as the latter member name, rather than
    /// >       spelling-out `algorithm`, because it will be serialized into
    /// >       a message to the authenticator, which may be sent over a
    /// >       low-bandwidth link.
    #[serde(with = "i64_to_iana")]
    pub alg: iana::Algorithm,
}

impl PublicKeyCredentialParameters {
    /// A `public-key` parameter entry for the given algorithm.
    pub fn new(alg: iana::Algorithm) -> Self {
        Self {
            ty: PublicKeyCredentialType::PublicKey,
            alg,
        }
    }
}

/// [Relying Parties] may use this type to specify their requirements
/// regarding authenticator attributes.
///
/// <https://w3c.github.io/webauthn/#dictdef-authenticatorselectioncriteria>
///
/// [Relying Parties]: https://w3c.github.io/webauthn/#webauthn-relying-party
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelectionCriteria {
    /// If this member is present, eligible authenticators are filtered to be
    /// only those authenticators attached with the specified
    /// [`AuthenticatorAttachment`] modality.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "ignore_unknown",
        default
    )]
    pub authenticator_attachment: Option<AuthenticatorAttachment>,

    /// Specifies the extent to which the Relying Party desires to create a
    /// client-side [discoverable credential]. For historical reasons the
    /// naming retains the deprecated "resident" terminology.
    ///
    /// [discoverable credential]: https://w3c.github.io/webauthn/#client-side-discoverable-credential
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "ignore_unknown",
        default
    )]
    pub resident_key: Option<ResidentKeyRequirement>,

    /// This member is retained for backwards compatibility with WebAuthn
    /// Level 1. Relying Parties SHOULD set it to `true` if, and only if,
    /// [`Self::resident_key`] is set to required.
    #[serde(default)]
    pub require_resident_key: bool,

    /// This member specifies the Relying Party's requirements regarding
    /// [user verification] for the `create()` operation.
    ///
    /// [user verification]: https://w3c.github.io/webauthn/#user-verification
    #[serde(default, deserialize_with = "ignore_unknown")]
    pub user_verification: UserVerificationRequirement,
}

/// This enumeration's values describe the Relying Party's requirements for
/// client-side [discoverable credentials] (formerly known as resident keys).
///
/// <https://w3c.github.io/webauthn/#enumdef-residentkeyrequirement>
///
/// [discoverable credentials]: https://w3c.github.io/webauthn/#client-side-discoverable-credential
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResidentKeyRequirement {
    /// The Relying Party prefers creating a server-side credential, but will
    /// accept a client-side discoverable credential.
    Discouraged,

    /// The Relying Party strongly prefers creating a client-side discoverable
    /// credential, but will accept a server-side credential.
    Preferred,

    /// The Relying Party requires a client-side discoverable credential. The
    /// client MUST return an error if a client-side discoverable credential
    /// cannot be created.
    Required,
}

/// Relying Parties may use this enumeration to specify their preference
/// regarding [attestation conveyance] during credential generation.
///
/// <https://w3c.github.io/webauthn/#enumdef-attestationconveyancepreference>
///
/// [attestation conveyance]: https://w3c.github.io/webauthn/#attestation-conveyance
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttestationConveyancePreference {
    /// The Relying Party is not interested in authenticator attestation.
    /// If the authenticator generates an attestation statement that is not a
    /// self attestation, the client will replace it with a None attestation
    /// statement.
    ///
    /// This is the default, and unknown values fall back to the behavior of
    /// this value.
    #[default]
    None,

    /// The Relying Party wants to receive a verifiable attestation statement,
    /// but allows the client to decide how to obtain it. The client MAY
    /// replace an authenticator-generated attestation statement with one
    /// generated by an Anonymization CA.
    Indirect,

    /// The Relying Party wants to receive the attestation statement as
    /// generated by the authenticator.
    Direct,

    /// The Relying Party wants to receive an attestation statement that may
    /// include uniquely identifying information, for controlled deployments
    /// within an enterprise.
    Enterprise,
}

/// The authenticator's response to a client's request for the creation of a
/// new [`PublicKeyCredential`], as the Relying Party receives it.
///
/// <https://w3c.github.io/webauthn/#iface-authenticatorattestationresponse>
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAttestationResponse {
    /// This attribute contains the JSON serialization of
    /// [`CollectedClientData`] passed to the authenticator by the client in
    /// order to generate this credential. The exact byte serialization MUST
    /// be preserved, as the hash of the serialized client data has been
    /// computed over it.
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Bytes,

    /// This attribute contains an attestation object, which is opaque to, and
    /// cryptographically protected against tampering by, the client. It
    /// contains both the [`AuthenticatorData`] (with the [`Aaguid`], the
    /// credential ID and the credential public key) and an attestation
    /// statement whose contents are determined by the attestation statement
    /// format.
    pub attestation_object: Bytes,

    /// This field contains a sequence of zero or more unique
    /// [`AuthenticatorTransport`] values believed to be supported by the
    /// authenticator, or `None` if the information is unavailable. Relying
    /// Parties SHOULD store these and replay them in future allow lists.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "ignore_unknown_opt_vec"
    )]
    pub transports: Option<Vec<AuthenticatorTransport>>,
}

/// The client data represents the contextual bindings of both the Relying
/// Party and the client. It is a key-value mapping whose keys are strings.
///
/// > Note: The [`CollectedClientData`] may be extended in the future.
/// >       Therefore it's critical when parsing to be tolerant of unknown
/// >       keys and of any reordering of the keys.
///
/// This struct conforms to the JSON byte serialization format expected of
/// `CollectedClientData`, detailed in section [5.8.1.1 Serialization] of the
/// WebAuthn spec: `type`, `challenge`, `origin` and `crossOrigin` are always
/// present in the serialized format in that order, and any extra parameters
/// keep the order in which they appeared, hence the use of [`IndexMap`].
///
/// <https://w3c.github.io/webauthn/#dictionary-client-data>
///
/// [5.8.1.1 Serialization]: https://w3c.github.io/webauthn/#clientdatajson-serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedClientData {
    /// This member contains the value [`ClientDataType::Create`] when
    /// creating new credentials, and [`ClientDataType::Get`] when getting an
    /// assertion from an existing credential. The purpose of this member is
    /// to prevent certain types of signature confusion attacks (where an
    /// attacker substitutes one legitimate signature for another).
    #[serde(rename = "type")]
    pub ty: ClientDataType,

    /// This member contains the base64url encoding of the challenge provided
    /// by the Relying Party.
    pub challenge: String,

    /// This member contains the fully qualified origin of the requester, as
    /// provided to the authenticator by the client, in the syntax defined by
    /// [RFC6454].
    ///
    /// [RFC6454]: https://www.rfc-editor.org/rfc/rfc6454
    pub origin: String,

    /// This OPTIONAL member contains the inverse of the
    /// `sameOriginWithAncestors` argument value that was passed into the
    /// internal method.
    #[serde(default, serialize_with = "truthiness")]
    pub cross_origin: Option<bool>,

    /// Information about the state of the deprecated Token Binding protocol
    /// on the connection the client data was collected over. Its absence
    /// indicates the client does not support token binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_binding: Option<TokenBinding>,

    /// CollectedClientData can be extended in the future, this accounts for
    /// unknown keys. Uses an IndexMap to preserve order of keys for JSON byte
    /// serialization.
    #[serde(flatten)]
    pub unknown_keys: IndexMap<String, serde_json::Value>,
}

fn truthiness<S>(cross_origin: &Option<bool>, ser: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    ser.serialize_bool(cross_origin.filter(|b| *b).is_some())
}

/// The state of the Token Binding protocol as reported by the client.
///
/// <https://www.w3.org/TR/webauthn-2/#dictdef-tokenbinding>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBinding {
    /// Whether token binding was used on the connection.
    pub status: TokenBindingStatus,

    /// The base64url encoding of the token binding ID the assertion was
    /// performed over; present exactly when `status` is
    /// [`TokenBindingStatus::Present`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Values of [`TokenBinding::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenBindingStatus {
    /// Token binding was used when communicating with the Relying Party.
    Present,
    /// The client supports token binding but it was not negotiated.
    Supported,
}

/// Used to limit the values of [`CollectedClientData::ty`] and serializes to
/// static strings.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ClientDataType {
    /// Serializes to the string `"webauthn.create"`
    #[serde(rename = "webauthn.create")]
    Create,

    /// Serializes to the string `"webauthn.get"`
    #[serde(rename = "webauthn.get")]
    Get,
}

impl fmt::Display for ClientDataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let renamed = serde_json::to_string(self).unwrap();
        write!(f, "{}", renamed.trim_matches('"'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Normal client data from a Chrome assertion
    const CLIENT_DATA_JSON_STRING: &str = r#"{
        "type":"webauthn.get",
        "challenge":"ZEvMflZDcwQJmarInnYi88px-6HZcv2Uoxw7-_JOOTg",
        "origin":"http://localhost:4000",
        "crossOrigin":false
    }"#;

    #[test]
    fn client_data_type_to_string() {
        assert_eq!(ClientDataType::Create.to_string(), "webauthn.create");
        assert_eq!(ClientDataType::Get.to_string(), "webauthn.get");
    }

    #[test]
    fn client_data_serialization_is_stable() {
        // This is the raw client data json byte buffer returned by a webauthn assertion
        let expected_client_data_bytes = r#"{"type":"webauthn.get","challenge":"ZEvMflZDcwQJmarInnYi88px-6HZcv2Uoxw7-_JOOTg","origin":"http://localhost:4000","crossOrigin":false}"#.as_bytes();

        let collected: CollectedClientData = serde_json::from_str(CLIENT_DATA_JSON_STRING).unwrap();

        let actual_client_data_bytes = serde_json::to_vec(&collected).unwrap();
        assert_eq!(
            actual_client_data_bytes.as_slice(),
            expected_client_data_bytes
        );
    }

    #[test]
    fn client_data_cross_origin_serialization() {
        let mut ccd: CollectedClientData = serde_json::from_str(CLIENT_DATA_JSON_STRING).unwrap();

        const CROSS_ORIGIN_TRUE: &str = r#"{"type":"webauthn.get","challenge":"ZEvMflZDcwQJmarInnYi88px-6HZcv2Uoxw7-_JOOTg","origin":"http://localhost:4000","crossOrigin":true}"#;
        ccd.cross_origin = Some(true);
        assert_eq!(serde_json::to_string(&ccd).unwrap(), CROSS_ORIGIN_TRUE);

        const CROSS_ORIGIN_FALSE: &str = r#"{"type":"webauthn.get","challenge":"ZEvMflZDcwQJmarInnYi88px-6HZcv2Uoxw7-_JOOTg","origin":"http://localhost:4000","crossOrigin":false}"#;
        ccd.cross_origin = Some(false);
        assert_eq!(serde_json::to_string(&ccd).unwrap(), CROSS_ORIGIN_FALSE);

        ccd.cross_origin = None;
        assert_eq!(serde_json::to_string(&ccd).unwrap(), CROSS_ORIGIN_FALSE);
    }

    #[test]
    fn token_binding_round_trip() {
        let json = r#"{
            "type":"webauthn.get",
            "challenge":"ZEvMflZDcwQJmarInnYi88px-6HZcv2Uoxw7-_JOOTg",
            "origin":"https://demo.example.com",
            "tokenBinding": {"status": "present", "id": "AAECAw"}
        }"#;

        let ccd: CollectedClientData = serde_json::from_str(json).unwrap();
        let binding = ccd.token_binding.as_ref().expect("should be present");
        assert_eq!(binding.status, TokenBindingStatus::Present);
        assert_eq!(binding.id.as_deref(), Some("AAECAw"));
    }

    #[test]
    fn unknown_client_data_keys_are_preserved_in_order() {
        let json = r#"{
            "type":"webauthn.get",
            "challenge":"ZEvMflZDcwQJmarInnYi88px-6HZcv2Uoxw7-_JOOTg",
            "origin":"http://localhost:4000",
            "crossOrigin":false,
            "other_keys_can_be_added_here":"do not compare clientDataJSON against a template. See https://goo.gl/yabPex"
        }"#;
        let expected = r#"{"type":"webauthn.get","challenge":"ZEvMflZDcwQJmarInnYi88px-6HZcv2Uoxw7-_JOOTg","origin":"http://localhost:4000","crossOrigin":false,"other_keys_can_be_added_here":"do not compare clientDataJSON against a template. See https://goo.gl/yabPex"}"#;

        let ccd: CollectedClientData = serde_json::from_str(json).unwrap();
        assert_eq!(serde_json::to_string(&ccd).unwrap(), expected);
    }

    #[test]
    fn webauthn_me_debugger_options_parse() {
        let request = r#"{
            "rp": {
              "id": "example.com",
              "name": "test"
            },
            "user": {
              "id": [
                208, 3, 44, 155, 74, 109, 149, 31, 234, 107, 36, 243, 249, 29, 32, 48,
                189, 69, 220, 216, 11, 222, 113, 155, 129, 208, 156, 217, 58, 99, 41,
                166
              ],
              "name": "test",
              "displayName": "Test User"
            },
            "challenge": [
              21, 69, 217, 214, 15, 130, 240, 139, 91, 76, 136, 60, 96, 131, 25, 110,
              173, 121, 215, 220, 246, 162, 39, 30, 0, 144, 238, 65, 195, 219, 32, 233
            ],
            "pubKeyCredParams": [
              { "type": "public-key", "alg": "-257" },
              { "type": "public-key", "alg": "-7" },
              { "type": "public-key", "alg": -1 }
            ],
            "timeout": "300000"
          }"#;

        let deserialized =
            serde_json::from_str::<PublicKeyCredentialCreationOptions>(request).unwrap();
        assert_eq!(deserialized.timeout, Some(300_000));
        // there are 3 in the json but we should be ignoring the `alg: -1`
        assert_eq!(deserialized.pub_key_cred_params.len(), 2);
    }
}
