//! Types used for public key authentication

use serde::{Deserialize, Serialize};

use crate::{
    utils::serde::{ignore_unknown, ignore_unknown_opt_vec, maybe_stringified},
    webauthn::{PublicKeyCredential, PublicKeyCredentialDescriptor, UserVerificationRequirement},
    Bytes,
};

#[cfg(doc)]
use crate::{
    ctap2::AuthenticatorData,
    webauthn::{CollectedClientData, PublicKeyCredentialUserEntity},
};

/// The response to the successful authentication of a [`PublicKeyCredential`]
pub type AuthenticatedPublicKeyCredential = PublicKeyCredential<AuthenticatorAssertionResponse>;

/// This type supplies `get()` requests with the data it needs to generate an
/// assertion. Its `challenge` member MUST be present, while its other members
/// are OPTIONAL.
///
/// <https://w3c.github.io/webauthn/#dictdef-publickeycredentialrequestoptions>
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredentialRequestOptions {
    /// This member specifies a challenge that the authenticator signs, along
    /// with other data, when producing an authentication assertion. See the
    /// [Cryptographic Challenges] security consideration.
    ///
    /// [Cryptographic Challenges]: https://w3c.github.io/webauthn/#sctn-cryptographic-challenges
    pub challenge: Bytes,

    /// This OPTIONAL member specifies a time, in milliseconds, that the
    /// Relying Party is willing to wait for the call to complete. The value
    /// is treated as a hint, and MAY be overridden by the client.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "maybe_stringified"
    )]
    pub timeout: Option<u32>,

    /// This OPTIONAL member specifies the [RP ID] claimed by the
    /// [Relying Party]. The client MUST verify that the Relying Party's
    /// origin matches the scope of this RP ID. The authenticator MUST verify
    /// that this RP ID exactly equals the rpId of the credential to be used
    /// for the authentication ceremony.
    ///
    /// [RP ID]: https://w3c.github.io/webauthn/#rp-id
    /// [Relying Party]: https://w3c.github.io/webauthn/#relying-party
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rp_id: Option<String>,

    /// This OPTIONAL member is used by the client to find authenticators
    /// eligible for this authentication ceremony.
    ///
    /// * If the user account to authenticate is already identified (e.g. the
    ///   user has entered a username), the Relying Party SHOULD use this
    ///   member to list descriptors for the credential records in the user
    ///   account, in descending order of preference.
    /// * If the user account is not already identified, the Relying Party MAY
    ///   leave this member empty or unspecified. In this case, only
    ///   discoverable credentials will be utilized, and the user account MAY
    ///   be identified by the `userHandle` of the resulting
    ///   [`AuthenticatorAssertionResponse`].
    ///
    /// If not empty, the client MUST return an error if none of the listed
    /// credentials can be used.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "ignore_unknown_opt_vec"
    )]
    pub allow_credentials: Option<Vec<PublicKeyCredentialDescriptor>>,

    /// This OPTIONAL member specifies the Relying Party's requirements
    /// regarding user verification for the `get()` operation. Eligible
    /// authenticators are filtered to only those capable of satisfying this
    /// requirement.
    #[serde(default, deserialize_with = "ignore_unknown")]
    pub user_verification: UserVerificationRequirement,

    /// The Relying Party MAY use this OPTIONAL member to provide client
    /// extension inputs requesting additional processing. Kept as opaque
    /// JSON; the engine only uses the set of extension identifiers when
    /// deciding whether an authenticator output was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

/// This type represents an authenticator's response to a client's request for
/// generation of a new authentication assertion given the Relying Party's
/// challenge and OPTIONAL list of credentials it is aware of. This response
/// contains a cryptographic signature proving possession of the credential
/// private key, and optionally evidence of user consent to a specific
/// transaction.
///
/// <https://w3c.github.io/webauthn/#iface-authenticatorassertionresponse>
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAssertionResponse {
    /// This attribute contains the JSON serialization of
    /// [`CollectedClientData`] passed to the authenticator by the client in
    /// order to generate this assertion. The exact byte serialization MUST be
    /// preserved, as the hash of the serialized client data has been computed
    /// over it.
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Bytes,

    /// This attribute contains the authenticator data returned by the
    /// authenticator. See [`AuthenticatorData`]. The assertion signature is
    /// computed over these exact bytes concatenated with the client data
    /// hash.
    pub authenticator_data: Bytes,

    /// This attribute contains the raw signature returned from the
    /// authenticator.
    pub signature: Bytes,

    /// This attribute contains the user handle returned from the
    /// authenticator, or `None` if the authenticator did not return one.
    ///
    /// This mirrors the [`PublicKeyCredentialUserEntity::id`] field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<Bytes>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assertion_response_wire_round_trip() {
        let json = r#"{
            "id": "l8MIUoqN6XzuWcO8",
            "type": "public-key",
            "response": {
                "clientDataJSON": "eyJ0eXBlIjoid2ViYXV0aG4uZ2V0In0",
                "authenticatorData": "AAAA",
                "signature": "MEUCIQ",
                "userHandle": "YWxpY2U"
            }
        }"#;

        let credential: AuthenticatedPublicKeyCredential = serde_json::from_str(json).unwrap();
        assert_eq!(credential.id.as_slice(), b"\x97\xc3\x08\x52\x8a\x8d\xe9\x7c\xee\x59\xc3\xbc");
        assert_eq!(
            credential.response.user_handle.as_deref().map(Vec::as_slice),
            Some(b"alice".as_slice())
        );

        let reencoded = serde_json::to_string(&credential).unwrap();
        let reparsed: AuthenticatedPublicKeyCredential =
            serde_json::from_str(&reencoded).unwrap();
        assert_eq!(credential.id, reparsed.id);
        assert_eq!(
            credential.response.client_data_json,
            reparsed.response.client_data_json
        );
    }
}
