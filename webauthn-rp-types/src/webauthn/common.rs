//! Common types used in both attestation (registration) and assertion
//! (authentication).

use serde::{Deserialize, Serialize};

use crate::{
    utils::serde::{ignore_unknown, ignore_unknown_opt_vec},
    Bytes,
};

#[cfg(doc)]
use crate::webauthn::{
    PublicKeyCredential, PublicKeyCredentialCreationOptions, PublicKeyCredentialRequestOptions,
};

/// This enumeration defines the valid credential types. It is an extension
/// point; values can be added to it in the future, as more credential types
/// are defined.
///
/// <https://w3c.github.io/webauthn/#enumdef-publickeycredentialtype>
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PublicKeyCredentialType {
    /// Currently the only type defined is a `PublicKey` meaning the public
    /// counterpart of an asymmetric key pair.
    PublicKey,
    /// This is the default as it will be ignored if the value is unknown
    /// during deserialization
    #[default]
    Unknown,
}

/// Identifies a specific public key credential. It is used in
/// [`PublicKeyCredentialCreationOptions::exclude_credentials`] to prevent
/// creating duplicate credentials on the same authenticator, and in
/// [`PublicKeyCredentialRequestOptions::allow_credentials`] to determine if
/// and how the credential can currently be reached by the client.
///
/// It is recommended to ignore any credential whose type is
/// [`PublicKeyCredentialType::Unknown`].
///
/// <https://w3c.github.io/webauthn/#dictdef-publickeycredentialdescriptor>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCredentialDescriptor {
    /// This member contains the type of the public key credential the caller
    /// is referring to.
    #[serde(rename = "type", deserialize_with = "ignore_unknown")]
    pub ty: PublicKeyCredentialType,

    /// This member contains the credential ID of the public key credential
    /// the caller is referring to.
    ///
    /// This mirrors the [`PublicKeyCredential::id`] field.
    pub id: Bytes,

    /// This OPTIONAL member contains a hint as to how the client might
    /// communicate with the managing authenticator of the credential the
    /// caller is referring to. A Relying Party SHOULD store the transports
    /// returned at registration time and replay them here.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "ignore_unknown_opt_vec"
    )]
    pub transports: Option<Vec<AuthenticatorTransport>>,
}

impl PublicKeyCredentialDescriptor {
    /// Checks whether [`Self::ty`] is not of value
    /// [`PublicKeyCredentialType::Unknown`]. This should be used for
    /// filtering a list of descriptors that are not of a known type.
    pub fn is_known(&self) -> bool {
        match self.ty {
            PublicKeyCredentialType::PublicKey => true,
            PublicKeyCredentialType::Unknown => false,
        }
    }
}

/// A Relying Party may require [user verification] for some of its operations
/// but not for others, and may use this type to express its needs.
///
/// <https://w3c.github.io/webauthn/#enumdef-userverificationrequirement>
///
/// [user verification]: https://w3c.github.io/webauthn/#user-verification
#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserVerificationRequirement {
    /// The Relying Party requires user verification for the operation and
    /// will fail the overall ceremony if the response does not have the UV
    /// flag set.
    Required,

    /// The Relying Party prefers user verification for the operation if
    /// possible, but will not fail the operation if the response does not
    /// have the UV flag set.
    #[default]
    Preferred,

    /// The Relying Party does not want user verification employed during the
    /// operation (e.g., in the interest of minimizing disruption to the user
    /// interaction flow).
    Discouraged,
}

/// Authenticators may implement various transports for communicating with
/// clients. This enumeration defines hints as to how clients might
/// communicate with a particular authenticator in order to obtain an
/// assertion for a specific credential.
///
/// <https://w3c.github.io/webauthn/#enum-transport>
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticatorTransport {
    /// Indicates the respective authenticator can be contacted over removable USB.
    Usb,

    /// Indicates the respective authenticator can be contacted over Near
    /// Field Communication (NFC).
    Nfc,

    /// Indicates the respective authenticator can be contacted over Bluetooth
    /// Smart (Bluetooth Low Energy / BLE).
    Ble,

    /// Indicates the respective authenticator can be contacted using a
    /// combination of (often separate) data-transport and proximity
    /// mechanisms. This supports, for example, authentication on a desktop
    /// computer using a smartphone.
    #[serde(alias = "cable")]
    Hybrid,

    /// Indicates the respective authenticator is contacted using a client
    /// device-specific transport, i.e. it is a platform authenticator. These
    /// authenticators are not removable from the client device.
    Internal,
}

/// This enumeration's values describe authenticators' attachment modalities.
/// Relying Parties use this to express a preferred authenticator attachment
/// modality when creating a credential.
///
/// <https://w3c.github.io/webauthn/#enumdef-authenticatorattachment>
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorAttachment {
    /// A platform authenticator attached using a client device-specific
    /// transport, usually not removable from the client device.
    Platform,

    /// A roaming authenticator attached using cross-platform transports,
    /// removable from and able to "roam" between client devices.
    CrossPlatform,
}
