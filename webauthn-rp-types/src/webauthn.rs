//! Implementation of the types defined in [WebAuthn Level 3] which cross the
//! wire between a Relying Party and a client.
//!
//! [WebAuthn Level 3]: https://w3c.github.io/webauthn

use serde::{Deserialize, Serialize};

use crate::{utils::serde::ignore_unknown, Bytes};

mod assertion;
mod attestation;
mod common;

// re-export types
pub use self::{assertion::*, attestation::*, common::*};

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::AuthenticatorAssertionResponse {}
    impl Sealed for super::AuthenticatorAttestationResponse {}
}

/// Marker trait for response types
pub trait AuthenticatorResponse: sealed::Sealed {}

impl AuthenticatorResponse for AuthenticatorAssertionResponse {}
impl AuthenticatorResponse for AuthenticatorAttestationResponse {}

/// This is the response from a successful creation or assertion of a credential.
///
/// It is recommended to use the type aliases depending on which response you
/// are expecting:
/// * Credential creation: [CreatedPublicKeyCredential]
/// * Credential assertion: [AuthenticatedPublicKeyCredential]
///
/// <https://w3c.github.io/webauthn/#iface-pkcredential>
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredential<R: AuthenticatorResponse> {
    /// The credential ID, chosen by the authenticator. On the wire this is
    /// the base64url encoding of the raw identifier bytes.
    ///
    /// The credential ID is used to look up credentials for use and is
    /// therefore expected to be globally unique with high probability across
    /// all credentials of the same type across all authenticators.
    pub id: Bytes,

    /// Always [PublicKeyCredentialType::PublicKey]; unknown values are kept
    /// so the ceremony can reject them explicitly.
    #[serde(rename = "type", deserialize_with = "ignore_unknown")]
    pub ty: PublicKeyCredentialType,

    /// This contains the authenticator's response to the client's request to either:
    /// * create a public key, in which case it is an [AuthenticatorAttestationResponse] or
    /// * generate an authentication assertion, in which case it is an [AuthenticatorAssertionResponse]
    pub response: R,
}
