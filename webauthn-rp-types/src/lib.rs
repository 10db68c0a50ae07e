//! # WebAuthn RP Types
//!
//! Rust type definitions for the server side of the [WebAuthn Level 3]
//! specification: the JSON dictionaries a Relying Party exchanges with a
//! client, and the binary CTAP2 structures embedded inside authenticator
//! responses.
//!
//! Parsing in this crate is written for adversarial input: every
//! length-bearing read is bounds checked and the binary decoders reject
//! trailing bytes wherever the enclosing structure implies an exact length.
//!
//! [WebAuthn Level 3]: https://w3c.github.io/webauthn

mod utils;

pub mod ctap2;
pub mod webauthn;

// Re-exports
pub use utils::{
    bytes::{Bytes, NotBase64Encoded},
    crypto, encoding, rand,
};
