use std::io::Cursor;

use ciborium::value::Value;

use crate::ctap2::{ensure_unique_keys, AuthenticatorData, DecodeError};

/// The attestation object conveyed in a registration response: a CBOR map
/// with the string keys `fmt`, `authData` and `attStmt`.
///
/// The raw `authData` bytes are retained alongside the parsed structure
/// because attestation signatures are computed over the exact bytes the
/// authenticator produced, not over a re-encoding.
///
/// <https://w3c.github.io/webauthn/#attestation-object>
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationObject {
    /// The attestation statement format identifier.
    pub fmt: String,

    /// The parsed authenticator data.
    pub auth_data: AuthenticatorData,

    /// The raw authenticator data bytes as they appeared on the wire.
    pub auth_data_bytes: Vec<u8>,

    /// The attestation statement, an opaque CBOR map whose meaning depends on
    /// [`Self::fmt`]. Kept as a generic [`Value`] for the statement verifiers
    /// to interpret.
    pub att_stmt: Value,
}

impl AttestationObject {
    /// Decode an attestation object from CBOR bytes, requiring the input to
    /// be consumed exactly.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Cursor::new(bytes);
        let value: Value =
            ciborium::de::from_reader(&mut reader).map_err(|_| DecodeError::InvalidCbor)?;
        if reader.position() as usize != bytes.len() {
            return Err(DecodeError::TrailingBytes);
        }

        let Value::Map(entries) = value else {
            return Err(DecodeError::ExpectedMap);
        };
        ensure_unique_keys(&entries)?;

        let mut fmt = None;
        let mut auth_data_bytes = None;
        let mut att_stmt = None;
        for (key, val) in entries {
            let Value::Text(key) = key else {
                return Err(DecodeError::InvalidField("attestation object key"));
            };
            match (key.as_str(), val) {
                ("fmt", Value::Text(f)) => fmt = Some(f),
                ("fmt", _) => return Err(DecodeError::InvalidField("fmt")),
                ("authData", Value::Bytes(b)) => auth_data_bytes = Some(b),
                ("authData", _) => return Err(DecodeError::InvalidField("authData")),
                ("attStmt", stmt @ Value::Map(_)) => {
                    if let Value::Map(stmt_entries) = &stmt {
                        ensure_unique_keys(stmt_entries)?;
                    }
                    att_stmt = Some(stmt);
                }
                ("attStmt", _) => return Err(DecodeError::InvalidField("attStmt")),
                // Unknown keys may be added in future levels of the spec.
                _ => continue,
            }
        }

        let fmt = fmt.ok_or(DecodeError::MissingField("fmt"))?;
        let auth_data_bytes = auth_data_bytes.ok_or(DecodeError::MissingField("authData"))?;
        let att_stmt = att_stmt.ok_or(DecodeError::MissingField("attStmt"))?;

        let auth_data = AuthenticatorData::from_slice(&auth_data_bytes)?;

        Ok(Self {
            fmt,
            auth_data,
            auth_data_bytes,
            att_stmt,
        })
    }

    /// Encode an attestation object to canonical CBOR bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        let map = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text(self.fmt.clone())),
            (
                Value::Text("authData".into()),
                Value::Bytes(self.auth_data_bytes.clone()),
            ),
            (Value::Text("attStmt".into()), self.att_stmt.clone()),
        ]);
        let mut bytes = Vec::new();
        // SAFETY: serializing a well-formed Value cannot fail.
        ciborium::ser::into_writer(&map, &mut bytes).unwrap();
        bytes
    }
}

#[cfg(test)]
mod tests {
    use ciborium::{cbor, value::Value};

    use super::*;
    use crate::ctap2::Flags;

    fn sample_auth_data() -> Vec<u8> {
        AuthenticatorData::new("example.com", 7)
            .set_flags(Flags::UP)
            .to_vec()
    }

    fn encode(value: &Value) -> Vec<u8> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(value, &mut bytes).unwrap();
        bytes
    }

    #[test]
    fn decode_none_attestation_object() {
        let value = cbor!({
            "fmt" => "none",
            "authData" => Value::Bytes(sample_auth_data()),
            "attStmt" => {},
        })
        .unwrap();

        let parsed = AttestationObject::from_slice(&encode(&value)).expect("should decode");
        assert_eq!(parsed.fmt, "none");
        assert_eq!(parsed.auth_data.counter, 7);
        assert_eq!(parsed.att_stmt, Value::Map(vec![]));
    }

    #[test]
    fn round_trip() {
        let value = cbor!({
            "fmt" => "packed",
            "authData" => Value::Bytes(sample_auth_data()),
            "attStmt" => { "alg" => -7, "sig" => Value::Bytes(vec![1, 2, 3]) },
        })
        .unwrap();

        let parsed = AttestationObject::from_slice(&encode(&value)).expect("should decode");
        let reparsed = AttestationObject::from_slice(&parsed.to_vec()).expect("should re-decode");
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn missing_statement_is_rejected() {
        let value = cbor!({
            "fmt" => "none",
            "authData" => Value::Bytes(sample_auth_data()),
        })
        .unwrap();

        assert_eq!(
            AttestationObject::from_slice(&encode(&value)),
            Err(DecodeError::MissingField("attStmt"))
        );
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let value = cbor!({
            "fmt" => "none",
            "authData" => Value::Bytes(sample_auth_data()),
            "attStmt" => {},
        })
        .unwrap();
        let mut bytes = encode(&value);
        bytes.push(0x00);

        assert_eq!(
            AttestationObject::from_slice(&bytes),
            Err(DecodeError::TrailingBytes)
        );
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let value = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text("none".into())),
            (Value::Text("fmt".into()), Value::Text("none".into())),
            (
                Value::Text("authData".into()),
                Value::Bytes(sample_auth_data()),
            ),
            (Value::Text("attStmt".into()), Value::Map(vec![])),
        ]);

        assert_eq!(
            AttestationObject::from_slice(&encode(&value)),
            Err(DecodeError::DuplicateMapKey)
        );
    }
}
