//! The `none` attestation statement format: no attestation is conveyed and
//! the statement must be an empty map.
//!
//! <https://w3c.github.io/webauthn/#sctn-none-attestation>

use ciborium::value::Value;

use super::{invalid, stmt_entries, AttestationType, VerifiedAttestation};
use crate::error::{AttestationProblem, WebauthnError};

pub(super) fn verify(att_stmt: &Value) -> Result<VerifiedAttestation, WebauthnError> {
    if !stmt_entries(att_stmt)?.is_empty() {
        return Err(invalid(AttestationProblem::StatementNotEmpty));
    }

    Ok(VerifiedAttestation {
        attestation_type: AttestationType::None,
        trust_path: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_statement_passes() {
        let result = verify(&Value::Map(vec![])).unwrap();
        assert_eq!(result.attestation_type, AttestationType::None);
        assert!(result.trust_path.is_empty());
    }

    #[test]
    fn non_empty_statement_fails() {
        let stmt = Value::Map(vec![(Value::Text("alg".into()), Value::from(-7))]);
        assert_eq!(
            verify(&stmt),
            Err(WebauthnError::InvalidAttestation(
                AttestationProblem::StatementNotEmpty
            ))
        );
    }
}
