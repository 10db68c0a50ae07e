//! Ceremony policy and the injectable capability values the façade is
//! constructed with. Everything here is immutable after
//! [`crate::RelyingParty`] is built.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use webauthn_rp_types::{
    rand::random_vec,
    webauthn::{
        AttestationConveyancePreference, AuthenticatorSelectionCriteria, TokenBinding,
        UserVerificationRequirement,
    },
};

use crate::error::WebauthnError;

/// Challenges must carry at least this much entropy per the WebAuthn
/// cryptographic challenge considerations.
pub const MIN_CHALLENGE_LENGTH: usize = 16;

/// Policy knobs governing how strictly ceremonies are evaluated.
#[derive(Debug, Clone)]
pub(crate) struct Policy {
    /// Accept registrations whose attestation could not be tied to trusted
    /// metadata. Required for `none` and self attestation to succeed.
    pub allow_untrusted_attestation: bool,

    /// Treat a non-increasing signature counter as a fatal
    /// [`WebauthnError::CounterRollback`] instead of a warning.
    pub validate_signature_counter: bool,

    /// Accept origins whose host is a subdomain of an allowed origin's host.
    pub allow_origin_subdomain: bool,

    /// Ignore the port when matching origins against the allowed set.
    pub allow_origin_port: bool,

    /// Accept authenticator extension outputs that were never requested in
    /// the ceremony options.
    pub allow_unrequested_extensions: bool,

    /// The user verification requirement placed in emitted options and
    /// enforced against the UV flag when `Required`.
    pub user_verification: UserVerificationRequirement,

    /// The attestation conveyance preference placed in creation options.
    pub attestation: AttestationConveyancePreference,

    /// Authenticator selection criteria placed in creation options.
    pub authenticator_selection: Option<AuthenticatorSelectionCriteria>,

    /// Timeout hint, in milliseconds, placed in emitted options.
    pub timeout: Option<u32>,

    /// Maximum clock skew tolerated for SafetyNet attestation timestamps.
    pub safetynet_clock_skew: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allow_untrusted_attestation: true,
            validate_signature_counter: true,
            allow_origin_subdomain: false,
            allow_origin_port: false,
            allow_unrequested_extensions: false,
            user_verification: UserVerificationRequirement::default(),
            attestation: AttestationConveyancePreference::default(),
            authenticator_selection: None,
            timeout: None,
            safetynet_clock_skew: Duration::from_secs(60),
        }
    }
}

/// A thread-safe source of ceremony challenges.
///
/// The default implementation draws from the thread RNG; tests inject a
/// fixed generator to make ceremonies reproducible.
pub trait ChallengeGenerator: Send + Sync {
    /// Produce a fresh challenge of at least [`MIN_CHALLENGE_LENGTH`] bytes.
    fn generate(&self) -> Vec<u8>;
}

/// The default [`ChallengeGenerator`]: 32 cryptographically random bytes per
/// ceremony.
#[derive(Debug, Clone, Copy)]
pub struct RandomChallengeGenerator {
    length: usize,
}

impl RandomChallengeGenerator {
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(MIN_CHALLENGE_LENGTH),
        }
    }
}

impl Default for RandomChallengeGenerator {
    fn default() -> Self {
        Self { length: 32 }
    }
}

impl ChallengeGenerator for RandomChallengeGenerator {
    fn generate(&self) -> Vec<u8> {
        random_vec(self.length)
    }
}

/// A source of the current time, injected so attestation timestamp and
/// certificate validity checks are reproducible under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// The default [`Clock`], backed by [`SystemTime::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

pub(crate) fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(before_epoch) => -(before_epoch.duration().as_secs() as i64),
    }
}

pub(crate) fn unix_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        Err(before_epoch) => -(before_epoch.duration().as_millis() as i64),
    }
}

/// A hook for verifying the client data token binding against the
/// connection's token binding.
///
/// Token binding was deprecated after WebAuthn Level 1; the default
/// implementation accepts any reported state. Callers terminating their own
/// TLS can inject a verifier that compares the reported binding ID with the
/// connection's.
pub trait TokenBindingVerifier: Send + Sync {
    fn verify(&self, token_binding: Option<&TokenBinding>) -> Result<(), WebauthnError>;
}

/// The default [`TokenBindingVerifier`]: accept any binding state.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAnyTokenBinding;

impl TokenBindingVerifier for AcceptAnyTokenBinding {
    fn verify(&self, _token_binding: Option<&TokenBinding>) -> Result<(), WebauthnError> {
        Ok(())
    }
}
