//! # WebAuthn RP Server
//!
//! This crate implements the server side of the [WebAuthn Level 3]
//! specification: the registration and authentication ceremonies a Relying
//! Party performs, including parsing of authenticator messages, attestation
//! statement verification, assertion signature verification, and the origin
//! and anti-replay policy checks gluing them together.
//!
//! The core is stateless across ceremonies. A [`RelyingParty`] value holds
//! immutable configuration plus two capability interfaces the caller
//! supplies: a [`store::CredentialRepository`] over the caller's user and
//! credential records, and optionally a [`store::MetadataService`] for
//! attestation trust decisions. The caller is responsible for persisting a
//! pending request between `start_*` and `finish_*`, removing it on the
//! first finish attempt, and writing the resulting credential or signature
//! counter back to its store.
//!
//! ```
//! use url::Url;
//! use webauthn_rp_server::store::MemoryRepository;
//! use webauthn_rp_server::types::webauthn::{
//!     PublicKeyCredentialRpEntity, PublicKeyCredentialUserEntity,
//! };
//! use webauthn_rp_server::RelyingParty;
//!
//! let rp = RelyingParty::builder(
//!     PublicKeyCredentialRpEntity {
//!         id: "example.com".into(),
//!         name: "Example".into(),
//!         icon: None,
//!     },
//!     MemoryRepository::new(),
//! )
//! .allowed_origin(Url::parse("https://example.com").unwrap())
//! .build()
//! .unwrap();
//!
//! let request = rp
//!     .start_registration(PublicKeyCredentialUserEntity {
//!         id: vec![1; 16].into(),
//!         name: "alice".into(),
//!         display_name: "Alice".into(),
//!         icon: None,
//!     })
//!     .unwrap();
//! assert!(request.public_key.challenge.len() >= 16);
//! ```
//!
//! [WebAuthn Level 3]: https://w3c.github.io/webauthn

use std::time::Duration;

use public_suffix::{EffectiveTLDProvider, DEFAULT_PROVIDER};
use url::Url;

use webauthn_rp_types::webauthn::{
    AttestationConveyancePreference, AuthenticatorSelectionCriteria,
    PublicKeyCredentialParameters, PublicKeyCredentialRpEntity, UserVerificationRequirement,
};
use webauthn_rp_types::Bytes;

pub use webauthn_rp_types as types;

pub mod attestation;
pub mod config;
pub mod store;

mod authentication;
mod crypto;
mod error;
mod registration;

#[cfg(test)]
mod tests;

pub use attestation::{AttestationFormat, AttestationType};
pub use authentication::{AssertionRequest, AssertionResult};
pub use crypto::{is_supported_algorithm, SUPPORTED_ALGORITHMS};
pub use error::{AttestationProblem, Warning, WebauthnError};
pub use registration::{RegistrationRequest, RegistrationResult};

use config::{
    AcceptAnyTokenBinding, ChallengeGenerator, Clock, Policy, RandomChallengeGenerator,
    SystemClock, TokenBindingVerifier, MIN_CHALLENGE_LENGTH,
};
use store::{CredentialRepository, MetadataService, NoMetadata};

/// A WebAuthn Relying Party: immutable configuration plus the four ceremony
/// entry points.
///
/// Construct via [`RelyingParty::builder`]. The value is safe to share
/// across threads once built; each ceremony call is a pure function of its
/// arguments and the externally supplied stores.
pub struct RelyingParty<R, M = NoMetadata>
where
    R: CredentialRepository,
    M: MetadataService,
{
    pub(crate) identity: PublicKeyCredentialRpEntity,
    pub(crate) allowed_origins: Vec<Url>,
    pub(crate) pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    pub(crate) credentials: R,
    pub(crate) metadata: M,
    pub(crate) challenge_generator: Box<dyn ChallengeGenerator>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) token_binding: Box<dyn TokenBindingVerifier>,
    pub(crate) policy: Policy,
}

impl<R: CredentialRepository> RelyingParty<R, NoMetadata> {
    /// Start building a Relying Party for the given identity, backed by the
    /// given credential repository.
    pub fn builder(
        identity: PublicKeyCredentialRpEntity,
        credentials: R,
    ) -> RelyingPartyBuilder<R, NoMetadata> {
        RelyingPartyBuilder {
            identity,
            credentials,
            metadata: NoMetadata,
            allowed_origins: Vec::new(),
            pub_key_cred_params: vec![
                PublicKeyCredentialParameters::new(coset::iana::Algorithm::ES256),
                PublicKeyCredentialParameters::new(coset::iana::Algorithm::RS256),
                PublicKeyCredentialParameters::new(coset::iana::Algorithm::EdDSA),
            ],
            challenge_generator: Box::new(RandomChallengeGenerator::default()),
            clock: Box::new(SystemClock),
            token_binding: Box::new(AcceptAnyTokenBinding),
            policy: Policy::default(),
            allows_insecure_localhost: false,
        }
    }
}

impl<R: CredentialRepository, M: MetadataService> RelyingParty<R, M> {
    /// The Relying Party identity this instance was configured with.
    pub fn identity(&self) -> &PublicKeyCredentialRpEntity {
        &self.identity
    }

    /// Read access to the configured credential repository.
    pub fn credentials(&self) -> &R {
        &self.credentials
    }

    /// Generate a fresh ceremony challenge through the configured generator.
    pub(crate) fn new_challenge(&self) -> Result<Bytes, WebauthnError> {
        let challenge = self.challenge_generator.generate();
        if challenge.len() < MIN_CHALLENGE_LENGTH {
            log::warn!("challenge generator produced fewer than 16 bytes");
            return Err(WebauthnError::InternalCryptoError);
        }
        Ok(challenge.into())
    }

    /// Check a client data origin against the allowed origin set, honoring
    /// the subdomain and port policy flags.
    pub(crate) fn assert_origin(&self, origin: &str) -> Result<(), WebauthnError> {
        let origin = Url::parse(origin).map_err(|_| WebauthnError::OriginMismatch)?;
        let Some(host) = origin.host_str() else {
            return Err(WebauthnError::OriginMismatch);
        };

        for allowed in &self.allowed_origins {
            if origin.scheme() != allowed.scheme() {
                continue;
            }
            // SAFETY: allowed origins were checked for a host at build time.
            let allowed_host = allowed.host_str().unwrap();
            let host_matches = host == allowed_host
                || (self.policy.allow_origin_subdomain
                    && host
                        .strip_suffix(allowed_host)
                        .is_some_and(|prefix| prefix.ends_with('.')));
            let port_matches = self.policy.allow_origin_port
                || origin.port_or_known_default() == allowed.port_or_known_default();
            if host_matches && port_matches {
                return Ok(());
            }
        }

        Err(WebauthnError::OriginMismatch)
    }

    /// Reject authenticator extension outputs that were never requested,
    /// unless policy allows them.
    pub(crate) fn assert_extensions(
        &self,
        requested: Option<&serde_json::Value>,
        returned: Option<&ciborium::value::Value>,
    ) -> Result<(), WebauthnError> {
        if self.policy.allow_unrequested_extensions {
            return Ok(());
        }
        let Some(ciborium::value::Value::Map(entries)) = returned else {
            return Ok(());
        };

        let requested_ids: Vec<&str> = requested
            .and_then(serde_json::Value::as_object)
            .map(|object| object.keys().map(String::as_str).collect())
            .unwrap_or_default();

        for (key, _) in entries {
            let unrequested = match key.as_text() {
                Some(identifier) => !requested_ids.contains(&identifier),
                None => true,
            };
            if unrequested {
                return Err(WebauthnError::UnrequestedExtension);
            }
        }
        Ok(())
    }
}

/// Builder for [`RelyingParty`]. Mandatory inputs are the identity, the
/// credential repository and at least one allowed origin; everything else
/// has spec-default values.
pub struct RelyingPartyBuilder<R, M = NoMetadata> {
    identity: PublicKeyCredentialRpEntity,
    credentials: R,
    metadata: M,
    allowed_origins: Vec<Url>,
    pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    challenge_generator: Box<dyn ChallengeGenerator>,
    clock: Box<dyn Clock>,
    token_binding: Box<dyn TokenBindingVerifier>,
    policy: Policy,
    allows_insecure_localhost: bool,
}

impl<R: CredentialRepository, M: MetadataService> RelyingPartyBuilder<R, M> {
    /// Add an origin that clients may perform ceremonies from. The origin's
    /// host must be scoped under the RP ID.
    pub fn allowed_origin(mut self, origin: Url) -> Self {
        self.allowed_origins.push(origin);
        self
    }

    /// Add several allowed origins at once.
    pub fn allowed_origins(mut self, origins: impl IntoIterator<Item = Url>) -> Self {
        self.allowed_origins.extend(origins);
        self
    }

    /// Replace the default credential parameter preference list
    /// (ES256, RS256, EdDSA).
    pub fn pub_key_cred_params(mut self, params: Vec<PublicKeyCredentialParameters>) -> Self {
        self.pub_key_cred_params = params;
        self
    }

    /// Supply a metadata service for attestation trust decisions.
    pub fn metadata_service<M2: MetadataService>(self, metadata: M2) -> RelyingPartyBuilder<R, M2> {
        RelyingPartyBuilder {
            identity: self.identity,
            credentials: self.credentials,
            metadata,
            allowed_origins: self.allowed_origins,
            pub_key_cred_params: self.pub_key_cred_params,
            challenge_generator: self.challenge_generator,
            clock: self.clock,
            token_binding: self.token_binding,
            policy: self.policy,
            allows_insecure_localhost: self.allows_insecure_localhost,
        }
    }

    /// Replace the challenge generator. Mostly useful for tests; the default
    /// draws 32 random bytes per ceremony.
    pub fn challenge_generator(mut self, generator: impl ChallengeGenerator + 'static) -> Self {
        self.challenge_generator = Box::new(generator);
        self
    }

    /// Replace the clock used for attestation timestamp and certificate
    /// validity checks.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Install a token binding verification hook. The default accepts any
    /// reported binding state.
    pub fn token_binding_verifier(
        mut self,
        verifier: impl TokenBindingVerifier + 'static,
    ) -> Self {
        self.token_binding = Box::new(verifier);
        self
    }

    /// Whether registrations without trusted attestation succeed.
    /// Defaults to `true`; required for `none` and self attestation.
    pub fn allow_untrusted_attestation(mut self, allow: bool) -> Self {
        self.policy.allow_untrusted_attestation = allow;
        self
    }

    /// Whether a non-increasing signature counter fails the assertion.
    /// Defaults to `true`.
    pub fn validate_signature_counter(mut self, validate: bool) -> Self {
        self.policy.validate_signature_counter = validate;
        self
    }

    /// Whether origins scoped under an allowed origin's host are accepted.
    /// Defaults to `false`.
    pub fn allow_origin_subdomain(mut self, allow: bool) -> Self {
        self.policy.allow_origin_subdomain = allow;
        self
    }

    /// Whether the port is ignored when matching origins. Defaults to
    /// `false`.
    pub fn allow_origin_port(mut self, allow: bool) -> Self {
        self.policy.allow_origin_port = allow;
        self
    }

    /// Whether authenticator extension outputs that were not requested are
    /// tolerated. Defaults to `false`.
    pub fn allow_unrequested_extensions(mut self, allow: bool) -> Self {
        self.policy.allow_unrequested_extensions = allow;
        self
    }

    /// The user verification requirement placed in emitted options and
    /// enforced when set to `Required`.
    pub fn user_verification(mut self, requirement: UserVerificationRequirement) -> Self {
        self.policy.user_verification = requirement;
        self
    }

    /// The attestation conveyance preference for creation options.
    pub fn attestation(mut self, preference: AttestationConveyancePreference) -> Self {
        self.policy.attestation = preference;
        self
    }

    /// Authenticator selection criteria for creation options.
    pub fn authenticator_selection(mut self, criteria: AuthenticatorSelectionCriteria) -> Self {
        self.policy.authenticator_selection = Some(criteria);
        self
    }

    /// The timeout hint, in milliseconds, placed in emitted options.
    pub fn timeout(mut self, timeout_millis: u32) -> Self {
        self.policy.timeout = Some(timeout_millis);
        self
    }

    /// Maximum tolerated clock skew for SafetyNet attestation timestamps.
    /// Defaults to 60 seconds.
    pub fn safetynet_clock_skew(mut self, skew: Duration) -> Self {
        self.policy.safetynet_clock_skew = skew;
        self
    }

    /// Allow `localhost` as the RP ID for local development. Defaults to
    /// `false`.
    pub fn allows_insecure_localhost(mut self, allow: bool) -> Self {
        self.allows_insecure_localhost = allow;
        self
    }

    /// Validate the configuration and produce the immutable [`RelyingParty`].
    ///
    /// The RP ID must be a registrable domain (or `localhost` when allowed)
    /// and a registrable suffix of every allowed origin's host, and every
    /// configured credential parameter must name a supported algorithm.
    pub fn build(self) -> Result<RelyingParty<R, M>, WebauthnError> {
        let rp_id = &self.identity.id;

        if rp_id == "localhost" {
            if !self.allows_insecure_localhost {
                return Err(WebauthnError::InvalidRpId);
            }
        } else if DEFAULT_PROVIDER.effective_tld_plus_one(rp_id).is_err() {
            return Err(WebauthnError::InvalidRpId);
        }

        if self.allowed_origins.is_empty() {
            return Err(WebauthnError::OriginMissingDomain);
        }
        for origin in &self.allowed_origins {
            let Some(host) = origin.host_str() else {
                return Err(WebauthnError::OriginMissingDomain);
            };
            let scoped = host == rp_id
                || host
                    .strip_suffix(rp_id.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'));
            if !scoped {
                return Err(WebauthnError::InvalidRpId);
            }
        }

        for param in &self.pub_key_cred_params {
            if !is_supported_algorithm(param.alg) {
                use coset::iana::EnumI64;
                return Err(WebauthnError::UnsupportedAlgorithm(param.alg.to_i64()));
            }
        }

        Ok(RelyingParty {
            identity: self.identity,
            allowed_origins: self.allowed_origins,
            pub_key_cred_params: self.pub_key_cred_params,
            credentials: self.credentials,
            metadata: self.metadata,
            challenge_generator: self.challenge_generator,
            clock: self.clock,
            token_binding: self.token_binding,
            policy: self.policy,
        })
    }
}
