//! Bearer token verification.

use crate::claims::{Claims, VerifiedIdentity};
#[cfg(feature = "fetch-reqwest")]
use crate::config::AuthConfig;
#[cfg(feature = "fetch-reqwest")]
use crate::error::ConfigError;
use crate::error::{Result, VerificationFailure};
use crate::jwks::SigningKey;
use crate::jwks::cache::KeySetCache;
use crate::policy::ClaimPolicy;
use crate::selector::KeySelector;
use crate::token::{CompactParts, TokenHeader};
use crate::validator::ClaimValidator;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Verifies compact JWS bearer tokens against one provider's key set.
///
/// Cheap to clone; clones share the key-set cache.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    cache: Arc<KeySetCache>,
    policy: ClaimPolicy,
}

impl TokenVerifier {
    /// Verify against keys from `cache` under `policy`.
    pub fn new(cache: Arc<KeySetCache>, policy: ClaimPolicy) -> Self {
        Self { cache, policy }
    }

    /// Build an HTTP-backed verifier, resolving the JWKS endpoint through
    /// OIDC discovery when `discover_jwks` is set.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] for invalid settings, an insecure endpoint or a failed
    /// discovery request. No JWKS fetch happens here.
    #[cfg(feature = "fetch-reqwest")]
    pub async fn from_config(config: &AuthConfig) -> std::result::Result<Self, ConfigError> {
        let (url, policy, settings) = Self::prepare(config).await?;
        let fetcher = crate::jwks::fetch::HttpJwksFetcher::new(url, settings.fetch_timeout)?;
        let cache = KeySetCache::new(Arc::new(fetcher), settings);
        Ok(Self::new(Arc::new(cache), policy))
    }

    /// Like [`TokenVerifier::from_config`], reusing the registry's cache for
    /// the resolved JWKS endpoint.
    ///
    /// # Errors
    ///
    /// As [`TokenVerifier::from_config`].
    #[cfg(all(feature = "fetch-reqwest", feature = "cache"))]
    pub async fn from_config_shared(
        config: &AuthConfig,
        registry: &crate::jwks::registry::KeySetRegistry,
    ) -> std::result::Result<Self, ConfigError> {
        let (url, policy, settings) = Self::prepare(config).await?;
        let cache = registry.http(&url, &settings)?;
        Ok(Self::new(cache, policy))
    }

    #[cfg(feature = "fetch-reqwest")]
    async fn prepare(
        config: &AuthConfig,
    ) -> std::result::Result<(String, ClaimPolicy, crate::jwks::cache::CacheSettings), ConfigError>
    {
        config.validate()?;
        let policy = config.claim_policy()?;
        let settings = config.cache_settings();
        let url = match &config.jwks_url {
            None if config.discover_jwks => {
                crate::discovery::resolve_jwks_url(&config.issuer_url, settings.fetch_timeout)
                    .await?
            }
            _ => config.jwks_endpoint(),
        };
        Ok((url, policy, settings))
    }

    /// Key-set cache in use.
    pub fn cache(&self) -> &Arc<KeySetCache> {
        &self.cache
    }

    /// Policy applied by [`TokenVerifier::verify`].
    pub fn policy(&self) -> &ClaimPolicy {
        &self.policy
    }

    /// Verify `raw` under the verifier's policy.
    ///
    /// # Errors
    ///
    /// The [`VerificationFailure`] for the first check that failed.
    pub async fn verify(&self, raw: &str) -> Result<VerifiedIdentity> {
        self.verify_with(raw, &self.policy).await
    }

    /// Verify `raw` under the verifier's policy, giving up after `deadline`.
    ///
    /// # Errors
    ///
    /// [`VerificationFailure::VerificationTimeout`] when the deadline passes
    /// first, otherwise as [`TokenVerifier::verify`].
    pub async fn verify_with_deadline(
        &self,
        raw: &str,
        deadline: Duration,
    ) -> Result<VerifiedIdentity> {
        match tokio::time::timeout(deadline, self.verify(raw)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(deadline_ms = deadline.as_millis(), "token verification timed out");
                Err(VerificationFailure::VerificationTimeout)
            }
        }
    }

    /// Verify `raw` under a caller-supplied policy, sharing this verifier's
    /// key set.
    ///
    /// # Errors
    ///
    /// As [`TokenVerifier::verify`].
    pub async fn verify_with(&self, raw: &str, policy: &ClaimPolicy) -> Result<VerifiedIdentity> {
        let result = self.run(raw, policy).await;
        if let Err(e) = &result {
            debug!(error = %e, "token rejected");
        }
        result
    }

    async fn run(&self, raw: &str, policy: &ClaimPolicy) -> Result<VerifiedIdentity> {
        let raw = raw.trim();
        let header = CompactParts::split(raw)?.header()?;
        let alg = policy.admit(&header)?;
        if header.key_id().is_none() {
            return Err(VerificationFailure::MalformedToken(
                "header has no kid".to_string(),
            ));
        }

        let key = self.resolve_key(&header).await?;
        let claims = check_signature(raw, alg, &key)?;
        ClaimValidator::check(&claims, policy, now_epoch_secs())?;
        let identity = VerifiedIdentity::from_claims(claims)?;

        debug!(
            kid = key.kid(),
            alg = ?alg,
            subject = identity.subject(),
            "token verified"
        );
        Ok(identity)
    }

    /// Select the key for `header`, refreshing once if its `kid` is unknown.
    async fn resolve_key(&self, header: &TokenHeader) -> Result<Arc<SigningKey>> {
        let set = self.cache.current().await?;
        match KeySelector::select(header, &set) {
            Err(VerificationFailure::KeyNotFound { kid }) => {
                debug!(
                    kid = %kid,
                    generation = set.generation(),
                    "unknown kid, refreshing key set"
                );
                let refreshed = self.cache.refresh_after(set.generation()).await?;
                KeySelector::select(header, &refreshed)
            }
            other => other,
        }
    }
}

fn check_signature(raw: &str, alg: Algorithm, key: &SigningKey) -> Result<Claims> {
    // Time and audience checks belong to ClaimValidator.
    let mut validation = Validation::new(alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    let data = jsonwebtoken::decode::<Value>(raw, key.decoding_key(), &validation)
        .map_err(map_jwt_error)?;
    match data.claims {
        Value::Object(map) => Ok(Claims::from_verified(map)),
        _ => Err(VerificationFailure::MalformedToken(
            "payload is not a JSON object".to_string(),
        )),
    }
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> VerificationFailure {
    match e.kind() {
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            VerificationFailure::AlgorithmMismatch(e.to_string())
        }
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => VerificationFailure::MalformedToken(e.to_string()),
        _ => VerificationFailure::SignatureInvalid,
    }
}

fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
