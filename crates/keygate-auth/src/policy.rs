//! What a token must satisfy to be accepted.

use crate::algorithm::{self, DEFAULT_ALLOWED};
use crate::error::{Result, VerificationFailure};
use crate::token::TokenHeader;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How `required_scopes` is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMatch {
    /// Every required scope must be granted.
    #[default]
    All,
    /// At least one required scope must be granted.
    Any,
}

/// Immutable trust policy for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPolicy {
    /// Exact expected `iss`.
    pub issuer: String,
    /// Value that must appear in `aud`.
    pub audience: String,
    /// Asymmetric algorithms tokens may be signed with.
    pub allowed_algorithms: Vec<Algorithm>,
    /// Tolerance applied to `exp` and `nbf`.
    pub clock_skew: Duration,
    /// Scopes the token must carry.
    pub required_scopes: Vec<String>,
    /// How `required_scopes` is matched.
    pub scope_match: ScopeMatch,
    /// Accept a token without `aud` whose `client_id` equals `audience`
    /// (Cognito access tokens).
    pub accept_client_id_as_audience: bool,
}

impl ClaimPolicy {
    /// Policy with default algorithms, 60s skew and no required scopes.
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            allowed_algorithms: DEFAULT_ALLOWED.to_vec(),
            clock_skew: Duration::from_secs(60),
            required_scopes: Vec::new(),
            scope_match: ScopeMatch::All,
            accept_client_id_as_audience: false,
        }
    }

    /// Replace the required scopes.
    #[must_use]
    pub fn with_required_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the allow-list. Symmetric algorithms are dropped.
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: &[Algorithm]) -> Self {
        self.allowed_algorithms = algorithms
            .iter()
            .copied()
            .filter(|a| !algorithm::is_symmetric(*a))
            .collect();
        self
    }

    /// Replace the clock skew tolerance.
    #[must_use]
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Decide whether a header's algorithm may be attempted at all.
    ///
    /// `none`, unknown names and shared-secret algorithms are refused whatever
    /// the allow-list says.
    ///
    /// # Errors
    ///
    /// [`VerificationFailure::AlgorithmMismatch`] when the algorithm is refused.
    pub fn admit(&self, header: &TokenHeader) -> Result<Algorithm> {
        let alg = header.algorithm().ok_or_else(|| {
            VerificationFailure::AlgorithmMismatch(format!("unsupported algorithm {:?}", header.alg))
        })?;
        if algorithm::is_symmetric(alg) {
            return Err(VerificationFailure::AlgorithmMismatch(format!(
                "symmetric algorithm {alg:?} is never accepted"
            )));
        }
        if !self.allowed_algorithms.contains(&alg) {
            return Err(VerificationFailure::AlgorithmMismatch(format!(
                "algorithm {alg:?} is not allowed"
            )));
        }
        Ok(alg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(alg: &str) -> TokenHeader {
        TokenHeader {
            alg: alg.to_string(),
            kid: Some("k".to_string()),
            typ: None,
        }
    }

    #[test]
    fn admits_allow_listed_asymmetric() {
        let policy = ClaimPolicy::new("https://idp.example.com", "my-app");
        assert_eq!(policy.admit(&header("RS256")).unwrap(), Algorithm::RS256);
        assert_eq!(policy.admit(&header("ES256")).unwrap(), Algorithm::ES256);
    }

    #[test]
    fn refuses_none_and_hmac_even_if_listed() {
        let mut policy = ClaimPolicy::new("https://idp.example.com", "my-app");
        policy.allowed_algorithms.push(Algorithm::HS256);
        for alg in ["none", "None", "HS256", "HS512", "XYZ"] {
            assert!(
                matches!(
                    policy.admit(&header(alg)),
                    Err(VerificationFailure::AlgorithmMismatch(_))
                ),
                "{alg}"
            );
        }
    }

    #[test]
    fn refuses_algorithms_outside_allow_list() {
        let policy = ClaimPolicy::new("https://idp.example.com", "my-app")
            .with_algorithms(&[Algorithm::RS256, Algorithm::HS256]);
        assert_eq!(policy.allowed_algorithms, vec![Algorithm::RS256]);
        assert!(policy.admit(&header("ES256")).is_err());
    }
}
