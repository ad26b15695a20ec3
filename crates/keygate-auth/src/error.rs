//! Error types.

use thiserror::Error;

/// Crate result type for verification.
pub type Result<T> = std::result::Result<T, VerificationFailure>;

/// Why a presented token was not accepted.
///
/// None of the variants carry claim values. The `Display` text is safe to log
/// but is not meant to be echoed to the token holder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    /// Structural or decoding failure before any trust decision.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// No usable key set could be obtained from the provider.
    #[error("signing key set unavailable")]
    KeySetUnavailable(String),

    /// No key in the key set matches the token's `kid`.
    #[error("no signing key matches kid {kid:?}")]
    KeyNotFound {
        /// The `kid` from the token header.
        kid: String,
    },

    /// Algorithm is not admissible or disagrees with the selected key.
    #[error("algorithm rejected: {0}")]
    AlgorithmMismatch(String),

    /// Cryptographic verification failed.
    #[error("signature verification failed")]
    SignatureInvalid,

    /// Signature was valid but the claims failed policy.
    #[error("claims rejected: {0}")]
    ClaimRejected(#[from] ClaimRejection),

    /// The caller's deadline elapsed before verification finished.
    #[error("verification deadline exceeded")]
    VerificationTimeout,
}

impl VerificationFailure {
    /// True if the token was rejected only because it has expired.
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::ClaimRejected(ClaimRejection::Expired))
    }
}

/// Claim policy failures, reported in check order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimRejection {
    /// `iss` is missing or not the trusted issuer.
    #[error("invalid issuer")]
    InvalidIssuer,

    /// `aud` is missing or does not contain the configured audience.
    #[error("invalid audience")]
    InvalidAudience,

    /// `exp` is in the past (skew included).
    #[error("token expired")]
    Expired,

    /// `nbf` is in the future (skew included).
    #[error("token not yet valid")]
    NotYetValid,

    /// Required scopes are missing.
    #[error("insufficient scope, missing {missing:?}")]
    InsufficientScope {
        /// Required scopes absent from the token.
        missing: Vec<String>,
    },

    /// A claim the verifier needs is absent or has the wrong type.
    #[error("missing or invalid claim {0}")]
    MissingClaim(&'static str),
}

/// Errors while fetching or parsing a JWKS document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure.
    #[cfg(feature = "fetch-reqwest")]
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-2xx status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// Response body was not a JWKS document.
    #[error("invalid JWKS document: {0}")]
    Json(#[from] serde_json::Error),

    /// Response body exceeded the size limit.
    #[error("response body larger than {0} bytes")]
    BodyTooLarge(usize),

    /// Fetch did not finish in time.
    #[error("fetch timed out")]
    Timeout,

    /// Endpoint is not HTTPS (plain HTTP is only allowed for loopback).
    #[error("insecure endpoint: {0}")]
    InsecureUrl(String),

    /// Document parsed but contained no key this crate can verify with.
    #[error("no usable signing keys in document")]
    NoUsableKeys,

    /// OIDC discovery document is unusable.
    #[error("discovery failed: {0}")]
    Discovery(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`crate::AuthConfig`].
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required environment variable is not set.
    #[error("missing environment variable {0}")]
    MissingEnv(String),

    /// A value is present but unacceptable.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The JWKS endpoint could not be resolved or used.
    #[error("key source: {0}")]
    KeySource(#[from] FetchError),
}
