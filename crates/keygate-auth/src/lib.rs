//! keygate-auth
//!
//! Verification of JWT bearer tokens issued by an external identity provider
//! that publishes its public keys as a JWKS.
//!
//! - **`KeySetCache`** keeps the provider's keys, refreshing them on expiry
//!   and serving a stale set for a grace period when the provider is down.
//! - **`TokenVerifier`** checks structure, algorithm, key, signature and
//!   claims, in that order, and returns a `VerifiedIdentity` or a
//!   `VerificationFailure`.
//! - **`ClaimPolicy`** says which issuer, audience, algorithms and scopes are
//!   acceptable; `AuthConfig` builds one from TOML or the environment.
//!
//! Claims are only reachable through a `VerifiedIdentity`; there is no API
//! for reading an unverified payload.
//!
//! ## Quick start
//! ```no_run
//! use keygate_auth::{AuthConfig, TokenVerifier};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = AuthConfig::new("https://issuer.example", "my-app");
//! config.required_scopes = vec!["read".to_string()];
//! let verifier = TokenVerifier::from_config(&config).await?;
//!
//! let identity = verifier.verify("eyJ...").await?;
//! println!("sub={} scopes={:?}", identity.subject(), identity.scopes());
//! # Ok(()) }
//! ```

#![forbid(unsafe_code)]

mod algorithm;
mod claims;
mod config;
#[cfg(feature = "fetch-reqwest")]
pub mod discovery;
mod error;
pub mod jwks;
mod policy;
mod selector;
mod token;
mod validator;
mod verifier;

pub use algorithm::{DEFAULT_ALLOWED, parse_allow_list};
pub use claims::{Claims, VerifiedIdentity};
pub use config::{AuthConfig, ENV_PREFIX, MAX_INTERVAL_SECONDS, default_config_path};
pub use error::{ClaimRejection, ConfigError, FetchError, Result, VerificationFailure};
pub use jsonwebtoken::Algorithm;
pub use jwks::cache::{CacheSettings, CacheState, CacheStatus, KeySetCache};
#[cfg(feature = "fetch-reqwest")]
pub use jwks::fetch::HttpJwksFetcher;
pub use jwks::fetch::{FetchedJwks, KeySetFetcher, MAX_JWKS_BODY_BYTES, StaticJwks};
#[cfg(feature = "cache")]
pub use jwks::registry::KeySetRegistry;
pub use jwks::{Jwk, JwksDocument, KeySet, KeyType, SigningKey};
pub use policy::{ClaimPolicy, ScopeMatch};
pub use selector::KeySelector;
pub use token::{TokenHeader, decode_header};
pub use validator::ClaimValidator;
pub use verifier::TokenVerifier;
