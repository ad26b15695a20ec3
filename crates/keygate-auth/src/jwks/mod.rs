//! JWKS documents and the immutable key sets built from them.

pub mod cache;
pub mod fetch;
#[cfg(feature = "cache")]
pub mod registry;

use crate::algorithm;
use crate::error::FetchError;

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::warn;

/// A JWKS (JSON Web Key Set) as published by a provider.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JwksDocument {
    /// Keys.
    pub keys: Vec<Jwk>,
}

/// Minimal JWK structure for RSA/EC/OKP.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Jwk {
    /// Key type ("RSA", "EC", "OKP").
    pub kty: String,

    /// Key id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Public key use.
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,

    /// Algorithm (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    // RSA
    /// RSA modulus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    // EC / OKP
    /// Curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate, or the OKP public key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// Public key family of a [`SigningKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyType {
    /// RSA, verifies RS* and PS*.
    Rsa,
    /// NIST curve, verifies the ES* matching the curve.
    Ec {
        /// "P-256" or "P-384".
        curve: String,
    },
    /// Edwards curve, verifies EdDSA.
    Okp {
        /// "Ed25519".
        curve: String,
    },
}

impl KeyType {
    /// Whether a key of this type can check signatures made with `alg`.
    pub fn supports(&self, alg: Algorithm) -> bool {
        match self {
            KeyType::Rsa => matches!(
                alg,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ),
            KeyType::Ec { curve } => match alg {
                Algorithm::ES256 => curve == "P-256",
                Algorithm::ES384 => curve == "P-384",
                _ => false,
            },
            KeyType::Okp { curve } => alg == Algorithm::EdDSA && curve == "Ed25519",
        }
    }

    /// JWK `kty` name.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Rsa => "RSA",
            KeyType::Ec { .. } => "EC",
            KeyType::Okp { .. } => "OKP",
        }
    }
}

/// A provider public key, ready for signature checks.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    key_type: KeyType,
    alg: Option<Algorithm>,
    key: DecodingKey,
}

impl SigningKey {
    /// Build a key from a JWK, or explain why it cannot be used.
    pub fn from_jwk(jwk: &Jwk) -> std::result::Result<Self, String> {
        let kid = jwk
            .kid
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| "JWK has no kid".to_string())?
            .to_string();

        if let Some(use_) = jwk.use_.as_deref() {
            if use_ != "sig" {
                return Err(format!("JWK {kid} has use={use_}"));
            }
        }

        let alg = match jwk.alg.as_deref() {
            None => None,
            Some(name) => {
                let alg = algorithm::parse(name)
                    .ok_or_else(|| format!("JWK {kid} declares unsupported alg {name}"))?;
                if algorithm::is_symmetric(alg) {
                    return Err(format!("JWK {kid} declares symmetric alg {name}"));
                }
                Some(alg)
            }
        };

        let (key_type, key) = decoding_key_from_jwk(jwk).map_err(|e| format!("JWK {kid}: {e}"))?;

        if let Some(alg) = alg {
            if !key_type.supports(alg) {
                return Err(format!(
                    "JWK {kid} declares alg {alg:?} incompatible with kty {}",
                    key_type.as_str()
                ));
            }
        }

        Ok(Self {
            kid,
            key_type,
            alg,
            key,
        })
    }

    /// Key id.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Key family.
    pub fn key_type(&self) -> &KeyType {
        &self.key_type
    }

    /// Algorithm declared by the provider, if any.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.alg
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("key_type", &self.key_type)
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

fn decoding_key_from_jwk(jwk: &Jwk) -> std::result::Result<(KeyType, DecodingKey), String> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_deref().ok_or("RSA JWK missing n")?;
            let e = jwk.e.as_deref().ok_or("RSA JWK missing e")?;
            let key = DecodingKey::from_rsa_components(n, e).map_err(|e| e.to_string())?;
            Ok((KeyType::Rsa, key))
        }
        "EC" => {
            let crv = jwk.crv.as_deref().unwrap_or("");
            if crv != "P-256" && crv != "P-384" {
                return Err(format!("unsupported EC curve: {crv}"));
            }
            let x = jwk.x.as_deref().ok_or("EC JWK missing x")?;
            let y = jwk.y.as_deref().ok_or("EC JWK missing y")?;
            let key = DecodingKey::from_ec_components(x, y).map_err(|e| e.to_string())?;
            Ok((
                KeyType::Ec {
                    curve: crv.to_string(),
                },
                key,
            ))
        }
        "OKP" => {
            let crv = jwk.crv.as_deref().unwrap_or("");
            if crv != "Ed25519" {
                return Err(format!("unsupported OKP curve: {crv}"));
            }
            let x = jwk.x.as_deref().ok_or("OKP JWK missing x")?;
            let key = DecodingKey::from_ed_components(x).map_err(|e| e.to_string())?;
            Ok((
                KeyType::Okp {
                    curve: crv.to_string(),
                },
                key,
            ))
        }
        other => Err(format!("unsupported kty: {other}")),
    }
}

/// Convert a document into usable keys, skipping (and logging) the rest.
///
/// # Errors
///
/// [`FetchError::NoUsableKeys`] when nothing in the document can verify a
/// signature.
pub fn signing_keys(doc: &JwksDocument) -> Result<Vec<Arc<SigningKey>>, FetchError> {
    let mut keys = Vec::with_capacity(doc.keys.len());
    for jwk in &doc.keys {
        match SigningKey::from_jwk(jwk) {
            Ok(key) => keys.push(Arc::new(key)),
            Err(reason) => warn!(%reason, "skipping JWK"),
        }
    }
    if keys.is_empty() {
        return Err(FetchError::NoUsableKeys);
    }
    Ok(keys)
}

/// An immutable snapshot of a provider's signing keys.
///
/// Refreshing never mutates a `KeySet`; the cache swaps in a new one.
#[derive(Debug)]
pub struct KeySet {
    keys: Vec<Arc<SigningKey>>,
    fetched_at: Instant,
    fresh_until: Instant,
    usable_until: Instant,
    generation: u64,
}

impl KeySet {
    pub(crate) fn new(
        keys: Vec<Arc<SigningKey>>,
        fetched_at: Instant,
        fresh_until: Instant,
        usable_until: Instant,
        generation: u64,
    ) -> Self {
        Self {
            keys,
            fetched_at,
            fresh_until,
            usable_until,
            generation,
        }
    }

    /// Keys in provider order.
    pub fn keys(&self) -> &[Arc<SigningKey>] {
        &self.keys
    }

    /// When the set was fetched.
    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// Before this instant the set is served without refreshing.
    pub fn fresh_until(&self) -> Instant {
        self.fresh_until
    }

    /// After this instant the set is never served, even as a fallback.
    pub fn usable_until(&self) -> Instant {
        self.usable_until
    }

    /// Increments by one on every successful fetch.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while `now` is before the freshness deadline.
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.fresh_until
    }

    /// True once past the freshness deadline but still inside the grace window.
    pub fn is_stale(&self, now: Instant) -> bool {
        !self.is_fresh(now) && self.is_usable(now)
    }

    /// True while the set may still be served.
    pub fn is_usable(&self, now: Instant) -> bool {
        now < self.usable_until
    }
}

#[cfg(test)]
pub(crate) mod test_keys {
    use super::*;

    pub const RSA_A: &str = include_str!("../../tests/fixtures/rsa_a.jwk.json");
    pub const RSA_B: &str = include_str!("../../tests/fixtures/rsa_b.jwk.json");
    pub const EC_A: &str = include_str!("../../tests/fixtures/ec_a.jwk.json");

    pub fn jwk(json: &str) -> Jwk {
        serde_json::from_str(json).unwrap()
    }

    pub fn document(jwks: &[&str]) -> JwksDocument {
        JwksDocument {
            keys: jwks.iter().map(|j| jwk(j)).collect(),
        }
    }

    pub fn key_set(jwks: &[&str]) -> KeySet {
        let now = Instant::now();
        let keys = signing_keys(&document(jwks)).unwrap();
        KeySet::new(
            keys,
            now,
            now + std::time::Duration::from_secs(60),
            now + std::time::Duration::from_secs(120),
            1,
        )
    }
}
