//! Shared fixtures: provider keys, token minting and a counting key source.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use keygate_auth::{
    CacheSettings, ClaimPolicy, FetchError, FetchedJwks, JwksDocument, KeySetCache, KeySetFetcher,
    TokenVerifier,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const ISSUER: &str = "https://idp.example.com";
pub const AUDIENCE: &str = "my-app";

pub const RSA_A_JWK: &str = include_str!("../fixtures/rsa_a.jwk.json");
pub const RSA_B_JWK: &str = include_str!("../fixtures/rsa_b.jwk.json");
pub const EC_A_JWK: &str = include_str!("../fixtures/ec_a.jwk.json");

pub const RSA_A_PEM: &str = include_str!("../fixtures/rsa_a_private.pem");
pub const RSA_B_PEM: &str = include_str!("../fixtures/rsa_b_private.pem");
pub const EC_A_PEM: &str = include_str!("../fixtures/ec_a_private.pem");

pub fn now() -> i64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    i64::try_from(secs).unwrap()
}

/// JWKS JSON text containing the given JWK fixtures.
pub fn jwks_json(jwks: &[&str]) -> String {
    format!(r#"{{"keys":[{}]}}"#, jwks.join(","))
}

pub fn jwks_document(jwks: &[&str]) -> JwksDocument {
    serde_json::from_str(&jwks_json(jwks)).unwrap()
}

/// Claims a well-behaved provider would issue for `user-1`.
pub fn standard_claims() -> Value {
    let now = now();
    json!({
        "iss": ISSUER,
        "aud": AUDIENCE,
        "sub": "user-1",
        "iat": now,
        "exp": now + 600,
        "scope": "read write",
    })
}

/// `standard_claims` with `patch` applied; `null` removes a claim.
pub fn claims_with(patch: Value) -> Value {
    let mut claims = standard_claims();
    for (k, v) in patch.as_object().unwrap() {
        if v.is_null() {
            claims.as_object_mut().unwrap().remove(k);
        } else {
            claims[k] = v.clone();
        }
    }
    claims
}

/// Sign `claims` with a PEM private key under `kid`.
pub fn mint(pem: &str, alg: Algorithm, kid: Option<&str>, claims: &Value) -> String {
    let key = match alg {
        Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(pem.as_bytes()).unwrap(),
        _ => EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
    };
    let mut header = Header::new(alg);
    header.kid = kid.map(ToString::to_string);
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

pub fn mint_rsa_a(claims: &Value) -> String {
    mint(RSA_A_PEM, Algorithm::RS256, Some("key-a"), claims)
}

/// A token with an arbitrary header and signature segment, for attacks the
/// encoder refuses to produce.
pub fn hand_made(header: &Value, claims: &Value, signature: &str) -> String {
    format!(
        "{}.{}.{signature}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// Key source serving a replaceable document and counting fetches.
pub struct CountingFetcher {
    document: Mutex<Option<JwksDocument>>,
    fetches: AtomicUsize,
    delay: Duration,
}

impl CountingFetcher {
    pub fn new(jwks: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            document: Mutex::new(Some(jwks_document(jwks))),
            fetches: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    pub fn slow(jwks: &[&str], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            document: Mutex::new(Some(jwks_document(jwks))),
            fetches: AtomicUsize::new(0),
            delay,
        })
    }

    /// Publish a new key set (rotation).
    pub fn publish(&self, jwks: &[&str]) {
        *self.document.lock().unwrap() = Some(jwks_document(jwks));
    }

    /// Make every subsequent fetch fail.
    pub fn go_down(&self) {
        *self.document.lock().unwrap() = None;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetFetcher for CountingFetcher {
    async fn fetch(&self) -> Result<FetchedJwks, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let document = self.document.lock().unwrap().clone();
        match document {
            Some(document) => Ok(FetchedJwks {
                document,
                max_age: None,
            }),
            None => Err(FetchError::Status(503)),
        }
    }

    fn source(&self) -> &str {
        "counting"
    }
}

/// Settings without rate limiting, so forced refreshes always fetch.
pub fn eager_settings() -> CacheSettings {
    CacheSettings {
        min_refresh_interval: Duration::ZERO,
        ..CacheSettings::default()
    }
}

pub fn policy() -> ClaimPolicy {
    ClaimPolicy::new(ISSUER, AUDIENCE).with_required_scopes(["read"])
}

pub fn verifier_over(fetcher: Arc<CountingFetcher>, settings: CacheSettings) -> TokenVerifier {
    let cache = KeySetCache::new(fetcher, settings);
    TokenVerifier::new(Arc::new(cache), policy())
}
