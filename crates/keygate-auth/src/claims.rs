//! Verified claims and the identity handed to callers.

use crate::error::ClaimRejection;

use serde::Serialize;
use serde_json::{Map, Value};

/// Claims of a token whose signature has been checked.
///
/// There is no public constructor: the only way to obtain `Claims` is through
/// a [`VerifiedIdentity`] returned by the verifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    pub(crate) fn from_verified(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Get a claim by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A claim as a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// A claim as an integer (JSON numbers with a fractional part are
    /// truncated).
    #[allow(clippy::cast_possible_truncation)]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        let v = self.get(key)?;
        v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
    }

    /// All claims.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Scopes from the space-delimited `scope` claim, falling back to an
    /// `scp` array or string. Order is kept and empty entries are dropped.
    pub fn scopes(&self) -> Vec<String> {
        if let Some(scope) = self.get_str("scope") {
            return split_scopes(scope);
        }
        match self.get("scp") {
            Some(Value::String(s)) => split_scopes(s),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn split_scopes(s: &str) -> Vec<String> {
    s.split_whitespace().map(ToString::to_string).collect()
}

/// The outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedIdentity {
    subject: String,
    scopes: Vec<String>,
    expiry: i64,
    claims: Claims,
}

impl VerifiedIdentity {
    /// Build from claims that passed signature and policy checks.
    pub(crate) fn from_claims(claims: Claims) -> Result<Self, ClaimRejection> {
        let subject = claims
            .get_str("sub")
            .or_else(|| claims.get_str("client_id"))
            .filter(|s| !s.is_empty())
            .ok_or(ClaimRejection::MissingClaim("sub"))?
            .to_string();
        let expiry = claims
            .get_i64("exp")
            .ok_or(ClaimRejection::MissingClaim("exp"))?;
        Ok(Self {
            subject,
            scopes: claims.scopes(),
            expiry,
            claims,
        })
    }

    /// `sub`, or `client_id` for client-credential tokens without one.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Granted scopes in token order.
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// True if `scope` was granted.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// `exp` as seconds since the Unix epoch.
    pub fn expiry(&self) -> i64 {
        self.expiry
    }

    /// All verified claims.
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// `iss`.
    pub fn issuer(&self) -> Option<&str> {
        self.claims.get_str("iss")
    }

    /// `client_id`, falling back to `sub`.
    pub fn client_id(&self) -> &str {
        self.claims.get_str("client_id").unwrap_or(self.subject.as_str())
    }

    /// `username` (or Cognito's `cognito:username`), falling back to
    /// `client_id`.
    pub fn username(&self) -> &str {
        self.claims
            .get_str("username")
            .or_else(|| self.claims.get_str("cognito:username"))
            .unwrap_or_else(|| self.client_id())
    }
}

#[cfg(test)]
pub(crate) fn claims_from(value: Value) -> Claims {
    match value {
        Value::Object(map) => Claims::from_verified(map),
        other => panic!("claims must be an object, got {other}"),
    }
}
