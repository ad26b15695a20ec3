//! Policy checks on verified claims.

use crate::claims::Claims;
use crate::error::ClaimRejection;
use crate::policy::{ClaimPolicy, ScopeMatch};

use serde_json::Value;

/// Checks issuer, audience, expiry, not-before and scopes, in that order.
///
/// Only the first failure is reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimValidator;

impl ClaimValidator {
    /// Check `claims` against `policy` at `now` (seconds since the epoch).
    ///
    /// # Errors
    ///
    /// The first failing check's [`ClaimRejection`].
    pub fn check(claims: &Claims, policy: &ClaimPolicy, now: i64) -> Result<(), ClaimRejection> {
        check_issuer(claims, policy)?;
        check_audience(claims, policy)?;

        let skew = i64::try_from(policy.clock_skew.as_secs()).unwrap_or(i64::MAX);

        let exp = claims
            .get_i64("exp")
            .ok_or(ClaimRejection::MissingClaim("exp"))?;
        if now >= exp.saturating_add(skew) {
            return Err(ClaimRejection::Expired);
        }

        if !matches!(claims.get("nbf"), None | Some(Value::Null)) {
            let nbf = claims
                .get_i64("nbf")
                .ok_or(ClaimRejection::MissingClaim("nbf"))?;
            if now.saturating_add(skew) < nbf {
                return Err(ClaimRejection::NotYetValid);
            }
        }

        check_scopes(claims, policy)
    }
}

fn check_issuer(claims: &Claims, policy: &ClaimPolicy) -> Result<(), ClaimRejection> {
    match claims.get_str("iss") {
        Some(iss) if iss == policy.issuer => Ok(()),
        _ => Err(ClaimRejection::InvalidIssuer),
    }
}

fn check_audience(claims: &Claims, policy: &ClaimPolicy) -> Result<(), ClaimRejection> {
    let expected = policy.audience.as_str();
    let ok = match claims.get("aud") {
        Some(Value::String(s)) => s == expected,
        Some(Value::Array(arr)) => arr.iter().any(|v| v.as_str() == Some(expected)),
        None if policy.accept_client_id_as_audience => {
            claims.get_str("client_id") == Some(expected)
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(ClaimRejection::InvalidAudience)
    }
}

fn check_scopes(claims: &Claims, policy: &ClaimPolicy) -> Result<(), ClaimRejection> {
    if policy.required_scopes.is_empty() {
        return Ok(());
    }
    let granted = claims.scopes();
    let missing: Vec<String> = policy
        .required_scopes
        .iter()
        .filter(|r| !granted.contains(*r))
        .cloned()
        .collect();

    let satisfied = match policy.scope_match {
        ScopeMatch::All => missing.is_empty(),
        ScopeMatch::Any => missing.len() < policy.required_scopes.len(),
    };
    if satisfied {
        Ok(())
    } else {
        Err(ClaimRejection::InsufficientScope { missing })
    }
}
