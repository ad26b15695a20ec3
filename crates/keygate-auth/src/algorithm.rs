//! Algorithm admission.

use jsonwebtoken::Algorithm;
use std::str::FromStr;

/// Algorithms admitted when the configuration does not name any.
pub const DEFAULT_ALLOWED: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Parse a JOSE `alg` name. `none` and unknown names yield `None`.
pub fn parse(name: &str) -> Option<Algorithm> {
    Algorithm::from_str(name).ok()
}

/// Shared-secret algorithms can never be verified against a published key.
pub fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Parse an allow-list, refusing symmetric and unknown names.
pub fn parse_allow_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<Algorithm>, String> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref().trim();
        let alg = parse(name).ok_or_else(|| format!("unknown algorithm {name:?}"))?;
        if is_symmetric(alg) {
            return Err(format!("symmetric algorithm {name} cannot be allow-listed"));
        }
        if !out.contains(&alg) {
            out.push(alg);
        }
    }
    if out.is_empty() {
        return Err("allowed_algorithms is empty".to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_not_an_algorithm() {
        assert_eq!(parse("none"), None);
        assert_eq!(parse("RS256"), Some(Algorithm::RS256));
    }

    #[test]
    fn allow_list_refuses_hmac() {
        assert!(parse_allow_list(&["RS256", "HS256"]).is_err());
        assert!(parse_allow_list::<&str>(&[]).is_err());
        assert_eq!(
            parse_allow_list(&["ES256", " RS256", "ES256"]).unwrap(),
            vec![Algorithm::ES256, Algorithm::RS256]
        );
    }
}
