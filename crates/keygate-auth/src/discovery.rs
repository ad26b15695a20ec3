//! OIDC discovery of an issuer's JWKS endpoint.

use crate::error::FetchError;
use crate::jwks::fetch::{ensure_secure_url, get_json_body};

use serde::Deserialize;
use std::time::Duration;

/// The part of `/.well-known/openid-configuration` the verifier needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer the document describes; must match the one asked for.
    pub issuer: String,
    /// Where the provider publishes its signing keys.
    pub jwks_uri: String,
    /// Algorithms the provider signs ID tokens with, if advertised.
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

/// `<issuer>/.well-known/openid-configuration`.
pub fn discovery_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}

/// Fetch and check the provider metadata for `issuer`.
///
/// The document's `issuer` must equal `issuer` (ignoring a trailing slash)
/// and its `jwks_uri` must be HTTPS.
///
/// # Errors
///
/// [`FetchError::Discovery`] for an issuer mismatch or missing fields, or any
/// transport error from the request.
pub async fn fetch_metadata(issuer: &str, timeout: Duration) -> Result<ProviderMetadata, FetchError> {
    ensure_secure_url(issuer)?;
    let url = discovery_url(issuer);
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let (body, _max_age) = get_json_body(&client, &url).await?;

    let metadata: ProviderMetadata = serde_json::from_slice(&body)
        .map_err(|e| FetchError::Discovery(format!("invalid discovery document: {e}")))?;
    if metadata.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
        return Err(FetchError::Discovery(format!(
            "discovery document is for issuer {}",
            metadata.issuer
        )));
    }
    if metadata.jwks_uri.is_empty() {
        return Err(FetchError::Discovery("jwks_uri is empty".to_string()));
    }
    ensure_secure_url(&metadata.jwks_uri)?;
    tracing::debug!(issuer, jwks_uri = %metadata.jwks_uri, "resolved jwks_uri via discovery");
    Ok(metadata)
}

/// Resolve `issuer` to its `jwks_uri`.
///
/// # Errors
///
/// As [`fetch_metadata`].
pub async fn resolve_jwks_url(issuer: &str, timeout: Duration) -> Result<String, FetchError> {
    fetch_metadata(issuer, timeout).await.map(|m| m.jwks_uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_url_trims_slash() {
        assert_eq!(
            discovery_url("https://idp.example.com/"),
            "https://idp.example.com/.well-known/openid-configuration"
        );
        assert_eq!(
            discovery_url("https://cognito-idp.us-east-1.amazonaws.com/us-east-1_X"),
            "https://cognito-idp.us-east-1.amazonaws.com/us-east-1_X/.well-known/openid-configuration"
        );
    }

    #[tokio::test]
    async fn plain_http_issuer_is_refused() {
        let err = resolve_jwks_url("http://idp.example.com", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InsecureUrl(_)));
    }
}
