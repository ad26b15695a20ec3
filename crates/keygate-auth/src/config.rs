//! Verifier configuration from TOML or the environment.

use crate::algorithm::{self, DEFAULT_ALLOWED};
use crate::error::ConfigError;
use crate::jwks::cache::CacheSettings;
use crate::jwks::fetch::ensure_secure_url;
use crate::policy::{ClaimPolicy, ScopeMatch};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of every environment variable read by [`AuthConfig::from_env`].
pub const ENV_PREFIX: &str = "KEYGATE_";

/// Largest value accepted for any `*_seconds` setting (one year).
pub const MAX_INTERVAL_SECONDS: u64 = 365 * 24 * 3600;

/// Everything needed to build a verifier for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Exact `iss` value tokens must carry.
    pub issuer_url: String,
    /// Audience (client id) tokens must be issued for.
    pub audience: String,
    /// JWKS endpoint; derived from the issuer when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_url: Option<String>,
    /// Resolve the JWKS endpoint through OIDC discovery.
    #[serde(default)]
    pub discover_jwks: bool,
    #[serde(default = "default_algorithms")]
    pub allowed_algorithms: Vec<String>,
    #[serde(default = "default_ttl")]
    pub jwks_ttl_seconds: u64,
    #[serde(default = "default_stale_grace")]
    pub jwks_stale_grace_seconds: u64,
    #[serde(default = "default_min_refresh")]
    pub jwks_min_refresh_seconds: u64,
    #[serde(default = "default_fetch_timeout")]
    pub jwks_fetch_timeout_seconds: u64,
    #[serde(default = "default_skew")]
    pub clock_skew_seconds: u64,
    #[serde(default)]
    pub required_scopes: Vec<String>,
    #[serde(default)]
    pub scope_match: ScopeMatch,
    /// Accept Cognito-style access tokens that carry `client_id` instead of
    /// `aud`.
    #[serde(default)]
    pub accept_client_id_as_audience: bool,
}

fn default_algorithms() -> Vec<String> {
    DEFAULT_ALLOWED.iter().map(|a| format!("{a:?}")).collect()
}

fn default_ttl() -> u64 {
    600
}

fn default_stale_grace() -> u64 {
    3600
}

fn default_min_refresh() -> u64 {
    10
}

fn default_fetch_timeout() -> u64 {
    5
}

fn default_skew() -> u64 {
    60
}

/// `$HOME/.config/keygate/keygate.toml`, or `.keygate/keygate.toml` without a
/// home directory.
pub fn default_config_path() -> PathBuf {
    let dir = if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("keygate")
    } else {
        PathBuf::from(".keygate")
    };
    dir.join("keygate.toml")
}

impl AuthConfig {
    /// Defaults for everything but issuer and audience.
    pub fn new(issuer_url: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            audience: audience.into(),
            jwks_url: None,
            discover_jwks: false,
            allowed_algorithms: default_algorithms(),
            jwks_ttl_seconds: default_ttl(),
            jwks_stale_grace_seconds: default_stale_grace(),
            jwks_min_refresh_seconds: default_min_refresh(),
            jwks_fetch_timeout_seconds: default_fetch_timeout(),
            clock_skew_seconds: default_skew(),
            required_scopes: Vec::new(),
            scope_match: ScopeMatch::All,
            accept_client_id_as_audience: false,
        }
    }

    /// An AWS Cognito user pool: issuer derived from region and pool id, app
    /// client id as audience, and access tokens accepted by `client_id`.
    pub fn cognito(region: &str, user_pool_id: &str, client_id: &str) -> Self {
        let mut config = Self::new(
            format!("https://cognito-idp.{region}.amazonaws.com/{user_pool_id}"),
            client_id,
        );
        config.accept_client_id_as_audience = true;
        config
    }

    /// Parse and validate TOML.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Toml`] for bad syntax or unknown fields, otherwise
    /// whatever [`AuthConfig::validate`] reports.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`AuthConfig::from_toml_str`].
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Read `KEYGATE_*` variables from the process environment.
    ///
    /// # Errors
    ///
    /// As [`AuthConfig::from_env_with`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Build from `KEYGATE_<FIELD>` values supplied by `lookup`.
    ///
    /// `KEYGATE_ISSUER_URL` and `KEYGATE_AUDIENCE` are required; lists are
    /// comma-separated.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingEnv`] for a missing required variable,
    /// [`ConfigError::Invalid`] for unparsable values or a config that fails
    /// validation.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |field: &str| {
            lookup(&format!("{ENV_PREFIX}{}", field.to_ascii_uppercase()))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |field: &str| {
            var(field).ok_or_else(|| {
                ConfigError::MissingEnv(format!("{ENV_PREFIX}{}", field.to_ascii_uppercase()))
            })
        };

        let mut config = Self::new(required("issuer_url")?, required("audience")?);
        config.jwks_url = var("jwks_url");
        if let Some(v) = var("discover_jwks") {
            config.discover_jwks = parse_bool("discover_jwks", &v)?;
        }
        if let Some(v) = var("allowed_algorithms") {
            config.allowed_algorithms = split_list(&v);
        }
        for (field, slot) in [
            ("jwks_ttl_seconds", &mut config.jwks_ttl_seconds),
            ("jwks_stale_grace_seconds", &mut config.jwks_stale_grace_seconds),
            ("jwks_min_refresh_seconds", &mut config.jwks_min_refresh_seconds),
            ("jwks_fetch_timeout_seconds", &mut config.jwks_fetch_timeout_seconds),
            ("clock_skew_seconds", &mut config.clock_skew_seconds),
        ] {
            if let Some(v) = var(field) {
                *slot = v
                    .parse()
                    .map_err(|_| ConfigError::Invalid(format!("{field}: not a number: {v}")))?;
            }
        }
        if let Some(v) = var("required_scopes") {
            config.required_scopes = split_list(&v);
        }
        if let Some(v) = var("scope_match") {
            config.scope_match = match v.to_ascii_lowercase().as_str() {
                "all" => ScopeMatch::All,
                "any" => ScopeMatch::Any,
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "scope_match: expected all or any, got {v}"
                    )));
                }
            };
        }
        if let Some(v) = var("accept_client_id_as_audience") {
            config.accept_client_id_as_audience = parse_bool("accept_client_id_as_audience", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that could never verify a token safely.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer_url.trim().is_empty() {
            return Err(ConfigError::Invalid("issuer_url is empty".to_string()));
        }
        if self.audience.trim().is_empty() {
            return Err(ConfigError::Invalid("audience is empty".to_string()));
        }
        algorithm::parse_allow_list(&self.allowed_algorithms)
            .map_err(|e| ConfigError::Invalid(format!("allowed_algorithms: {e}")))?;
        for (field, value) in [
            ("jwks_ttl_seconds", self.jwks_ttl_seconds),
            ("jwks_stale_grace_seconds", self.jwks_stale_grace_seconds),
            ("jwks_min_refresh_seconds", self.jwks_min_refresh_seconds),
            ("jwks_fetch_timeout_seconds", self.jwks_fetch_timeout_seconds),
            ("clock_skew_seconds", self.clock_skew_seconds),
        ] {
            if value > MAX_INTERVAL_SECONDS {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be at most {MAX_INTERVAL_SECONDS}"
                )));
            }
        }
        if self.jwks_ttl_seconds == 0 {
            return Err(ConfigError::Invalid("jwks_ttl_seconds must be positive".to_string()));
        }
        if self.jwks_fetch_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "jwks_fetch_timeout_seconds must be positive".to_string(),
            ));
        }

        if self.discover_jwks && self.jwks_url.is_none() {
            ensure_secure_url(&self.issuer_url)
                .map_err(|e| ConfigError::Invalid(format!("issuer_url: {e}")))?;
        } else {
            ensure_secure_url(&self.jwks_endpoint())
                .map_err(|e| ConfigError::Invalid(format!("jwks_url: {e}")))?;
        }
        Ok(())
    }

    /// Configured JWKS URL, or `<issuer>/.well-known/jwks.json`.
    pub fn jwks_endpoint(&self) -> String {
        match &self.jwks_url {
            Some(url) => url.clone(),
            None => format!(
                "{}/.well-known/jwks.json",
                self.issuer_url.trim_end_matches('/')
            ),
        }
    }

    /// The claim policy this configuration describes.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if the algorithm list is unusable.
    pub fn claim_policy(&self) -> Result<ClaimPolicy, ConfigError> {
        let algorithms = algorithm::parse_allow_list(&self.allowed_algorithms)
            .map_err(|e| ConfigError::Invalid(format!("allowed_algorithms: {e}")))?;
        let mut policy = ClaimPolicy::new(&self.issuer_url, &self.audience)
            .with_algorithms(&algorithms)
            .with_clock_skew(Duration::from_secs(self.clock_skew_seconds))
            .with_required_scopes(self.required_scopes.iter().cloned());
        policy.scope_match = self.scope_match;
        policy.accept_client_id_as_audience = self.accept_client_id_as_audience;
        Ok(policy)
    }

    /// Cache timings this configuration describes.
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_secs(self.jwks_ttl_seconds),
            stale_grace: Duration::from_secs(self.jwks_stale_grace_seconds),
            min_refresh_interval: Duration::from_secs(self.jwks_min_refresh_seconds),
            fetch_timeout: Duration::from_secs(self.jwks_fetch_timeout_seconds),
        }
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_bool(field: &str, v: &str) -> Result<bool, ConfigError> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!("{field}: not a boolean: {v}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::Algorithm;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn toml_defaults() {
        let config = AuthConfig::from_toml_str(
            r#"
            issuer_url = "https://idp.example.com"
            audience = "my-app"
            "#,
        )
        .unwrap();
        assert_eq!(config, AuthConfig::new("https://idp.example.com", "my-app"));
        assert_eq!(
            config.jwks_endpoint(),
            "https://idp.example.com/.well-known/jwks.json"
        );
        assert_eq!(config.cache_settings(), CacheSettings::default());

        let policy = config.claim_policy().unwrap();
        assert_eq!(policy.allowed_algorithms, DEFAULT_ALLOWED.to_vec());
        assert_eq!(policy.clock_skew, Duration::from_secs(60));
    }

    #[test]
    fn toml_overrides() {
        let config = AuthConfig::from_toml_str(
            r#"
            issuer_url = "https://idp.example.com/"
            audience = "my-app"
            jwks_url = "https://keys.example.com/jwks"
            allowed_algorithms = ["ES256"]
            jwks_ttl_seconds = 120
            clock_skew_seconds = 0
            required_scopes = ["read", "write"]
            scope_match = "any"
            "#,
        )
        .unwrap();
        assert_eq!(config.jwks_endpoint(), "https://keys.example.com/jwks");
        assert_eq!(config.cache_settings().ttl, Duration::from_secs(120));

        let policy = config.claim_policy().unwrap();
        assert_eq!(policy.allowed_algorithms, vec![Algorithm::ES256]);
        assert_eq!(policy.scope_match, ScopeMatch::Any);
        assert_eq!(policy.required_scopes, vec!["read", "write"]);
        assert_eq!(policy.clock_skew, Duration::ZERO);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = AuthConfig::from_toml_str(
            r#"
            issuer_url = "https://idp.example.com"
            audience = "my-app"
            jwks_ttl = 5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn validation() {
        let mut config = AuthConfig::new("https://idp.example.com", "my-app");
        config.allowed_algorithms = vec!["HS256".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AuthConfig::new("https://idp.example.com", "my-app");
        config.jwks_url = Some("http://keys.example.com/jwks".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.jwks_url = Some("http://127.0.0.1:8080/jwks".to_string());
        assert!(config.validate().is_ok());

        let config = AuthConfig::new("https://idp.example.com", " ");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AuthConfig::new("http://idp.example.com", "my-app");
        config.discover_jwks = true;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn oversized_intervals_are_rejected() {
        let mut config = AuthConfig::new("https://idp.example.com", "my-app");
        config.jwks_stale_grace_seconds = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AuthConfig::new("https://idp.example.com", "my-app");
        config.clock_skew_seconds = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AuthConfig::new("https://idp.example.com", "my-app");
        config.jwks_ttl_seconds = MAX_INTERVAL_SECONDS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn userinfo_cannot_pass_for_loopback() {
        let mut config = AuthConfig::new("https://idp.example.com", "my-app");
        config.jwks_url = Some("http://127.0.0.1:80@evil.example.com/jwks".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn env_loading() {
        let config = AuthConfig::from_env_with(env(&[
            ("KEYGATE_ISSUER_URL", "https://idp.example.com"),
            ("KEYGATE_AUDIENCE", "my-app"),
            ("KEYGATE_ALLOWED_ALGORITHMS", "RS256, ES256"),
            ("KEYGATE_REQUIRED_SCOPES", "read,write"),
            ("KEYGATE_JWKS_TTL_SECONDS", "30"),
            ("KEYGATE_ACCEPT_CLIENT_ID_AS_AUDIENCE", "true"),
        ]))
        .unwrap();
        assert_eq!(config.allowed_algorithms, vec!["RS256", "ES256"]);
        assert_eq!(config.required_scopes, vec!["read", "write"]);
        assert_eq!(config.jwks_ttl_seconds, 30);
        assert!(config.accept_client_id_as_audience);
        assert_eq!(config.jwks_stale_grace_seconds, 3600);
    }

    #[test]
    fn env_errors() {
        let missing = AuthConfig::from_env_with(env(&[("KEYGATE_AUDIENCE", "my-app")]));
        assert!(matches!(missing, Err(ConfigError::MissingEnv(v)) if v == "KEYGATE_ISSUER_URL"));

        let bad_number = AuthConfig::from_env_with(env(&[
            ("KEYGATE_ISSUER_URL", "https://idp.example.com"),
            ("KEYGATE_AUDIENCE", "my-app"),
            ("KEYGATE_CLOCK_SKEW_SECONDS", "soon"),
        ]));
        assert!(matches!(bad_number, Err(ConfigError::Invalid(_))));

        let symmetric = AuthConfig::from_env_with(env(&[
            ("KEYGATE_ISSUER_URL", "https://idp.example.com"),
            ("KEYGATE_AUDIENCE", "my-app"),
            ("KEYGATE_ALLOWED_ALGORITHMS", "HS256"),
        ]));
        assert!(matches!(symmetric, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn cognito_issuer() {
        let config = AuthConfig::cognito("eu-west-1", "eu-west-1_AbC", "client-123");
        assert_eq!(
            config.issuer_url,
            "https://cognito-idp.eu-west-1.amazonaws.com/eu-west-1_AbC"
        );
        assert_eq!(
            config.jwks_endpoint(),
            "https://cognito-idp.eu-west-1.amazonaws.com/eu-west-1_AbC/.well-known/jwks.json"
        );
        assert_eq!(config.audience, "client-123");
        assert!(config.accept_client_id_as_audience);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = AuthConfig::load_from_file(Path::new("/nonexistent/keygate.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
