use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use keygate_auth::{
    AuthConfig, ClaimRejection, TokenVerifier, VerificationFailure, default_config_path,
    discovery,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = include_str!("../../../docs/keygate.toml.example");

#[derive(Debug, Parser)]
#[command(name = "keygate", about = "Verify JWT bearer tokens against a provider's JWKS")]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default: ~/.config/keygate/keygate.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Read configuration from KEYGATE_* environment variables instead
    #[arg(long, global = true)]
    env: bool,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a commented default config file
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Verify a token (argument or stdin) and print the identity
    Verify {
        #[arg(long)]
        token: Option<String>,
        /// Give up after this many milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
    /// Fetch the key set and list its keys
    Keys,
    /// Resolve an issuer's OIDC discovery document
    Discover {
        #[arg(long)]
        issuer: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Init { force } => {
            let path = cli.config.clone().unwrap_or_else(default_config_path);
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
            fs::write(&path, DEFAULT_CONFIG)
                .with_context(|| format!("failed to write {}", path.display()))?;
            pout(
                cli.json,
                json!({"message": "init complete", "config": path}),
                &format!("Wrote {}", path.display()),
            )?;
        }
        Commands::Verify { token, deadline_ms } => {
            let config = load_config(&cli)?;
            let raw = match token {
                Some(t) => t.clone(),
                None => read_stdin()?,
            };
            let raw = strip_bearer(&raw);

            let verifier = TokenVerifier::from_config(&config).await?;
            let result = match deadline_ms {
                Some(ms) => {
                    verifier
                        .verify_with_deadline(raw, Duration::from_millis(*ms))
                        .await
                }
                None => verifier.verify(raw).await,
            };

            match result {
                Ok(identity) => {
                    let text = format!(
                        "valid: sub={} scopes=[{}] exp={}",
                        identity.subject(),
                        identity.scopes().join(" "),
                        identity.expiry()
                    );
                    pout(
                        cli.json,
                        json!({
                            "valid": true,
                            "subject": identity.subject(),
                            "client_id": identity.client_id(),
                            "username": identity.username(),
                            "scopes": identity.scopes(),
                            "expiry": identity.expiry(),
                            "claims": identity.claims(),
                        }),
                        &text,
                    )?;
                }
                Err(e) => {
                    pout(
                        cli.json,
                        json!({"valid": false, "kind": failure_kind(&e), "error": e.to_string()}),
                        &format!("invalid: {e}"),
                    )?;
                    std::process::exit(1);
                }
            }
        }
        Commands::Keys => {
            let config = load_config(&cli)?;
            let verifier = TokenVerifier::from_config(&config).await?;
            let set = verifier
                .cache()
                .current()
                .await
                .with_context(|| format!("fetching {}", verifier.cache().source()))?;

            let keys: Vec<_> = set
                .keys()
                .iter()
                .map(|k| {
                    json!({
                        "kid": k.kid(),
                        "kty": k.key_type().as_str(),
                        "alg": k.algorithm().map(|a| format!("{a:?}")),
                    })
                })
                .collect();
            let mut text = format!("{} ({} keys)", verifier.cache().source(), keys.len());
            for k in set.keys() {
                let alg = k.algorithm().map_or_else(|| "-".to_string(), |a| format!("{a:?}"));
                text.push_str(&format!("\n  {}  {}  {alg}", k.kid(), k.key_type().as_str()));
            }
            pout(
                cli.json,
                json!({"source": verifier.cache().source(), "keys": keys}),
                &text,
            )?;
        }
        Commands::Discover { issuer } => {
            let metadata = discovery::fetch_metadata(issuer, Duration::from_secs(5))
                .await
                .with_context(|| format!("discovery for {issuer}"))?;
            pout(
                cli.json,
                json!({
                    "issuer": metadata.issuer,
                    "jwks_uri": metadata.jwks_uri,
                    "algorithms": metadata.id_token_signing_alg_values_supported,
                }),
                &format!("jwks_uri: {}", metadata.jwks_uri),
            )?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<AuthConfig> {
    if cli.env {
        return AuthConfig::from_env().context("loading config from environment");
    }
    let path = cli.config.clone().unwrap_or_else(default_config_path);
    tracing::debug!(path = %path.display(), "loading config");
    AuthConfig::load_from_file(&path).with_context(|| {
        format!(
            "loading {} (run `keygate init` or pass --env)",
            path.display()
        )
    })
}

fn read_stdin() -> anyhow::Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("reading token from stdin")?;
    if buf.trim().is_empty() {
        anyhow::bail!("no token given (use --token or pipe one on stdin)");
    }
    Ok(buf)
}

fn strip_bearer(raw: &str) -> &str {
    let raw = raw.trim();
    match raw.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => raw[7..].trim_start(),
        _ => raw,
    }
}

fn failure_kind(e: &VerificationFailure) -> &'static str {
    match e {
        VerificationFailure::MalformedToken(_) => "malformed_token",
        VerificationFailure::KeySetUnavailable(_) => "key_set_unavailable",
        VerificationFailure::KeyNotFound { .. } => "key_not_found",
        VerificationFailure::AlgorithmMismatch(_) => "algorithm_mismatch",
        VerificationFailure::SignatureInvalid => "signature_invalid",
        VerificationFailure::ClaimRejected(ClaimRejection::Expired) => "expired",
        VerificationFailure::ClaimRejected(_) => "claim_rejected",
        VerificationFailure::VerificationTimeout => "timeout",
    }
}

pub fn pout(json_mode: bool, value: serde_json::Value, text: &str) -> anyhow::Result<()> {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{text}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_prefix_is_optional() {
        assert_eq!(strip_bearer("Bearer abc.def.ghi\n"), "abc.def.ghi");
        assert_eq!(strip_bearer("bearer   abc.def.ghi"), "abc.def.ghi");
        assert_eq!(strip_bearer(" abc.def.ghi "), "abc.def.ghi");
        assert_eq!(strip_bearer("Bear"), "Bear");
    }

    #[test]
    fn default_config_parses() {
        let config = AuthConfig::from_toml_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config, AuthConfig::new("https://idp.example.com", "my-app"));
    }

    #[test]
    fn cli_parses() {
        let cli = Cli::try_parse_from(["keygate", "--json", "verify", "--deadline-ms", "250"]).unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Verify {
                token: None,
                deadline_ms: Some(250)
            }
        ));
    }
}
