//! Where key sets come from.

use super::JwksDocument;
use crate::error::FetchError;

use async_trait::async_trait;
use std::time::Duration;
use url::{Host, Url};

/// Largest JWKS body accepted from a provider.
pub const MAX_JWKS_BODY_BYTES: usize = 256 * 1024;

/// A fetched document plus the provider's caching hint.
#[derive(Debug, Clone)]
pub struct FetchedJwks {
    /// The parsed document.
    pub document: JwksDocument,
    /// `Cache-Control: max-age`, when the provider sent one.
    pub max_age: Option<Duration>,
}

/// Source of JWKS documents for a [`super::cache::KeySetCache`].
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    /// Fetch the provider's current document.
    async fn fetch(&self) -> Result<FetchedJwks, FetchError>;

    /// Human-readable origin, used in logs.
    fn source(&self) -> &str;
}

/// A fixed JWKS, given as JSON text or an already-parsed document.
#[derive(Debug, Clone)]
pub struct StaticJwks {
    document: JwksDocument,
}

impl StaticJwks {
    /// Parse this JSON string.
    ///
    /// # Errors
    ///
    /// [`FetchError::Json`] if the text is not a JWKS document.
    pub fn from_json(json: &str) -> Result<Self, FetchError> {
        Ok(Self {
            document: serde_json::from_str(json)?,
        })
    }

    /// Use this parsed key set.
    pub fn from_document(document: JwksDocument) -> Self {
        Self { document }
    }
}

#[async_trait]
impl KeySetFetcher for StaticJwks {
    async fn fetch(&self) -> Result<FetchedJwks, FetchError> {
        Ok(FetchedJwks {
            document: self.document.clone(),
            max_age: None,
        })
    }

    fn source(&self) -> &str {
        "static"
    }
}

/// Refuse anything but HTTPS, except plain HTTP to loopback.
///
/// Credentials in the authority are refused outright; `http://127.0.0.1@host`
/// names `host`, not loopback.
///
/// # Errors
///
/// [`FetchError::InsecureUrl`] for any other scheme or host, or text that is
/// not a URL.
pub fn ensure_secure_url(url: &str) -> Result<(), FetchError> {
    let insecure = || FetchError::InsecureUrl(url.to_string());
    let parsed = Url::parse(url).map_err(|_| insecure())?;
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(insecure());
    }
    let loopback = match parsed.host() {
        Some(Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    };
    match parsed.scheme() {
        "https" if parsed.host().is_some() => Ok(()),
        "http" if loopback => Ok(()),
        _ => Err(insecure()),
    }
}

/// Fetches a JWKS over HTTPS.
#[cfg(feature = "fetch-reqwest")]
#[derive(Debug, Clone)]
pub struct HttpJwksFetcher {
    url: String,
    client: reqwest::Client,
}

#[cfg(feature = "fetch-reqwest")]
impl HttpJwksFetcher {
    /// Create a fetcher for `url` whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`FetchError::InsecureUrl`] for non-HTTPS endpoints, or
    /// [`FetchError::Http`] if the client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let url = url.into();
        ensure_secure_url(&url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url, client })
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(feature = "fetch-reqwest")]
#[async_trait]
impl KeySetFetcher for HttpJwksFetcher {
    async fn fetch(&self) -> Result<FetchedJwks, FetchError> {
        let (body, max_age) = get_json_body(&self.client, &self.url).await?;
        let document: JwksDocument = serde_json::from_slice(&body)?;
        Ok(FetchedJwks {
            document,
            max_age: max_age.map(Duration::from_secs),
        })
    }

    fn source(&self) -> &str {
        &self.url
    }
}

/// GET `url`, returning the body and any `Cache-Control: max-age`.
#[cfg(feature = "fetch-reqwest")]
pub(crate) async fn get_json_body(
    client: &reqwest::Client,
    url: &str,
) -> Result<(Vec<u8>, Option<u64>), FetchError> {
    use reqwest::header;

    let mut resp = client
        .get(url)
        .header(header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(map_reqwest)?;
    if !resp.status().is_success() {
        return Err(FetchError::Status(resp.status().as_u16()));
    }

    if resp
        .content_length()
        .is_some_and(|len| len > MAX_JWKS_BODY_BYTES as u64)
    {
        return Err(FetchError::BodyTooLarge(MAX_JWKS_BODY_BYTES));
    }

    let max_age = resp
        .headers()
        .get(header::CACHE_CONTROL)
        .and_then(|h| h.to_str().ok())
        .and_then(parse_cache_control_max_age);

    // Chunked responses carry no length; stop reading once past the cap.
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await.map_err(map_reqwest)? {
        if body.len() + chunk.len() > MAX_JWKS_BODY_BYTES {
            return Err(FetchError::BodyTooLarge(MAX_JWKS_BODY_BYTES));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, max_age))
}

#[cfg(feature = "fetch-reqwest")]
fn map_reqwest(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Http(e)
    }
}

fn parse_cache_control_max_age(cc: &str) -> Option<u64> {
    // Very small parser: look for max-age=NNN
    for part in cc.split(',') {
        let p = part.trim();
        if p.eq_ignore_ascii_case("no-store") || p.eq_ignore_ascii_case("no-cache") {
            return Some(0);
        }
        if let Some(rest) = p.strip_prefix("max-age=") {
            if let Ok(n) = rest.trim().parse::<u64>() {
                return Some(n);
            }
        }
    }
    None
}
