//! Compact JWS structure and the unverified header.

use crate::algorithm;
use crate::error::{Result, VerificationFailure};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::Algorithm;
use serde::Deserialize;

/// Unverified header of a presented token.
///
/// Nothing in here is trusted; it only says which key and algorithm to try.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// Declared algorithm, as written.
    pub alg: String,
    /// Key id.
    #[serde(default)]
    pub kid: Option<String>,
    /// Declared media type.
    #[serde(default)]
    pub typ: Option<String>,
}

impl TokenHeader {
    /// Parsed algorithm; `None` for `none` and unknown names.
    pub fn algorithm(&self) -> Option<Algorithm> {
        algorithm::parse(&self.alg)
    }

    /// The `kid`, if present and non-empty.
    pub fn key_id(&self) -> Option<&str> {
        self.kid.as_deref().filter(|k| !k.is_empty())
    }
}

/// A structurally valid compact token; only the header is kept because
/// payload and signature are handed to the signature check as a whole.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CompactParts<'a> {
    header: &'a str,
}

impl<'a> CompactParts<'a> {
    /// Split `header.payload.signature`.
    ///
    /// The signature segment may be empty so that unsigned tokens are turned
    /// away by algorithm admission rather than as malformed.
    pub fn split(token: &'a str) -> Result<Self> {
        let token = token.trim();
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(malformed("expected three dot-separated segments"));
        };

        if header.is_empty() || payload.is_empty() {
            return Err(malformed("empty header or payload segment"));
        }
        for segment in [header, payload, signature] {
            if !segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
            {
                return Err(malformed("segment is not base64url"));
            }
        }

        Ok(Self { header })
    }

    /// Decode the header segment.
    pub fn header(&self) -> Result<TokenHeader> {
        let bytes = URL_SAFE_NO_PAD
            .decode(self.header)
            .map_err(|e| malformed(&format!("header is not base64url: {e}")))?;
        serde_json::from_slice(&bytes).map_err(|e| malformed(&format!("invalid header: {e}")))
    }
}

/// Read a token's header without verifying anything.
///
/// # Errors
///
/// [`VerificationFailure::MalformedToken`] when the structure or header is
/// unreadable.
pub fn decode_header(token: &str) -> Result<TokenHeader> {
    CompactParts::split(token)?.header()
}

fn malformed(reason: &str) -> VerificationFailure {
    VerificationFailure::MalformedToken(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(s: &str) -> String {
        URL_SAFE_NO_PAD.encode(s)
    }

    #[test]
    fn header_is_decoded() {
        let token = format!(
            "{}.{}.c2ln",
            b64(r#"{"alg":"RS256","kid":"key-a","typ":"JWT"}"#),
            b64(r#"{"sub":"u"}"#)
        );
        let header = decode_header(&token).unwrap();
        assert_eq!(header.algorithm(), Some(Algorithm::RS256));
        assert_eq!(header.key_id(), Some("key-a"));
        assert_eq!(header.typ.as_deref(), Some("JWT"));
    }

    #[test]
    fn structure_errors_are_malformed() {
        for token in ["", "abc", "a.b", "a.b.c.d", ".b.c", "a..c", "a.b+/.c", "a.b.c=="] {
            assert!(
                matches!(decode_header(token), Err(VerificationFailure::MalformedToken(_))),
                "{token:?}"
            );
        }
    }

    #[test]
    fn unsigned_token_splits() {
        let token = format!("{}.{}.", b64(r#"{"alg":"none"}"#), b64("{}"));
        let header = decode_header(&token).unwrap();
        assert_eq!(header.algorithm(), None);
        assert_eq!(header.key_id(), None);
    }

    #[test]
    fn header_without_alg_is_malformed() {
        let token = format!("{}.{}.c2ln", b64(r#"{"kid":"k"}"#), b64("{}"));
        assert!(matches!(
            decode_header(&token),
            Err(VerificationFailure::MalformedToken(_))
        ));
    }
}
