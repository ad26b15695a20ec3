//! Pick the key a token claims to be signed with.

use crate::error::{Result, VerificationFailure};
use crate::jwks::{KeySet, SigningKey};
use crate::token::TokenHeader;

use std::sync::Arc;

/// Matches a token header against a key set by `kid` and checks that the
/// key can verify the declared algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeySelector;

impl KeySelector {
    /// Select the key for `header` from `keys`.
    ///
    /// # Errors
    ///
    /// - [`VerificationFailure::MalformedToken`] when the header has no `kid`.
    /// - [`VerificationFailure::KeyNotFound`] when no key carries that `kid`.
    /// - [`VerificationFailure::AlgorithmMismatch`] when the key pins another
    ///   algorithm or cannot verify the declared one.
    pub fn select(header: &TokenHeader, keys: &KeySet) -> Result<Arc<SigningKey>> {
        let kid = header.key_id().ok_or_else(|| {
            VerificationFailure::MalformedToken("header has no kid".to_string())
        })?;
        let alg = header.algorithm().ok_or_else(|| {
            VerificationFailure::AlgorithmMismatch(format!("unsupported algorithm {:?}", header.alg))
        })?;

        let key = keys
            .keys()
            .iter()
            .find(|k| k.kid() == kid)
            .ok_or_else(|| VerificationFailure::KeyNotFound {
                kid: kid.to_string(),
            })?;

        if let Some(pinned) = key.algorithm() {
            if pinned != alg {
                return Err(VerificationFailure::AlgorithmMismatch(format!(
                    "key {kid} is for {pinned:?}, token declares {alg:?}"
                )));
            }
        }
        if !key.key_type().supports(alg) {
            return Err(VerificationFailure::AlgorithmMismatch(format!(
                "{} key {kid} cannot verify {alg:?}",
                key.key_type().as_str()
            )));
        }
        Ok(Arc::clone(key))
    }
}
