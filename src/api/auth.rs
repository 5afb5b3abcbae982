use axum::http::{header::AUTHORIZATION, HeaderMap};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("ingestion is disabled")]
    Disabled,
    #[error("missing or malformed Authorization header")]
    Missing,
    #[error("invalid token")]
    Mismatch,
}

/// Shared-secret check for write endpoints.
///
/// Only the SHA-256 digest of the secret is kept, and presented tokens are
/// compared digest to digest, so comparison time does not leak how much of
/// a guess matched.
#[derive(Clone)]
pub struct IngestAuth {
    expected: Option<Vec<u8>>,
}

impl IngestAuth {
    /// An empty secret disables the protected endpoints entirely.
    pub fn new(secret: &str) -> Self {
        let secret = secret.trim();
        Self {
            expected: (!secret.is_empty()).then(|| Sha256::digest(secret.as_bytes()).to_vec()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    pub fn check(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let expected = self.expected.as_deref().ok_or(AuthError::Disabled)?;
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(presented_token)
            .ok_or(AuthError::Missing)?;

        if Sha256::digest(token.as_bytes()).as_slice() == expected {
            Ok(())
        } else {
            Err(AuthError::Mismatch)
        }
    }
}

/// `Bearer <token>` or `Token <token>`, scheme case-insensitive.
fn presented_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    let known = scheme.eq_ignore_ascii_case("bearer") || scheme.eq_ignore_ascii_case("token");
    (known && !token.is_empty()).then_some(token)
}
