//! Bearer token identity
//!
//! Tokens have the form `<user_id>.<hex sha256(user_id ":" secret)>`.
//! Verification recomputes the digest; there is no session state.
//!
//! Handlers pick the extractor matching the route's policy:
//! - [`MaybeUser`]: absent or invalid token means anonymous
//! - [`RequireUser`]: a valid token is mandatory (401 otherwise)

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use cardvault_common::UserId;
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Clone)]
pub struct TokenVerifier {
    secret: String,
}

impl TokenVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Issue a token for `user_id`
    pub fn issue_token(&self, user_id: &UserId) -> String {
        format!("{}.{}", user_id, self.signature(user_id.as_str()))
    }

    /// User identity carried by a valid token
    pub fn verify(&self, token: &str) -> Option<UserId> {
        let (user_id, signature) = token.trim().rsplit_once('.')?;
        if user_id.is_empty() {
            return None;
        }

        let expected = self.signature(user_id);
        if constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            Some(UserId::new(user_id))
        } else {
            None
        }
    }

    fn signature(&self, user_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_bytes());
        hasher.update(b":");
        hasher.update(self.secret.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Token from an `Authorization: Bearer <token>` header
fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
}

/// Caller identity; `None` for anonymous callers
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<UserId>);

impl MaybeUser {
    pub fn user(&self) -> Option<&UserId> {
        self.0.as_ref()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = bearer_token(parts).and_then(|token| state.tokens.verify(token));

        if user.is_none() && !state.allow_anonymous {
            return Err(ApiError::Unauthorized("A valid bearer token is required".to_string()));
        }

        Ok(MaybeUser(user))
    }
}

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct RequireUser(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for RequireUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

        state
            .tokens
            .verify(token)
            .map(RequireUser)
            .ok_or_else(|| ApiError::Unauthorized("Invalid bearer token".to_string()))
    }
}
