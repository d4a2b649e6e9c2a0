//! Bearer-token identity: HS256 tokens carrying the caller's id and role.
//!
//! Candidates hold `user` tokens whose subject is their [`CandidateId`]; hiring companies
//! hold `company` tokens whose subject is their [`CompanyId`].

use std::fmt;

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::pipeline::domain::{CandidateId, CompanyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Company,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Company => f.write_str("company"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    exp: i64,
}

/// Verified caller identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub role: Role,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token could not be signed: {0}")]
    Signing(jsonwebtoken::errors::Error),
    #[error("invalid token: {0}")]
    Invalid(jsonwebtoken::errors::Error),
    #[error("token subject is empty")]
    EmptySubject,
}

/// Signing and verification keys derived from the shared secret.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl fmt::Debug for TokenKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenKeys(<redacted>)")
    }
}

impl TokenKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, subject: &str, role: Role, ttl: Duration) -> Result<String, TokenError> {
        if subject.trim().is_empty() {
            return Err(TokenError::EmptySubject);
        }
        let claims = Claims {
            sub: subject.to_string(),
            role,
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(TokenError::Signing)
    }

    pub fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(TokenError::Invalid)?;
        if data.claims.sub.trim().is_empty() {
            return Err(TokenError::EmptySubject);
        }
        Ok(Identity {
            subject: data.claims.sub,
            role: data.claims.role,
        })
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".into()))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("expected Bearer token".into()))
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    TokenKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = TokenKeys::from_ref(state);
        let token = bearer_token(parts)?;
        keys.verify(token)
            .map_err(|err| ApiError::Unauthorized(err.to_string()))
    }
}

/// A caller holding a `company` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyIdentity(pub CompanyId);

#[async_trait]
impl<S> FromRequestParts<S> for CompanyIdentity
where
    TokenKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let identity = Identity::from_request_parts(parts, state).await?;
        match identity.role {
            Role::Company => Ok(CompanyIdentity(CompanyId(identity.subject))),
            Role::User => Err(ApiError::Forbidden("company access required".into())),
        }
    }
}

/// A caller holding a `user` (candidate) token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateIdentity(pub CandidateId);

#[async_trait]
impl<S> FromRequestParts<S> for CandidateIdentity
where
    TokenKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let identity = Identity::from_request_parts(parts, state).await?;
        match identity.role {
            Role::User => Ok(CandidateIdentity(CandidateId(identity.subject))),
            Role::Company => Err(ApiError::Forbidden("candidate access required".into())),
        }
    }
}
