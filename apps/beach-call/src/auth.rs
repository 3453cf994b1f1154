use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routes::ApiError;
use crate::session::Identity;
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("token verification failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token missing subject")]
    MissingSubject,
    #[error("token signing failed: {0}")]
    Signing(jsonwebtoken::errors::Error),
}

/// Turns a bearer credential into a verified identity.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Mints credentials for an identity.
pub trait TokenIssuer: Send + Sync {
    fn issue(&self, identity: &str) -> Result<IssuedToken, AuthError>;
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// HS256 tokens with a fixed lifetime, signed with a configured secret.
#[derive(Clone)]
pub struct JwtAuthority {
    enc: EncodingKey,
    dec: DecodingKey,
    ttl: Duration,
}

impl JwtAuthority {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            enc: EncodingKey::from_secret(secret),
            dec: DecodingKey::from_secret(secret),
            ttl,
        }
    }
}

impl TokenIssuer for JwtAuthority {
    fn issue(&self, identity: &str) -> Result<IssuedToken, AuthError> {
        let issued_at = Utc::now();
        let expires_at = issued_at + self.ttl;
        let claims = IdentityClaims {
            sub: identity.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.enc)
            .map_err(AuthError::Signing)?;
        Ok(IssuedToken { token, expires_at })
    }
}

impl IdentityVerifier for JwtAuthority {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let data = jsonwebtoken::decode::<IdentityClaims>(credential, &self.dec, &validation)?;
        if data.claims.sub.trim().is_empty() {
            return Err(AuthError::MissingSubject);
        }
        Ok(data.claims.sub)
    }
}

/// Identity of the caller, taken from `Authorization: Bearer <token>`.
#[derive(Clone, Debug)]
pub struct BearerIdentity(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for BearerIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        state
            .verifier()
            .verify(&token)
            .map(BearerIdentity)
            .map_err(|_| ApiError::Unauthorized)
    }
}

fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|token| token.to_owned())
}
