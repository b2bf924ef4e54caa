use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::{error::AppError, state::AppState};

const REFRESH_TOKEN_BYTES: usize = 32;

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (student identifier)
    pub sub: String,
    /// Expiration time (as Unix timestamp)
    pub exp: u64,
    /// Issued at (as Unix timestamp)
    pub iat: u64,
}

impl Claims {
    /// Create new claims with given subject and lifetime
    pub fn new(subject: String, ttl: Duration) -> Result<Self, TokenError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let exp = now
            .checked_add(ttl.as_secs())
            .ok_or(TokenError::LifetimeOutOfRange(ttl))?;

        Ok(Self {
            sub: subject,
            iat: now,
            exp,
        })
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("signing key must not be empty")]
    EmptySigningKey,
    #[error("token expired")]
    Expired,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid token")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("token lifetime {0:?} is out of range")]
    LifetimeOutOfRange(Duration),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Self::Expired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => Self::InvalidSignature,
            _ => Self::Invalid(err),
        }
    }
}

/// Issues and validates HS256 access tokens and mints refresh tokens.
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager").finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(signing_key: &str) -> Result<Self, TokenError> {
        if signing_key.is_empty() {
            return Err(TokenError::EmptySigningKey);
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(signing_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(signing_key.as_bytes()),
        })
    }

    /// Signs an access token for `subject` valid for `ttl`.
    pub fn new_jwt(&self, subject: &str, ttl: Duration) -> Result<String, TokenError> {
        let claims = Claims::new(subject.to_string(), ttl)?;
        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Verifies signature and expiry, returning the claims.
    pub fn parse(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(token_data.claims)
    }

    /// Returns an opaque hex-encoded refresh token.
    pub fn new_refresh_token(&self) -> String {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

/// Identity of the caller, inserted into request extensions by
/// [`jwt_auth_middleware`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentStudent(pub i64);

/// Extract JWT token from Authorization header
fn extract_token_from_header(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// JWT authentication middleware
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = match request.headers().get(AUTHORIZATION) {
        Some(header) => match header.to_str() {
            Ok(h) => h,
            Err(_) => return AppError::Unauthorized("Invalid authorization header").into_response(),
        },
        None => return AppError::Unauthorized("Missing authorization header").into_response(),
    };

    let Some(token) = extract_token_from_header(auth_header) else {
        return AppError::Unauthorized("Invalid authorization format, expected: Bearer <token>")
            .into_response();
    };

    match state.token_manager.parse(token) {
        Ok(claims) => match claims.sub.parse::<i64>() {
            Ok(id) => {
                request.extensions_mut().insert(CurrentStudent(id));
                next.run(request).await
            }
            Err(_) => AppError::Unauthorized("Invalid token subject").into_response(),
        },
        Err(err) => {
            let msg = match err {
                TokenError::Expired => "Token expired",
                TokenError::InvalidSignature => "Invalid signature",
                _ => "Invalid token",
            };
            AppError::Unauthorized(msg).into_response()
        }
    }
}
