use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::errors::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // User id
    pub exp: usize,  // Expiration time
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("token subject is not a user id")]
    InvalidSubject,
    #[error("token lifetime out of range")]
    InvalidLifetime,
}

pub fn create_token(user_id: i32, secret: &str, ttl_hours: i64) -> Result<String, AuthError> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(ttl_hours))
        .ok_or(AuthError::InvalidLifetime)?
        .timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: usize::try_from(expiration).map_err(|_| AuthError::InvalidLifetime)?,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn validate_token(token: &str, secret: &str) -> Result<i32, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    data.claims.sub.parse().map_err(|_| AuthError::InvalidSubject)
}

/// The identity resolved from a valid bearer token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i32,
}

/// Resolves the acting user when an `Authorization` header is present.
///
/// Requests without the header pass through anonymously so read-only
/// endpoints stay public; a malformed or expired token is rejected outright.
pub async fn authenticate(
    headers: HeaderMap,
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(auth_header) = headers.get("Authorization") else {
        return next.run(request).await;
    };
    let token = match auth_header.to_str().ok().and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) => token.trim(),
        None => {
            return ApiError::Unauthorized("Invalid Authorization header format".to_string())
                .into_response()
        }
    };
    match validate_token(token, &state.config.jwt_secret) {
        Ok(user_id) => {
            debug!("Authenticated user {}", user_id);
            request.extensions_mut().insert(CurrentUser { id: user_id });
            next.run(request).await
        }
        Err(e) => {
            warn!("Rejected bearer token: {}", e);
            ApiError::Unauthorized("Invalid or expired token".to_string()).into_response()
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .copied()
            .ok_or_else(|| {
                ApiError::Unauthorized("Authentication credentials were not provided.".to_string())
            })
    }
}

/// Write access is granted only to the record's owner.
pub fn ensure_owner(owner_id: i32, user: &CurrentUser) -> Result<(), ApiError> {
    if owner_id == user.id {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}
