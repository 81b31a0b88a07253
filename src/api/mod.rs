//! API handlers for Bibliotheca REST endpoints

pub mod auth;
pub mod books;
pub mod categories;
pub mod health;
pub mod loans;
pub mod openapi;
pub mod users;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::{error::AppError, models::user::UserClaims, AppState};

/// Extractor for authenticated user from JWT token
pub struct AuthenticatedUser(pub UserClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Get the Authorization header
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing authorization header".to_string()))?;

        // Check for Bearer token
        if !auth_header.starts_with("Bearer ") {
            return Err(AppError::Authentication(
                "Invalid authorization header format".to_string(),
            ));
        }

        let token = &auth_header[7..];

        // Validate JWT token using the secret from configuration
        let claims = UserClaims::from_token(token, &state.config.auth.jwt_secret)
            .map_err(|e| AppError::Authentication(e.to_string()))?;

        Ok(AuthenticatedUser(claims))
    }
}

/// Extractor for the borrow token presented on protected book reads.
///
/// Accepts a `Book-Token` header or a `token` query parameter, mirroring
/// how reader clients pass it.
pub struct BookToken(pub String);

#[async_trait]
impl FromRequestParts<AppState> for BookToken {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(token) = parts
            .headers
            .get("book-token")
            .and_then(|value| value.to_str().ok())
        {
            return Ok(BookToken(token.to_string()));
        }

        let from_query = parts.uri.query().and_then(|query| {
            query.split('&').find_map(|pair| {
                pair.strip_prefix("token=")
                    .filter(|value| !value.is_empty())
                    .map(|value| value.to_string())
            })
        });

        match from_query {
            Some(token) => Ok(BookToken(token)),
            None => Err(AppError::Authentication(
                "Book token is required".to_string(),
            )),
        }
    }
}
