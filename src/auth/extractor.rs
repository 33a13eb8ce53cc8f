//! Request extractors for authenticated handlers
//!
//! ```ignore
//! async fn me(CurrentUser(user): CurrentUser) -> Json<UserView> { ... }
//! async fn restock(AdminUser(admin): AdminUser, ...) -> AppResult<...> { ... }
//! ```

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use tracing::warn;
use uuid::Uuid;

use super::jwt::JwtService;
use crate::error::AppError;
use crate::models::User;
use crate::store::{Storage, Store};
use crate::AppState;

/// Authenticated, active user
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Authenticated, active user with the admin role
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

/// Token from the Authorization header, if it is a bearer token
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(JwtService::extract_from_header)
}

fn credentials_error() -> AppError {
    AppError::Unauthorized("Could not validate credentials".to_string())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // AdminUser runs this first; don't hit the database twice
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let token = bearer_token(&parts.headers).ok_or_else(credentials_error)?;
        let claims = state.jwt.validate_token(token).map_err(|e| {
            warn!(error = %e, uri = %parts.uri, "Rejected bearer token");
            credentials_error()
        })?;
        let user_id: Uuid = claims.sub.parse().map_err(|_| credentials_error())?;

        let mut tx = state.db.begin().await?;
        let user = tx.find_user(user_id).await?.ok_or_else(credentials_error)?;
        tx.commit().await?;

        if !user.is_active {
            return Err(AppError::BadRequest("Inactive user".to_string()));
        }

        let current = CurrentUser(user);
        parts.extensions.insert(current.clone());
        Ok(current)
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            warn!(user_id = %user.id, uri = %parts.uri, "Admin route refused");
            return Err(AppError::Forbidden("Not enough permissions".to_string()));
        }
        Ok(AdminUser(user))
    }
}
