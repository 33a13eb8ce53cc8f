// =============================================================================
// AUTH ENDPOINTS
// =============================================================================

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};

use super::validate;
use crate::auth::CurrentUser;
use crate::error::AppResult;
use crate::models::{LoginRequest, RegisterRequest, TokenResponse, UserView};
use crate::services::notifications::{dispatch, welcome_email};
use crate::AppState;

/// Create a customer account and send the welcome email
///
/// POST /api/v1/auth/register
///
/// # Response
/// - 201 Created: the new user
/// - 409 Conflict: email or username taken
/// - 422: invalid fields
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserView>)> {
    validate(&request)?;
    let user = state.auth().register(&request).await?;
    dispatch(state.mailer.as_ref(), welcome_email(&user)).await;
    Ok((StatusCode::CREATED, Json(UserView::from(&user))))
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    validate(&request)?;
    Ok(Json(state.auth().login(&request).await?))
}

/// GET /api/v1/auth/me
pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserView> {
    Json(UserView::from(&user))
}

/// New token for the bearer of a still-valid one
///
/// POST /api/v1/auth/refresh
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<TokenResponse>> {
    Ok(Json(state.auth().issue_token(&user)?))
}
