// =============================================================================
// CART ENDPOINTS
// =============================================================================
// Every route works on the caller's own cart; there is no cart id in the
// path.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use super::validate;
use crate::auth::CurrentUser;
use crate::error::AppResult;
use crate::models::{AddToCartRequest, CartSummary, CartView, UpdateCartItemRequest};
use crate::AppState;

/// GET /api/v1/cart
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<CartView>> {
    Ok(Json(state.carts().view(user.id).await?))
}

/// GET /api/v1/cart/summary
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<CartSummary>> {
    Ok(Json(state.carts().summary(user.id).await?))
}

/// Add a product, merging with an existing line
///
/// POST /api/v1/cart/add
///
/// # Request Body
/// ```json
/// { "product_id": "...", "quantity": 2 }
/// ```
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<AddToCartRequest>,
) -> AppResult<Json<CartView>> {
    validate(&request)?;
    let view = state
        .carts()
        .add(user.id, request.product_id, request.quantity)
        .await?;
    Ok(Json(view))
}

/// PUT /api/v1/cart/items/:product_id
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(product_id): Path<Uuid>,
    Json(request): Json<UpdateCartItemRequest>,
) -> AppResult<Json<CartView>> {
    validate(&request)?;
    let view = state
        .carts()
        .update(user.id, product_id, request.quantity)
        .await?;
    Ok(Json(view))
}

/// DELETE /api/v1/cart/items/:product_id
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<CartView>> {
    Ok(Json(state.carts().remove(user.id, product_id).await?))
}

/// DELETE /api/v1/cart/clear
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<CartView>> {
    Ok(Json(state.carts().clear(user.id).await?))
}
