// =============================================================================
// CATALOG ENDPOINTS
// =============================================================================
// Products and categories. Reads are public, writes need an admin token.
// Single product reads go through the Redis cache; every product write
// invalidates the cached entry.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::validate;
use crate::auth::AdminUser;
use crate::error::AppResult;
use crate::models::{
    Category, CategoryPatch, CategoryView, ListParams, NewCategory, NewProduct, Paginated,
    ProductFilters, ProductPatch, ProductView, StockUpdate,
};
use crate::AppState;

// -----------------------------------------------------------------------------
// QUERY PARAMETERS
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<i64>,
}

/// GET /categories?page=1&per_page=20&active_only=true
#[derive(Debug, Deserialize)]
pub struct CategoryQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    #[serde(default)]
    pub active_only: bool,
}

impl CategoryQuery {
    fn list_params(&self) -> ListParams {
        let defaults = ListParams::default();
        ListParams {
            page: self.page.unwrap_or(defaults.page),
            per_page: self.per_page.unwrap_or(defaults.per_page),
        }
    }
}

// =============================================================================
// PRODUCTS
// =============================================================================

/// Paginated product list
///
/// GET /api/v1/products
///
/// # Query Parameters
/// - `category_id`, `min_price`, `max_price`, `in_stock`, `is_featured`
/// - `is_active` (default true), `search`
/// - `page` (default 1), `per_page` (default 20, max 100)
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(filters): Query<ProductFilters>,
) -> AppResult<Json<Paginated<ProductView>>> {
    Ok(Json(state.catalog().list_products(&filters).await?))
}

/// GET /api/v1/products/featured?limit=10
pub async fn featured_products(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<Vec<ProductView>>> {
    Ok(Json(state.catalog().featured_products(query.limit).await?))
}

/// GET /api/v1/products/search?q=mug&limit=20
pub async fn search_products(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<ProductView>>> {
    let hits = state
        .catalog()
        .search_products(&query.q, query.limit)
        .await?;
    Ok(Json(hits))
}

/// Admin report of products at or below their low stock threshold
///
/// GET /api/v1/products/low-stock?limit=50
pub async fn low_stock_products(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<Vec<ProductView>>> {
    Ok(Json(state.catalog().low_stock_products(query.limit).await?))
}

/// Single product, read through the cache
///
/// GET /api/v1/products/:id
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ProductView>> {
    if let Some(product) = state.cache.get(id).await {
        return Ok(Json(product.into()));
    }
    let product = state.catalog().get_product(id).await?;
    state.cache.put(&product).await;
    Ok(Json(product.into()))
}

/// GET /api/v1/products/slug/:slug
pub async fn get_product_by_slug(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> AppResult<Json<ProductView>> {
    Ok(Json(state.catalog().get_product_by_slug(&slug).await?.into()))
}

/// GET /api/v1/products/sku/:sku
pub async fn get_product_by_sku(
    State(state): State<Arc<AppState>>,
    Path(sku): Path<String>,
) -> AppResult<Json<ProductView>> {
    Ok(Json(state.catalog().get_product_by_sku(&sku).await?.into()))
}

/// POST /api/v1/products
///
/// # Response
/// - 201 Created
/// - 409 Conflict: SKU or slug already used
/// - 422: invalid fields, bad price relationships or unknown category
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(request): Json<NewProduct>,
) -> AppResult<(StatusCode, Json<ProductView>)> {
    validate(&request)?;
    let product = state.catalog().create_product(&request).await?;
    Ok((StatusCode::CREATED, Json(product.into())))
}

/// PUT /api/v1/products/:id
pub async fn update_product(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<ProductPatch>,
) -> AppResult<Json<ProductView>> {
    validate(&patch)?;
    let product = state.catalog().update_product(id, patch).await?;
    state.cache.invalidate(id).await;
    Ok(Json(product.into()))
}

/// PATCH /api/v1/products/:id/stock
///
/// # Request Body
/// ```json
/// { "stock_quantity": 40, "low_stock_threshold": 5 }
/// ```
pub async fn update_stock(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(update): Json<StockUpdate>,
) -> AppResult<Json<ProductView>> {
    validate(&update)?;
    let product = state.catalog().update_stock(id, &update).await?;
    state.cache.invalidate(id).await;
    Ok(Json(product.into()))
}

/// DELETE /api/v1/products/:id
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.catalog().delete_product(id).await?;
    state.cache.invalidate(id).await;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// CATEGORIES
// =============================================================================

/// GET /api/v1/categories
pub async fn list_categories(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CategoryQuery>,
) -> AppResult<Json<Paginated<CategoryView>>> {
    let page = state
        .catalog()
        .list_categories(query.list_params(), query.active_only)
        .await?;
    Ok(Json(page))
}

/// GET /api/v1/categories/active
pub async fn active_categories(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Vec<CategoryView>>> {
    Ok(Json(state.catalog().active_categories().await?))
}

/// GET /api/v1/categories/:id
pub async fn get_category(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<CategoryView>> {
    Ok(Json(state.catalog().get_category(id).await?))
}

/// GET /api/v1/categories/slug/:slug
pub async fn get_category_by_slug(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> AppResult<Json<CategoryView>> {
    Ok(Json(state.catalog().get_category_by_slug(&slug).await?))
}

/// POST /api/v1/categories
pub async fn create_category(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(request): Json<NewCategory>,
) -> AppResult<(StatusCode, Json<Category>)> {
    validate(&request)?;
    let category = state.catalog().create_category(&request).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// PUT /api/v1/categories/:id
pub async fn update_category(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<CategoryPatch>,
) -> AppResult<Json<Category>> {
    validate(&patch)?;
    Ok(Json(state.catalog().update_category(id, patch).await?))
}

/// DELETE /api/v1/categories/:id
///
/// # Response
/// - 204 No Content
/// - 409 Conflict: products still reference the category
pub async fn delete_category(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.catalog().delete_category(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
