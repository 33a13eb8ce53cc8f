// =============================================================================
// ORDER ENDPOINTS
// =============================================================================
// Checkout, payment and cancellation for customers, plus the admin views.
// Anything that moves stock drops the cached products of the order.
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
use crate::auth::{AdminUser, CurrentUser};
use crate::error::AppResult;
use crate::models::{CheckoutRequest, Order, OrderPatch, OrderStatus, OrderSummary, OrderView};
use crate::services::notifications::{dispatch, order_confirmation_email};
use crate::services::payment::PaymentMethodInfo;
use crate::AppState;

pub const DEFAULT_ORDER_LIMIT: i64 = 10;
pub const MAX_ORDER_LIMIT: i64 = 100;

fn default_limit() -> i64 {
    DEFAULT_ORDER_LIMIT
}

/// GET /orders?skip=0&limit=10
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct OrderListParams {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl OrderListParams {
    /// Non-negative skip, limit within 1..=100
    pub fn normalized(self) -> Self {
        Self {
            skip: self.skip.max(0),
            limit: self.limit.clamp(1, MAX_ORDER_LIMIT),
        }
    }
}

/// Product ids of the order's lines
fn ordered_product_ids(order: &Order) -> Vec<Uuid> {
    order.items.iter().map(|item| item.product_id).collect()
}

async fn forget_cached_products(state: &AppState, product_ids: Vec<Uuid>) {
    state.cache.invalidate_many(product_ids).await;
}

// =============================================================================
// CUSTOMER
// =============================================================================

/// Turn the caller's cart into an order
///
/// POST /api/v1/orders/checkout
///
/// # Request Body
/// ```json
/// {
///   "shipping_address": "221B Baker Street, London",
///   "payment_method": "credit_card"
/// }
/// ```
///
/// # Response
/// - 201 Created: the PENDING order
/// - 400: empty cart or a product no longer available
/// - 409: not enough stock
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CheckoutRequest>,
) -> AppResult<(StatusCode, Json<OrderView>)> {
    validate(&request)?;
    let order = state
        .orders()
        .create_order_from_cart(user.id, &request)
        .await?;
    forget_cached_products(&state, ordered_product_ids(&order)).await;
    dispatch(state.mailer.as_ref(), order_confirmation_email(&user, &order)).await;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<OrderListParams>,
) -> AppResult<Json<Vec<OrderSummary>>> {
    let params = params.normalized();
    let orders = state
        .orders()
        .list_user_orders(user.id, params.skip, params.limit)
        .await?;
    Ok(Json(orders))
}

/// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<OrderView>> {
    Ok(Json(state.orders().get_order(user.id, id).await?.into()))
}

/// Charge the order through the payment gateway
///
/// POST /api/v1/orders/:id/pay
///
/// # Response
/// - 200 OK: the PAID order
/// - 402 Payment Required: declined; stock has already been restored
/// - 409: order not payable
pub async fn pay_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<OrderView>> {
    let product_ids = ordered_product_ids(&state.orders().get_order(user.id, id).await?);
    let result = state.orders().process_payment(user.id, id).await;
    // A decline gives stock back, so the cache is stale either way
    forget_cached_products(&state, product_ids).await;
    Ok(Json(result?.into()))
}

/// POST /api/v1/orders/:id/cancel
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<OrderView>> {
    let order = state.orders().cancel_order(user.id, id).await?;
    forget_cached_products(&state, ordered_product_ids(&order)).await;
    Ok(Json(order.into()))
}

/// Methods the gateway accepts, with their simulated success rates
///
/// GET /api/v1/orders/payment/methods
pub async fn payment_methods(State(state): State<Arc<AppState>>) -> Json<Vec<PaymentMethodInfo>> {
    Json(state.gateway.supported_methods())
}

// =============================================================================
// ADMIN
// =============================================================================

/// GET /api/v1/orders/admin/all
pub async fn admin_list_orders(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(params): Query<OrderListParams>,
) -> AppResult<Json<Vec<OrderSummary>>> {
    let params = params.normalized();
    let orders = state
        .orders()
        .list_all_orders(params.skip, params.limit)
        .await?;
    Ok(Json(orders))
}

/// GET /api/v1/orders/admin/:id
pub async fn admin_get_order(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<OrderView>> {
    Ok(Json(state.orders().get_order_admin(id).await?.into()))
}

/// Status transition and field corrections
///
/// PUT /api/v1/orders/admin/:id
///
/// # Request Body
/// ```json
/// { "status": "shipped", "notes": "Tracking ABC123" }
/// ```
pub async fn admin_update_order(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<OrderPatch>,
) -> AppResult<Json<OrderView>> {
    validate(&patch)?;
    let cancelling = patch.status == Some(OrderStatus::Cancelled);
    let order = state.orders().update_order_status(id, patch).await?;
    if cancelling {
        forget_cached_products(&state, ordered_product_ids(&order)).await;
    }
    tracing::info!(admin_id = %admin.id, order_number = %order.order_number, "Order updated by admin");
    Ok(Json(order.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::tests::sample_order;
    use crate::models::OrderItem;
    use rust_decimal::Decimal;

    #[test]
    fn list_params_default_and_clamp() {
        let params: OrderListParams = serde_json::from_str("{}").unwrap();
        assert_eq!((params.skip, params.limit), (0, DEFAULT_ORDER_LIMIT));

        let params = OrderListParams {
            skip: -5,
            limit: 1000,
        }
        .normalized();
        assert_eq!((params.skip, params.limit), (0, MAX_ORDER_LIMIT));

        let params = OrderListParams { skip: 20, limit: 0 }.normalized();
        assert_eq!((params.skip, params.limit), (20, 1));
    }

    #[test]
    fn ordered_product_ids_follow_the_lines() {
        let mut order = sample_order(OrderStatus::Pending);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        order.items = ids
            .iter()
            .map(|&product_id| OrderItem {
                id: Uuid::new_v4(),
                order_id: order.id,
                product_id,
                quantity: 1,
                unit_price: Decimal::new(999, 2),
                total_price: Decimal::new(999, 2),
                product_name: "Mug".to_string(),
                product_sku: "MUG-1".to_string(),
                created_at: order.created_at,
            })
            .collect();
        assert_eq!(ordered_product_ids(&order), ids);
    }

    fn routable<T, H: axum::handler::Handler<T, Arc<AppState>>>(_: H) {}

    #[test]
    fn stock_moving_handlers_are_routable() {
        routable(checkout);
        routable(pay_order);
        routable(cancel_order);
        routable(admin_update_order);
    }
}
