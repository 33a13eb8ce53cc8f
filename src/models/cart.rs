// =============================================================================
// CART MODELS
// =============================================================================
// One cart per user, created lazily. Each (cart, product) pair appears at
// most once; adding the same product again bumps the quantity.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,

    /// Product price captured on the last add/update
    pub unit_price: Decimal,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartItem {
    pub fn subtotal(&self) -> Decimal {
        Decimal::from(self.quantity) * self.unit_price
    }
}

/// A cart item joined with the product columns the API shows
#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct CartLine {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub item: CartItem,
    pub product_name: String,
    pub product_sku: String,
}

/// Sum of quantities and of line subtotals
pub fn cart_totals<'a>(items: impl IntoIterator<Item = &'a CartItem>) -> (i64, Decimal) {
    items
        .into_iter()
        .fold((0i64, Decimal::ZERO), |(count, amount), item| {
            (count + i64::from(item.quantity), amount + item.subtotal())
        })
}

// =============================================================================
// API REQUEST/RESPONSE STRUCTURES
// =============================================================================

/// Request body for POST /cart/add
///
/// # Example JSON
/// ```json
/// { "product_id": "4f0c...", "quantity": 2 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddToCartRequest {
    pub product_id: Uuid,

    #[validate(range(min = 1, message = "Quantity must be greater than 0"))]
    pub quantity: i32,
}

/// Request body for PUT /cart/items/:product_id
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateCartItemRequest {
    #[validate(range(min = 1, message = "Quantity must be greater than 0"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CartLineView {
    #[serde(flatten)]
    pub line: CartLine,
    pub subtotal: Decimal,
}

/// Full cart as returned by the API
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CartView {
    /// `None` until the user adds their first item
    pub id: Option<Uuid>,
    pub user_id: Uuid,
    pub total_items: i64,
    pub total_amount: Decimal,
    pub is_empty: bool,
    pub items: Vec<CartLineView>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CartView {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            id: None,
            user_id,
            total_items: 0,
            total_amount: Decimal::ZERO,
            is_empty: true,
            items: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn build(cart: &Cart, lines: Vec<CartLine>) -> Self {
        let (total_items, total_amount) = cart_totals(lines.iter().map(|l| &l.item));
        let items: Vec<CartLineView> = lines
            .into_iter()
            .map(|line| CartLineView {
                subtotal: line.item.subtotal(),
                line,
            })
            .collect();
        Self {
            id: Some(cart.id),
            user_id: cart.user_id,
            total_items,
            total_amount,
            is_empty: items.is_empty(),
            items,
            created_at: Some(cart.created_at),
            updated_at: Some(cart.updated_at),
        }
    }
}

/// Totals only, for the cart badge
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CartSummary {
    pub total_items: i64,
    pub total_amount: Decimal,
    pub items_count: i64,
}

impl CartSummary {
    pub fn zero() -> Self {
        Self {
            total_items: 0,
            total_amount: Decimal::ZERO,
            items_count: 0,
        }
    }
}
