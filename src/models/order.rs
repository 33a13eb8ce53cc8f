// =============================================================================
// ORDER MODELS
// =============================================================================
// An order is a frozen snapshot of a cart: item names, SKUs and prices are
// copied at checkout so later catalog edits never rewrite history. Only the
// status fields (and a few admin-editable contact fields) change afterwards.
//
// Two state machines run side by side:
//
//   status:          PENDING ─┬─> PAID ─┬─> SHIPPED ──> DELIVERED
//                             │         │
//                             └─────────┴─> CANCELLED
//
//   payment_status:  PENDING ──> PROCESSING ─┬─> COMPLETED ──> REFUNDED
//                                            └─> FAILED
// =============================================================================

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use super::round_money;
use crate::error::{AppError, AppResult};

/// Flat tax applied to every order subtotal (10%)
pub const TAX_RATE: Decimal = Decimal::from_parts(10, 0, 0, false, 2);

/// Orders at or above this subtotal ship for free
pub const FREE_SHIPPING_THRESHOLD: Decimal = Decimal::from_parts(10000, 0, 0, false, 2);

/// Shipping charged below the free shipping threshold
pub const FLAT_SHIPPING_FEE: Decimal = Decimal::from_parts(1000, 0, 0, false, 2);

// =============================================================================
// ORDER STATUS
// =============================================================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses reachable from `self` in one step
    pub fn allowed_transitions(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Paid, OrderStatus::Cancelled],
            OrderStatus::Paid => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Delivered],
            OrderStatus::Delivered | OrderStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| format!("unknown order status: {value}"))
    }
}

// =============================================================================
// PAYMENT STATUS
// =============================================================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Processing)
                | (PaymentStatus::Processing, PaymentStatus::Completed)
                | (PaymentStatus::Processing, PaymentStatus::Failed)
                | (PaymentStatus::Completed, PaymentStatus::Refunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| format!("unknown payment status: {value}"))
    }
}

// =============================================================================
// ORDER ITEM
// =============================================================================
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,

    /// Product name at checkout time
    pub product_name: String,

    /// Product SKU at checkout time
    pub product_sku: String,

    pub created_at: DateTime<Utc>,
}

// =============================================================================
// ORDER
// =============================================================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,

    /// Human readable identifier, e.g. ORD-20240115-9F2C01AB
    pub order_number: String,

    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,

    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,

    pub shipping_address: String,
    pub billing_address: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub payment_method: Option<String>,
    pub payment_transaction_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,

    pub items: Vec<OrderItem>,
}

impl Order {
    /// Total number of units across all lines
    pub fn items_count(&self) -> i64 {
        self.items.iter().map(|i| i64::from(i.quantity)).sum()
    }

    /// PENDING or PAID, and no charge in flight
    pub fn can_be_cancelled(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Paid)
            && self.payment_status != PaymentStatus::Processing
    }

    /// Move the payment along its own table
    pub fn advance_payment(&mut self, next: PaymentStatus, now: DateTime<Utc>) -> AppResult<()> {
        if !self.payment_status.can_transition_to(next) {
            return Err(AppError::InvalidStateTransition(format!(
                "Invalid payment transition from {} to {}",
                self.payment_status, next
            )));
        }
        self.payment_status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Move the order along the status table, stamping ship/delivery times
    pub fn transition_to(&mut self, next: OrderStatus, now: DateTime<Utc>) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidStateTransition(format!(
                "Invalid status transition from {} to {}",
                self.status, next
            )));
        }
        self.status = next;
        match next {
            OrderStatus::Shipped => self.shipped_at = Some(now),
            OrderStatus::Delivered => self.delivered_at = Some(now),
            _ => {}
        }
        self.updated_at = now;
        Ok(())
    }

    /// Admin update: the status goes through the transition table, the
    /// remaining fields are plain overwrites.
    pub fn apply_admin_update(&mut self, patch: OrderPatch, now: DateTime<Utc>) -> AppResult<()> {
        if let Some(status) = patch.status {
            self.transition_to(status, now)?;
        }
        if let Some(payment_status) = patch.payment_status {
            self.payment_status = payment_status;
        }
        if let Some(shipping_address) = patch.shipping_address {
            self.shipping_address = shipping_address;
        }
        if let Some(billing_address) = patch.billing_address {
            self.billing_address = Some(billing_address);
        }
        if let Some(phone) = patch.phone {
            self.phone = Some(phone);
        }
        if let Some(notes) = patch.notes {
            self.notes = Some(notes);
        }
        if let Some(transaction_id) = patch.payment_transaction_id {
            self.payment_transaction_id = Some(transaction_id);
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Flat row of the `orders` table; statuses are TEXT columns
#[derive(Debug, Clone, FromRow)]
pub struct OrderRow {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: String,
    pub payment_status: String,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub shipping_address: String,
    pub billing_address: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub payment_method: Option<String>,
    pub payment_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OrderRow {
    pub fn into_order(self, items: Vec<OrderItem>) -> AppResult<Order> {
        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            user_id: self.user_id,
            status: self.status.parse().map_err(AppError::Internal)?,
            payment_status: self.payment_status.parse().map_err(AppError::Internal)?,
            subtotal: self.subtotal,
            tax_amount: self.tax_amount,
            shipping_amount: self.shipping_amount,
            discount_amount: self.discount_amount,
            total_amount: self.total_amount,
            shipping_address: self.shipping_address,
            billing_address: self.billing_address,
            phone: self.phone,
            notes: self.notes,
            payment_method: self.payment_method,
            payment_transaction_id: self.payment_transaction_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            shipped_at: self.shipped_at,
            delivered_at: self.delivered_at,
            items,
        })
    }
}

// =============================================================================
// CHECKOUT MATH
// =============================================================================

/// Monetary breakdown of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub shipping_amount: Decimal,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
}

impl OrderTotals {
    /// 10% tax rounded to cents, flat shipping below 100.00, no discount.
    ///
    /// # Example
    /// subtotal 59.98 → tax 6.00, shipping 10.00, total 75.98
    pub fn from_subtotal(subtotal: Decimal) -> Self {
        let tax_amount = round_money(subtotal * TAX_RATE);
        let shipping_amount = if subtotal < FREE_SHIPPING_THRESHOLD {
            FLAT_SHIPPING_FEE
        } else {
            Decimal::ZERO
        };
        let discount_amount = Decimal::ZERO;
        Self {
            subtotal,
            tax_amount,
            shipping_amount,
            discount_amount,
            total_amount: subtotal + tax_amount + shipping_amount - discount_amount,
        }
    }
}

/// Generate an order number from the given date and 8 random hex digits
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "ORD-{}-{}",
        now.format("%Y%m%d"),
        random[..8].to_uppercase()
    )
}

/// Everything the storage layer needs to persist a new order
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: String,
    pub user_id: Uuid,
    pub totals: OrderTotals,
    pub shipping_address: String,
    pub billing_address: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub payment_method: String,
    pub items: Vec<NewOrderItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub product_name: String,
    pub product_sku: String,
}

// =============================================================================
// API REQUEST/RESPONSE STRUCTURES
// =============================================================================

/// Request body for POST /orders/checkout
///
/// # Example JSON
/// ```json
/// {
///   "shipping_address": "221B Baker Street, London",
///   "payment_method": "credit_card"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 10, message = "Shipping address is required"))]
    pub shipping_address: String,

    pub billing_address: Option<String>,

    #[validate(length(max = 20))]
    pub phone: Option<String>,

    pub notes: Option<String>,

    #[validate(length(min = 1, max = 50, message = "Payment method is required"))]
    pub payment_method: String,
}

/// Admin patch for PUT /orders/admin/:order_id
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,

    #[validate(length(min = 10))]
    pub shipping_address: Option<String>,

    pub billing_address: Option<String>,

    #[validate(length(max = 20))]
    pub phone: Option<String>,

    pub notes: Option<String>,

    #[validate(length(max = 100))]
    pub payment_transaction_id: Option<String>,
}

/// Order with its derived unit count, as returned by the API
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub items_count: i64,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        Self {
            items_count: order.items_count(),
            order,
        }
    }
}

/// Order list entry without the item lines
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderSummary {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub items_count: i64,
    pub created_at: DateTime<Utc>,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number.clone(),
            status: order.status,
            payment_status: order.payment_status,
            total_amount: order.total_amount,
            items_count: order.items_count(),
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OrderSummaryRow {
    pub id: Uuid,
    pub order_number: String,
    pub status: String,
    pub payment_status: String,
    pub total_amount: Decimal,
    pub items_count: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<OrderSummaryRow> for OrderSummary {
    type Error = AppError;

    fn try_from(row: OrderSummaryRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            order_number: row.order_number,
            status: row.status.parse().map_err(AppError::Internal)?,
            payment_status: row.payment_status.parse().map_err(AppError::Internal)?,
            total_amount: row.total_amount,
            items_count: row.items_count,
            created_at: row.created_at,
        })
    }
}
