// =============================================================================
// MODELS MODULE
// =============================================================================
// Data structures shared by the storage layer, the services and the HTTP
// handlers. Each entity lives in its own submodule; this file holds the
// helpers and the small response types that don't belong to any one entity.
//
// LEARNING NOTES:
// - Database rows map to structs via sqlx::FromRow
// - Request bodies derive Deserialize + validator::Validate
// - Money is rust_decimal::Decimal everywhere, never f64
// =============================================================================

pub mod cart;
pub mod category;
pub mod order;
pub mod product;
pub mod user;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

pub use cart::*;
pub use category::*;
pub use order::*;
pub use product::*;
pub use user::*;

/// Number of decimal places every stored amount carries (NUMERIC(10,2)).
pub const MONEY_DECIMAL_PLACES: u32 = 2;

/// Round an amount to cents, half away from zero.
///
/// # Example
/// ```text
/// assert_eq!(round_money(Decimal::new(5998, 3)), Decimal::new(600, 2));
/// ```
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

// =============================================================================
// PAGINATION
// =============================================================================

/// Query parameters for every paginated list endpoint
///
/// # Example
/// GET /api/v1/products?page=2&per_page=20
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ListParams {
    /// Page number (1-indexed, default: 1)
    #[serde(default = "default_page")]
    pub page: i64,

    /// Items per page (default: 20, max: 100)
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    20
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl ListParams {
    /// Clamp the raw query values into a usable window
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, 100),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }
}

/// Paginated list envelope
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub pages: i64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: i64, params: ListParams) -> Self {
        let pages = if total == 0 {
            0
        } else {
            (total + params.per_page - 1) / params.per_page
        };
        Self {
            items,
            total,
            page: params.page,
            per_page: params.per_page,
            pages,
        }
    }
}

// =============================================================================
// HEALTH CHECK RESPONSES
// =============================================================================

/// Simple health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Detailed readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

/// Individual dependency health checks
#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub database: bool,
    pub redis: bool,
}

// =============================================================================
// ERROR RESPONSES
// =============================================================================

/// API error response body
///
/// # Example JSON
/// ```json
/// { "error": "INSUFFICIENT_STOCK", "detail": "Insufficient stock for Mug. Available: 3" }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine readable error code
    pub error: String,

    /// Human-readable explanation
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: detail.into(),
        }
    }
}
