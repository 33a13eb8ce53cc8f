// =============================================================================
// PRODUCT MODELS
// =============================================================================
// The catalog entry that carts and orders point at. Stock lives here and is
// only touched by the order workflow or by explicit admin stock updates.
// =============================================================================

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::round_money;

/// Default low stock threshold for new products
pub const DEFAULT_LOW_STOCK_THRESHOLD: i32 = 10;

// -----------------------------------------------------------------------------
// PRODUCT ROW
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,

    /// URL-friendly identifier, unique across products
    pub slug: String,

    /// Stock Keeping Unit, unique across products
    pub sku: String,

    /// Current selling price (> 0)
    pub price: Decimal,

    /// "Was" price shown next to a discounted product; always above `price`
    pub compare_price: Option<Decimal>,

    /// Purchase cost; always below `price`
    pub cost_price: Option<Decimal>,

    pub stock_quantity: i32,
    pub low_stock_threshold: i32,
    pub is_active: bool,
    pub is_featured: bool,
    pub category_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -----------------------------------------------------------------------------
// COMPUTED PROPERTIES
// -----------------------------------------------------------------------------
impl Product {
    pub fn is_on_sale(&self) -> bool {
        matches!(self.compare_price, Some(compare) if compare > self.price)
    }

    /// Percentage saved against `compare_price`, rounded to 2 decimals
    ///
    /// # Example
    /// compare 40.00, price 30.00 → 25.00
    pub fn discount_percentage(&self) -> Option<Decimal> {
        let compare = self.compare_price.filter(|_| self.is_on_sale())?;
        Some(round_money(
            (compare - self.price) / compare * Decimal::ONE_HUNDRED,
        ))
    }

    pub fn is_in_stock(&self) -> bool {
        self.stock_quantity > 0
    }

    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.low_stock_threshold
    }

    /// Whether `quantity` units can be ordered right now
    pub fn can_order(&self, quantity: i32) -> bool {
        self.is_active && self.stock_quantity >= quantity
    }

    /// Apply a partial update field by field
    pub fn apply_patch(&mut self, patch: ProductPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = Some(description);
        }
        if let Some(slug) = patch.slug {
            self.slug = slug;
        }
        if let Some(sku) = patch.sku {
            self.sku = sku;
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(compare_price) = patch.compare_price {
            self.compare_price = Some(compare_price);
        }
        if let Some(cost_price) = patch.cost_price {
            self.cost_price = Some(cost_price);
        }
        if let Some(stock_quantity) = patch.stock_quantity {
            self.stock_quantity = stock_quantity;
        }
        if let Some(threshold) = patch.low_stock_threshold {
            self.low_stock_threshold = threshold;
        }
        if let Some(is_active) = patch.is_active {
            self.is_active = is_active;
        }
        if let Some(is_featured) = patch.is_featured {
            self.is_featured = is_featured;
        }
        if let Some(category_id) = patch.category_id {
            self.category_id = Some(category_id);
        }
    }

    pub fn check_prices(&self) -> Result<(), ValidationError> {
        check_price_relationships(self.price, self.compare_price, self.cost_price)
    }
}

/// Price must be positive, compare price above it, cost price below it.
pub fn check_price_relationships(
    price: Decimal,
    compare_price: Option<Decimal>,
    cost_price: Option<Decimal>,
) -> Result<(), ValidationError> {
    if price <= Decimal::ZERO {
        return Err(price_error("price", "Price must be greater than 0"));
    }
    if matches!(compare_price, Some(compare) if compare <= price) {
        return Err(price_error(
            "compare_price",
            "Compare price must be greater than regular price",
        ));
    }
    if matches!(cost_price, Some(cost) if cost >= price) {
        return Err(price_error(
            "cost_price",
            "Cost price should be less than selling price",
        ));
    }
    Ok(())
}

fn price_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}

// =============================================================================
// API REQUEST/RESPONSE STRUCTURES
// =============================================================================

fn default_low_stock_threshold() -> i32 {
    DEFAULT_LOW_STOCK_THRESHOLD
}

fn default_true() -> bool {
    true
}

fn validate_new_product(product: &NewProduct) -> Result<(), ValidationError> {
    check_price_relationships(product.price, product.compare_price, product.cost_price)
}

/// Request body for creating a product
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_new_product"))]
pub struct NewProduct {
    #[validate(length(min = 1, max = 200))]
    pub name: String,

    pub description: Option<String>,

    #[validate(length(min = 1, max = 220))]
    pub slug: String,

    #[validate(length(min = 1, max = 100))]
    pub sku: String,

    pub price: Decimal,
    pub compare_price: Option<Decimal>,
    pub cost_price: Option<Decimal>,

    #[serde(default)]
    #[validate(range(min = 0))]
    pub stock_quantity: i32,

    #[serde(default = "default_low_stock_threshold")]
    #[validate(range(min = 0))]
    pub low_stock_threshold: i32,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default)]
    pub is_featured: bool,

    pub category_id: Option<Uuid>,
}

/// Partial product update; only the fields that are present are written
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ProductPatch {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 220))]
    pub slug: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub sku: Option<String>,
    pub price: Option<Decimal>,
    pub compare_price: Option<Decimal>,
    pub cost_price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub stock_quantity: Option<i32>,
    #[validate(range(min = 0))]
    pub low_stock_threshold: Option<i32>,
    pub is_active: Option<bool>,
    pub is_featured: Option<bool>,
    pub category_id: Option<Uuid>,
}

/// Request body for the admin stock endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StockUpdate {
    #[validate(range(min = 0))]
    pub stock_quantity: i32,

    #[validate(range(min = 0))]
    pub low_stock_threshold: Option<i32>,
}

fn default_active_filter() -> Option<bool> {
    Some(true)
}

/// Query parameters for the product list endpoint
///
/// # Example
/// GET /api/v1/products?category_id=...&min_price=10&in_stock=true&search=mug
#[derive(Debug, Clone, Deserialize)]
pub struct ProductFilters {
    pub category_id: Option<Uuid>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub in_stock: Option<bool>,
    pub is_featured: Option<bool>,

    /// Defaults to active products only
    #[serde(default = "default_active_filter")]
    pub is_active: Option<bool>,

    pub search: Option<String>,

    #[serde(default = "super::default_page")]
    pub page: i64,

    #[serde(default = "super::default_per_page")]
    pub per_page: i64,
}

impl Default for ProductFilters {
    fn default() -> Self {
        Self {
            category_id: None,
            min_price: None,
            max_price: None,
            in_stock: None,
            is_featured: None,
            is_active: default_active_filter(),
            search: None,
            page: super::default_page(),
            per_page: super::default_per_page(),
        }
    }
}

impl ProductFilters {
    pub fn list_params(&self) -> super::ListParams {
        super::ListParams {
            page: self.page,
            per_page: self.per_page,
        }
        .normalized()
    }

    /// Reject contradictory price windows
    pub fn check(&self) -> Result<(), String> {
        if matches!(self.min_price, Some(min) if min < Decimal::ZERO) {
            return Err("Minimum price cannot be negative".to_string());
        }
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if max <= min {
                return Err("Maximum price must be greater than minimum price".to_string());
            }
        }
        if matches!(&self.search, Some(term) if term.trim().is_empty() || term.len() > 200) {
            return Err("Search term must be between 1 and 200 characters".to_string());
        }
        Ok(())
    }

    /// In-process evaluation of the filters, mirroring the SQL WHERE clause
    pub fn matches(&self, product: &Product) -> bool {
        if let Some(active) = self.is_active {
            if product.is_active != active {
                return false;
            }
        }
        if let Some(category_id) = self.category_id {
            if product.category_id != Some(category_id) {
                return false;
            }
        }
        if matches!(self.min_price, Some(min) if product.price < min) {
            return false;
        }
        if matches!(self.max_price, Some(max) if product.price > max) {
            return false;
        }
        if let Some(in_stock) = self.in_stock {
            if product.is_in_stock() != in_stock {
                return false;
            }
        }
        if let Some(featured) = self.is_featured {
            if product.is_featured != featured {
                return false;
            }
        }
        if let Some(term) = &self.search {
            let term = term.to_lowercase();
            let hit = product.name.to_lowercase().contains(&term)
                || product.sku.to_lowercase().contains(&term)
                || product
                    .description
                    .as_deref()
                    .map(|d| d.to_lowercase().contains(&term))
                    .unwrap_or(false);
            if !hit {
                return false;
            }
        }
        true
    }
}

/// Product plus its derived flags, as returned by the API
#[derive(Debug, Clone, Serialize)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: Product,
    pub is_on_sale: bool,
    pub discount_percentage: Option<Decimal>,
    pub is_in_stock: bool,
    pub is_low_stock: bool,
}

impl From<Product> for ProductView {
    fn from(product: Product) -> Self {
        Self {
            is_on_sale: product.is_on_sale(),
            discount_percentage: product.discount_percentage(),
            is_in_stock: product.is_in_stock(),
            is_low_stock: product.is_low_stock(),
            product,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_product(price: Decimal, stock: i32) -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4(),
            name: "Ceramic Mug".to_string(),
            description: Some("Holds coffee".to_string()),
            slug: "ceramic-mug".to_string(),
            sku: "MUG-001".to_string(),
            price,
            compare_price: None,
            cost_price: None,
            stock_quantity: stock,
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            is_active: true,
            is_featured: false,
            category_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn can_order_requires_active_and_enough_stock() {
        let mut product = sample_product(Decimal::new(2999, 2), 5);
        assert!(product.can_order(5));
        assert!(!product.can_order(6));

        product.is_active = false;
        assert!(!product.can_order(1));

        product.is_active = true;
        product.stock_quantity = 0;
        assert!(!product.can_order(1));
        assert!(product.can_order(0));
    }

    #[test]
    fn discount_is_rounded_to_cents() {
        let mut product = sample_product(Decimal::new(2000, 2), 5);
        assert!(!product.is_on_sale());
        assert_eq!(product.discount_percentage(), None);

        product.compare_price = Some(Decimal::new(3000, 2));
        assert!(product.is_on_sale());
        // 10 / 30 * 100 = 33.333...
        assert_eq!(product.discount_percentage(), Some(Decimal::new(3333, 2)));
    }

    #[test]
    fn stock_flags_follow_threshold() {
        let mut product = sample_product(Decimal::ONE, 10);
        assert!(product.is_in_stock());
        assert!(product.is_low_stock());

        product.stock_quantity = 11;
        assert!(!product.is_low_stock());

        product.stock_quantity = 0;
        assert!(!product.is_in_stock());
    }

    #[test]
    fn price_relationships_are_enforced() {
        let price = Decimal::new(1000, 2);
        assert!(check_price_relationships(price, None, None).is_ok());
        assert!(check_price_relationships(price, Some(Decimal::new(1200, 2)), None).is_ok());
        assert!(check_price_relationships(price, Some(price), None).is_err());
        assert!(check_price_relationships(price, None, Some(price)).is_err());
        assert!(check_price_relationships(Decimal::ZERO, None, None).is_err());
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut product = sample_product(Decimal::new(1000, 2), 3);
        let original_sku = product.sku.clone();
        product.apply_patch(ProductPatch {
            name: Some("Travel Mug".to_string()),
            stock_quantity: Some(7),
            ..ProductPatch::default()
        });
        assert_eq!(product.name, "Travel Mug");
        assert_eq!(product.stock_quantity, 7);
        assert_eq!(product.sku, original_sku);
        assert_eq!(product.price, Decimal::new(1000, 2));
    }

    #[test]
    fn filters_match_in_process() {
        let product = sample_product(Decimal::new(1500, 2), 0);
        let mut filters = ProductFilters::default();
        assert!(filters.matches(&product));

        filters.in_stock = Some(true);
        assert!(!filters.matches(&product));

        filters.in_stock = None;
        filters.search = Some("mug".to_string());
        assert!(filters.matches(&product));

        filters.max_price = Some(Decimal::new(1000, 2));
        assert!(!filters.matches(&product));
    }

    #[test]
    fn inverted_price_window_is_rejected() {
        let filters = ProductFilters {
            min_price: Some(Decimal::new(50, 0)),
            max_price: Some(Decimal::new(10, 0)),
            ..ProductFilters::default()
        };
        assert!(filters.check().is_err());
    }
}
