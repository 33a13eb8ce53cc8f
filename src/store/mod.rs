// =============================================================================
// STORAGE MODULE
// =============================================================================
// The seam between the services and PostgreSQL.
//
// A `Storage` hands out transactions; a transaction (`Store`) exposes the
// typed queries the services need. Every service operation opens one
// transaction, does all of its reads and writes through it and commits.
// Dropping a transaction without committing rolls everything back, which is
// what makes checkout all-or-nothing.
//
// LEARNING NOTES:
// - async fn in traits goes through #[async_trait] (boxed futures)
// - `commit(self)` consumes the transaction, so it can't be used afterwards
// - The production implementation lives in db.rs; tests use memory.rs
// =============================================================================

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    Cart, CartItem, CartLine, Category, CategoryView, NewCategory, NewOrder, NewProduct,
    NewUser, Order, OrderSummary, Product, ProductFilters, User,
};

/// Source of transactions (a connection pool in production)
#[async_trait]
pub trait Storage: Send + Sync {
    type Tx: Store;

    async fn begin(&self) -> AppResult<Self::Tx>;
}

/// One open transaction
#[async_trait]
pub trait Store: Send + Sized {
    async fn commit(self) -> AppResult<()>;

    // -------------------------------------------------------------------------
    // USERS
    // -------------------------------------------------------------------------
    async fn insert_user(&mut self, user: &NewUser, now: DateTime<Utc>) -> AppResult<User>;
    async fn find_user(&mut self, id: Uuid) -> AppResult<Option<User>>;
    async fn find_user_by_email(&mut self, email: &str) -> AppResult<Option<User>>;
    async fn find_user_by_username(&mut self, username: &str) -> AppResult<Option<User>>;

    // -------------------------------------------------------------------------
    // CATEGORIES
    // -------------------------------------------------------------------------
    async fn insert_category(
        &mut self,
        category: &NewCategory,
        now: DateTime<Utc>,
    ) -> AppResult<Category>;
    async fn find_category(&mut self, id: Uuid) -> AppResult<Option<Category>>;
    async fn find_category_by_slug(&mut self, slug: &str) -> AppResult<Option<Category>>;

    /// Another category (not `exclude`) already uses `name` or `slug`
    async fn category_taken(
        &mut self,
        name: &str,
        slug: &str,
        exclude: Option<Uuid>,
    ) -> AppResult<bool>;

    /// Categories ordered by name, with their product counts
    async fn list_categories(
        &mut self,
        active_only: bool,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<CategoryView>, i64)>;
    async fn count_category_products(&mut self, id: Uuid) -> AppResult<i64>;
    async fn update_category(&mut self, category: &Category) -> AppResult<()>;
    async fn delete_category(&mut self, id: Uuid) -> AppResult<bool>;

    // -------------------------------------------------------------------------
    // PRODUCTS
    // -------------------------------------------------------------------------
    async fn insert_product(
        &mut self,
        product: &NewProduct,
        now: DateTime<Utc>,
    ) -> AppResult<Product>;
    async fn find_product(&mut self, id: Uuid) -> AppResult<Option<Product>>;
    async fn find_product_by_slug(&mut self, slug: &str) -> AppResult<Option<Product>>;
    async fn find_product_by_sku(&mut self, sku: &str) -> AppResult<Option<Product>>;

    /// Load and row-lock the given products, always in id order
    async fn lock_products(&mut self, ids: &[Uuid]) -> AppResult<Vec<Product>>;

    /// Another product (not `exclude`) already uses `sku` or `slug`
    async fn product_taken(
        &mut self,
        sku: &str,
        slug: &str,
        exclude: Option<Uuid>,
    ) -> AppResult<bool>;

    /// Filtered page, featured first then newest, plus the unpaged total
    async fn list_products(
        &mut self,
        filters: &ProductFilters,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<Product>, i64)>;
    async fn featured_products(&mut self, limit: i64) -> AppResult<Vec<Product>>;

    /// Active products at or below their threshold, lowest stock first
    async fn low_stock_products(&mut self) -> AppResult<Vec<Product>>;
    async fn update_product(&mut self, product: &Product) -> AppResult<()>;
    async fn delete_product(&mut self, id: Uuid) -> AppResult<bool>;

    /// Add `delta` to the stock of a product.
    ///
    /// A negative delta only applies when enough stock is left; the new
    /// level is returned, `None` means nothing was changed.
    async fn adjust_stock(
        &mut self,
        product_id: Uuid,
        delta: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Option<i32>>;

    // -------------------------------------------------------------------------
    // CARTS
    // -------------------------------------------------------------------------
    async fn find_cart(&mut self, user_id: Uuid) -> AppResult<Option<Cart>>;
    async fn create_cart(&mut self, user_id: Uuid, now: DateTime<Utc>) -> AppResult<Cart>;
    async fn touch_cart(&mut self, cart_id: Uuid, now: DateTime<Utc>) -> AppResult<()>;

    /// Items joined with product name and SKU, oldest first
    async fn cart_lines(&mut self, cart_id: Uuid) -> AppResult<Vec<CartLine>>;
    async fn find_cart_item(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Option<CartItem>>;
    async fn insert_cart_item(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        unit_price: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<CartItem>;
    async fn update_cart_item(
        &mut self,
        item_id: Uuid,
        quantity: i32,
        unit_price: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<()>;
    async fn delete_cart_item(&mut self, item_id: Uuid) -> AppResult<()>;

    /// Remove every item; returns how many were removed
    async fn clear_cart(&mut self, cart_id: Uuid) -> AppResult<u64>;

    // -------------------------------------------------------------------------
    // ORDERS
    // -------------------------------------------------------------------------
    async fn insert_order(&mut self, order: &NewOrder) -> AppResult<Order>;
    async fn find_order(&mut self, id: Uuid) -> AppResult<Option<Order>>;

    /// Load and row-lock an order until the transaction ends
    async fn lock_order(&mut self, id: Uuid) -> AppResult<Option<Order>>;

    /// Newest first; `user_id = None` lists every user's orders
    async fn list_orders(
        &mut self,
        user_id: Option<Uuid>,
        offset: i64,
        limit: i64,
    ) -> AppResult<Vec<OrderSummary>>;

    /// Persist the mutable fields of an order (statuses, contact fields, stamps)
    async fn save_order(&mut self, order: &Order) -> AppResult<()>;
}
