// =============================================================================
// DATABASE MODULE
// =============================================================================
// This module handles all PostgreSQL database operations.
//
// LEARNING NOTES:
// - SQLx runs plain SQL strings; rows map to structs via FromRow
// - Connection pooling improves performance
// - Transactions ensure data consistency: every service operation runs in
//   exactly one of them (see store/mod.rs)
// - Statuses are stored as TEXT and parsed back with FromStr
// =============================================================================

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    Cart, CartItem, CartLine, Category, CategoryView, NewCategory, NewOrder, NewProduct,
    NewUser, Order, OrderItem, OrderRow, OrderSummary, OrderSummaryRow, Product,
    ProductFilters, User,
};
use crate::store::{Storage, Store};

const USER_COLUMNS: &str = "id, email, username, first_name, last_name, hashed_password, \
     role, is_active, is_verified, created_at, updated_at";

const CATEGORY_COLUMNS: &str = "id, name, description, slug, is_active, created_at, updated_at";

const PRODUCT_COLUMNS: &str = "id, name, description, slug, sku, price, compare_price, \
     cost_price, stock_quantity, low_stock_threshold, is_active, is_featured, category_id, \
     created_at, updated_at";

const ORDER_COLUMNS: &str = "id, order_number, user_id, status, payment_status, subtotal, \
     tax_amount, shipping_amount, discount_amount, total_amount, shipping_address, \
     billing_address, phone, notes, payment_method, payment_transaction_id, created_at, \
     updated_at, shipped_at, delivered_at";

const ORDER_ITEM_COLUMNS: &str = "id, order_id, product_id, quantity, unit_price, total_price, \
     product_name, product_sku, created_at";

// -----------------------------------------------------------------------------
// DATABASE WRAPPER
// -----------------------------------------------------------------------------
// This struct wraps the SQLx connection pool. It is the production
// `Storage`: services ask it for a transaction and run their queries there.
#[derive(Clone)]
pub struct Database {
    /// SQLx PostgreSQL connection pool
    pool: PgPool,
}

impl Database {
    // -------------------------------------------------------------------------
    // CONNECTION
    // -------------------------------------------------------------------------
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            // Maximum number of connections in the pool
            .max_connections(10)
            // Minimum connections to keep open (even when idle)
            .min_connections(2)
            // How long to wait for a connection before giving up
            .acquire_timeout(Duration::from_secs(5))
            // How long a connection can be idle before being closed
            .idle_timeout(Duration::from_secs(300))
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { pool })
    }

    // -------------------------------------------------------------------------
    // MIGRATIONS
    // -------------------------------------------------------------------------
    /// Create all tables if they don't exist
    ///
    /// Every statement is idempotent (IF NOT EXISTS), so this is safe to run
    /// on every startup. Sample catalog data is inserted when `seed` is set
    /// and the catalog is still empty.
    pub async fn run_migrations(&self, seed: bool) -> Result<()> {
        let statements: [(&str, &str); 13] = [
            (
                "users",
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    id UUID PRIMARY KEY,
                    email VARCHAR(255) UNIQUE NOT NULL,
                    username VARCHAR(50) UNIQUE NOT NULL,
                    first_name VARCHAR(100) NOT NULL,
                    last_name VARCHAR(100) NOT NULL,
                    hashed_password VARCHAR(255) NOT NULL,
                    role VARCHAR(20) NOT NULL DEFAULT 'customer',
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    is_verified BOOLEAN NOT NULL DEFAULT FALSE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    CONSTRAINT valid_role CHECK (role IN ('admin', 'customer'))
                )
                "#,
            ),
            (
                "categories",
                r#"
                CREATE TABLE IF NOT EXISTS categories (
                    id UUID PRIMARY KEY,
                    name VARCHAR(100) UNIQUE NOT NULL,
                    description TEXT,
                    slug VARCHAR(120) UNIQUE NOT NULL,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            ),
            (
                "products",
                r#"
                CREATE TABLE IF NOT EXISTS products (
                    id UUID PRIMARY KEY,
                    name VARCHAR(200) NOT NULL,
                    description TEXT,
                    slug VARCHAR(220) UNIQUE NOT NULL,
                    sku VARCHAR(100) UNIQUE NOT NULL,
                    price NUMERIC(10, 2) NOT NULL,
                    compare_price NUMERIC(10, 2),
                    cost_price NUMERIC(10, 2),
                    stock_quantity INTEGER NOT NULL DEFAULT 0,
                    low_stock_threshold INTEGER NOT NULL DEFAULT 10,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    is_featured BOOLEAN NOT NULL DEFAULT FALSE,
                    category_id UUID REFERENCES categories(id),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                    -- Stock can never go negative, even under concurrent checkouts
                    CONSTRAINT non_negative_stock CHECK (stock_quantity >= 0),
                    CONSTRAINT positive_price CHECK (price > 0),
                    CONSTRAINT non_negative_threshold CHECK (low_stock_threshold >= 0)
                )
                "#,
            ),
            (
                "carts",
                r#"
                CREATE TABLE IF NOT EXISTS carts (
                    id UUID PRIMARY KEY,
                    user_id UUID UNIQUE NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            ),
            (
                "cart_items",
                r#"
                CREATE TABLE IF NOT EXISTS cart_items (
                    id UUID PRIMARY KEY,
                    cart_id UUID NOT NULL REFERENCES carts(id) ON DELETE CASCADE,
                    product_id UUID NOT NULL REFERENCES products(id) ON DELETE CASCADE,
                    quantity INTEGER NOT NULL,
                    unit_price NUMERIC(10, 2) NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    CONSTRAINT positive_cart_quantity CHECK (quantity > 0),
                    CONSTRAINT one_line_per_product UNIQUE (cart_id, product_id)
                )
                "#,
            ),
            (
                "orders",
                r#"
                CREATE TABLE IF NOT EXISTS orders (
                    id UUID PRIMARY KEY,
                    order_number VARCHAR(50) UNIQUE NOT NULL,
                    user_id UUID NOT NULL REFERENCES users(id),
                    status VARCHAR(20) NOT NULL DEFAULT 'pending',
                    payment_status VARCHAR(20) NOT NULL DEFAULT 'pending',
                    subtotal NUMERIC(10, 2) NOT NULL,
                    tax_amount NUMERIC(10, 2) NOT NULL DEFAULT 0,
                    shipping_amount NUMERIC(10, 2) NOT NULL DEFAULT 0,
                    discount_amount NUMERIC(10, 2) NOT NULL DEFAULT 0,
                    total_amount NUMERIC(10, 2) NOT NULL,
                    shipping_address TEXT NOT NULL,
                    billing_address TEXT,
                    phone VARCHAR(20),
                    notes TEXT,
                    payment_method VARCHAR(50),
                    payment_transaction_id VARCHAR(100),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    shipped_at TIMESTAMPTZ,
                    delivered_at TIMESTAMPTZ,
                    CONSTRAINT valid_status CHECK (
                        status IN ('pending', 'paid', 'shipped', 'delivered', 'cancelled')
                    ),
                    CONSTRAINT valid_payment_status CHECK (
                        payment_status IN ('pending', 'processing', 'completed', 'failed', 'refunded')
                    )
                )
                "#,
            ),
            (
                "order_items",
                r#"
                CREATE TABLE IF NOT EXISTS order_items (
                    id UUID PRIMARY KEY,
                    order_id UUID NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                    product_id UUID NOT NULL REFERENCES products(id),
                    quantity INTEGER NOT NULL,
                    unit_price NUMERIC(10, 2) NOT NULL,
                    total_price NUMERIC(10, 2) NOT NULL,
                    product_name VARCHAR(200) NOT NULL,
                    product_sku VARCHAR(100) NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    CONSTRAINT positive_order_quantity CHECK (quantity > 0)
                )
                "#,
            ),
            (
                "products category index",
                "CREATE INDEX IF NOT EXISTS idx_products_category ON products(category_id)",
            ),
            (
                "products listing index",
                "CREATE INDEX IF NOT EXISTS idx_products_listing ON products(is_active, is_featured, created_at DESC)",
            ),
            (
                "cart items index",
                "CREATE INDEX IF NOT EXISTS idx_cart_items_cart ON cart_items(cart_id)",
            ),
            (
                "orders user index",
                "CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id, created_at DESC)",
            ),
            (
                "order items index",
                "CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id)",
            ),
            (
                "order items product index",
                "CREATE INDEX IF NOT EXISTS idx_order_items_product ON order_items(product_id)",
            ),
        ];

        for (name, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to create {name}"))?;
        }

        if seed {
            self.seed_sample_data().await?;
        }

        Ok(())
    }

    /// Seed a small sample catalog for local testing
    async fn seed_sample_data(&self) -> Result<()> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;

        if count.0 > 0 {
            return Ok(()); // Catalog already exists
        }

        let categories = [
            ("Electronics", "electronics", "Phones, laptops and accessories"),
            ("Books", "books", "Printed and digital books"),
            ("Home & Kitchen", "home-kitchen", "Everything for the home"),
        ];

        let mut category_ids = Vec::with_capacity(categories.len());
        for (name, slug, description) in categories {
            let id: (Uuid,) = sqlx::query_as(
                r#"
                INSERT INTO categories (id, name, slug, description)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (slug) DO UPDATE SET name = EXCLUDED.name
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(slug)
            .bind(description)
            .fetch_one(&self.pool)
            .await?;
            category_ids.push(id.0);
        }

        // (category index, name, slug, sku, price in cents, stock, featured)
        let products = [
            (0, "Wireless Headphones", "wireless-headphones", "ELEC-HP-001", 14999, 40, true),
            (0, "USB-C Charger 65W", "usb-c-charger-65w", "ELEC-CH-002", 3999, 120, false),
            (0, "Mechanical Keyboard", "mechanical-keyboard", "ELEC-KB-003", 8950, 8, true),
            (1, "The Rust Programming Language", "the-rust-programming-language", "BOOK-RS-001", 3999, 60, true),
            (1, "Designing Data-Intensive Applications", "designing-data-intensive-applications", "BOOK-DD-002", 4599, 25, false),
            (2, "Ceramic Coffee Mug", "ceramic-coffee-mug", "HOME-MG-001", 1299, 200, false),
            (2, "Chef Knife 8in", "chef-knife-8in", "HOME-KN-002", 5999, 5, false),
        ];

        for (category, name, slug, sku, cents, stock, featured) in products {
            sqlx::query(
                r#"
                INSERT INTO products
                    (id, name, slug, sku, price, stock_quantity, is_featured, category_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (sku) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(slug)
            .bind(sku)
            .bind(Decimal::new(cents, 2))
            .bind(stock)
            .bind(featured)
            .bind(category_ids[category])
            .execute(&self.pool)
            .await?;
        }

        info!("Seeded sample catalog");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // HEALTH CHECK
    // -------------------------------------------------------------------------

    /// Check if database connection is healthy
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

#[async_trait]
impl Storage for Database {
    type Tx = PgStore;

    async fn begin(&self) -> AppResult<PgStore> {
        Ok(PgStore {
            tx: self.pool.begin().await?,
            started: Instant::now(),
        })
    }
}

/// An open PostgreSQL transaction
///
/// LEARNING NOTE:
/// sqlx rolls a transaction back when it is dropped without commit, so an
/// early `?` return anywhere in a service undoes everything done so far.
pub struct PgStore {
    tx: Transaction<'static, Postgres>,
    started: Instant,
}

/// Map constraint violations to client errors, everything else stays a 500
fn write_error(err: sqlx::Error, conflict: &str) -> AppError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return AppError::Conflict(conflict.to_string());
        }
        if db_err.is_foreign_key_violation() {
            return AppError::Conflict(format!("{conflict}: still referenced"));
        }
    }
    AppError::Database(err)
}

/// Append the product list filters to a query that already has a WHERE
fn push_product_filters(builder: &mut QueryBuilder<'_, Postgres>, filters: &ProductFilters) {
    if let Some(active) = filters.is_active {
        builder.push(" AND is_active = ").push_bind(active);
    }
    if let Some(category_id) = filters.category_id {
        builder.push(" AND category_id = ").push_bind(category_id);
    }
    if let Some(min) = filters.min_price {
        builder.push(" AND price >= ").push_bind(min);
    }
    if let Some(max) = filters.max_price {
        builder.push(" AND price <= ").push_bind(max);
    }
    match filters.in_stock {
        Some(true) => {
            builder.push(" AND stock_quantity > 0");
        }
        Some(false) => {
            builder.push(" AND stock_quantity = 0");
        }
        None => {}
    }
    if let Some(featured) = filters.is_featured {
        builder.push(" AND is_featured = ").push_bind(featured);
    }
    if let Some(term) = &filters.search {
        let pattern = format!("%{}%", term.trim());
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR sku ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

impl PgStore {
    async fn order_items(&mut self, order_id: Uuid) -> AppResult<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(&format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY created_at, id"
        ))
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(items)
    }

    /// `suffix` is appended to the SELECT (row locking clause or empty)
    async fn load_order(&mut self, id: Uuid, suffix: &str) -> AppResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1{suffix}"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => {
                let items = self.order_items(row.id).await?;
                Ok(Some(row.into_order(items)?))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn commit(self) -> AppResult<()> {
        let started = self.started;
        self.tx.commit().await?;
        metrics::record_db_transaction(started.elapsed().as_secs_f64());
        Ok(())
    }

    // -------------------------------------------------------------------------
    // USERS
    // -------------------------------------------------------------------------
    async fn insert_user(&mut self, user: &NewUser, now: DateTime<Utc>) -> AppResult<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users
                (id, email, username, first_name, last_name, hashed_password, role,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.hashed_password)
        .bind(user.role.as_str())
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| write_error(e, "User already exists"))
    }

    async fn find_user(&mut self, id: Uuid) -> AppResult<Option<User>> {
        Ok(
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?,
        )
    }

    async fn find_user_by_email(&mut self, email: &str) -> AppResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn find_user_by_username(&mut self, username: &str) -> AppResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    // -------------------------------------------------------------------------
    // CATEGORIES
    // -------------------------------------------------------------------------
    async fn insert_category(
        &mut self,
        category: &NewCategory,
        now: DateTime<Utc>,
    ) -> AppResult<Category> {
        sqlx::query_as::<_, Category>(&format!(
            r#"
            INSERT INTO categories (id, name, description, slug, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {CATEGORY_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.slug)
        .bind(category.is_active)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| write_error(e, "Category with this name or slug already exists"))
    }

    async fn find_category(&mut self, id: Uuid) -> AppResult<Option<Category>> {
        Ok(sqlx::query_as::<_, Category>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn find_category_by_slug(&mut self, slug: &str) -> AppResult<Option<Category>> {
        Ok(sqlx::query_as::<_, Category>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn category_taken(
        &mut self,
        name: &str,
        slug: &str,
        exclude: Option<Uuid>,
    ) -> AppResult<bool> {
        let taken: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM categories
                WHERE (name = $1 OR slug = $2) AND ($3::UUID IS NULL OR id <> $3)
            )
            "#,
        )
        .bind(name)
        .bind(slug)
        .bind(exclude)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(taken.0)
    }

    async fn list_categories(
        &mut self,
        active_only: bool,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<CategoryView>, i64)> {
        let categories = sqlx::query_as::<_, Category>(&format!(
            r#"
            SELECT {CATEGORY_COLUMNS} FROM categories
            WHERE ($1 = FALSE OR is_active)
            ORDER BY name ASC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(active_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await?;

        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM categories WHERE ($1 = FALSE OR is_active)")
                .bind(active_only)
                .fetch_one(&mut *self.tx)
                .await?;

        let mut views = Vec::with_capacity(categories.len());
        for category in categories {
            let products_count = self.count_category_products(category.id).await?;
            views.push(CategoryView {
                category,
                products_count,
            });
        }
        Ok((views, total.0))
    }

    async fn count_category_products(&mut self, id: Uuid) -> AppResult<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products WHERE category_id = $1")
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count.0)
    }

    async fn update_category(&mut self, category: &Category) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE categories
            SET name = $2, description = $3, slug = $4, is_active = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(category.id)
        .bind(&category.name)
        .bind(&category.description)
        .bind(&category.slug)
        .bind(category.is_active)
        .bind(category.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| write_error(e, "Category with this name or slug already exists"))?;
        Ok(())
    }

    async fn delete_category(&mut self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| write_error(e, "Category has products"))?;
        Ok(result.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // PRODUCTS
    // -------------------------------------------------------------------------
    async fn insert_product(
        &mut self,
        product: &NewProduct,
        now: DateTime<Utc>,
    ) -> AppResult<Product> {
        sqlx::query_as::<_, Product>(&format!(
            r#"
            INSERT INTO products
                (id, name, description, slug, sku, price, compare_price, cost_price,
                 stock_quantity, low_stock_threshold, is_active, is_featured, category_id,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.slug)
        .bind(&product.sku)
        .bind(product.price)
        .bind(product.compare_price)
        .bind(product.cost_price)
        .bind(product.stock_quantity)
        .bind(product.low_stock_threshold)
        .bind(product.is_active)
        .bind(product.is_featured)
        .bind(product.category_id)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| write_error(e, "Product with this SKU or slug already exists"))
    }

    async fn find_product(&mut self, id: Uuid) -> AppResult<Option<Product>> {
        Ok(sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn find_product_by_slug(&mut self, slug: &str) -> AppResult<Option<Product>> {
        Ok(sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn find_product_by_sku(&mut self, sku: &str) -> AppResult<Option<Product>> {
        Ok(sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = $1"
        ))
        .bind(sku)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn lock_products(&mut self, ids: &[Uuid]) -> AppResult<Vec<Product>> {
        // Lock the rows for update to prevent two checkouts from both
        // passing the stock check. Always in id order so concurrent
        // checkouts over the same products can't deadlock.
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        ))
        .bind(ids.to_vec())
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(products)
    }

    async fn product_taken(
        &mut self,
        sku: &str,
        slug: &str,
        exclude: Option<Uuid>,
    ) -> AppResult<bool> {
        let taken: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM products
                WHERE (sku = $1 OR slug = $2) AND ($3::UUID IS NULL OR id <> $3)
            )
            "#,
        )
        .bind(sku)
        .bind(slug)
        .bind(exclude)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(taken.0)
    }

    async fn list_products(
        &mut self,
        filters: &ProductFilters,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<Product>, i64)> {
        let mut page_query =
            QueryBuilder::new(format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE TRUE"));
        push_product_filters(&mut page_query, filters);
        page_query
            .push(" ORDER BY is_featured DESC, created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let products = page_query
            .build_query_as::<Product>()
            .fetch_all(&mut *self.tx)
            .await?;

        let mut count_query = QueryBuilder::new("SELECT COUNT(*) FROM products WHERE TRUE");
        push_product_filters(&mut count_query, filters);
        let total = count_query
            .build_query_as::<(i64,)>()
            .fetch_one(&mut *self.tx)
            .await?;

        debug!(total = total.0, returned = products.len(), "Listed products");
        Ok((products, total.0))
    }

    async fn featured_products(&mut self, limit: i64) -> AppResult<Vec<Product>> {
        Ok(sqlx::query_as::<_, Product>(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS} FROM products
            WHERE is_active AND is_featured
            ORDER BY created_at DESC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn low_stock_products(&mut self) -> AppResult<Vec<Product>> {
        Ok(sqlx::query_as::<_, Product>(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS} FROM products
            WHERE is_active AND stock_quantity <= low_stock_threshold
            ORDER BY stock_quantity ASC
            "#
        ))
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn update_product(&mut self, product: &Product) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE products
            SET name = $2, description = $3, slug = $4, sku = $5, price = $6,
                compare_price = $7, cost_price = $8, stock_quantity = $9,
                low_stock_threshold = $10, is_active = $11, is_featured = $12,
                category_id = $13, updated_at = $14
            WHERE id = $1
            "#,
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.slug)
        .bind(&product.sku)
        .bind(product.price)
        .bind(product.compare_price)
        .bind(product.cost_price)
        .bind(product.stock_quantity)
        .bind(product.low_stock_threshold)
        .bind(product.is_active)
        .bind(product.is_featured)
        .bind(product.category_id)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| write_error(e, "Product with this SKU or slug already exists"))?;
        Ok(())
    }

    async fn delete_product(&mut self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| write_error(e, "Product is referenced by existing orders"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn adjust_stock(
        &mut self,
        product_id: Uuid,
        delta: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Option<i32>> {
        // The WHERE clause makes the decrement conditional: a concurrent
        // checkout that got there first leaves zero rows affected here.
        let level: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $2, updated_at = $3
            WHERE id = $1 AND stock_quantity + $2 >= 0
            RETURNING stock_quantity
            "#,
        )
        .bind(product_id)
        .bind(delta)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(level.map(|l| l.0))
    }

    // -------------------------------------------------------------------------
    // CARTS
    // -------------------------------------------------------------------------
    async fn find_cart(&mut self, user_id: Uuid) -> AppResult<Option<Cart>> {
        Ok(sqlx::query_as::<_, Cart>(
            "SELECT id, user_id, created_at, updated_at FROM carts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn create_cart(&mut self, user_id: Uuid, now: DateTime<Utc>) -> AppResult<Cart> {
        Ok(sqlx::query_as::<_, Cart>(
            r#"
            INSERT INTO carts (id, user_id, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            RETURNING id, user_id, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn touch_cart(&mut self, cart_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE carts SET updated_at = $2 WHERE id = $1")
            .bind(cart_id)
            .bind(now)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn cart_lines(&mut self, cart_id: Uuid) -> AppResult<Vec<CartLine>> {
        Ok(sqlx::query_as::<_, CartLine>(
            r#"
            SELECT ci.id, ci.cart_id, ci.product_id, ci.quantity, ci.unit_price,
                   ci.created_at, ci.updated_at,
                   p.name AS product_name, p.sku AS product_sku
            FROM cart_items ci
            JOIN products p ON p.id = ci.product_id
            WHERE ci.cart_id = $1
            ORDER BY ci.created_at, ci.id
            "#,
        )
        .bind(cart_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn find_cart_item(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Option<CartItem>> {
        Ok(sqlx::query_as::<_, CartItem>(
            r#"
            SELECT id, cart_id, product_id, quantity, unit_price, created_at, updated_at
            FROM cart_items
            WHERE cart_id = $1 AND product_id = $2
            "#,
        )
        .bind(cart_id)
        .bind(product_id)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn insert_cart_item(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        unit_price: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<CartItem> {
        sqlx::query_as::<_, CartItem>(
            r#"
            INSERT INTO cart_items
                (id, cart_id, product_id, quantity, unit_price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING id, cart_id, product_id, quantity, unit_price, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(cart_id)
        .bind(product_id)
        .bind(quantity)
        .bind(unit_price)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| write_error(e, "Cart item already exists"))
    }

    async fn update_cart_item(
        &mut self,
        item_id: Uuid,
        quantity: i32,
        unit_price: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE cart_items SET quantity = $2, unit_price = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(item_id)
        .bind(quantity)
        .bind(unit_price)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_cart_item(&mut self, item_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE id = $1")
            .bind(item_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn clear_cart(&mut self, cart_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    // -------------------------------------------------------------------------
    // ORDERS
    // -------------------------------------------------------------------------
    async fn insert_order(&mut self, order: &NewOrder) -> AppResult<Order> {
        let order_id = Uuid::new_v4();
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            INSERT INTO orders
                (id, order_number, user_id, status, payment_status, subtotal, tax_amount,
                 shipping_amount, discount_amount, total_amount, shipping_address,
                 billing_address, phone, notes, payment_method, created_at, updated_at)
            VALUES ($1, $2, $3, 'pending', 'pending', $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $14)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(&order.order_number)
        .bind(order.user_id)
        .bind(order.totals.subtotal)
        .bind(order.totals.tax_amount)
        .bind(order.totals.shipping_amount)
        .bind(order.totals.discount_amount)
        .bind(order.totals.total_amount)
        .bind(&order.shipping_address)
        .bind(&order.billing_address)
        .bind(&order.phone)
        .bind(&order.notes)
        .bind(&order.payment_method)
        .bind(order.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| write_error(e, "Order number already in use"))?;

        let mut items = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let item = sqlx::query_as::<_, OrderItem>(&format!(
                r#"
                INSERT INTO order_items
                    (id, order_id, product_id, quantity, unit_price, total_price,
                     product_name, product_sku, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING {ORDER_ITEM_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4())
            .bind(order_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.total_price)
            .bind(&item.product_name)
            .bind(&item.product_sku)
            .bind(order.created_at)
            .fetch_one(&mut *self.tx)
            .await?;
            items.push(item);
        }

        row.into_order(items)
    }

    async fn find_order(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        self.load_order(id, "").await
    }

    async fn lock_order(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        // Serialises pay, cancel and admin updates on the same order
        self.load_order(id, " FOR UPDATE").await
    }

    async fn list_orders(
        &mut self,
        user_id: Option<Uuid>,
        offset: i64,
        limit: i64,
    ) -> AppResult<Vec<OrderSummary>> {
        let rows = sqlx::query_as::<_, OrderSummaryRow>(
            r#"
            SELECT o.id, o.order_number, o.status, o.payment_status, o.total_amount,
                   COALESCE((SELECT SUM(quantity) FROM order_items WHERE order_id = o.id), 0)::BIGINT
                       AS items_count,
                   o.created_at
            FROM orders o
            WHERE ($1::UUID IS NULL OR o.user_id = $1)
            ORDER BY o.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(OrderSummary::try_from).collect()
    }

    async fn save_order(&mut self, order: &Order) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, payment_status = $3, shipping_address = $4,
                billing_address = $5, phone = $6, notes = $7,
                payment_transaction_id = $8, updated_at = $9,
                shipped_at = $10, delivered_at = $11
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.shipping_address)
        .bind(&order.billing_address)
        .bind(&order.phone)
        .bind(&order.notes)
        .bind(&order.payment_transaction_id)
        .bind(order.updated_at)
        .bind(order.shipped_at)
        .bind(order.delivered_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}
