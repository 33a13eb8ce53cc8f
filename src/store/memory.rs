//! In-memory `Storage` for tests.
//!
//! `begin` snapshots the whole state; `commit` writes the snapshot back.
//! A transaction dropped without commit leaves the shared state untouched,
//! matching the rollback-on-drop behaviour of a sqlx transaction.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{Storage, Store};
use crate::error::{AppError, AppResult};
use crate::models::{
    Cart, CartItem, CartLine, Category, CategoryView, NewCategory, NewOrder, NewProduct,
    NewUser, Order, OrderItem, OrderStatus, OrderSummary, PaymentStatus, Product,
    ProductFilters, User,
};

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub users: Vec<User>,
    pub categories: Vec<Category>,
    pub products: Vec<Product>,
    pub carts: Vec<Cart>,
    pub cart_items: Vec<CartItem>,
    pub orders: Vec<Order>,
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    shared: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state
    pub fn snapshot(&self) -> MemoryState {
        self.shared.lock().unwrap().clone()
    }

    pub fn stock_of(&self, product_id: Uuid) -> i32 {
        self.snapshot()
            .products
            .iter()
            .find(|p| p.id == product_id)
            .map(|p| p.stock_quantity)
            .unwrap_or_default()
    }
}

pub struct MemoryTx {
    shared: Arc<Mutex<MemoryState>>,
    state: MemoryState,
}

#[async_trait]
impl Storage for MemoryStorage {
    type Tx = MemoryTx;

    async fn begin(&self) -> AppResult<MemoryTx> {
        Ok(MemoryTx {
            shared: self.shared.clone(),
            state: self.snapshot(),
        })
    }
}

fn not_found(what: &str) -> AppError {
    AppError::NotFound(format!("{what} not found"))
}

#[async_trait]
impl Store for MemoryTx {
    async fn commit(self) -> AppResult<()> {
        *self.shared.lock().unwrap() = self.state;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // USERS
    // -------------------------------------------------------------------------
    async fn insert_user(&mut self, user: &NewUser, now: DateTime<Utc>) -> AppResult<User> {
        if self
            .state
            .users
            .iter()
            .any(|u| u.email == user.email || u.username == user.username)
        {
            return Err(AppError::Conflict("User already exists".to_string()));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: user.email.clone(),
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            hashed_password: user.hashed_password.clone(),
            role: user.role.as_str().to_string(),
            is_active: true,
            is_verified: false,
            created_at: now,
            updated_at: now,
        };
        self.state.users.push(user.clone());
        Ok(user)
    }

    async fn find_user(&mut self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.state.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&mut self, email: &str) -> AppResult<Option<User>> {
        Ok(self.state.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_username(&mut self, username: &str) -> AppResult<Option<User>> {
        Ok(self
            .state
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    // -------------------------------------------------------------------------
    // CATEGORIES
    // -------------------------------------------------------------------------
    async fn insert_category(
        &mut self,
        category: &NewCategory,
        now: DateTime<Utc>,
    ) -> AppResult<Category> {
        let category = Category {
            id: Uuid::new_v4(),
            name: category.name.clone(),
            description: category.description.clone(),
            slug: category.slug.clone(),
            is_active: category.is_active,
            created_at: now,
            updated_at: now,
        };
        self.state.categories.push(category.clone());
        Ok(category)
    }

    async fn find_category(&mut self, id: Uuid) -> AppResult<Option<Category>> {
        Ok(self.state.categories.iter().find(|c| c.id == id).cloned())
    }

    async fn find_category_by_slug(&mut self, slug: &str) -> AppResult<Option<Category>> {
        Ok(self
            .state
            .categories
            .iter()
            .find(|c| c.slug == slug)
            .cloned())
    }

    async fn category_taken(
        &mut self,
        name: &str,
        slug: &str,
        exclude: Option<Uuid>,
    ) -> AppResult<bool> {
        Ok(self
            .state
            .categories
            .iter()
            .filter(|c| Some(c.id) != exclude)
            .any(|c| c.name == name || c.slug == slug))
    }

    async fn list_categories(
        &mut self,
        active_only: bool,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<CategoryView>, i64)> {
        let mut categories: Vec<&Category> = self
            .state
            .categories
            .iter()
            .filter(|c| !active_only || c.is_active)
            .collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        let total = categories.len() as i64;
        let page = categories
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|c| CategoryView {
                products_count: self
                    .state
                    .products
                    .iter()
                    .filter(|p| p.category_id == Some(c.id))
                    .count() as i64,
                category: c.clone(),
            })
            .collect();
        Ok((page, total))
    }

    async fn count_category_products(&mut self, id: Uuid) -> AppResult<i64> {
        Ok(self
            .state
            .products
            .iter()
            .filter(|p| p.category_id == Some(id))
            .count() as i64)
    }

    async fn update_category(&mut self, category: &Category) -> AppResult<()> {
        let slot = self
            .state
            .categories
            .iter_mut()
            .find(|c| c.id == category.id)
            .ok_or_else(|| not_found("Category"))?;
        *slot = category.clone();
        Ok(())
    }

    async fn delete_category(&mut self, id: Uuid) -> AppResult<bool> {
        let before = self.state.categories.len();
        self.state.categories.retain(|c| c.id != id);
        Ok(self.state.categories.len() != before)
    }

    // -------------------------------------------------------------------------
    // PRODUCTS
    // -------------------------------------------------------------------------
    async fn insert_product(
        &mut self,
        product: &NewProduct,
        now: DateTime<Utc>,
    ) -> AppResult<Product> {
        let product = Product {
            id: Uuid::new_v4(),
            name: product.name.clone(),
            description: product.description.clone(),
            slug: product.slug.clone(),
            sku: product.sku.clone(),
            price: product.price,
            compare_price: product.compare_price,
            cost_price: product.cost_price,
            stock_quantity: product.stock_quantity,
            low_stock_threshold: product.low_stock_threshold,
            is_active: product.is_active,
            is_featured: product.is_featured,
            category_id: product.category_id,
            created_at: now,
            updated_at: now,
        };
        self.state.products.push(product.clone());
        Ok(product)
    }

    async fn find_product(&mut self, id: Uuid) -> AppResult<Option<Product>> {
        Ok(self.state.products.iter().find(|p| p.id == id).cloned())
    }

    async fn find_product_by_slug(&mut self, slug: &str) -> AppResult<Option<Product>> {
        Ok(self.state.products.iter().find(|p| p.slug == slug).cloned())
    }

    async fn find_product_by_sku(&mut self, sku: &str) -> AppResult<Option<Product>> {
        Ok(self.state.products.iter().find(|p| p.sku == sku).cloned())
    }

    async fn lock_products(&mut self, ids: &[Uuid]) -> AppResult<Vec<Product>> {
        let mut products: Vec<Product> = self
            .state
            .products
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect();
        products.sort_by_key(|p| p.id);
        Ok(products)
    }

    async fn product_taken(
        &mut self,
        sku: &str,
        slug: &str,
        exclude: Option<Uuid>,
    ) -> AppResult<bool> {
        Ok(self
            .state
            .products
            .iter()
            .filter(|p| Some(p.id) != exclude)
            .any(|p| p.sku == sku || p.slug == slug))
    }

    async fn list_products(
        &mut self,
        filters: &ProductFilters,
        offset: i64,
        limit: i64,
    ) -> AppResult<(Vec<Product>, i64)> {
        let mut products: Vec<Product> = self
            .state
            .products
            .iter()
            .filter(|p| filters.matches(p))
            .cloned()
            .collect();
        products.sort_by(|a, b| {
            b.is_featured
                .cmp(&a.is_featured)
                .then(b.created_at.cmp(&a.created_at))
        });
        let total = products.len() as i64;
        let page = products
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn featured_products(&mut self, limit: i64) -> AppResult<Vec<Product>> {
        let mut products: Vec<Product> = self
            .state
            .products
            .iter()
            .filter(|p| p.is_active && p.is_featured)
            .cloned()
            .collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        products.truncate(limit as usize);
        Ok(products)
    }

    async fn low_stock_products(&mut self) -> AppResult<Vec<Product>> {
        let mut products: Vec<Product> = self
            .state
            .products
            .iter()
            .filter(|p| p.is_active && p.is_low_stock())
            .cloned()
            .collect();
        products.sort_by_key(|p| p.stock_quantity);
        Ok(products)
    }

    async fn update_product(&mut self, product: &Product) -> AppResult<()> {
        let slot = self
            .state
            .products
            .iter_mut()
            .find(|p| p.id == product.id)
            .ok_or_else(|| not_found("Product"))?;
        *slot = product.clone();
        Ok(())
    }

    async fn delete_product(&mut self, id: Uuid) -> AppResult<bool> {
        let referenced = self
            .state
            .orders
            .iter()
            .flat_map(|o| o.items.iter())
            .any(|i| i.product_id == id);
        if referenced {
            return Err(AppError::Conflict(
                "Product is referenced by existing orders".to_string(),
            ));
        }
        self.state.cart_items.retain(|i| i.product_id != id);
        let before = self.state.products.len();
        self.state.products.retain(|p| p.id != id);
        Ok(self.state.products.len() != before)
    }

    async fn adjust_stock(
        &mut self,
        product_id: Uuid,
        delta: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Option<i32>> {
        let Some(product) = self.state.products.iter_mut().find(|p| p.id == product_id) else {
            return Ok(None);
        };
        if product.stock_quantity + delta < 0 {
            return Ok(None);
        }
        product.stock_quantity += delta;
        product.updated_at = now;
        Ok(Some(product.stock_quantity))
    }

    // -------------------------------------------------------------------------
    // CARTS
    // -------------------------------------------------------------------------
    async fn find_cart(&mut self, user_id: Uuid) -> AppResult<Option<Cart>> {
        Ok(self
            .state
            .carts
            .iter()
            .find(|c| c.user_id == user_id)
            .cloned())
    }

    async fn create_cart(&mut self, user_id: Uuid, now: DateTime<Utc>) -> AppResult<Cart> {
        let cart = Cart {
            id: Uuid::new_v4(),
            user_id,
            created_at: now,
            updated_at: now,
        };
        self.state.carts.push(cart.clone());
        Ok(cart)
    }

    async fn touch_cart(&mut self, cart_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        if let Some(cart) = self.state.carts.iter_mut().find(|c| c.id == cart_id) {
            cart.updated_at = now;
        }
        Ok(())
    }

    async fn cart_lines(&mut self, cart_id: Uuid) -> AppResult<Vec<CartLine>> {
        let mut items: Vec<&CartItem> = self
            .state
            .cart_items
            .iter()
            .filter(|i| i.cart_id == cart_id)
            .collect();
        items.sort_by_key(|i| i.created_at);
        items
            .into_iter()
            .map(|item| -> AppResult<CartLine> {
                let product = self
                    .state
                    .products
                    .iter()
                    .find(|p| p.id == item.product_id)
                    .ok_or_else(|| not_found("Product"))?;
                Ok(CartLine {
                    item: item.clone(),
                    product_name: product.name.clone(),
                    product_sku: product.sku.clone(),
                })
            })
            .collect()
    }

    async fn find_cart_item(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Option<CartItem>> {
        Ok(self
            .state
            .cart_items
            .iter()
            .find(|i| i.cart_id == cart_id && i.product_id == product_id)
            .cloned())
    }

    async fn insert_cart_item(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        unit_price: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<CartItem> {
        if self
            .state
            .cart_items
            .iter()
            .any(|i| i.cart_id == cart_id && i.product_id == product_id)
        {
            return Err(AppError::Conflict("Cart item already exists".to_string()));
        }
        let item = CartItem {
            id: Uuid::new_v4(),
            cart_id,
            product_id,
            quantity,
            unit_price,
            created_at: now,
            updated_at: now,
        };
        self.state.cart_items.push(item.clone());
        Ok(item)
    }

    async fn update_cart_item(
        &mut self,
        item_id: Uuid,
        quantity: i32,
        unit_price: Decimal,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let item = self
            .state
            .cart_items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| not_found("Cart item"))?;
        item.quantity = quantity;
        item.unit_price = unit_price;
        item.updated_at = now;
        Ok(())
    }

    async fn delete_cart_item(&mut self, item_id: Uuid) -> AppResult<()> {
        self.state.cart_items.retain(|i| i.id != item_id);
        Ok(())
    }

    async fn clear_cart(&mut self, cart_id: Uuid) -> AppResult<u64> {
        let before = self.state.cart_items.len();
        self.state.cart_items.retain(|i| i.cart_id != cart_id);
        Ok((before - self.state.cart_items.len()) as u64)
    }

    // -------------------------------------------------------------------------
    // ORDERS
    // -------------------------------------------------------------------------
    async fn insert_order(&mut self, order: &NewOrder) -> AppResult<Order> {
        let id = Uuid::new_v4();
        let items = order
            .items
            .iter()
            .map(|item| OrderItem {
                id: Uuid::new_v4(),
                order_id: id,
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.total_price,
                product_name: item.product_name.clone(),
                product_sku: item.product_sku.clone(),
                created_at: order.created_at,
            })
            .collect();
        let order = Order {
            id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            subtotal: order.totals.subtotal,
            tax_amount: order.totals.tax_amount,
            shipping_amount: order.totals.shipping_amount,
            discount_amount: order.totals.discount_amount,
            total_amount: order.totals.total_amount,
            shipping_address: order.shipping_address.clone(),
            billing_address: order.billing_address.clone(),
            phone: order.phone.clone(),
            notes: order.notes.clone(),
            payment_method: Some(order.payment_method.clone()),
            payment_transaction_id: None,
            created_at: order.created_at,
            updated_at: order.created_at,
            shipped_at: None,
            delivered_at: None,
            items,
        };
        self.state.orders.push(order.clone());
        Ok(order)
    }

    async fn find_order(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        Ok(self.state.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn lock_order(&mut self, id: Uuid) -> AppResult<Option<Order>> {
        self.find_order(id).await
    }

    async fn list_orders(
        &mut self,
        user_id: Option<Uuid>,
        offset: i64,
        limit: i64,
    ) -> AppResult<Vec<OrderSummary>> {
        let mut orders: Vec<&Order> = self
            .state
            .orders
            .iter()
            .filter(|o| user_id.map_or(true, |id| o.user_id == id))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(OrderSummary::from)
            .collect())
    }

    async fn save_order(&mut self, order: &Order) -> AppResult<()> {
        let slot = self
            .state
            .orders
            .iter_mut()
            .find(|o| o.id == order.id)
            .ok_or_else(|| not_found("Order"))?;
        *slot = order.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        tx.create_cart(Uuid::new_v4(), Utc::now()).await.unwrap();
        drop(tx);
        assert!(storage.snapshot().carts.is_empty());

        let mut tx = storage.begin().await.unwrap();
        tx.create_cart(Uuid::new_v4(), Utc::now()).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(storage.snapshot().carts.len(), 1);
    }
}
