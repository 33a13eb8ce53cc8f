// =============================================================================
// CART SERVICE
// =============================================================================
// Per-user cart. Every operation runs in its own transaction and returns the
// refreshed cart (or its summary) as seen after commit.
//
// Prices are snapshotted into the cart line on every add/update, so the cart
// always shows the price the customer last agreed to.
// =============================================================================

use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{cart_totals, Cart, CartSummary, CartView, Product};
use crate::store::{Storage, Store};

pub struct CartService<'a, S: Storage> {
    storage: &'a S,
    clock: &'a dyn Clock,
}

fn require_positive(quantity: i32) -> AppResult<()> {
    if quantity <= 0 {
        return Err(AppError::Validation(
            "quantity: Quantity must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

fn item_not_found() -> AppError {
    AppError::NotFound("Item not found in cart".to_string())
}

fn cart_not_found() -> AppError {
    AppError::NotFound("Cart not found".to_string())
}

/// Active product or NotFound
async fn orderable_product<T: Store>(tx: &mut T, product_id: Uuid) -> AppResult<Product> {
    tx.find_product(product_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| AppError::NotFound("Product not found or inactive".to_string()))
}

fn check_stock(product: &Product, quantity: i32) -> AppResult<()> {
    if !product.can_order(quantity) {
        return Err(AppError::InsufficientStock {
            product: product.name.clone(),
            available: product.stock_quantity,
            requested: quantity,
        });
    }
    Ok(())
}

async fn render<T: Store>(tx: &mut T, cart: &Cart) -> AppResult<CartView> {
    let lines = tx.cart_lines(cart.id).await?;
    Ok(CartView::build(cart, lines))
}

impl<'a, S: Storage> CartService<'a, S> {
    pub fn new(storage: &'a S, clock: &'a dyn Clock) -> Self {
        Self { storage, clock }
    }

    /// Full cart; an empty view when the user has never added anything
    pub async fn view(&self, user_id: Uuid) -> AppResult<CartView> {
        let mut tx = self.storage.begin().await?;
        let view = match tx.find_cart(user_id).await? {
            Some(cart) => render(&mut tx, &cart).await?,
            None => CartView::empty(user_id),
        };
        tx.commit().await?;
        Ok(view)
    }

    /// Add `quantity` units, merging with an existing line for the product
    pub async fn add(&self, user_id: Uuid, product_id: Uuid, quantity: i32) -> AppResult<CartView> {
        require_positive(quantity)?;
        let now = self.clock.now();
        let mut tx = self.storage.begin().await?;

        let product = orderable_product(&mut tx, product_id).await?;
        let cart = match tx.find_cart(user_id).await? {
            Some(cart) => cart,
            None => tx.create_cart(user_id, now).await?,
        };

        match tx.find_cart_item(cart.id, product_id).await? {
            Some(item) => {
                let total = item.quantity + quantity;
                check_stock(&product, total)?;
                tx.update_cart_item(item.id, total, product.price, now).await?;
            }
            None => {
                check_stock(&product, quantity)?;
                tx.insert_cart_item(cart.id, product_id, quantity, product.price, now)
                    .await?;
            }
        }
        tx.touch_cart(cart.id, now).await?;

        let view = render(&mut tx, &cart).await?;
        tx.commit().await?;

        metrics::record_cart_operation("add");
        info!(%user_id, %product_id, quantity, "Added to cart");
        Ok(view)
    }

    /// Set the quantity of an existing line
    pub async fn update(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> AppResult<CartView> {
        require_positive(quantity)?;
        let now = self.clock.now();
        let mut tx = self.storage.begin().await?;

        let cart = tx.find_cart(user_id).await?.ok_or_else(cart_not_found)?;
        let item = tx
            .find_cart_item(cart.id, product_id)
            .await?
            .ok_or_else(item_not_found)?;
        let product = orderable_product(&mut tx, product_id).await?;
        check_stock(&product, quantity)?;

        tx.update_cart_item(item.id, quantity, product.price, now)
            .await?;
        tx.touch_cart(cart.id, now).await?;

        let view = render(&mut tx, &cart).await?;
        tx.commit().await?;

        metrics::record_cart_operation("update");
        Ok(view)
    }

    pub async fn remove(&self, user_id: Uuid, product_id: Uuid) -> AppResult<CartView> {
        let now = self.clock.now();
        let mut tx = self.storage.begin().await?;

        let cart = tx.find_cart(user_id).await?.ok_or_else(cart_not_found)?;
        let item = tx
            .find_cart_item(cart.id, product_id)
            .await?
            .ok_or_else(item_not_found)?;
        tx.delete_cart_item(item.id).await?;
        tx.touch_cart(cart.id, now).await?;

        let view = render(&mut tx, &cart).await?;
        tx.commit().await?;

        metrics::record_cart_operation("remove");
        Ok(view)
    }

    /// Empty the cart; succeeds even if the user has no cart
    pub async fn clear(&self, user_id: Uuid) -> AppResult<CartView> {
        let now = self.clock.now();
        let mut tx = self.storage.begin().await?;

        let view = match tx.find_cart(user_id).await? {
            Some(cart) => {
                tx.clear_cart(cart.id).await?;
                tx.touch_cart(cart.id, now).await?;
                render(&mut tx, &cart).await?
            }
            None => CartView::empty(user_id),
        };
        tx.commit().await?;

        metrics::record_cart_operation("clear");
        Ok(view)
    }

    pub async fn summary(&self, user_id: Uuid) -> AppResult<CartSummary> {
        let mut tx = self.storage.begin().await?;
        let summary = match tx.find_cart(user_id).await? {
            Some(cart) => {
                let lines = tx.cart_lines(cart.id).await?;
                let (total_items, total_amount) = cart_totals(lines.iter().map(|l| &l.item));
                CartSummary {
                    total_items,
                    total_amount,
                    items_count: lines.len() as i64,
                }
            }
            None => CartSummary::zero(),
        };
        tx.commit().await?;
        Ok(summary)
    }
}
