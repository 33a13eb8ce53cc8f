// =============================================================================
// ORDER WORKFLOW
// =============================================================================
// Turns carts into orders and drives orders through their lifecycle:
//
//   checkout  : cart ──> order (PENDING/PENDING), stock decremented, cart emptied
//   pay       : PENDING ──> PAID, or stock restored + payment FAILED
//   cancel    : PENDING|PAID ──> CANCELLED, stock restored
//   admin     : PAID ──> SHIPPED ──> DELIVERED (and field corrections)
//
// LEARNING NOTES:
// - Every step that touches stock runs inside one storage transaction, so a
//   failure half-way through leaves nothing behind
// - Payment uses two transactions: PROCESSING is committed before the
//   gateway is called, the outcome is committed after it returns
// - Pay, cancel and admin updates row-lock the order; the payment outcome
//   is only applied if the order is still PENDING with payment PROCESSING
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::payment::PaymentGateway;
use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    cart_totals, generate_order_number, CheckoutRequest, NewOrder, NewOrderItem, Order,
    OrderPatch, OrderStatus, OrderSummary, OrderTotals, PaymentStatus, Product,
};
use crate::store::{Storage, Store};

pub struct OrderService<'a, S: Storage> {
    storage: &'a S,
    gateway: &'a dyn PaymentGateway,
    clock: &'a dyn Clock,
}

fn order_not_found() -> AppError {
    AppError::NotFound("Order not found".to_string())
}

/// The order, if it exists and belongs to `user_id`
async fn owned_order<T: Store>(tx: &mut T, user_id: Uuid, order_id: Uuid) -> AppResult<Order> {
    tx.find_order(order_id)
        .await?
        .filter(|order| order.user_id == user_id)
        .ok_or_else(order_not_found)
}

/// Like `owned_order`, holding the row lock until the transaction ends
async fn lock_owned_order<T: Store>(
    tx: &mut T,
    user_id: Uuid,
    order_id: Uuid,
) -> AppResult<Order> {
    tx.lock_order(order_id)
        .await?
        .filter(|order| order.user_id == user_id)
        .ok_or_else(order_not_found)
}

/// Give every ordered unit back to its product
///
/// Products deleted since checkout are skipped.
async fn restore_stock<T: Store>(tx: &mut T, order: &Order, now: DateTime<Utc>) -> AppResult<()> {
    for item in &order.items {
        match tx.adjust_stock(item.product_id, item.quantity, now).await? {
            Some(level) => metrics::set_stock_level(&item.product_sku, level),
            None => warn!(
                order_number = %order.order_number,
                product_id = %item.product_id,
                "Product gone, stock not restored"
            ),
        }
    }
    Ok(())
}

impl<'a, S: Storage> OrderService<'a, S> {
    pub fn new(storage: &'a S, gateway: &'a dyn PaymentGateway, clock: &'a dyn Clock) -> Self {
        Self {
            storage,
            gateway,
            clock,
        }
    }

    // -------------------------------------------------------------------------
    // CHECKOUT
    // -------------------------------------------------------------------------
    /// Create a PENDING order from the user's cart
    ///
    /// All-or-nothing: if any line fails validation, or the stock moved
    /// under us, the transaction is dropped and the cart, the stock and the
    /// order table are exactly as before.
    pub async fn create_order_from_cart(
        &self,
        user_id: Uuid,
        request: &CheckoutRequest,
    ) -> AppResult<Order> {
        let now = self.clock.now();
        let mut tx = self.storage.begin().await?;

        let cart = tx.find_cart(user_id).await?.ok_or(AppError::EmptyCart)?;
        let lines = tx.cart_lines(cart.id).await?;
        if lines.is_empty() {
            return Err(AppError::EmptyCart);
        }

        // Lock every product on the cart before looking at stock
        let product_ids: Vec<Uuid> = lines.iter().map(|l| l.item.product_id).collect();
        let locked = tx.lock_products(&product_ids).await?;
        let products: HashMap<Uuid, &Product> = locked.iter().map(|p| (p.id, p)).collect();

        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = products
                .get(&line.item.product_id)
                .copied()
                .filter(|p| p.is_active)
                .ok_or_else(|| AppError::ProductUnavailable(line.product_name.clone()))?;
            if !product.can_order(line.item.quantity) {
                return Err(AppError::InsufficientStock {
                    product: product.name.clone(),
                    available: product.stock_quantity,
                    requested: line.item.quantity,
                });
            }
            items.push(NewOrderItem {
                product_id: product.id,
                quantity: line.item.quantity,
                unit_price: line.item.unit_price,
                total_price: line.item.subtotal(),
                product_name: product.name.clone(),
                product_sku: product.sku.clone(),
            });
        }

        let (_, subtotal) = cart_totals(lines.iter().map(|l| &l.item));
        let totals = OrderTotals::from_subtotal(subtotal);

        let order = tx
            .insert_order(&NewOrder {
                order_number: generate_order_number(now),
                user_id,
                totals,
                shipping_address: request.shipping_address.clone(),
                billing_address: request.billing_address.clone(),
                phone: request.phone.clone(),
                notes: request.notes.clone(),
                payment_method: request.payment_method.clone(),
                items,
                created_at: now,
            })
            .await?;

        let mut stock_levels = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let level = tx
                .adjust_stock(item.product_id, -item.quantity, now)
                .await?
                .ok_or_else(|| AppError::InsufficientStock {
                    product: item.product_name.clone(),
                    available: 0,
                    requested: item.quantity,
                })?;
            stock_levels.push((item.product_sku.clone(), level));
        }

        tx.clear_cart(cart.id).await?;
        tx.touch_cart(cart.id, now).await?;
        tx.commit().await?;

        metrics::record_order_created();
        for (sku, level) in &stock_levels {
            metrics::set_stock_level(sku, *level);
        }
        info!(
            order_number = %order.order_number,
            %user_id,
            total = %order.total_amount,
            items = order.items_count(),
            "Order created"
        );
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // PAYMENT
    // -------------------------------------------------------------------------
    /// Charge a PENDING order through the gateway
    ///
    /// On decline the stock taken at checkout is given back, the order stays
    /// PENDING with payment FAILED, and `PaymentFailed` carries the reason.
    pub async fn process_payment(&self, user_id: Uuid, order_id: Uuid) -> AppResult<Order> {
        let mut tx = self.storage.begin().await?;
        let mut order = lock_owned_order(&mut tx, user_id, order_id).await?;

        if order.status != OrderStatus::Pending {
            return Err(AppError::InvalidStateTransition(
                "Order cannot be paid".to_string(),
            ));
        }
        if order.payment_status != PaymentStatus::Pending {
            return Err(AppError::InvalidStateTransition(
                "Payment has already been processed".to_string(),
            ));
        }

        order.advance_payment(PaymentStatus::Processing, self.clock.now())?;
        tx.save_order(&order).await?;
        tx.commit().await?;

        let method = order.payment_method.clone().unwrap_or_default();
        let result = self
            .gateway
            .process_payment(&method, order.total_amount)
            .await;
        metrics::record_payment(&method, result.status.as_str());

        // The row may have moved while the gateway was working
        let now = self.clock.now();
        let mut tx = self.storage.begin().await?;
        let mut order = lock_owned_order(&mut tx, user_id, order_id).await?;
        if order.status != OrderStatus::Pending
            || order.payment_status != PaymentStatus::Processing
        {
            warn!(
                order_number = %order.order_number,
                status = %order.status,
                payment_status = %order.payment_status,
                gateway_status = %result.status,
                transaction_id = %result.transaction_id,
                "Order changed during payment, gateway outcome not applied"
            );
            return Err(AppError::InvalidStateTransition(
                "Order changed while the payment was being processed".to_string(),
            ));
        }

        order.payment_transaction_id = Some(result.transaction_id.clone());

        if result.status == PaymentStatus::Completed {
            order.transition_to(OrderStatus::Paid, now)?;
            order.advance_payment(PaymentStatus::Completed, now)?;
            tx.save_order(&order).await?;
            tx.commit().await?;

            metrics::record_status_transition(
                OrderStatus::Pending.as_str(),
                OrderStatus::Paid.as_str(),
            );
            info!(
                order_number = %order.order_number,
                transaction_id = %result.transaction_id,
                "Order paid"
            );
            Ok(order)
        } else {
            order.advance_payment(PaymentStatus::Failed, now)?;
            restore_stock(&mut tx, &order, now).await?;
            tx.save_order(&order).await?;
            tx.commit().await?;

            warn!(
                order_number = %order.order_number,
                reason = %result.message,
                "Payment failed, stock restored"
            );
            Err(AppError::PaymentFailed(result.message))
        }
    }

    // -------------------------------------------------------------------------
    // CANCELLATION
    // -------------------------------------------------------------------------
    /// Cancel a PENDING or PAID order and give its stock back
    ///
    /// A PAID order keeps payment COMPLETED: no refund is issued here.
    /// Refused while a charge is in flight.
    pub async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> AppResult<Order> {
        let now = self.clock.now();
        let mut tx = self.storage.begin().await?;
        let mut order = lock_owned_order(&mut tx, user_id, order_id).await?;

        if !order.can_be_cancelled() {
            return Err(AppError::InvalidStateTransition(
                "Order cannot be cancelled".to_string(),
            ));
        }

        let from = order.status;
        // A declined payment already returned the stock
        if order.payment_status != PaymentStatus::Failed {
            restore_stock(&mut tx, &order, now).await?;
        }
        order.transition_to(OrderStatus::Cancelled, now)?;
        tx.save_order(&order).await?;
        tx.commit().await?;

        metrics::record_status_transition(from.as_str(), OrderStatus::Cancelled.as_str());
        info!(order_number = %order.order_number, "Order cancelled");
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // ADMIN
    // -------------------------------------------------------------------------
    /// Admin update: status through the transition table, other fields as given
    pub async fn update_order_status(&self, order_id: Uuid, patch: OrderPatch) -> AppResult<Order> {
        let now = self.clock.now();
        let mut tx = self.storage.begin().await?;
        let mut order = tx.lock_order(order_id).await?.ok_or_else(order_not_found)?;

        let from = order.status;
        let stock_returned = order.payment_status == PaymentStatus::Failed;
        order.apply_admin_update(patch, now)?;

        if order.status == OrderStatus::Cancelled && from != OrderStatus::Cancelled && !stock_returned
        {
            restore_stock(&mut tx, &order, now).await?;
        }
        tx.save_order(&order).await?;
        tx.commit().await?;

        if order.status != from {
            metrics::record_status_transition(from.as_str(), order.status.as_str());
            info!(
                order_number = %order.order_number,
                from = %from,
                to = %order.status,
                "Order status updated"
            );
        }
        Ok(order)
    }

    pub async fn list_all_orders(&self, skip: i64, limit: i64) -> AppResult<Vec<OrderSummary>> {
        let mut tx = self.storage.begin().await?;
        let orders = tx.list_orders(None, skip, limit).await?;
        tx.commit().await?;
        Ok(orders)
    }

    pub async fn get_order_admin(&self, order_id: Uuid) -> AppResult<Order> {
        let mut tx = self.storage.begin().await?;
        let order = tx.find_order(order_id).await?.ok_or_else(order_not_found)?;
        tx.commit().await?;
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // CUSTOMER READS
    // -------------------------------------------------------------------------
    /// The user's orders, newest first
    pub async fn list_user_orders(
        &self,
        user_id: Uuid,
        skip: i64,
        limit: i64,
    ) -> AppResult<Vec<OrderSummary>> {
        let mut tx = self.storage.begin().await?;
        let orders = tx.list_orders(Some(user_id), skip, limit).await?;
        tx.commit().await?;
        Ok(orders)
    }

    pub async fn get_order(&self, user_id: Uuid, order_id: Uuid) -> AppResult<Order> {
        let mut tx = self.storage.begin().await?;
        let order = owned_order(&mut tx, user_id, order_id).await?;
        tx.commit().await?;
        Ok(order)
    }
}
