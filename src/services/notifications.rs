// =============================================================================
// NOTIFICATIONS
// =============================================================================
// Simulated transactional email. Nothing leaves the process: messages are
// rendered, logged and kept in memory so they can be inspected.
//
// Sending is fire-and-forget from the caller's point of view: `dispatch`
// logs and counts failures but never returns an error, so a broken mailer
// can't undo a registration or a checkout.
// =============================================================================

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::metrics;
use crate::models::{Order, User};

const APP_NAME: &str = "Storefront";
const FROM_ADDRESS: &str = "noreply@storefront.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Welcome,
    OrderConfirmation,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Welcome => "welcome",
            NotificationKind::OrderConfirmation => "order_confirmation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Email {
    pub kind: NotificationKind,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub fn welcome_email(user: &User) -> Email {
    Email {
        kind: NotificationKind::Welcome,
        from: FROM_ADDRESS.to_string(),
        to: user.email.clone(),
        subject: format!("Welcome to {APP_NAME}!"),
        body: format!(
            "Hi {},\n\nThanks for creating an account with {APP_NAME}. \
             Your username is {}.\n",
            user.full_name(),
            user.username
        ),
    }
}

pub fn order_confirmation_email(user: &User, order: &Order) -> Email {
    let lines: Vec<String> = order
        .items
        .iter()
        .map(|item| {
            format!(
                "  {} x{} @ {} = {}",
                item.product_name, item.quantity, item.unit_price, item.total_price
            )
        })
        .collect();
    Email {
        kind: NotificationKind::OrderConfirmation,
        from: FROM_ADDRESS.to_string(),
        to: user.email.clone(),
        subject: format!("Order Confirmation #{} - {APP_NAME}", order.order_number),
        body: format!(
            "Hi {},\n\nWe received your order {} on {}.\n\n{}\n\n\
             Subtotal: {}\nTax: {}\nShipping: {}\nTotal: {}\n\nStatus: {}\n",
            user.full_name(),
            order.order_number,
            order.created_at.format("%Y-%m-%d %H:%M UTC"),
            lines.join("\n"),
            order.subtotal,
            order.tax_amount,
            order.shipping_amount,
            order.total_amount,
            order.status
        ),
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message; `false` means it was not delivered
    async fn send(&self, email: Email) -> bool;
}

/// Send and account for a notification, swallowing failures
pub async fn dispatch(notifier: &dyn Notifier, email: Email) -> bool {
    let kind = email.kind.as_str();
    let to = email.to.clone();
    let sent = notifier.send(email).await;
    metrics::record_notification(kind, sent);
    if sent {
        info!(kind, to = %to, "Notification sent");
    } else {
        error!(kind, to = %to, "Failed to send notification");
    }
    sent
}

#[derive(Debug, Clone, Serialize)]
pub struct SentEmail {
    #[serde(flatten)]
    pub email: Email,
    pub sent_at: DateTime<Utc>,
}

/// In-process mail sink
#[derive(Default)]
pub struct SimulatedMailer {
    outbox: Mutex<Vec<SentEmail>>,
    /// Refuse every message (used to exercise failure paths)
    fail: bool,
}

impl SimulatedMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            outbox: Mutex::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        match self.outbox.lock() {
            Ok(outbox) => outbox.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Notifier for SimulatedMailer {
    async fn send(&self, email: Email) -> bool {
        if self.fail {
            return false;
        }
        tracing::debug!(
            from = %email.from,
            to = %email.to,
            subject = %email.subject,
            "Simulated email delivered"
        );
        let mut outbox = match self.outbox.lock() {
            Ok(outbox) => outbox,
            Err(poisoned) => poisoned.into_inner(),
        };
        outbox.push(SentEmail {
            email,
            sent_at: Utc::now(),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::tests::sample_order;
    use crate::models::{OrderItem, OrderStatus};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "ada@example.com".to_string(),
            username: "ada".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            hashed_password: String::new(),
            role: "customer".to_string(),
            is_active: true,
            is_verified: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn mailer_keeps_sent_messages() {
        let mailer = SimulatedMailer::new();
        assert!(dispatch(&mailer, welcome_email(&user())).await);
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].email.to, "ada@example.com");
        assert_eq!(sent[0].email.subject, "Welcome to Storefront!");
    }

    #[tokio::test]
    async fn failures_are_reported_not_raised() {
        let mailer = SimulatedMailer::failing();
        assert!(!dispatch(&mailer, welcome_email(&user())).await);
        assert!(mailer.sent().is_empty());
    }

    #[test]
    fn confirmation_lists_every_line() {
        let mut order = sample_order(OrderStatus::Pending);
        order.items.push(OrderItem {
            id: Uuid::new_v4(),
            order_id: order.id,
            product_id: Uuid::new_v4(),
            quantity: 2,
            unit_price: Decimal::new(2999, 2),
            total_price: Decimal::new(5998, 2),
            product_name: "Ceramic Mug".to_string(),
            product_sku: "MUG-001".to_string(),
            created_at: order.created_at,
        });
        let email = order_confirmation_email(&user(), &order);
        assert!(email.subject.contains(&order.order_number));
        assert!(email.body.contains("Ceramic Mug x2 @ 29.99 = 59.98"));
        assert!(email.body.contains("Total: 75.98"));
    }
}
