use crate::{
    entities::{order, order_item},
    errors::ServiceError,
    events::{Event, EventSender},
    message_queue::{Message, MessageQueue},
    services::{CartService, CouponService},
    sessions::{SessionStore, SESSION_KEY_ORDER_ID},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Customer details for order creation.
#[derive(Clone, Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct CustomerInfo {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 250))]
    pub address: String,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
}

/// Order totals derived from the item snapshots and the discount snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderTotals {
    #[serde(with = "rust_decimal::serde::str")]
    #[schema(value_type = String)]
    pub total: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    #[schema(value_type = String)]
    pub discount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    #[schema(value_type = String)]
    pub payable: Decimal,
}

/// Order creation and payment finalization.
///
/// An order is an immutable snapshot of a cart: item prices come from the
/// cart lines (never live product prices) and the coupon discount percent is
/// copied onto the order row. The only mutation afterwards is `mark_paid`.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    sessions: Arc<dyn SessionStore>,
    carts: CartService,
    coupons: CouponService,
    queue: Arc<dyn MessageQueue>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        sessions: Arc<dyn SessionStore>,
        carts: CartService,
        coupons: CouponService,
        queue: Arc<dyn MessageQueue>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            sessions,
            carts,
            coupons,
            queue,
            event_sender,
        }
    }

    /// Creates an order from the session cart.
    ///
    /// The order row and all item rows are inserted in one transaction.
    /// After commit the cart is cleared, the order id is stored in the
    /// session for the payment step, and the confirmation message is
    /// enqueued fire-and-forget.
    #[instrument(skip(self, customer))]
    pub async fn create_order(
        &self,
        session_id: &str,
        customer: CustomerInfo,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        customer.validate()?;

        let state = self.carts.load(session_id).await?;
        if state.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "Cannot create an order from an empty cart".to_string(),
            ));
        }

        let now = Utc::now();
        let applied = self.coupons.current(session_id, now).await?;
        let (coupon_id, discount_percent) = match &applied {
            Some(c) => (Some(c.id), c.discount_percent),
            None => (None, 0),
        };

        let order_id = Uuid::new_v4();
        let txn = self.db.begin().await?;

        let order_row = order::ActiveModel {
            id: Set(order_id),
            first_name: Set(customer.first_name),
            last_name: Set(customer.last_name),
            email: Set(customer.email),
            address: Set(customer.address),
            postal_code: Set(customer.postal_code),
            city: Set(customer.city),
            paid: Set(false),
            stripe_id: Set(None),
            coupon_id: Set(coupon_id),
            discount_percent: Set(discount_percent),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::new();
        for (key, line) in state.lines() {
            let Ok(product_id) = Uuid::parse_str(key) else {
                continue;
            };
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product_id),
                unit_price: Set(line.price),
                quantity: Set(line.quantity),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        txn.commit().await?;

        self.carts.clear(session_id).await?;
        self.coupons.clear(session_id).await?;
        self.sessions
            .put(session_id, SESSION_KEY_ORDER_ID, &order_id.to_string())
            .await
            .map_err(|e| ServiceError::SessionError(e.to_string()))?;

        // Confirmation e-mail is fire-and-forget; the order stands either way.
        if let Err(e) = self
            .queue
            .publish(Message::order_created(order_id, &order_row.email))
            .await
        {
            error!(order_id = %order_id, "Failed to enqueue order confirmation: {}", e);
        }

        self.event_sender.send_or_log(Event::OrderCreated(order_id)).await;
        info!(order_id = %order_id, items = items.len(), "Order created");

        Ok((order_row, items))
    }

    /// Fetches an order with its items.
    pub async fn get(
        &self,
        order_id: Uuid,
    ) -> Result<(order::Model, Vec<order_item::Model>), ServiceError> {
        let order_row = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok((order_row, items))
    }

    /// The pending order stored in a session, if any.
    pub async fn pending_order_id(&self, session_id: &str) -> Result<Option<Uuid>, ServiceError> {
        let raw = self
            .sessions
            .get(session_id, SESSION_KEY_ORDER_ID)
            .await
            .map_err(|e| ServiceError::SessionError(e.to_string()))?;
        Ok(raw.and_then(|v| Uuid::parse_str(&v).ok()))
    }

    /// Marks an order paid. Idempotent: the first call flips the paid flag,
    /// records the payment reference and returns true; every later call
    /// changes nothing and returns false, regardless of the reference.
    #[instrument(skip(self))]
    pub async fn mark_paid(
        &self,
        order_id: Uuid,
        payment_reference: &str,
    ) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;

        let order_row = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order_row.paid {
            txn.commit().await?;
            return Ok(false);
        }

        let mut active: order::ActiveModel = order_row.into();
        active.paid = Set(true);
        active.stripe_id = Set(Some(payment_reference.to_string()));
        active.update(&txn).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderPaid(order_id)).await;
        info!(order_id = %order_id, "Order marked paid");
        Ok(true)
    }

    /// Enqueues the invoice message for a paid order.
    pub async fn dispatch_invoice(&self, order_row: &order::Model) -> Result<(), ServiceError> {
        self.queue
            .publish(Message::invoice(order_row.id, &order_row.email))
            .await
            .map_err(|e| ServiceError::QueueError(e.to_string()))
    }

    /// Totals from the item snapshots and the order's discount snapshot.
    pub fn totals(order_row: &order::Model, items: &[order_item::Model]) -> OrderTotals {
        let total: Decimal = items.iter().map(order_item::Model::line_total).sum();
        let discount = Decimal::from(order_row.discount_percent) / Decimal::from(100) * total;
        OrderTotals {
            total,
            discount,
            payable: total - discount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order_fixture(discount_percent: i32) -> order::Model {
        order::Model {
            id: Uuid::new_v4(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            address: "1 Analytical Way".into(),
            postal_code: "E1 6AN".into(),
            city: "London".into(),
            paid: false,
            stripe_id: None,
            coupon_id: None,
            discount_percent,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn totals_apply_the_discount_snapshot() {
        let order_row = order_fixture(10);
        let items = vec![
            order_item::Model::new(order_row.id, Uuid::new_v4(), dec!(40.00), 2),
            order_item::Model::new(order_row.id, Uuid::new_v4(), dec!(20.00), 1),
        ];

        let totals = OrderService::totals(&order_row, &items);
        assert_eq!(totals.total, dec!(100.00));
        assert_eq!(totals.discount, dec!(10.00));
        assert_eq!(totals.payable, dec!(90.00));
    }

    #[test]
    fn totals_without_coupon_have_zero_discount() {
        let order_row = order_fixture(0);
        let items = vec![order_item::Model::new(order_row.id, Uuid::new_v4(), dec!(5.50), 3)];

        let totals = OrderService::totals(&order_row, &items);
        assert_eq!(totals.total, dec!(16.50));
        assert_eq!(totals.discount, dec!(0.00));
        assert_eq!(totals.payable, dec!(16.50));
    }

    #[test]
    fn customer_info_validation_rejects_bad_email() {
        let customer = CustomerInfo {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "not-an-email".into(),
            address: "1 Analytical Way".into(),
            postal_code: "E1 6AN".into(),
            city: "London".into(),
        };
        assert!(customer.validate().is_err());
    }
}
