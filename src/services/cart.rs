use crate::{
    entities::{coupon, product},
    errors::ServiceError,
    events::{Event, EventSender},
    sessions::SessionStore,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// One cart line: the quantity and the unit price snapshotted when the
/// product was first added. Prices serialize as strings so session
/// round-trips never drift.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub quantity: i32,
    #[serde(with = "rust_decimal::serde::str")]
    #[schema(value_type = String)]
    pub price: Decimal,
}

/// Pure cart value object: product id (as string) to line. All transitions
/// are synchronous and side-effect free; `CartService` handles persistence.
///
/// Keyed by a BTreeMap so a given state always iterates and serializes the
/// same way, independent of insertion history.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartState(BTreeMap<String, CartLine>);

impl CartState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a product. Absent products are inserted with quantity 0 and the
    /// given unit price snapshot, then the quantity is either set
    /// (`override_quantity`) or added.
    pub fn add(&mut self, product_id: Uuid, unit_price: Decimal, quantity: i32, override_quantity: bool) {
        let line = self
            .0
            .entry(product_id.to_string())
            .or_insert(CartLine { quantity: 0, price: unit_price });
        if override_quantity {
            line.quantity = quantity;
        } else {
            line.quantity += quantity;
        }
    }

    /// Sets an absolute quantity. Returns false (unchanged) when the product
    /// is not in the cart; this is not an error.
    pub fn update(&mut self, product_id: Uuid, quantity: i32) -> bool {
        match self.0.get_mut(&product_id.to_string()) {
            Some(line) => {
                line.quantity = quantity;
                true
            }
            None => false,
        }
    }

    /// Removes a product. Returns false when it was not present.
    pub fn remove(&mut self, product_id: Uuid) -> bool {
        self.0.remove(&product_id.to_string()).is_some()
    }

    /// Cart total: Σ price × quantity over all lines.
    pub fn total(&self) -> Decimal {
        self.0
            .values()
            .map(|line| line.price * Decimal::from(line.quantity))
            .sum()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of units across all lines.
    pub fn unit_count(&self) -> i32 {
        self.0.values().map(|line| line.quantity).sum()
    }

    pub fn lines(&self) -> impl Iterator<Item = (&String, &CartLine)> {
        self.0.iter()
    }

    /// Product ids currently in the cart, skipping keys that fail to parse.
    pub fn product_ids(&self) -> Vec<Uuid> {
        self.0.keys().filter_map(|k| Uuid::parse_str(k).ok()).collect()
    }
}

/// A cart line resolved against the product catalog.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub name: String,
    pub slug: String,
    pub quantity: i32,
    #[serde(with = "rust_decimal::serde::str")]
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    #[schema(value_type = String)]
    pub line_total: Decimal,
}

/// Coupon summary attached to a cart view.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct AppliedCoupon {
    pub code: String,
    pub discount_percent: i32,
}

/// Full cart view with totals and the currently applied coupon.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub items: Vec<CartLineView>,
    #[serde(with = "rust_decimal::serde::str")]
    #[schema(value_type = String)]
    pub total: Decimal,
    pub coupon: Option<AppliedCoupon>,
    #[serde(with = "rust_decimal::serde::str")]
    #[schema(value_type = String)]
    pub discount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    #[schema(value_type = String)]
    pub total_after_discount: Decimal,
}

/// Session-backed cart service.
///
/// Every mutation is write-through: load the state, apply the pure
/// transition, persist immediately when something changed. Views re-resolve
/// product rows on every read so a restarted process serves the same carts.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    sessions: Arc<dyn SessionStore>,
    event_sender: Arc<EventSender>,
    cart_key: String,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        sessions: Arc<dyn SessionStore>,
        event_sender: Arc<EventSender>,
        cart_key: String,
    ) -> Self {
        Self {
            db,
            sessions,
            event_sender,
            cart_key,
        }
    }

    /// Loads the cart state for a session; missing sessions get an empty cart.
    pub async fn load(&self, session_id: &str) -> Result<CartState, ServiceError> {
        let raw = self
            .sessions
            .get(session_id, &self.cart_key)
            .await
            .map_err(|e| ServiceError::SessionError(e.to_string()))?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(CartState::new()),
        }
    }

    async fn save(&self, session_id: &str, state: &CartState) -> Result<(), ServiceError> {
        let json = serde_json::to_string(state)?;
        self.sessions
            .put(session_id, &self.cart_key, &json)
            .await
            .map_err(|e| ServiceError::SessionError(e.to_string()))
    }

    /// Adds a product to the session cart, snapshotting its current price.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        session_id: &str,
        product_id: Uuid,
        quantity: i32,
        override_quantity: bool,
    ) -> Result<CartState, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidInput(
                "Quantity must be positive".to_string(),
            ));
        }

        let product = product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let mut state = self.load(session_id).await?;
        state.add(product.id, product.price, quantity, override_quantity);
        self.save(session_id, &state).await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                session_id: session_id.to_string(),
                product_id,
            })
            .await;

        info!(session_id, %product_id, quantity, "Added item to cart");
        Ok(state)
    }

    /// Sets an absolute quantity for a product already in the cart. A product
    /// that is not in the cart leaves the state untouched.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        session_id: &str,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartState, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidInput(
                "Quantity must be positive".to_string(),
            ));
        }

        let mut state = self.load(session_id).await?;
        if state.update(product_id, quantity) {
            self.save(session_id, &state).await?;
            self.event_sender
                .send_or_log(Event::CartItemUpdated {
                    session_id: session_id.to_string(),
                    product_id,
                })
                .await;
        }
        Ok(state)
    }

    /// Removes a product from the cart; removing an absent product is a no-op.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        session_id: &str,
        product_id: Uuid,
    ) -> Result<CartState, ServiceError> {
        let mut state = self.load(session_id).await?;
        if state.remove(product_id) {
            self.save(session_id, &state).await?;
            self.event_sender
                .send_or_log(Event::CartItemRemoved {
                    session_id: session_id.to_string(),
                    product_id,
                })
                .await;
        }
        Ok(state)
    }

    /// Empties the session cart.
    #[instrument(skip(self))]
    pub async fn clear(&self, session_id: &str) -> Result<(), ServiceError> {
        self.sessions
            .remove(session_id, &self.cart_key)
            .await
            .map_err(|e| ServiceError::SessionError(e.to_string()))?;
        self.event_sender
            .send_or_log(Event::CartCleared {
                session_id: session_id.to_string(),
            })
            .await;
        Ok(())
    }

    /// Builds the resolved cart view. Lines whose product row no longer
    /// exists are omitted from the view but stay in the stored state.
    #[instrument(skip(self, applied_coupon))]
    pub async fn detail(
        &self,
        session_id: &str,
        applied_coupon: Option<coupon::Model>,
    ) -> Result<CartView, ServiceError> {
        let state = self.load(session_id).await?;
        self.view(&state, applied_coupon).await
    }

    /// Resolves a cart state against the catalog and computes totals.
    pub async fn view(
        &self,
        state: &CartState,
        applied_coupon: Option<coupon::Model>,
    ) -> Result<CartView, ServiceError> {
        let ids = state.product_ids();
        let products = if ids.is_empty() {
            Vec::new()
        } else {
            product::Entity::find()
                .filter(product::Column::Id.is_in(ids))
                .all(&*self.db)
                .await?
        };

        let mut items = Vec::with_capacity(products.len());
        for (key, line) in state.lines() {
            let Some(prod) = products.iter().find(|p| p.id.to_string() == *key) else {
                continue;
            };
            items.push(CartLineView {
                product_id: prod.id,
                name: prod.name.clone(),
                slug: prod.slug.clone(),
                quantity: line.quantity,
                unit_price: line.price,
                line_total: line.price * Decimal::from(line.quantity),
            });
        }

        let total = state.total();
        let discount = match &applied_coupon {
            Some(c) => Decimal::from(c.discount_percent) / Decimal::from(100) * total,
            None => Decimal::ZERO,
        };

        Ok(CartView {
            items,
            total,
            coupon: applied_coupon.map(|c| AppliedCoupon {
                code: c.code,
                discount_percent: c.discount_percent,
            }),
            discount,
            total_after_discount: total - discount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn pid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn add_accumulates_then_override_sets() {
        let mut cart = CartState::new();
        cart.add(pid(1), dec!(2.50), 2, false);
        cart.add(pid(1), dec!(9.99), 3, false);
        assert_eq!(cart.lines().next().unwrap().1.quantity, 5);
        // Price snapshot from the first add wins.
        assert_eq!(cart.lines().next().unwrap().1.price, dec!(2.50));

        cart.add(pid(1), dec!(9.99), 3, true);
        assert_eq!(cart.lines().next().unwrap().1.quantity, 3);
        assert_eq!(cart.total(), dec!(7.50));
    }

    #[test]
    fn update_missing_product_is_unchanged() {
        let mut cart = CartState::new();
        assert!(!cart.update(pid(7), 4));
        assert!(cart.is_empty());
    }

    #[test]
    fn remove_missing_product_is_a_no_op() {
        let mut cart = CartState::new();
        cart.add(pid(1), dec!(1.00), 1, false);
        assert!(!cart.remove(pid(2)));
        assert!(cart.remove(pid(1)));
        assert!(cart.is_empty());
    }

    #[test]
    fn serde_round_trips_decimal_strings() {
        let mut cart = CartState::new();
        cart.add(pid(1), dec!(12.30), 2, false);
        cart.add(pid(2), dec!(0.01), 1, false);

        let json = serde_json::to_string(&cart).unwrap();
        assert!(json.contains("\"12.30\""), "price must serialize as string: {json}");

        let back: CartState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cart);
        assert_eq!(back.total(), dec!(24.61));
    }

    #[test]
    fn unit_count_sums_quantities() {
        let mut cart = CartState::new();
        cart.add(pid(1), dec!(1.00), 2, false);
        cart.add(pid(2), dec!(2.00), 3, false);
        assert_eq!(cart.unit_count(), 5);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Add { id: u8, price_cents: u32, qty: i32, over: bool },
        Update { id: u8, qty: i32 },
        Remove { id: u8 },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6, 1u32..100_000, 1i32..50, any::<bool>())
                .prop_map(|(id, price_cents, qty, over)| Op::Add { id, price_cents, qty, over }),
            (0u8..6, 1i32..50).prop_map(|(id, qty)| Op::Update { id, qty }),
            (0u8..6).prop_map(|id| Op::Remove { id }),
        ]
    }

    proptest! {
        #[test]
        fn total_is_always_sum_of_lines(ops in proptest::collection::vec(op_strategy(), 0..40)) {
            let mut cart = CartState::new();
            for op in ops {
                match op {
                    Op::Add { id, price_cents, qty, over } => {
                        let price = Decimal::from(price_cents) / Decimal::from(100);
                        cart.add(pid(id as u128), price, qty, over);
                    }
                    Op::Update { id, qty } => {
                        cart.update(pid(id as u128), qty);
                    }
                    Op::Remove { id } => {
                        cart.remove(pid(id as u128));
                        // A removed product never lingers.
                        prop_assert!(!cart.product_ids().contains(&pid(id as u128)));
                    }
                }
                let expected: Decimal = cart
                    .lines()
                    .map(|(_, l)| l.price * Decimal::from(l.quantity))
                    .sum();
                prop_assert_eq!(cart.total(), expected);
            }
        }
    }
}
