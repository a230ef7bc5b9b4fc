use crate::{
    entities::order,
    errors::ServiceError,
    events::{Event, EventSender},
};
use rust_decimal::{prelude::*, RoundingStrategy};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// A priced order line ready for checkout: the product name for display and
/// the cart-snapshot unit price.
#[derive(Clone, Debug)]
pub struct NamedLineItem {
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
}

/// A created checkout session: the provider id and the redirect URL.
#[derive(Clone, Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct StripeCoupon {
    id: String,
}

/// Stripe Checkout session builder over the REST API.
///
/// Provider and transport errors surface to the caller uninterpreted; a
/// failed checkout is user-resubmittable, so there is no retry here.
#[derive(Clone)]
pub struct StripeCheckoutService {
    client: reqwest::Client,
    api_base: String,
    secret_key: Option<String>,
    currency: String,
    success_url: Option<String>,
    cancel_url: Option<String>,
    event_sender: Arc<EventSender>,
}

impl StripeCheckoutService {
    pub fn new(
        api_base: String,
        secret_key: Option<String>,
        currency: String,
        success_url: Option<String>,
        cancel_url: Option<String>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base,
            secret_key,
            currency,
            success_url,
            cancel_url,
            event_sender,
        }
    }

    /// Minor units for Stripe: round(unit_price × 100), half away from zero.
    pub fn unit_amount(unit_price: Decimal) -> i64 {
        (unit_price * Decimal::from(100))
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .unwrap_or(0)
    }

    /// Form parameters for the Checkout Session request. Pure; unit-tested
    /// without any network.
    pub fn session_params(
        &self,
        order_row: &order::Model,
        items: &[NamedLineItem],
        stripe_coupon_id: Option<&str>,
    ) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("client_reference_id".into(), order_row.id.to_string()),
        ];
        if let Some(url) = &self.success_url {
            params.push(("success_url".into(), url.clone()));
        }
        if let Some(url) = &self.cancel_url {
            params.push(("cancel_url".into(), url.clone()));
        }

        for (i, item) in items.iter().enumerate() {
            params.push((
                format!("line_items[{i}][price_data][currency]"),
                self.currency.clone(),
            ));
            params.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                Self::unit_amount(item.unit_price).to_string(),
            ));
            params.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                item.name.clone(),
            ));
            params.push((format!("line_items[{i}][quantity]"), item.quantity.to_string()));
        }

        if let Some(coupon_id) = stripe_coupon_id {
            params.push(("discounts[0][coupon]".into(), coupon_id.to_string()));
        }

        params
    }

    fn secret_key(&self) -> Result<&str, ServiceError> {
        self.secret_key.as_deref().ok_or_else(|| {
            ServiceError::InvalidOperation("Payment provider is not configured".to_string())
        })
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, ServiceError> {
        let key = self.secret_key()?;
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .basic_auth(key, None::<&str>)
            .form(params)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("Stripe request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("Stripe response unreadable: {e}")))?;

        if !status.is_success() {
            return Err(ServiceError::PaymentFailed(format!(
                "Stripe returned {status}: {body}"
            )));
        }

        serde_json::from_str(&body).map_err(|e| {
            ServiceError::ExternalServiceError(format!("Unexpected Stripe response: {e}"))
        })
    }

    /// Creates a one-time percentage coupon on the provider side.
    async fn create_provider_coupon(&self, percent: i32) -> Result<String, ServiceError> {
        let params = vec![
            ("percent_off".to_string(), percent.to_string()),
            ("duration".to_string(), "once".to_string()),
        ];
        let coupon: StripeCoupon = self.post_form("/v1/coupons", &params).await?;
        Ok(coupon.id)
    }

    /// Builds a Checkout Session for the order and returns the redirect URL.
    /// Orders with a discount snapshot get a one-time percent coupon
    /// attached to the session.
    #[instrument(skip(self, items), fields(order_id = %order_row.id))]
    pub async fn create_session(
        &self,
        order_row: &order::Model,
        items: &[NamedLineItem],
    ) -> Result<CheckoutSession, ServiceError> {
        let stripe_coupon_id = if order_row.discount_percent > 0 {
            Some(self.create_provider_coupon(order_row.discount_percent).await?)
        } else {
            None
        };

        let params = self.session_params(order_row, items, stripe_coupon_id.as_deref());
        let session: CheckoutSession = self.post_form("/v1/checkout/sessions", &params).await?;

        self.event_sender
            .send_or_log(Event::CheckoutSessionCreated { order_id: order_row.id })
            .await;
        info!(session_id = %session.id, "Checkout session created");
        Ok(session)
    }
}
