use crate::{
    entities::product,
    errors::ApiError,
    handlers::common::{success_response, validate_input},
    services::payments::NamedLineItem,
    AppState,
};
use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CheckoutSessionRequest {
    #[validate(length(min = 1, max = 100))]
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSessionResponse {
    pub id: String,
    /// Provider-hosted payment page to redirect the customer to.
    pub url: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/checkout-session", post(create_checkout_session))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/checkout-session",
    request_body = CheckoutSessionRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutSessionResponse),
        (status = 404, description = "No pending order for this session", body = crate::errors::ErrorResponse),
        (status = 402, description = "Payment provider rejected the request", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unreachable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(req): Json<CheckoutSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&req)?;

    let order_id = state
        .services
        .orders
        .pending_order_id(&req.session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("No pending order for this session".to_string()))?;

    let (order_row, items) = state.services.orders.get(order_id).await?;
    if order_row.paid {
        return Err(ApiError::BadRequest("Order is already paid".to_string()));
    }

    // Names come from the catalog; prices stay the order-item snapshots.
    let ids: Vec<_> = items.iter().map(|i| i.product_id).collect();
    let products = product::Entity::find()
        .filter(product::Column::Id.is_in(ids))
        .all(&*state.db)
        .await
        .map_err(crate::errors::ServiceError::DatabaseError)?;

    let line_items: Vec<NamedLineItem> = items
        .iter()
        .map(|item| NamedLineItem {
            name: products
                .iter()
                .find(|p| p.id == item.product_id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| item.product_id.to_string()),
            unit_price: item.unit_price,
            quantity: item.quantity,
        })
        .collect();

    let session = state
        .services
        .payments
        .create_session(&order_row, &line_items)
        .await?;

    Ok(success_response(CheckoutSessionResponse {
        id: session.id,
        url: session.url,
    }))
}
