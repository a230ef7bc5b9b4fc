use crate::{
    entities::{order, order_item},
    errors::ApiError,
    handlers::common::{created_response, success_response, validate_input},
    services::orders::{CustomerInfo, OrderService, OrderTotals},
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 100))]
    pub session_id: String,
    #[validate]
    #[serde(flatten)]
    pub customer: CustomerInfo,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub totals: OrderTotals,
    /// Where to initiate payment for this order.
    pub payment_path: String,
}

const PAYMENT_PATH: &str = "/api/v1/payments/checkout-session";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/:id", get(get_order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created from the session cart", body = OrderResponse),
        (status = 400, description = "Empty cart or invalid customer details", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&req)?;
    let (order_row, items) = state
        .services
        .orders
        .create_order(&req.session_id, req.customer)
        .await?;
    let totals = OrderService::totals(&order_row, &items);

    Ok(created_response(OrderResponse {
        order: order_row,
        items,
        totals,
        payment_path: PAYMENT_PATH.to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with items and totals", body = OrderResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let (order_row, items) = state.services.orders.get(id).await?;
    let totals = OrderService::totals(&order_row, &items);

    Ok(success_response(OrderResponse {
        order: order_row,
        items,
        totals,
        payment_path: PAYMENT_PATH.to_string(),
    }))
}
