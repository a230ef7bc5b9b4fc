use crate::{
    entities::product,
    errors::ApiError,
    handlers::common::{no_content_response, success_response, validate_input},
    handlers::products::MAX_RECOMMENDATIONS,
    services::cart::CartView,
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Set the quantity instead of adding to it.
    #[serde(default)]
    pub override_quantity: bool,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateItemRequest {
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 50))]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CartDetailResponse {
    #[serde(flatten)]
    pub cart: CartView,
    pub recommendations: Vec<product::Model>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:session_id", get(get_cart))
        .route("/:session_id/items", post(add_item))
        .route("/:session_id/items/:product_id", put(update_item))
        .route("/:session_id/items/:product_id", delete(remove_item))
        .route("/:session_id/clear", post(clear_cart))
        .route("/:session_id/coupon", post(apply_coupon))
}

/// Resolved cart view with the currently valid session coupon applied.
async fn cart_view(state: &AppState, session_id: &str) -> Result<CartView, ApiError> {
    let coupon = state
        .services
        .coupons
        .current(session_id, Utc::now())
        .await?;
    Ok(state.services.carts.detail(session_id, coupon).await?)
}

#[utoipa::path(
    get,
    path = "/api/v1/carts/{session_id}",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Cart view with recommendations", body = CartDetailResponse)
    ),
    tag = "Carts"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = cart_view(&state, &session_id).await?;

    let in_cart: Vec<Uuid> = cart.items.iter().map(|i| i.product_id).collect();
    let mut recommendations = if in_cart.is_empty() {
        Vec::new()
    } else {
        state
            .services
            .recommender
            .suggest_products(&in_cart, MAX_RECOMMENDATIONS)
            .await?
    };
    if recommendations.is_empty() {
        recommendations = state
            .services
            .products
            .random_available(MAX_RECOMMENDATIONS, &in_cart)
            .await?;
    }

    Ok(success_response(CartDetailResponse {
        cart,
        recommendations,
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/carts/{session_id}/items",
    params(("session_id" = String, Path, description = "Session id")),
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Updated cart view", body = CartView),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn add_item(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&req)?;
    state
        .services
        .carts
        .add_item(&session_id, req.product_id, req.quantity, req.override_quantity)
        .await?;
    let cart = cart_view(&state, &session_id).await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    put,
    path = "/api/v1/carts/{session_id}/items/{product_id}",
    params(
        ("session_id" = String, Path, description = "Session id"),
        ("product_id" = Uuid, Path, description = "Product id")
    ),
    request_body = UpdateItemRequest,
    responses(
        (status = 200, description = "Updated cart view; unknown products leave the cart unchanged", body = CartView)
    ),
    tag = "Carts"
)]
pub async fn update_item(
    State(state): State<AppState>,
    Path((session_id, product_id)): Path<(String, Uuid)>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&req)?;
    state
        .services
        .carts
        .update_item(&session_id, product_id, req.quantity)
        .await?;
    let cart = cart_view(&state, &session_id).await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    delete,
    path = "/api/v1/carts/{session_id}/items/{product_id}",
    params(
        ("session_id" = String, Path, description = "Session id"),
        ("product_id" = Uuid, Path, description = "Product id")
    ),
    responses(
        (status = 200, description = "Updated cart view", body = CartView)
    ),
    tag = "Carts"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    Path((session_id, product_id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .carts
        .remove_item(&session_id, product_id)
        .await?;
    let cart = cart_view(&state, &session_id).await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    post,
    path = "/api/v1/carts/{session_id}/clear",
    params(("session_id" = String, Path, description = "Session id")),
    responses((status = 204, description = "Cart emptied")),
    tag = "Carts"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.carts.clear(&session_id).await?;
    Ok(no_content_response())
}

#[utoipa::path(
    post,
    path = "/api/v1/carts/{session_id}/coupon",
    params(("session_id" = String, Path, description = "Session id")),
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Cart view; rejected codes simply come back without a coupon", body = CartView)
    ),
    tag = "Carts"
)]
pub async fn apply_coupon(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<ApplyCouponRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&req)?;
    // Rejections are swallowed here on purpose: the response is the cart
    // view either way, with or without a coupon attached.
    state
        .services
        .coupons
        .apply(&session_id, &req.code, Utc::now())
        .await?;
    let cart = cart_view(&state, &session_id).await?;
    Ok(success_response(cart))
}
