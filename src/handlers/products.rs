use crate::{
    entities::product,
    errors::ApiError,
    handlers::common::success_response,
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// How many suggestions product and cart views carry.
pub const MAX_RECOMMENDATIONS: usize = 4;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProductDetailResponse {
    pub product: product::Model,
    /// Co-purchase suggestions, falling back to a random sample of the
    /// catalog while the purchase graph is still empty.
    pub recommendations: Vec<product::Model>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products))
        .route("/:id", get(get_product))
}

#[utoipa::path(
    get,
    path = "/api/v1/products",
    responses(
        (status = 200, description = "Available products", body = [product::Model])
    ),
    tag = "Products"
)]
pub async fn list_products(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let products = state.services.products.list_available().await?;
    Ok(success_response(products))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product detail with recommendations", body = ProductDetailResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state.services.products.get(id).await?;

    let mut recommendations = state
        .services
        .recommender
        .suggest_products(&[id], MAX_RECOMMENDATIONS)
        .await?;
    if recommendations.is_empty() {
        recommendations = state
            .services
            .products
            .random_available(MAX_RECOMMENDATIONS, &[id])
            .await?;
    }

    Ok(success_response(ProductDetailResponse {
        product,
        recommendations,
    }))
}
